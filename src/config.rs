//! Store configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bounded wait for the version-allocation lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between lock acquisition attempts.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default age after which a held lock is considered abandoned.
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(60);

/// Default number of fresh identifiers drawn after a collision.
pub const DEFAULT_ID_RETRY_LIMIT: u32 = 5;

/// Configuration for a [`Store`](crate::Store).
///
/// Serializable so deployments can keep it next to the store root as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    root: PathBuf,
    #[serde(default = "default_lock_timeout")]
    lock_timeout: Duration,
    #[serde(default = "default_lock_poll_interval")]
    lock_poll_interval: Duration,
    #[serde(default = "default_stale_lock_after")]
    stale_lock_after: Duration,
    #[serde(default = "default_id_retry_limit")]
    id_retry_limit: u32,
    #[serde(default = "default_durable")]
    durable: bool,
}

const fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

const fn default_lock_poll_interval() -> Duration {
    DEFAULT_LOCK_POLL_INTERVAL
}

const fn default_stale_lock_after() -> Duration {
    DEFAULT_STALE_LOCK_AFTER
}

const fn default_id_retry_limit() -> u32 {
    DEFAULT_ID_RETRY_LIMIT
}

const fn default_durable() -> bool {
    true
}

impl StoreConfig {
    /// Configuration with defaults for the given root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::builder(root).build()
    }

    /// Create a builder for a store rooted at `root`.
    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(root)
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bounded wait for the version-allocation lock.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Interval between lock acquisition attempts.
    #[must_use]
    pub const fn lock_poll_interval(&self) -> Duration {
        self.lock_poll_interval
    }

    /// Age after which a held lock may be reclaimed.
    #[must_use]
    pub const fn stale_lock_after(&self) -> Duration {
        self.stale_lock_after
    }

    /// Number of fresh identifiers drawn after a collision before giving up.
    #[must_use]
    pub const fn id_retry_limit(&self) -> u32 {
        self.id_retry_limit
    }

    /// Whether commits fsync files and their parent directories.
    #[must_use]
    pub const fn durable(&self) -> bool {
        self.durable
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            config: StoreConfig {
                root: root.into(),
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
                lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
                stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
                id_retry_limit: DEFAULT_ID_RETRY_LIMIT,
                durable: true,
            },
        }
    }

    /// Set the bounded wait for the version-allocation lock.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the interval between lock acquisition attempts.
    #[must_use]
    pub const fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lock_poll_interval = interval;
        self
    }

    /// Set the age after which a held lock may be reclaimed.
    #[must_use]
    pub const fn stale_lock_after(mut self, age: Duration) -> Self {
        self.config.stale_lock_after = age;
        self
    }

    /// Set the identifier-collision retry bound.
    #[must_use]
    pub const fn id_retry_limit(mut self, limit: u32) -> Self {
        self.config.id_retry_limit = limit;
        self
    }

    /// Enable or disable fsync on commit (disable only for throwaway stores).
    #[must_use]
    pub const fn durable(mut self, durable: bool) -> Self {
        self.config.durable = durable;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> StoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::new("/tmp/store");
        assert_eq!(config.root(), Path::new("/tmp/store"));
        assert_eq!(config.lock_timeout(), DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.stale_lock_after(), DEFAULT_STALE_LOCK_AFTER);
        assert_eq!(config.id_retry_limit(), DEFAULT_ID_RETRY_LIMIT);
        assert!(config.durable());
    }

    #[test]
    fn test_config_builder_chain() {
        let config = StoreConfig::builder("/tmp/store")
            .lock_timeout(Duration::from_millis(250))
            .lock_poll_interval(Duration::from_millis(1))
            .stale_lock_after(Duration::from_secs(5))
            .id_retry_limit(2)
            .durable(false)
            .build();

        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(1));
        assert_eq!(config.stale_lock_after(), Duration::from_secs(5));
        assert_eq!(config.id_retry_limit(), 2);
        assert!(!config.durable());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: StoreConfig = serde_json::from_str(r#"{"root": "/data/track"}"#).unwrap();
        assert_eq!(config, StoreConfig::new("/data/track"));
    }
}
