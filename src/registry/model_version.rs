//! Model Version Record - numbered pointer from a model name to a run artifact

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A registered version of a model.
///
/// Points at one artifact of one finished run. The version number is
/// assigned once by the version allocator and never reused; only the tags
/// change after registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelVersion {
    model_name: String,
    version: u64,
    source_run_id: String,
    source_experiment_id: String,
    source_artifact_path: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    registered_at: DateTime<Utc>,
}

impl ModelVersion {
    /// Create a version record stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `model_name` - Registered model name
    /// * `version` - Allocated version number (starting at 1)
    /// * `source_run_id` - Run that produced the artifact
    /// * `source_experiment_id` - Experiment owning that run
    /// * `source_artifact_path` - Artifact path relative to the run's artifact directory
    #[must_use]
    pub fn new(
        model_name: impl Into<String>,
        version: u64,
        source_run_id: impl Into<String>,
        source_experiment_id: impl Into<String>,
        source_artifact_path: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            version,
            source_run_id: source_run_id.into(),
            source_experiment_id: source_experiment_id.into(),
            source_artifact_path: source_artifact_path.into(),
            tags: BTreeMap::new(),
            registered_at: Utc::now(),
        }
    }

    /// Attach initial tags.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Get the model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Get the version number.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Get the ID of the source run.
    #[must_use]
    pub fn source_run_id(&self) -> &str {
        &self.source_run_id
    }

    /// Get the ID of the experiment owning the source run.
    #[must_use]
    pub fn source_experiment_id(&self) -> &str {
        &self.source_experiment_id
    }

    /// Get the artifact path relative to the source run's artifact directory.
    #[must_use]
    pub fn source_artifact_path(&self) -> &str {
        &self.source_artifact_path
    }

    /// Get the tags.
    #[must_use]
    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Get the registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Merge tags, overwriting existing keys.
    pub fn merge_tags(&mut self, tags: impl IntoIterator<Item = (String, String)>) {
        self.tags.extend(tags);
    }
}

/// Which version of a model to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSpec {
    /// Highest complete version
    Latest,
    /// A specific version number
    Number(u64),
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<u64> for VersionSpec {
    fn from(version: u64) -> Self {
        Self::Number(version)
    }
}

impl FromStr for VersionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        match s.parse::<u64>() {
            Ok(n) if n >= 1 => Ok(Self::Number(n)),
            _ => Err(Error::InvalidInput(format!(
                "version must be 'latest' or a number >= 1, got '{s}'"
            ))),
        }
    }
}
