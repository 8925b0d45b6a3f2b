//! Version Allocator - dense, strictly increasing version numbers per model
//!
//! The current maximum is derived by scanning the model directory rather
//! than read from a persisted counter, so it cannot drift from what is on
//! disk after a crash. Allocation runs under the model's lock file:
//!
//! 1. acquire the lock (bounded wait, stale holders reclaimed)
//! 2. list existing version directories
//! 3. compute `max + 1`, or 1 for a new model
//! 4. reserve the number by creating its directory before releasing
//! 5. release the lock (guard drop, on every exit path)
//!
//! A reserved directory without a `meta.json` is an incomplete version: its
//! number is consumed, but readers never resolve it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::layout::{validate_component, Layout};
use crate::lock::{LockFile, LockPolicy};
use crate::{EntityKind, Error, Result};

/// A version number reserved for a model, not yet populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    model_name: String,
    version: u64,
    dir: PathBuf,
}

impl Reservation {
    /// Model the version belongs to.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Reserved version number.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Directory the version record goes into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Allocates version numbers for registered models.
#[derive(Debug, Clone)]
pub struct VersionAllocator {
    layout: Layout,
    policy: LockPolicy,
    durable: bool,
}

impl VersionAllocator {
    /// Create an allocator over `layout` using the given lock policy.
    #[must_use]
    pub const fn new(layout: Layout, policy: LockPolicy, durable: bool) -> Self {
        Self {
            layout,
            policy,
            durable,
        }
    }

    /// Reserve the next version number of `model_name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unusable model name, `LockTimeout` if the
    /// model's lock cannot be acquired within the bound, or an IO error.
    pub fn next_version(&self, model_name: &str) -> Result<Reservation> {
        validate_component(model_name, "model name")?;
        let model_dir = self.layout.model_dir(model_name);
        fs::create_dir_all(&model_dir)?;

        let _lock = LockFile::acquire(&self.layout.version_lock(model_name), model_name, &self.policy)?;

        let version = scan_versions(&model_dir)?.last().map_or(1, |max| max + 1);
        let dir = self.layout.version_dir(model_name, version);
        fs::create_dir(&dir).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::already_exists(EntityKind::ModelVersion, format!("{model_name}@{version}"))
            } else {
                e.into()
            }
        })?;
        if self.durable {
            fs::File::open(&model_dir)?.sync_all()?;
        }

        info!(model = model_name, version, "reserved model version");
        Ok(Reservation {
            model_name: model_name.to_string(),
            version,
            dir,
        })
    }
}

/// Version numbers present under a model directory, ascending.
///
/// Includes reserved-but-unpopulated versions. A missing directory yields
/// no versions.
///
/// # Errors
///
/// Returns an IO error if the directory exists but cannot be listed.
pub fn scan_versions(model_dir: &Path) -> Result<Vec<u64>> {
    let entries = match fs::read_dir(model_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(version) = name.to_str().and_then(parse_version) {
            versions.push(version);
        }
    }
    versions.sort_unstable();
    debug!(dir = %model_dir.display(), count = versions.len(), "scanned versions");
    Ok(versions)
}

/// Canonical decimal rendering only: `"7"` but not `"07"`, `"+7"` or `"0"`.
fn parse_version(name: &str) -> Option<u64> {
    let version = name.parse::<u64>().ok()?;
    (version >= 1 && version.to_string() == name).then_some(version)
}
