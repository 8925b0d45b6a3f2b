//! On-disk layout of a store root
//!
//! ```text
//! <root>/experiments/<experiment_id>/meta.json
//! <root>/experiments/<experiment_id>/runs/<run_id>/meta.json
//! <root>/experiments/<experiment_id>/runs/<run_id>/artifacts/<relative_path>
//! <root>/models/<model_name>/<version>/meta.json
//! <root>/models/<model_name>/.version.lock
//! ```
//!
//! Entries whose name starts with `.` are never entities: they are locks,
//! in-flight temporaries, or tombstones awaiting removal. Listings skip them.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// File name of every metadata record.
pub const META_FILE: &str = "meta.json";

/// File name of a model's version-allocation lock.
pub const VERSION_LOCK_FILE: &str = ".version.lock";

/// Prefix of in-flight temporaries.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Prefix of directories renamed aside for deletion.
pub const TOMBSTONE_PREFIX: &str = ".deleted-";

const EXPERIMENTS_DIR: &str = "experiments";
/// Name of the run directory inside an experiment.
pub const RUNS_DIR: &str = "runs";
/// Name of the artifact directory inside a run.
pub const ARTIFACTS_DIR: &str = "artifacts";
const MODELS_DIR: &str = "models";

/// Path computations for one store root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all experiments.
    #[must_use]
    pub fn experiments_dir(&self) -> PathBuf {
        self.root.join(EXPERIMENTS_DIR)
    }

    /// Directory of one experiment.
    #[must_use]
    pub fn experiment_dir(&self, experiment_id: &str) -> PathBuf {
        self.experiments_dir().join(experiment_id)
    }

    /// Directory holding the runs of one experiment.
    #[must_use]
    pub fn runs_dir(&self, experiment_id: &str) -> PathBuf {
        self.experiment_dir(experiment_id).join(RUNS_DIR)
    }

    /// Directory of one run.
    #[must_use]
    pub fn run_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.runs_dir(experiment_id).join(run_id)
    }

    /// Artifact directory of one run.
    #[must_use]
    pub fn artifacts_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(experiment_id, run_id).join(ARTIFACTS_DIR)
    }

    /// Directory holding all registered models.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }

    /// Directory of one registered model.
    #[must_use]
    pub fn model_dir(&self, model_name: &str) -> PathBuf {
        self.models_dir().join(model_name)
    }

    /// Directory of one model version.
    #[must_use]
    pub fn version_dir(&self, model_name: &str, version: u64) -> PathBuf {
        self.model_dir(model_name).join(version.to_string())
    }

    /// Version-allocation lock of one model.
    #[must_use]
    pub fn version_lock(&self, model_name: &str) -> PathBuf {
        self.model_dir(model_name).join(VERSION_LOCK_FILE)
    }
}

/// Metadata record inside an entity directory.
#[must_use]
pub fn meta_path(dir: &Path) -> PathBuf {
    dir.join(META_FILE)
}

/// Whether a directory entry name denotes a visible entity.
#[must_use]
pub fn is_visible(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.')
}

/// Names of visible subdirectories of `dir`, sorted. Missing `dir` yields none.
pub(crate) fn visible_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| is_visible(n)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Validate a name used as a single path component (model names, experiment names).
///
/// # Errors
///
/// Returns `InvalidInput` for empty names, hidden names, separators, or `..`.
pub fn validate_component(name: &str, what: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.len() > 255;
    if bad {
        return Err(Error::InvalidInput(format!(
            "{what} '{name}' must be a non-empty single path component not starting with '.'"
        )));
    }
    Ok(())
}

/// Validate and normalize a relative artifact path.
///
/// # Errors
///
/// Returns `InvalidInput` for absolute paths, `..` components, hidden
/// components, or paths with no file component.
pub fn normalize_relative(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part_str = part.to_string_lossy();
                if part_str.starts_with('.') {
                    return Err(Error::InvalidInput(format!(
                        "artifact path '{}' contains hidden component '{part_str}'",
                        path.display()
                    )));
                }
                out.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!(
                    "artifact path '{}' must be relative and stay inside the run",
                    path.display()
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::InvalidInput(format!(
            "artifact path '{}' is empty",
            path.display()
        )));
    }
    Ok(out)
}

/// Render a relative path with `/` separators for storage in records.
#[must_use]
pub fn to_record_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
