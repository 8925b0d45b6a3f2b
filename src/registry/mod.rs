//! Model Registry
//!
//! Promotes artifacts of finished runs to numbered versions of a named model.
//! Version numbers come from the [`VersionAllocator`]; version records are
//! written through the [`MetadataWriter`](crate::writer::MetadataWriter).
//!
//! ## Layout
//!
//! ```text
//! models/<model_name>/.version.lock   # held only while allocating
//! models/<model_name>/<version>/meta.json
//! ```
//!
//! A version directory without `meta.json` was reserved by a registration
//! that never completed. Its number stays consumed; "latest" skips it.

mod allocator;
mod model_version;

pub use allocator::{scan_versions, Reservation, VersionAllocator};
pub use model_version::{ModelVersion, VersionSpec};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::experiment::{RunRecord, RunStatus};
use crate::layout::{
    meta_path, normalize_relative, to_record_path, validate_component, visible_dirs, Layout,
};
use crate::writer::{read_record, MetadataWriter};
use crate::{EntityKind, Error, Result};

/// A model version resolved to the artifact it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    version: ModelVersion,
    artifact_path: PathBuf,
}

impl ResolvedModel {
    /// The version record.
    #[must_use]
    pub const fn version(&self) -> &ModelVersion {
        &self.version
    }

    /// Absolute path of the artifact bytes.
    #[must_use]
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Read the artifact bytes. Deserializing them is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns `NotFound(Artifact)` if the artifact vanished, or an IO error.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.artifact_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(EntityKind::Artifact, self.artifact_path.display().to_string())
            } else {
                e.into()
            }
        })
    }
}

/// Registry Manager.
#[derive(Debug, Clone)]
pub struct Registry {
    layout: Layout,
    writer: MetadataWriter,
    allocator: VersionAllocator,
}

impl Registry {
    /// Create a registry over `layout`.
    #[must_use]
    pub const fn new(layout: Layout, writer: MetadataWriter, allocator: VersionAllocator) -> Self {
        Self {
            layout,
            writer,
            allocator,
        }
    }

    /// The version allocator backing this registry.
    #[must_use]
    pub const fn allocator(&self) -> &VersionAllocator {
        &self.allocator
    }

    /// Register `artifact_path` of `run` as the next version of `model_name`.
    ///
    /// Validation happens before allocation, so a rejected registration
    /// consumes no version number.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the run is not FINISHED
    /// - `NotFound(Artifact)` if the artifact does not exist under the run
    /// - `InvalidInput` for an unusable model name or artifact path
    /// - `LockTimeout` if version allocation could not get the lock
    pub fn register(
        &self,
        run: &RunRecord,
        artifact_path: &Path,
        model_name: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        validate_component(model_name, "model name")?;
        if run.status() != RunStatus::Finished {
            return Err(Error::invalid_state(
                EntityKind::Run,
                run.run_id(),
                format!("only FINISHED runs can be registered, run is {}", run.status()),
            ));
        }

        let relative = normalize_relative(artifact_path)?;
        let source = self
            .layout
            .artifacts_dir(run.experiment_id(), run.run_id())
            .join(&relative);
        if !source.is_file() {
            return Err(Error::not_found(
                EntityKind::Artifact,
                format!("{}/{}", run.run_id(), to_record_path(&relative)),
            ));
        }

        let reservation = self.allocator.next_version(model_name)?;
        let record = ModelVersion::new(
            model_name,
            reservation.version(),
            run.run_id(),
            run.experiment_id(),
            to_record_path(&relative),
        )
        .with_tags(tags);
        self.writer.write(&meta_path(reservation.dir()), &record)?;

        info!(
            model = model_name,
            version = record.version(),
            run_id = run.run_id(),
            "registered model version"
        );
        Ok(record)
    }

    /// Resolve a version (or "latest") of `model_name` to its artifact.
    ///
    /// "latest" is the highest version with a complete, parseable record;
    /// reserved-but-unpopulated and corrupt versions are skipped.
    ///
    /// # Errors
    ///
    /// - `NotFound(Model)` if the model was never registered
    /// - `NotFound(ModelVersion)` if the version is missing or incomplete
    /// - `CorruptRecord` if a specifically requested version does not parse
    /// - `NotFound(Artifact)` if the source artifact no longer exists
    pub fn load(&self, model_name: &str, spec: VersionSpec) -> Result<ResolvedModel> {
        let version = match spec {
            VersionSpec::Number(number) => self.get_version(model_name, number)?,
            VersionSpec::Latest => self.latest(model_name)?,
        };
        let artifact_path = self
            .layout
            .artifacts_dir(version.source_experiment_id(), version.source_run_id())
            .join(version.source_artifact_path());
        if !artifact_path.is_file() {
            return Err(Error::not_found(
                EntityKind::Artifact,
                artifact_path.display().to_string(),
            ));
        }
        Ok(ResolvedModel {
            version,
            artifact_path,
        })
    }

    /// Read the record of one complete version.
    ///
    /// # Errors
    ///
    /// `NotFound(Model)`, `NotFound(ModelVersion)` or `CorruptRecord`.
    pub fn get_version(&self, model_name: &str, version: u64) -> Result<ModelVersion> {
        self.ensure_model(model_name)?;
        read_record(&meta_path(&self.layout.version_dir(model_name, version)))?.ok_or_else(|| {
            Error::not_found(EntityKind::ModelVersion, format!("{model_name}@{version}"))
        })
    }

    fn latest(&self, model_name: &str) -> Result<ModelVersion> {
        self.ensure_model(model_name)?;
        let model_dir = self.layout.model_dir(model_name);
        for version in scan_versions(&model_dir)?.into_iter().rev() {
            let path = meta_path(&self.layout.version_dir(model_name, version));
            match read_record::<ModelVersion>(&path) {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {}
                Err(err @ Error::CorruptRecord { .. }) => {
                    warn!(model = model_name, version, error = %err, "skipping unreadable version");
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::not_found(
            EntityKind::ModelVersion,
            format!("{model_name}@latest"),
        ))
    }

    /// Merge one tag into a version record (last writer wins).
    ///
    /// # Errors
    ///
    /// `NotFound` / `CorruptRecord` from reading the version, or an IO error.
    pub fn tag(&self, model_name: &str, version: u64, key: &str, value: &str) -> Result<ModelVersion> {
        self.add_tags(
            model_name,
            version,
            BTreeMap::from([(key.to_string(), value.to_string())]),
        )
    }

    /// Merge several tags into a version record via read-modify-atomic-replace.
    ///
    /// # Errors
    ///
    /// `NotFound` / `CorruptRecord` from reading the version, or an IO error.
    pub fn add_tags(
        &self,
        model_name: &str,
        version: u64,
        tags: BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        let mut record = self.get_version(model_name, version)?;
        record.merge_tags(tags);
        self.writer
            .write(&meta_path(&self.layout.version_dir(model_name, version)), &record)?;
        Ok(record)
    }

    /// Names of all registered models, sorted.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the models directory cannot be listed.
    pub fn list_models(&self) -> Result<Vec<String>> {
        visible_dirs(&self.layout.models_dir())
    }

    /// Complete versions of a model, newest first. Unknown models have none.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` if any version record does not parse.
    pub fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>> {
        validate_component(model_name, "model name")?;
        let model_dir = self.layout.model_dir(model_name);
        let mut versions = Vec::new();
        for version in scan_versions(&model_dir)?.into_iter().rev() {
            let path = meta_path(&self.layout.version_dir(model_name, version));
            if let Some(record) = read_record(&path)? {
                versions.push(record);
            }
        }
        Ok(versions)
    }

    fn ensure_model(&self, model_name: &str) -> Result<()> {
        validate_component(model_name, "model name")?;
        if self.layout.model_dir(model_name).is_dir() {
            Ok(())
        } else {
            Err(Error::not_found(EntityKind::Model, model_name))
        }
    }
}
