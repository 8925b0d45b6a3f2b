//! Store facade - one shared root, many independent processes
//!
//! `Store` is cheap to open and holds no in-memory state beyond its
//! configuration: every answer is read from committed files, so any number
//! of processes may open the same root concurrently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::experiment::{ExperimentRecord, RunRecord};
use crate::id::{is_valid_id, with_fresh_id};
use crate::layout::{
    meta_path, normalize_relative, validate_component, visible_dirs, Layout, RUNS_DIR,
};
use crate::lock::LockPolicy;
use crate::registry::{ModelVersion, Registry, ResolvedModel, VersionAllocator, VersionSpec};
use crate::results::ResultsTable;
use crate::run::ActiveRun;
use crate::writer::{read_record, MetadataWriter};
use crate::{EntityKind, Error, Result};

/// Local experiment tracking and model registry store.
///
/// # Example
///
/// ```rust,no_run
/// use trueno_track::Store;
///
/// let store = Store::open(".trueno-track")?;
/// let experiment = store.get_or_create_experiment("iris")?;
///
/// let mut run = store.start_run(experiment.experiment_id())?;
/// run.log_param("lr", 0.01)?;
/// run.log_metric("acc", 0.9)?;
/// run.log_artifact_bytes("model.bin", b"weights")?;
/// let run = run.finish()?;
///
/// let version = store.register_model(run.run_id(), "model.bin", "iris-clf", Default::default())?;
/// assert_eq!(version.version(), 1);
/// # Ok::<(), trueno_track::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
    layout: Layout,
    writer: MetadataWriter,
    registry: Registry,
}

impl Store {
    /// Open (creating if needed) a store at `root` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(StoreConfig::new(root))
    }

    /// Open (creating if needed) a store with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the root cannot be created.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        let layout = Layout::new(config.root());
        fs::create_dir_all(layout.experiments_dir())?;
        fs::create_dir_all(layout.models_dir())?;

        let writer = MetadataWriter::new(config.durable());
        let policy = LockPolicy {
            timeout: config.lock_timeout(),
            poll_interval: config.lock_poll_interval(),
            stale_after: config.stale_lock_after(),
        };
        let allocator = VersionAllocator::new(layout.clone(), policy, config.durable());
        let registry = Registry::new(layout.clone(), writer, allocator);

        debug!(root = %config.root().display(), "opened store");
        Ok(Self {
            config,
            layout,
            writer,
            registry,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Path layout of this store.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Model registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    /// Create an experiment with a fresh ID.
    ///
    /// # Errors
    ///
    /// Returns an IO error, or `AlreadyExists` if every drawn ID collided.
    pub fn create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        self.insert_experiment(|id| ExperimentRecord::new(id, name))
    }

    /// Create an experiment carrying a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an IO error, or `AlreadyExists` if every drawn ID collided.
    pub fn create_experiment_with_config(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> Result<ExperimentRecord> {
        self.insert_experiment(|id| ExperimentRecord::new(id, name).with_config(config.clone()))
    }

    fn insert_experiment(&self, make: impl Fn(&str) -> ExperimentRecord) -> Result<ExperimentRecord> {
        let experiments_dir = self.layout.experiments_dir();
        let record = with_fresh_id(self.config.id_retry_limit(), |id| {
            let record = make(id);
            self.writer
                .materialize_dir(&experiments_dir, id, EntityKind::Experiment, |staging| {
                    self.writer.write(&meta_path(staging), &record)?;
                    fs::create_dir(staging.join(RUNS_DIR))?;
                    Ok(())
                })?;
            Ok(record)
        })?;
        info!(
            experiment_id = record.experiment_id(),
            name = record.name(),
            "created experiment"
        );
        Ok(record)
    }

    /// Return the oldest experiment named `name`, creating one if none exists.
    ///
    /// Names are labels, not keys: two processes racing here may both create.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` if an experiment record does not parse, or an IO error.
    pub fn get_or_create_experiment(&self, name: &str) -> Result<ExperimentRecord> {
        if let Some(existing) = self
            .list_experiments()?
            .into_iter()
            .find(|e| e.name() == name)
        {
            return Ok(existing);
        }
        self.create_experiment(name)
    }

    /// Read one experiment.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)` or `CorruptRecord`.
    pub fn get_experiment(&self, experiment_id: &str) -> Result<ExperimentRecord> {
        check_id(experiment_id, EntityKind::Experiment)?;
        read_record(&meta_path(&self.layout.experiment_dir(experiment_id)))?
            .ok_or_else(|| Error::not_found(EntityKind::Experiment, experiment_id))
    }

    /// All experiments, oldest first.
    ///
    /// # Errors
    ///
    /// `CorruptRecord` if an experiment record does not parse, or an IO error.
    pub fn list_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        let mut experiments = Vec::new();
        for id in visible_dirs(&self.layout.experiments_dir())? {
            if let Some(record) = read_record::<ExperimentRecord>(&meta_path(&self.layout.experiment_dir(&id)))? {
                experiments.push(record);
            }
        }
        experiments.sort_by(ExperimentRecord::cmp_by_age);
        Ok(experiments)
    }

    /// Delete an experiment and all of its runs.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)` or an IO error.
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        check_id(experiment_id, EntityKind::Experiment)?;
        let dir = self.layout.experiment_dir(experiment_id);
        if !dir.is_dir() {
            return Err(Error::not_found(EntityKind::Experiment, experiment_id));
        }
        self.writer.remove_dir(&dir)?;
        info!(experiment_id, "deleted experiment");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Start a RUNNING run under an experiment.
    ///
    /// The returned handle ends the run as FINISHED via
    /// [`ActiveRun::finish`], and as FAILED otherwise.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)`, or an IO error.
    pub fn start_run(&self, experiment_id: &str) -> Result<ActiveRun> {
        self.get_experiment(experiment_id)?;
        ActiveRun::start(
            &self.layout,
            self.writer,
            experiment_id,
            self.config.id_retry_limit(),
        )
    }

    /// Run `body` inside a run scope.
    ///
    /// `Ok` ends the run as FINISHED, `Err` (or a panic) as FAILED with the
    /// error message recorded. The body's error is returned unchanged.
    ///
    /// # Errors
    ///
    /// The body's error, or a store error converted into `E`.
    pub fn with_run<T, E>(
        &self,
        experiment_id: &str,
        body: impl FnOnce(&mut ActiveRun) -> std::result::Result<T, E>,
    ) -> std::result::Result<(T, RunRecord), E>
    where
        E: From<Error> + std::fmt::Display,
    {
        let mut run = self.start_run(experiment_id)?;
        match body(&mut run) {
            Ok(value) => {
                let record = run.finish()?;
                Ok((value, record))
            }
            Err(err) => {
                run.fail(&err)?;
                Err(err)
            }
        }
    }

    /// Read one run, searching all experiments.
    ///
    /// # Errors
    ///
    /// `NotFound(Run)` or `CorruptRecord`.
    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let (experiment_id, _) = self.locate_run(run_id)?;
        read_record(&meta_path(&self.layout.run_dir(&experiment_id, run_id)))?
            .ok_or_else(|| Error::not_found(EntityKind::Run, run_id))
    }

    /// All runs of an experiment, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)`, `CorruptRecord`, or an IO error.
    pub fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        self.get_experiment(experiment_id)?;
        let mut runs = Vec::new();
        for run_id in visible_dirs(&self.layout.runs_dir(experiment_id))? {
            let path = meta_path(&self.layout.run_dir(experiment_id, &run_id));
            if let Some(record) = read_record::<RunRecord>(&path)? {
                runs.push(record);
            }
        }
        runs.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.run_id().cmp(b.run_id()))
        });
        Ok(runs)
    }

    /// Delete a run that has ended.
    ///
    /// # Errors
    ///
    /// `NotFound(Run)`, `InvalidState` if the run is still RUNNING, or an IO error.
    pub fn delete_run(&self, run_id: &str) -> Result<()> {
        let run = self.get_run(run_id)?;
        if !run.status().is_terminal() {
            return Err(Error::invalid_state(
                EntityKind::Run,
                run_id,
                "cannot delete a RUNNING run",
            ));
        }
        self.writer
            .remove_dir(&self.layout.run_dir(run.experiment_id(), run_id))?;
        info!(run_id, "deleted run");
        Ok(())
    }

    /// Absolute path of an artifact logged by a run.
    ///
    /// # Errors
    ///
    /// `NotFound(Run)`, `NotFound(Artifact)`, or `InvalidInput` for a path escaping the run.
    pub fn artifact_path(&self, run_id: &str, relative_path: impl AsRef<Path>) -> Result<PathBuf> {
        let (experiment_id, _) = self.locate_run(run_id)?;
        let relative = normalize_relative(relative_path.as_ref())?;
        let path = self.layout.artifacts_dir(&experiment_id, run_id).join(&relative);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::not_found(
                EntityKind::Artifact,
                format!("{run_id}/{}", relative.display()),
            ))
        }
    }

    /// One row per run of the experiment, with params and latest metrics.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)`, `CorruptRecord`, or an IO error.
    pub fn load_results(&self, experiment_id: &str) -> Result<ResultsTable> {
        let runs = self.list_runs(experiment_id)?;
        Ok(ResultsTable::from_runs(&runs))
    }

    /// Export the results of an experiment to a Parquet file at `path`,
    /// fsynced only when the store is durable.
    ///
    /// # Errors
    ///
    /// `NotFound(Experiment)`, `CorruptRecord`, `StorageError`, or an IO error.
    pub fn write_results_parquet(
        &self,
        experiment_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<ResultsTable> {
        let table = self.load_results(experiment_id)?;
        table.write_parquet_with(&self.writer, path)?;
        Ok(table)
    }

    fn locate_run(&self, run_id: &str) -> Result<(String, PathBuf)> {
        check_id(run_id, EntityKind::Run)?;
        for experiment_id in visible_dirs(&self.layout.experiments_dir())? {
            let dir = self.layout.run_dir(&experiment_id, run_id);
            if dir.is_dir() {
                return Ok((experiment_id, dir));
            }
        }
        Err(Error::not_found(EntityKind::Run, run_id))
    }

    // ------------------------------------------------------------------
    // Model registry
    // ------------------------------------------------------------------

    /// Register an artifact of a FINISHED run as the next version of a model.
    ///
    /// # Errors
    ///
    /// `NotFound(Run)`, `InvalidState` if the run is not FINISHED,
    /// `NotFound(Artifact)`, `LockTimeout`, or an IO error.
    pub fn register_model(
        &self,
        run_id: &str,
        artifact_path: impl AsRef<Path>,
        model_name: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        let run = self.get_run(run_id)?;
        self.registry
            .register(&run, artifact_path.as_ref(), model_name, tags)
    }

    /// Resolve a version (or `VersionSpec::Latest`) of a model to its artifact.
    ///
    /// # Errors
    ///
    /// `NotFound(Model)`, `NotFound(ModelVersion)`, `NotFound(Artifact)` or `CorruptRecord`.
    pub fn load_model_version(
        &self,
        model_name: &str,
        version: impl Into<VersionSpec>,
    ) -> Result<ResolvedModel> {
        self.registry.load(model_name, version.into())
    }

    /// Read the artifact bytes of a model version.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load_model_version`], plus IO errors.
    pub fn read_model_bytes(
        &self,
        model_name: &str,
        version: impl Into<VersionSpec>,
    ) -> Result<Vec<u8>> {
        self.load_model_version(model_name, version)?.read_bytes()
    }

    /// Set one tag on a model version (last writer wins).
    ///
    /// # Errors
    ///
    /// `NotFound(Model)`, `NotFound(ModelVersion)`, `CorruptRecord`, or an IO error.
    pub fn tag_model_version(
        &self,
        model_name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> Result<ModelVersion> {
        self.registry.tag(model_name, version, key, value)
    }

    /// Merge several tags into a model version.
    ///
    /// # Errors
    ///
    /// `NotFound(Model)`, `NotFound(ModelVersion)`, `CorruptRecord`, or an IO error.
    pub fn add_model_tags(
        &self,
        model_name: &str,
        version: u64,
        tags: BTreeMap<String, String>,
    ) -> Result<ModelVersion> {
        self.registry.add_tags(model_name, version, tags)
    }

    /// Tags of a model version.
    ///
    /// # Errors
    ///
    /// `NotFound(Model)`, `NotFound(ModelVersion)` or `CorruptRecord`.
    pub fn get_model_tags(&self, model_name: &str, version: u64) -> Result<BTreeMap<String, String>> {
        Ok(self.registry.get_version(model_name, version)?.tags().clone())
    }

    /// Names of all registered models.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the registry cannot be listed.
    pub fn list_registered_models(&self) -> Result<Vec<String>> {
        self.registry.list_models()
    }

    /// Complete versions of a model, newest first.
    ///
    /// # Errors
    ///
    /// `CorruptRecord` if a version record does not parse, or an IO error.
    pub fn get_model_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>> {
        self.registry.list_versions(model_name)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Remove temporaries and tombstones older than `older_than` left by
    /// interrupted writers. Returns how many entries were removed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the tree cannot be walked.
    pub fn sweep_orphans(&self, older_than: Duration) -> Result<usize> {
        self.writer.sweep_orphans(self.layout.root(), older_than)
    }
}

/// Reject path-like ids as `InvalidInput`; any other id the store could not
/// have issued names nothing, so it is `NotFound`.
fn check_id(id: &str, kind: EntityKind) -> Result<()> {
    validate_component(id, &format!("{kind} id"))?;
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(Error::not_found(kind, id))
    }
}
