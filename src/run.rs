//! Run Lifecycle Manager
//!
//! A run is owned by the [`ActiveRun`] handle returned from
//! [`Store::start_run`](crate::Store::start_run). Every logging call merges
//! into the run record and atomically replaces `meta.json`, so whatever was
//! logged before a crash is already committed. The handle ends the run
//! exactly once:
//!
//! - [`ActiveRun::finish`] → `FINISHED`
//! - [`ActiveRun::fail`] → `FAILED` with a reason
//! - dropped without either (early return, `?`, panic) → `FAILED`
//!
//! The handle counts as ended only once the terminal record is committed;
//! if `finish` cannot write it, dropping the handle still attempts `FAILED`.
//!
//! A failed run keeps its params, metrics and artifacts for diagnosis.

use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::experiment::{ParamValue, RunRecord, RunStatus};
use crate::id::with_fresh_id;
use crate::layout::{meta_path, normalize_relative, to_record_path, Layout, ARTIFACTS_DIR};
use crate::writer::MetadataWriter;
use crate::{EntityKind, Error, Result};

/// Opaque byte-producing capability for logged models and artifacts.
///
/// The store never looks inside the object; it only records where the
/// bytes were written.
pub trait Artifact {
    /// Write the artifact's bytes to `out`.
    ///
    /// # Errors
    ///
    /// Returns any IO error raised while producing the bytes.
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl Artifact for [u8] {
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }
}

impl Artifact for Vec<u8> {
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }
}

impl Artifact for str {
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.as_bytes())
    }
}

impl Artifact for String {
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.as_bytes())
    }
}

/// Any `Serialize` value rendered as pretty JSON.
#[derive(Debug)]
pub struct JsonArtifact<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> Artifact for JsonArtifact<'_, T> {
    fn write_artifact(&self, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(out, self.0).map_err(io::Error::from)
    }
}

/// Handle owning a RUNNING run for the duration of its scope.
#[derive(Debug)]
pub struct ActiveRun {
    record: RunRecord,
    dir: PathBuf,
    writer: MetadataWriter,
    ended: bool,
}

impl ActiveRun {
    /// Allocate a run id and materialize the run directory with its initial
    /// RUNNING record. The directory becomes visible in one rename.
    pub(crate) fn start(
        layout: &Layout,
        writer: MetadataWriter,
        experiment_id: &str,
        id_retries: u32,
    ) -> Result<Self> {
        let runs_dir = layout.runs_dir(experiment_id);
        if !runs_dir.is_dir() {
            return Err(Error::not_found(EntityKind::Experiment, experiment_id));
        }

        let (dir, record) = with_fresh_id(id_retries, |run_id| {
            let record = RunRecord::new(run_id, experiment_id);
            let dir = writer.materialize_dir(&runs_dir, run_id, EntityKind::Run, |staging| {
                writer.write(&meta_path(staging), &record)?;
                fs::create_dir(staging.join(ARTIFACTS_DIR))?;
                Ok(())
            })?;
            Ok((dir, record))
        })
        .map_err(|err| match err {
            // The experiment was deleted while the run directory was being built.
            Error::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                Error::not_found(EntityKind::Experiment, experiment_id)
            }
            other => other,
        })?;

        info!(run_id = record.run_id(), experiment_id, "started run");
        Ok(Self {
            record,
            dir,
            writer,
            ended: false,
        })
    }

    /// Run ID.
    #[must_use]
    pub fn id(&self) -> &str {
        self.record.run_id()
    }

    /// Snapshot of the committed run record.
    #[must_use]
    pub const fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Run directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory artifacts of this run are stored under.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(ARTIFACTS_DIR)
    }

    /// Log a parameter, overwriting any previous value for the key.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the record cannot be committed.
    pub fn log_param(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let value = value.into();
        self.update(|record| record.set_param(key, value))
    }

    /// Log several parameters in one commit.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the record cannot be committed.
    pub fn log_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<ParamValue>,
    {
        self.update(|record| {
            for (key, value) in params {
                record.set_param(key, value.into())?;
            }
            Ok(())
        })
    }

    /// Append a metric value at the next step of its series.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the record cannot be committed.
    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        self.update(|record| record.push_metric(key, value, None))
    }

    /// Append a metric value at an explicit step.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the record cannot be committed.
    pub fn log_metric_at(&mut self, key: &str, value: f64, step: u64) -> Result<()> {
        self.update(|record| record.push_metric(key, value, Some(step)))
    }

    /// Copy a local file into the run's artifacts under its file name.
    ///
    /// Returns the artifact's run-relative path.
    ///
    /// # Errors
    ///
    /// Returns `NotFound(Artifact)` if `local_path` is not a file, or an IO error.
    pub fn log_artifact(&mut self, local_path: impl AsRef<Path>) -> Result<String> {
        self.ensure_running()?;
        let local_path = local_path.as_ref();
        if !local_path.is_file() {
            return Err(Error::not_found(
                EntityKind::Artifact,
                local_path.display().to_string(),
            ));
        }
        let file_name = local_path.file_name().ok_or_else(|| {
            Error::InvalidInput(format!("{} has no file name", local_path.display()))
        })?;
        let relative = normalize_relative(Path::new(file_name))?;
        let bytes = self
            .writer
            .copy_file(local_path, &self.artifacts_dir().join(&relative))?;
        debug!(run_id = self.id(), artifact = %relative.display(), bytes, "logged artifact");
        self.track_artifact(&relative)
    }

    /// Store `bytes` as an artifact at `relative_path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a path escaping the run, or an IO error.
    pub fn log_artifact_bytes(&mut self, relative_path: impl AsRef<Path>, bytes: &[u8]) -> Result<String> {
        self.log_model(relative_path, bytes)
    }

    /// Store a model (or any byte-producing object) as an artifact.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a path escaping the run, the producer's
    /// IO error, or an IO error from the commit.
    pub fn log_model<A: Artifact + ?Sized>(
        &mut self,
        relative_path: impl AsRef<Path>,
        model: &A,
    ) -> Result<String> {
        self.ensure_running()?;
        let relative = normalize_relative(relative_path.as_ref())?;
        self.writer
            .write_with(&self.artifacts_dir().join(&relative), |file| {
                model.write_artifact(file)?;
                Ok(())
            })?;
        self.track_artifact(&relative)
    }

    /// End the run as FINISHED.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the final record cannot be committed.
    pub fn finish(mut self) -> Result<RunRecord> {
        self.end(RunStatus::Finished, None)
    }

    /// End the run as FAILED, keeping everything logged so far.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the final record cannot be committed.
    pub fn fail(mut self, reason: impl Display) -> Result<RunRecord> {
        self.end(RunStatus::Failed, Some(reason.to_string()))
    }

    fn track_artifact(&mut self, relative: &Path) -> Result<String> {
        let recorded = to_record_path(relative);
        let tracked = recorded.clone();
        self.update(|record| record.add_artifact(tracked))?;
        Ok(recorded)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.ended {
            return Err(Error::invalid_state(EntityKind::Run, self.id(), "run has ended"));
        }
        Ok(())
    }

    /// Apply `change` to a copy of the record, commit it, then adopt it.
    fn update(&mut self, change: impl FnOnce(&mut RunRecord) -> Result<()>) -> Result<()> {
        self.ensure_running()?;
        let mut next = self.record.clone();
        change(&mut next)?;
        self.writer.write(&meta_path(&self.dir), &next)?;
        self.record = next;
        Ok(())
    }

    fn end(&mut self, status: RunStatus, failure: Option<String>) -> Result<RunRecord> {
        self.ensure_running()?;
        let mut next = self.record.clone();
        next.complete(status, failure)?;
        self.writer.write(&meta_path(&self.dir), &next)?;
        self.record = next;
        self.ended = true;
        info!(run_id = self.id(), status = %status, "ended run");
        Ok(self.record.clone())
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        let reason = if thread::panicking() {
            "panicked while running"
        } else {
            "run handle dropped before finish"
        };
        warn!(run_id = self.id(), reason, "marking run as failed");
        if let Err(err) = self.end(RunStatus::Failed, Some(reason.to_string())) {
            error!(run_id = self.id(), error = %err, "could not record run failure");
        }
    }
}
