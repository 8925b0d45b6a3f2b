//! Run Record - execution instance of an experiment

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MetricPoint, ParamValue};
use crate::{EntityKind, Error, Result};

/// Status of a run.
///
/// `Running` transitions exactly once to `Finished` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Finished,
    /// Run ended with an error.
    Failed,
}

impl RunStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Upper-case label, as stored in records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run Record represents a single execution of an experiment.
///
/// Each experiment can have multiple runs. The record carries the whole
/// state of the run: lifecycle, parameters, metric series and the relative
/// paths of logged artifacts. It is persisted as one JSON document that is
/// atomically replaced on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    experiment_id: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    metrics: BTreeMap<String, Vec<MetricPoint>>,
    #[serde(default)]
    artifacts: BTreeSet<String>,
}

impl RunRecord {
    /// Create a new run record in Running status, started now.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Unique identifier for the run
    /// * `experiment_id` - ID of the parent experiment
    #[must_use]
    pub fn new(run_id: impl Into<String>, experiment_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            failure: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: BTreeSet::new(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the failure description of a failed run.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Get all parameters.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Get a single parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Get all metric series.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, Vec<MetricPoint>> {
        &self.metrics
    }

    /// Get the series of one metric, in logging order.
    #[must_use]
    pub fn metric_history(&self, key: &str) -> &[MetricPoint] {
        self.metrics.get(key).map_or(&[], Vec::as_slice)
    }

    /// Get the most recently logged value of a metric.
    #[must_use]
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .get(key)
            .and_then(|series| series.last())
            .map(MetricPoint::value)
    }

    /// Get the relative paths of logged artifacts.
    #[must_use]
    pub const fn artifacts(&self) -> &BTreeSet<String> {
        &self.artifacts
    }

    /// Set a parameter, overwriting any previous value for the key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the run is Running, or `InvalidInput`
    /// for a non-finite float.
    pub fn set_param(&mut self, key: impl Into<String>, value: ParamValue) -> Result<()> {
        self.ensure_running("log a parameter")?;
        let key = key.into();
        if let ParamValue::Float(v) = value {
            ensure_finite(&key, v)?;
        }
        self.params.insert(key, value);
        Ok(())
    }

    /// Append a metric point. Without an explicit step the point gets the
    /// next index of its series.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the run is Running, or `InvalidInput`
    /// for a non-finite value.
    pub fn push_metric(&mut self, key: impl Into<String>, value: f64, step: Option<u64>) -> Result<()> {
        self.ensure_running("log a metric")?;
        let key = key.into();
        ensure_finite(&key, value)?;
        let series = self.metrics.entry(key).or_default();
        let step = step.unwrap_or(series.len() as u64);
        series.push(MetricPoint::new(step, value));
        Ok(())
    }

    /// Track an artifact by its run-relative path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the run is Running.
    pub fn add_artifact(&mut self, relative_path: impl Into<String>) -> Result<()> {
        self.ensure_running("log an artifact")?;
        self.artifacts.insert(relative_path.into());
        Ok(())
    }

    /// Complete the run with the given terminal status.
    ///
    /// Sets the `ended_at` timestamp to now. `failure` is kept only for `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the run already ended or `status` is not terminal.
    pub fn complete(&mut self, status: RunStatus, failure: Option<String>) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::invalid_state(
                EntityKind::Run,
                &self.run_id,
                "a run can only complete as FINISHED or FAILED",
            ));
        }
        self.ensure_running("complete")?;
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.failure = if status == RunStatus::Failed {
            failure
        } else {
            None
        };
        Ok(())
    }

    fn ensure_running(&self, action: &str) -> Result<()> {
        if self.status == RunStatus::Running {
            Ok(())
        } else {
            Err(Error::invalid_state(
                EntityKind::Run,
                &self.run_id,
                format!("cannot {action}: run is {}", self.status),
            ))
        }
    }
}

/// JSON has no representation for NaN or infinity.
fn ensure_finite(key: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("value of '{key}' must be finite, got {value}")))
    }
}
