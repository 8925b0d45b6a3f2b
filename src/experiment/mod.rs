//! Experiment Tracking Schema
//!
//! Data structures persisted by the store for experiments and runs.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├── params:    key -> ParamValue
//!                              ├── metrics:   key -> [MetricPoint] [time-series]
//!                              └── artifacts: {relative path}
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_track::experiment::{ExperimentRecord, RunRecord, RunStatus};
//!
//! let experiment = ExperimentRecord::new("exp-001", "My Experiment");
//!
//! let mut run = RunRecord::new("run-001", experiment.experiment_id());
//! run.set_param("lr", 0.01.into())?;
//! run.push_metric("loss", 0.5, None)?;
//! run.complete(RunStatus::Finished, None)?;
//! # Ok::<(), trueno_track::Error>(())
//! ```

mod experiment_record;
mod metric_record;
mod param;
mod run_record;

pub use experiment_record::ExperimentRecord;
pub use metric_record::MetricPoint;
pub use param::ParamValue;
pub use run_record::{RunRecord, RunStatus};
