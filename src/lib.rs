//! # Trueno-Track: Local Experiment Tracking and Model Registry
//!
//! **Version**: 0.1.0
//!
//! Trueno-Track records experiments, runs (parameters, metric series,
//! artifacts) and a versioned registry of promoted models directly on the
//! filesystem. There is no server: any number of processes may share one
//! store root, and the filesystem is the only coordination substrate.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke**: Every record is replaced atomically (temp file + rename);
//!   readers see the old or the new record, never a torn one
//! - **Jidoka**: Corrupt records stop the line with the offending path,
//!   they are never silently repaired
//! - **Genchi Genbutsu**: Version numbers are derived from what is on disk,
//!   not from a counter that can drift after a crash
//! - **Heijunka**: Only version allocation is serialized (per model name);
//!   runs are process-owned and never contend
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_track::{Store, VersionSpec};
//!
//! let store = Store::open("./mlstore")?;
//! let experiment = store.create_experiment("iris")?;
//!
//! let (_, run) = store.with_run(experiment.experiment_id(), |run| {
//!     run.log_param("lr", 0.01)?;
//!     run.log_metric("acc", 0.9)?;
//!     run.log_artifact_bytes("model.bin", b"weights")?;
//!     Ok::<_, trueno_track::Error>(())
//! })?;
//!
//! store.register_model(run.run_id(), "model.bin", "iris-clf", Default::default())?;
//! let latest = store.load_model_version("iris-clf", VersionSpec::Latest)?;
//! println!("{}", latest.artifact_path().display());
//! # Ok::<(), trueno_track::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod id;
pub mod layout;
pub mod lock;
pub mod registry;
pub mod results;
pub mod run;
mod store;
pub mod writer;

pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{EntityKind, Error, Result};
pub use experiment::{ExperimentRecord, MetricPoint, ParamValue, RunRecord, RunStatus};
pub use registry::{ModelVersion, ResolvedModel, VersionSpec};
pub use results::{ResultRow, ResultsTable};
pub use run::{ActiveRun, Artifact, JsonArtifact};
pub use store::Store;
