//! Error types for Trueno-Track
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People).
//! Every error names the entity kind and identifier involved, and corrupt
//! records report the offending path so a human can inspect it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// An experiment (grouping of runs)
    Experiment,
    /// A single run under an experiment
    Run,
    /// A registered model name
    Model,
    /// A numbered version of a registered model
    ModelVersion,
    /// A file tracked under a run's artifact directory
    Artifact,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Experiment => "experiment",
            Self::Run => "run",
            Self::Model => "model",
            Self::ModelVersion => "model version",
            Self::Artifact => "artifact",
        };
        f.write_str(name)
    }
}

/// Trueno-Track error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment, run, model, version or artifact is missing
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// Identifier collision on creation
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Entity kind
        kind: EntityKind,
        /// Colliding identifier
        id: String,
    },

    /// Operation attempted against an entity in the wrong lifecycle state
    #[error("invalid state for {kind} {id}: {reason}")]
    InvalidState {
        /// Entity kind
        kind: EntityKind,
        /// Entity identifier
        id: String,
        /// What was wrong
        reason: String,
    },

    /// Version-allocation lock could not be acquired within the bound
    #[error("timed out after {waited:?} waiting for version lock on model '{model_name}'\nIf no other process is registering, the lock is stale and will be reclaimed once it ages out")]
    LockTimeout {
        /// Model whose lock was contended
        model_name: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// A metadata record failed to parse (never silently repaired)
    #[error("corrupt record at {}: {reason}", path.display())]
    CorruptRecord {
        /// Path of the offending record
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Caller supplied an unusable name or path
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Parquet export)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid_state(
        kind: EntityKind,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::CorruptRecord {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error reports a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
