//! Experiment record: the `meta.json` at the top of an experiment directory

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named group of runs.
///
/// The name is a label and may repeat across experiments; `experiment_id`
/// is what the store addresses. The record is written once, when the
/// experiment directory is materialized, and never replaced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    created_at: DateTime<Utc>,
    /// Free-form document supplied at creation (search space, dataset, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<serde_json::Value>,
}

impl ExperimentRecord {
    /// Record for an experiment created now.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            config: None,
        }
    }

    /// Attach a configuration document.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Addressing key, also the directory name.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Human label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the experiment was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Configuration document, if one was given.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Listing order: oldest first, ties broken by id so the order is stable
    /// across processes.
    #[must_use]
    pub fn cmp_by_age(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.experiment_id.cmp(&other.experiment_id))
    }
}
