//! Metric points - time-series metrics for runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metric observation.
///
/// A run keeps one ordered sequence of points per metric key. Points are
/// appended in logging order; `step` is the training step or epoch the
/// caller attributes the value to, and `timestamp` is wall-clock time for
/// correlation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    step: u64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a new metric point stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `step` - Training step or epoch number
    /// * `value` - Metric value
    #[must_use]
    pub fn new(step: u64, value: f64) -> Self {
        Self {
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Replace the timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the step/epoch number.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_point_new() {
        let point = MetricPoint::new(0, 0.5);
        assert_eq!(point.step(), 0);
        assert!((point.value() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metric_point_with_timestamp() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let point = MetricPoint::new(3, 0.1).with_timestamp(at);
        assert_eq!(point.timestamp(), at);
    }
}
