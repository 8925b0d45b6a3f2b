//! Property-based tests for trueno-track
//!
//! Following the ruchy/trueno/aprender pattern:
//! - Test allocation and ordering invariants
//! - Test data integrity properties
//! - Filesystem-backed properties run fewer cases to stay under 30 seconds

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use proptest::prelude::*;
use trueno_track::experiment::{MetricPoint, ParamValue, RunRecord, RunStatus};
use trueno_track::id::{is_valid_id, new_id};
use trueno_track::layout::{normalize_relative, Layout};
use trueno_track::lock::LockPolicy;
use trueno_track::registry::VersionAllocator;
use trueno_track::{ResultsTable, VersionSpec};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Finite metric values (JSON cannot carry NaN or infinity)
fn arb_metric_series() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-1.0e6f64..1.0e6, 1..50)
}

/// Scalar parameter values of every kind (floats exactly representable)
fn arb_param_value() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        any::<bool>().prop_map(ParamValue::Bool),
        any::<i64>().prop_map(ParamValue::Int),
        (-1_000_000i32..1_000_000).prop_map(|v| ParamValue::Float(f64::from(v) / 4.0)),
        "[a-z]{0,12}".prop_map(ParamValue::Str),
    ]
}

fn allocator(root: &Path) -> VersionAllocator {
    VersionAllocator::new(
        Layout::new(root),
        LockPolicy {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
            stale_after: Duration::from_secs(60),
        },
        false,
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a metric series keeps logging order and auto steps are 0..n
    #[test]
    fn prop_metric_series_preserves_order(values in arb_metric_series()) {
        let mut run = RunRecord::new("run", "exp");
        for value in &values {
            run.push_metric("loss", *value, None).unwrap();
        }

        let history = run.metric_history("loss");
        let logged: Vec<f64> = history.iter().map(MetricPoint::value).collect();
        let steps: Vec<u64> = history.iter().map(MetricPoint::step).collect();
        prop_assert_eq!(&logged, &values);
        prop_assert_eq!(steps, (0..values.len() as u64).collect::<Vec<_>>());
        prop_assert_eq!(run.latest_metric("loss"), values.last().copied());
    }

    /// Property: a stored run record reads back with its parameter kinds intact
    #[test]
    fn prop_param_kinds_survive_json(
        params in proptest::collection::btree_map("[a-z]{1,8}", arb_param_value(), 0..10)
    ) {
        let mut run = RunRecord::new("run", "exp");
        for (key, value) in &params {
            run.set_param(key.as_str(), value.clone()).unwrap();
        }
        run.complete(RunStatus::Finished, None).unwrap();

        let json = serde_json::to_vec(&run).unwrap();
        let back: RunRecord = serde_json::from_slice(&json).unwrap();
        prop_assert_eq!(back.params(), &params);
    }

    /// Property: generated IDs are well-formed and do not repeat
    #[test]
    fn prop_ids_unique(count in 1usize..200) {
        let ids: Vec<String> = (0..count).map(|_| new_id()).collect();
        let unique: BTreeSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), count);
        prop_assert!(ids.iter().all(|id| is_valid_id(id)));
    }

    /// Property: a normalized artifact path never leaves the run directory
    #[test]
    fn prop_normalized_paths_stay_relative(raw in "[a-z./]{0,24}") {
        if let Ok(path) = normalize_relative(Path::new(&raw)) {
            prop_assert!(path
                .components()
                .all(|c| matches!(c, Component::Normal(_))));
            prop_assert!(!path.as_os_str().is_empty());
        }
    }

    /// Property: version specs render and parse back
    #[test]
    fn prop_version_spec_parses_its_rendering(n in 1u64..u64::MAX) {
        let spec = VersionSpec::Number(n);
        prop_assert_eq!(spec.to_string().parse::<VersionSpec>().unwrap(), spec);
    }

    /// Property: result rows are sorted by run ID whatever the input order
    #[test]
    fn prop_results_sorted_by_run_id(
        ids in proptest::collection::btree_set("[0-9a-f]{8}", 0..20)
    ) {
        let mut runs: Vec<RunRecord> = ids.iter().map(|id| RunRecord::new(id.as_str(), "exp")).collect();
        runs.reverse();

        let table = ResultsTable::from_runs(&runs);
        let rows: Vec<&str> = table.rows().iter().map(|r| r.run_id()).collect();
        let expected: Vec<&str> = ids.iter().map(String::as_str).collect();
        prop_assert_eq!(rows, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: sequential allocation is dense from 1
    #[test]
    fn prop_versions_dense(count in 1usize..12) {
        let dir = tempfile::tempdir().unwrap();
        let alloc = allocator(dir.path());
        let versions: Vec<u64> = (0..count)
            .map(|_| alloc.next_version("clf").unwrap().version())
            .collect();
        prop_assert_eq!(versions, (1..=count as u64).collect::<Vec<_>>());
    }

    /// Property: the next version is one past the highest existing one,
    /// whether or not lower numbers are present
    #[test]
    fn prop_next_version_follows_max(
        existing in proptest::collection::btree_set(1u64..500, 0..8)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        for version in &existing {
            fs::create_dir_all(layout.version_dir("clf", *version)).unwrap();
        }

        let next = allocator(dir.path()).next_version("clf").unwrap().version();
        prop_assert_eq!(next, existing.iter().max().map_or(1, |max| max + 1));
    }

    /// Property: tag merges are last-writer-wins per key
    #[test]
    fn prop_tag_merge_last_writer_wins(
        first in proptest::collection::btree_map("[a-c]", "[a-z]{1,4}", 0..3),
        second in proptest::collection::btree_map("[a-c]", "[a-z]{1,4}", 0..3)
    ) {
        let mut version = trueno_track::ModelVersion::new("clf", 1, "r", "e", "m")
            .with_tags(first.clone());
        version.merge_tags(second.clone());

        let mut expected: BTreeMap<String, String> = first;
        expected.extend(second);
        prop_assert_eq!(version.tags(), &expected);
    }
}
