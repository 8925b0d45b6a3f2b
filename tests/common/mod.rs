//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::time::Duration;

use tempfile::TempDir;
use trueno_track::{Store, StoreConfig};

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh store in a temporary directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, Store) {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::with_config(config(&dir)).expect("open store");
    (dir, store)
}

/// Test configuration: no fsync, fast lock polling.
pub fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig::builder(dir.path())
        .durable(false)
        .lock_poll_interval(Duration::from_millis(1))
        .lock_timeout(Duration::from_secs(30))
        .build()
}

/// A FINISHED run under a new experiment with `model.bin` logged.
pub fn finished_run_with_model(store: &Store) -> String {
    let experiment = store.create_experiment("fixture").expect("experiment");
    let mut run = store.start_run(experiment.experiment_id()).expect("run");
    run.log_artifact_bytes("model.bin", b"weights").expect("artifact");
    run.finish().expect("finish").run_id().to_string()
}
