//! Interrupted writers: what a crash at each point leaves behind

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use common::{finished_run_with_model, temp_store};
use trueno_track::layout::{meta_path, TEMP_PREFIX, TOMBSTONE_PREFIX};
use trueno_track::writer::MetadataWriter;
use trueno_track::{Error, RunStatus, VersionSpec};

#[test]
fn test_uncommitted_run_update_leaves_previous_record() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("crash").unwrap();
    let mut run = store.start_run(experiment.experiment_id()).unwrap();
    run.log_param("lr", 0.01).unwrap();

    // Serialize the next state but stop before the rename.
    let mut next = run.record().clone();
    next.push_metric("loss", 0.5, None).unwrap();
    let meta = meta_path(run.dir());
    let pending = MetadataWriter::new(false).stage(&meta, &next).unwrap();
    let temp = pending.temp_path().to_path_buf();
    drop(pending);

    let stored = store.get_run(run.id()).unwrap();
    assert_eq!(&stored, run.record());
    assert!(stored.metrics().is_empty());
    assert!(temp.exists());
    assert!(temp
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(TEMP_PREFIX));

    assert_eq!(store.sweep_orphans(Duration::ZERO).unwrap(), 1);
    assert!(!temp.exists());
    run.finish().unwrap();
}

#[test]
fn test_half_built_entities_are_invisible() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("visible").unwrap();

    // Leftovers of interrupted creations and deletions.
    let experiments_dir = store.layout().experiments_dir();
    fs::create_dir(experiments_dir.join(format!("{TEMP_PREFIX}abc.123"))).unwrap();
    fs::create_dir(experiments_dir.join(format!("{TOMBSTONE_PREFIX}def.456"))).unwrap();
    let runs_dir = store.layout().runs_dir(experiment.experiment_id());
    fs::create_dir(runs_dir.join(format!("{TEMP_PREFIX}run.789"))).unwrap();

    let listed = store.list_experiments().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].experiment_id(), experiment.experiment_id());
    assert!(store.list_runs(experiment.experiment_id()).unwrap().is_empty());

    assert_eq!(store.sweep_orphans(Duration::ZERO).unwrap(), 3);
    assert_eq!(store.sweep_orphans(Duration::ZERO).unwrap(), 0);
}

#[test]
fn test_sweep_respects_age_threshold() {
    let (_dir, store) = temp_store();
    let orphan = store.layout().models_dir().join(format!("{TEMP_PREFIX}meta.json.x"));
    fs::write(&orphan, b"{").unwrap();

    assert_eq!(store.sweep_orphans(Duration::from_secs(3600)).unwrap(), 0);
    assert!(orphan.exists());
}

#[test]
fn test_corrupt_run_record_is_reported_not_repaired() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("corrupt").unwrap();
    let run = store.start_run(experiment.experiment_id()).unwrap();
    let run_id = run.finish().unwrap().run_id().to_string();

    let meta = meta_path(&store.layout().run_dir(experiment.experiment_id(), &run_id));
    fs::write(&meta, b"not json").unwrap();

    match store.get_run(&run_id).unwrap_err() {
        Error::CorruptRecord { path, .. } => assert_eq!(path, meta),
        other => panic!("expected CorruptRecord, got {other}"),
    }
    assert!(matches!(
        store.list_runs(experiment.experiment_id()),
        Err(Error::CorruptRecord { .. })
    ));
    assert_eq!(fs::read(&meta).unwrap(), b"not json");
}

#[test]
fn test_run_directory_without_record_is_skipped() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("partial").unwrap();
    let run = store.start_run(experiment.experiment_id()).unwrap();
    let run_id = run.finish().unwrap().run_id().to_string();

    fs::create_dir(store.layout().run_dir(experiment.experiment_id(), "orphan")).unwrap();

    let runs = store.list_runs(experiment.experiment_id()).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id(), run_id);
    assert_eq!(runs[0].status(), RunStatus::Finished);
}

#[test]
fn test_interrupted_registration_does_not_block_later_ones() {
    let (_dir, store) = temp_store();
    let run_id = finished_run_with_model(&store);

    // Reservation made, record never written, lock released by the crash.
    fs::create_dir_all(store.layout().version_dir("clf", 1)).unwrap();

    let version = store.register_model(&run_id, "model.bin", "clf", BTreeMap::new()).unwrap();
    assert_eq!(version.version(), 2);
    assert_eq!(
        store
            .load_model_version("clf", VersionSpec::Latest)
            .unwrap()
            .version()
            .version(),
        2
    );
}
