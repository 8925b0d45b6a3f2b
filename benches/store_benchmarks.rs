//! Store benchmarks
//!
//! Benchmarks for the commit paths every logging call goes through:
//! - Atomic record replacement
//! - Parameter logging on a live run
//! - Version allocation under the model lock
//! - Results projection to Arrow
//!
//! Toyota Way: Measure before optimizing (Genchi Genbutsu)

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trueno_track::experiment::RunRecord;
use trueno_track::layout::{meta_path, Layout};
use trueno_track::lock::LockPolicy;
use trueno_track::registry::VersionAllocator;
use trueno_track::writer::MetadataWriter;
use trueno_track::{ResultsTable, RunStatus, Store, StoreConfig};

/// Run record carrying `points` metric points
#[allow(clippy::cast_precision_loss)]
fn run_with_metrics(run_id: &str, points: usize) -> RunRecord {
    let mut run = RunRecord::new(run_id, "bench");
    run.set_param("lr", 0.01.into()).unwrap();
    for i in 0..points {
        run.push_metric("loss", 1.0 / (i as f64 + 1.0), None).unwrap();
    }
    run
}

fn bench_store(dir: &tempfile::TempDir, durable: bool) -> Store {
    Store::with_config(StoreConfig::builder(dir.path()).durable(durable).build()).unwrap()
}

/// Benchmark atomic replacement of a run record, with and without fsync
fn bench_atomic_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_write");
    let dir = tempfile::tempdir().unwrap();
    let path = meta_path(dir.path());

    for points in [10, 1_000, 10_000].iter() {
        let record = run_with_metrics("r", *points);
        for durable in [false, true] {
            let writer = MetadataWriter::new(durable);
            let id = format!("{points}/durable={durable}");
            group.bench_with_input(BenchmarkId::from_parameter(id), &record, |b, record| {
                b.iter(|| writer.write(&path, black_box(record)).unwrap());
            });
        }
    }

    group.finish();
}

/// Benchmark one logging commit on a live run (record size stays constant)
fn bench_log_param(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = bench_store(&dir, false);
    let experiment = store.create_experiment("bench").unwrap();
    let mut run = store.start_run(experiment.experiment_id()).unwrap();

    c.bench_function("log_param", |b| {
        b.iter(|| run.log_param("lr", black_box(0.5)).unwrap());
    });
    run.finish().unwrap();
}

/// Benchmark version allocation (lock, scan, reserve, release)
fn bench_version_allocation(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let allocator = VersionAllocator::new(
        Layout::new(dir.path()),
        LockPolicy {
            timeout: std::time::Duration::from_secs(10),
            poll_interval: std::time::Duration::from_millis(1),
            stale_after: std::time::Duration::from_secs(60),
        },
        false,
    );

    c.bench_function("next_version", |b| {
        b.iter(|| black_box(allocator.next_version("bench").unwrap()));
    });
}

/// Benchmark register_model end to end
fn bench_register_model(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = bench_store(&dir, false);
    let experiment = store.create_experiment("bench").unwrap();
    let mut run = store.start_run(experiment.experiment_id()).unwrap();
    run.log_artifact_bytes("model.bin", &[0u8; 1024]).unwrap();
    let run = run.finish().unwrap();

    c.bench_function("register_model", |b| {
        b.iter(|| {
            store
                .register_model(run.run_id(), "model.bin", "bench", BTreeMap::new())
                .unwrap()
        });
    });
}

/// Benchmark results projection to an Arrow RecordBatch
fn bench_results_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("results_projection");

    for runs in [10, 100, 1_000].iter() {
        let records: Vec<RunRecord> = (0..*runs)
            .map(|i| {
                let mut run = run_with_metrics(&format!("{i:08}"), 20);
                run.complete(RunStatus::Finished, None).unwrap();
                run
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(runs), &records, |b, records| {
            b.iter(|| {
                let batch = ResultsTable::from_runs(records).to_record_batch().unwrap();
                black_box(batch);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_atomic_write,
    bench_log_param,
    bench_version_allocation,
    bench_register_model,
    bench_results_projection
);
criterion_main!(benches);
