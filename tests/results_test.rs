//! Results view over an experiment's runs

mod common;

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use common::temp_store;
use trueno_track::results::read_parquet;
use trueno_track::{ParamValue, RunStatus};

#[test]
fn test_single_finished_run_projects_one_row() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("iris").unwrap();
    let (_, run) = store
        .with_run(experiment.experiment_id(), |run| {
            run.log_param("lr", 0.01)?;
            run.log_metric("acc", 0.9)?;
            Ok::<_, trueno_track::Error>(())
        })
        .unwrap();

    let table = store.load_results(experiment.experiment_id()).unwrap();
    assert_eq!(table.len(), 1);
    let row = table.row(run.run_id()).unwrap();
    assert_eq!(row.param("lr"), Some(&ParamValue::Float(0.01)));
    assert_eq!(row.metric("acc"), Some(0.9));
    assert_eq!(row.status(), RunStatus::Finished);
}

#[test]
fn test_results_union_columns_and_latest_values() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("sweep").unwrap();
    let id = experiment.experiment_id();

    let mut a = store.start_run(id).unwrap();
    a.log_param("lr", 0.1).unwrap();
    a.log_metric("loss", 0.9).unwrap();
    a.log_metric("loss", 0.4).unwrap();
    let a = a.finish().unwrap();

    let mut b = store.start_run(id).unwrap();
    b.log_param("layers", 4).unwrap();
    b.log_metric("acc", 0.7).unwrap();
    let b = b.fail("preempted").unwrap();

    let table = store.load_results(id).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.param_keys().into_iter().collect::<Vec<_>>(),
        vec!["layers", "lr"]
    );
    assert_eq!(
        table.metric_keys().into_iter().collect::<Vec<_>>(),
        vec!["acc", "loss"]
    );

    let row_a = table.row(a.run_id()).unwrap();
    assert_eq!(row_a.metric("loss"), Some(0.4));
    assert_eq!(row_a.metric("acc"), None);
    let row_b = table.row(b.run_id()).unwrap();
    assert_eq!(row_b.status(), RunStatus::Failed);
    assert_eq!(row_b.param("lr"), None);

    let ids: Vec<&str> = table.rows().iter().map(|r| r.run_id()).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn test_results_record_batch_and_parquet_export() {
    let (dir, store) = temp_store();
    let experiment = store.create_experiment("export").unwrap();
    let id = experiment.experiment_id();
    for epochs in [5_i64, 10] {
        store
            .with_run(id, |run| {
                run.log_param("epochs", epochs)?;
                run.log_metric("acc", 0.5)?;
                Ok::<_, trueno_track::Error>(())
            })
            .unwrap();
    }

    let table = store.load_results(id).unwrap();
    let batch = table.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(
        batch.schema().field_with_name("param_epochs").unwrap().data_type(),
        &DataType::Int64
    );
    let epochs = batch
        .column_by_name("param_epochs")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    let mut values: Vec<i64> = epochs.iter().flatten().collect();
    values.sort_unstable();
    assert_eq!(values, vec![5, 10]);

    let path = dir.path().join("results.parquet");
    table.write_parquet(&path).unwrap();
    let batches = read_parquet(&path).unwrap();
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);

    let status = batches[0]
        .column_by_name("status")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert!((0..status.len()).all(|i| status.value(i) == "FINISHED"));
    let acc = batches[0]
        .column_by_name("metric_acc")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(acc.null_count(), 0);
}

#[test]
fn test_results_of_empty_and_unknown_experiment() {
    let (_dir, store) = temp_store();
    let experiment = store.create_experiment("empty").unwrap();

    let table = store.load_results(experiment.experiment_id()).unwrap();
    assert!(table.is_empty());
    assert_eq!(table.to_record_batch().unwrap().num_columns(), 2);

    assert!(store
        .load_results("0123456789abcdef0123456789abcdef")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_store_exports_results_to_parquet() {
    let (dir, store) = temp_store();
    let experiment = store.create_experiment("export").unwrap();
    let id = experiment.experiment_id();
    store
        .with_run(id, |run| {
            run.log_param("lr", 0.1)?;
            run.log_metric("loss", 0.25)?;
            Ok::<_, trueno_track::Error>(())
        })
        .unwrap();
    let path = dir.path().join("exports").join("results.parquet");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let table = store.write_results_parquet(id, &path).unwrap();

    assert_eq!(table.len(), 1);
    let batches = read_parquet(&path).unwrap();
    let loss = batches[0]
        .column_by_name("metric_loss")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert!((loss.value(0) - 0.25).abs() < f64::EPSILON);
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("results.parquet")]);

    assert!(store
        .write_results_parquet("0123456789abcdef0123456789abcdef", &path)
        .unwrap_err()
        .is_not_found());
}
