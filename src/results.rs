//! Tabular results view (Arrow/Parquet)
//!
//! Projects the committed run records of an experiment into one row per run.
//! Columns are the union of parameter and metric keys across runs; a metric
//! cell holds the most recently logged value of that metric.
//!
//! The Arrow projection names columns `run_id`, `status`, `param_<key>` and
//! `metric_<key>`. Every user key lands under a prefix, so no key can shadow
//! a fixed column or a column of the other kind.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::experiment::{ParamValue, RunRecord, RunStatus};
use crate::writer::MetadataWriter;
use crate::{Error, Result};

/// Prefix of parameter columns in the Arrow projection.
pub const PARAM_PREFIX: &str = "param_";

/// Prefix of metric columns in the Arrow projection.
pub const METRIC_PREFIX: &str = "metric_";

/// One run projected into a row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    run_id: String,
    status: RunStatus,
    params: BTreeMap<String, ParamValue>,
    metrics: BTreeMap<String, f64>,
}

impl ResultRow {
    fn from_run(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id().to_string(),
            status: run.status(),
            params: run.params().clone(),
            metrics: run
                .metrics()
                .keys()
                .filter_map(|key| run.latest_metric(key).map(|v| (key.clone(), v)))
                .collect(),
        }
    }

    /// Run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run status at projection time.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Parameter value.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Latest metric value.
    #[must_use]
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// Results of one experiment, one row per run, sorted by run ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {
    /// Project run records into a table.
    #[must_use]
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a RunRecord>) -> Self {
        let mut rows: Vec<ResultRow> = runs.into_iter().map(ResultRow::from_run).collect();
        rows.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Self { rows }
    }

    /// All rows.
    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Row of one run.
    #[must_use]
    pub fn row(&self, run_id: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|row| row.run_id == run_id)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of parameter keys, sorted.
    #[must_use]
    pub fn param_keys(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.params.keys().map(String::as_str))
            .collect()
    }

    /// Union of metric keys, sorted.
    #[must_use]
    pub fn metric_keys(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.metrics.keys().map(String::as_str))
            .collect()
    }

    /// Columnar projection of the table.
    ///
    /// A parameter column is `Boolean` if every present value is a bool,
    /// `Int64` if every present value is an integer, `Float64` if every
    /// present value is numeric, and `Utf8` otherwise. Missing cells are null.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![
            Field::new("run_id", DataType::Utf8, false),
            Field::new("status", DataType::Utf8, false),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(
                self.rows.iter().map(|r| r.run_id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                self.rows.iter().map(|r| r.status.as_str()).collect::<Vec<_>>(),
            )),
        ];

        for key in self.param_keys() {
            let cells: Vec<Option<&ParamValue>> = self.rows.iter().map(|r| r.param(key)).collect();
            let (data_type, column) = param_column(&cells);
            fields.push(Field::new(format!("{PARAM_PREFIX}{key}"), data_type, true));
            columns.push(column);
        }

        for key in self.metric_keys() {
            let cells: Vec<Option<f64>> = self.rows.iter().map(|r| r.metric(key)).collect();
            fields.push(Field::new(format!("{METRIC_PREFIX}{key}"), DataType::Float64, true));
            columns.push(Arc::new(Float64Array::from(cells)));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// Export the table as a durable Parquet file, atomically replacing `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if Parquet encoding fails, or an IO error.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_parquet_with(&MetadataWriter::default(), path)
    }

    /// Export through `writer`, which decides whether the file is fsynced.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if Parquet encoding fails, or an IO error.
    pub fn write_parquet_with<P: AsRef<Path>>(
        &self,
        writer: &MetadataWriter,
        path: P,
    ) -> Result<()> {
        use parquet::arrow::ArrowWriter;

        let batch = self.to_record_batch()?;
        writer.write_with(path.as_ref(), |file| {
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None).map_err(|e| {
                Error::StorageError(format!("Failed to create Parquet writer: {e}"))
            })?;
            writer
                .write(&batch)
                .map_err(|e| Error::StorageError(format!("Failed to write record batch: {e}")))?;
            writer
                .close()
                .map_err(|e| Error::StorageError(format!("Failed to finish Parquet file: {e}")))?;
            Ok(())
        })
    }
}

/// Load record batches back from an exported Parquet file.
///
/// # Errors
///
/// Returns error if file cannot be read or parsed
pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<RecordBatch>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path.as_ref())
        .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

    let reader = builder
        .build()
        .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
        batches.push(batch);
    }
    Ok(batches)
}

fn param_column(cells: &[Option<&ParamValue>]) -> (DataType, ArrayRef) {
    let present = || cells.iter().flatten();

    if present().all(|v| matches!(v, ParamValue::Bool(_))) {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|c| match c {
                Some(ParamValue::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        return (DataType::Boolean, Arc::new(BooleanArray::from(values)));
    }
    if present().all(|v| matches!(v, ParamValue::Int(_))) {
        let values: Vec<Option<i64>> = cells
            .iter()
            .map(|c| match c {
                Some(ParamValue::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        return (DataType::Int64, Arc::new(Int64Array::from(values)));
    }
    if present().all(|v| v.as_f64().is_some()) {
        let values: Vec<Option<f64>> = cells.iter().map(|c| c.and_then(ParamValue::as_f64)).collect();
        return (DataType::Float64, Arc::new(Float64Array::from(values)));
    }
    let values: Vec<Option<String>> = cells.iter().map(|c| c.map(ToString::to_string)).collect();
    (DataType::Utf8, Arc::new(StringArray::from(values)))
}
