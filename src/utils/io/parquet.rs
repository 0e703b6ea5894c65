//! Parquet file operations
//!
//! Rows are converted to Arrow record batches with `serde_arrow` and written
//! with the Arrow Parquet writer. The covariate table is persisted in long
//! format: one row per `(unit, covariate, extraction_date)`.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arrow_schema::{FieldRef, Schema};
use chrono::NaiveDate;
use log::{debug, info};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_arrow::schema::{SchemaLike, TracingOptions};

use crate::error::{Result, StudyError};
use crate::models::{
    CovariateKind, CovariateRecord, CovariateSchema, CovariateTable, CovariateValue, UnitId,
};
use crate::utils::{DEFAULT_BATCH_SIZE, get_batch_size};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Write serializable rows to a Parquet file
///
/// The Arrow schema is traced from the row type, so an empty slice still
/// produces a file with the full schema.
pub fn write_records<T>(path: &Path, rows: &[T]) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let start = Instant::now();
    debug!("Writing {}", path.display());

    let options = TracingOptions::default().enums_without_data_as_strings(true);
    let fields = Vec::<FieldRef>::from_type::<T>(options)?;
    let schema = Arc::new(Schema::new(fields.clone()));
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;

    let batch_size = get_batch_size().unwrap_or(DEFAULT_BATCH_SIZE);
    if rows.is_empty() {
        let empty: &[T] = &[];
        writer.write(&serde_arrow::to_record_batch(&fields, &empty)?)?;
    }
    for chunk in rows.chunks(batch_size) {
        let batch = serde_arrow::to_record_batch(&fields, &chunk)?;
        writer.write(&batch)?;
    }
    writer.close()?;

    info!(
        "Wrote {} rows to {} in {:?}",
        rows.len(),
        path.display(),
        start.elapsed()
    );
    Ok(())
}

/// Read all rows of a Parquet file
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let start = Instant::now();
    debug!("Reading {}", path.display());

    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        rows.extend(serde_arrow::from_record_batch::<Vec<T>>(&batch)?);
    }

    info!(
        "Read {} rows from {} in {:?}",
        rows.len(),
        path.display(),
        start.elapsed()
    );
    Ok(rows)
}

/// One covariate value in long format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateRow {
    pub unit_id: String,
    pub extraction_date: String,
    pub covariate: String,
    pub kind: CovariateKind,
    pub numeric_value: Option<f64>,
    pub categorical_value: Option<String>,
    pub is_missing: bool,
}

impl CovariateRow {
    fn from_value(record: &CovariateRecord, covariate: &str, kind: CovariateKind) -> Self {
        let value = record.get(covariate);
        Self {
            unit_id: record.unit_id.to_string(),
            extraction_date: record.extraction_date.format(DATE_FORMAT).to_string(),
            covariate: covariate.to_string(),
            kind,
            numeric_value: value.as_f64(),
            categorical_value: value.as_category().map(str::to_string),
            is_missing: value.is_missing(),
        }
    }

    fn value(&self) -> Result<CovariateValue> {
        if self.is_missing {
            return Ok(CovariateValue::Missing);
        }
        match (self.kind, self.numeric_value, &self.categorical_value) {
            (CovariateKind::Numeric, Some(v), _) => Ok(CovariateValue::Numeric(v)),
            (CovariateKind::Categorical, _, Some(c)) => Ok(CovariateValue::Categorical(c.clone())),
            _ => Err(StudyError::SchemaError(format!(
                "row {}/{} has no {:?} value",
                self.unit_id, self.covariate, self.kind
            ))),
        }
    }
}

/// Write a covariate table in long format
///
/// With `extraction_date` set, only that snapshot is written.
pub fn write_covariate_table(
    table: &CovariateTable,
    extraction_date: Option<NaiveDate>,
    path: &Path,
) -> Result<()> {
    let fields: Vec<(&str, CovariateKind)> = table.schema().fields().collect();
    let rows: Vec<CovariateRow> = table
        .records()
        .filter(|record| extraction_date.is_none_or(|d| record.extraction_date == d))
        .flat_map(|record| {
            fields
                .iter()
                .map(move |(name, kind)| CovariateRow::from_value(record, name, *kind))
        })
        .collect();
    write_records(path, &rows)
}

/// Read a covariate table written by [`write_covariate_table`]
///
/// The schema is rebuilt from the `kind` column.
pub fn read_covariate_table(path: &Path) -> Result<CovariateTable> {
    let rows: Vec<CovariateRow> = read_records(path)?;

    let mut schema = CovariateSchema::new();
    let mut records: BTreeMap<(UnitId, NaiveDate), CovariateRecord> = BTreeMap::new();
    for row in &rows {
        schema.merge(&CovariateSchema::new().with_field(&row.covariate, row.kind))?;
        let date = NaiveDate::parse_from_str(&row.extraction_date, DATE_FORMAT).map_err(|e| {
            StudyError::SchemaError(format!("invalid extraction date {}: {e}", row.extraction_date))
        })?;
        let unit_id = UnitId::from(row.unit_id.as_str());
        records
            .entry((unit_id.clone(), date))
            .or_insert_with(|| CovariateRecord::new(unit_id, date))
            .values
            .insert(row.covariate.clone(), row.value()?);
    }

    let mut table = CovariateTable::new(schema);
    for record in records.into_values() {
        table.upsert(record)?;
    }
    Ok(table)
}
