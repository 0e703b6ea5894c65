//! Versioned covariate table
//!
//! Records are keyed by `(unit, extraction_date)`; each covariate inside a
//! record is therefore unique per `(unit, covariate, extraction_date)`.
//! Writing the same key again overwrites the previous value.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use super::covariate::{CovariateRecord, CovariateSchema, CovariateValue};
use super::unit::UnitId;
use crate::error::Result;

/// Covariate records for all units across extraction dates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovariateTable {
    schema: CovariateSchema,
    records: BTreeMap<(UnitId, NaiveDate), CovariateRecord>,
}

impl CovariateTable {
    #[must_use]
    pub fn new(schema: CovariateSchema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &CovariateSchema {
        &self.schema
    }

    /// Extend the declared schema (new extraction runs may add covariates)
    pub fn extend_schema(&mut self, schema: &CovariateSchema) -> Result<()> {
        self.schema.merge(schema)
    }

    /// Insert or overwrite the covariates of one unit for one date
    ///
    /// Values are validated against the schema before anything is written.
    pub fn upsert(&mut self, record: CovariateRecord) -> Result<()> {
        for (name, value) in &record.values {
            self.schema.validate(name, value)?;
        }

        let key = (record.unit_id.clone(), record.extraction_date);
        match self.records.get_mut(&key) {
            Some(existing) => existing.values.extend(record.values),
            None => {
                self.records.insert(key, record);
            }
        }
        Ok(())
    }

    /// Set a single covariate value
    pub fn set_value(
        &mut self,
        unit_id: &UnitId,
        extraction_date: NaiveDate,
        covariate: &str,
        value: CovariateValue,
    ) -> Result<()> {
        self.upsert(CovariateRecord::new(unit_id.clone(), extraction_date).with_value(covariate, value))
    }

    /// Drop the record of one unit for one date
    pub fn remove(
        &mut self,
        unit_id: &UnitId,
        extraction_date: NaiveDate,
    ) -> Option<CovariateRecord> {
        self.records.remove(&(unit_id.clone(), extraction_date))
    }

    #[must_use]
    pub fn get(&self, unit_id: &UnitId, extraction_date: NaiveDate) -> Option<&CovariateRecord> {
        self.records.get(&(unit_id.clone(), extraction_date))
    }

    /// Extraction dates present in the table, oldest first
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records
            .keys()
            .map(|(_, date)| *date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.records.keys().map(|(_, date)| *date).max()
    }

    /// Records of one extraction date in unit id order
    #[must_use]
    pub fn records_for_date(&self, extraction_date: NaiveDate) -> Vec<&CovariateRecord> {
        self.records
            .values()
            .filter(|record| record.extraction_date == extraction_date)
            .collect()
    }

    /// All records ordered by unit id, then date
    pub fn records(&self) -> impl Iterator<Item = &CovariateRecord> {
        self.records.values()
    }

    /// Number of `(unit, date)` records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
