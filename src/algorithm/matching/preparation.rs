//! Preparation of the matching input
//!
//! Builds a complete-case snapshot of the covariate table for one extraction
//! date: units are ordered by id, units with missing covariates are excluded
//! listwise and reported, and categorical covariates can be expanded into a
//! numeric design matrix.

use chrono::NaiveDate;
use log::{info, warn};
use nalgebra::DMatrix;
use std::collections::{BTreeMap, BTreeSet};

use super::types::{ExcludedUnit, ExclusionReason};
use crate::error::{Result, StudyError};
use crate::models::{CovariateKind, CovariateTable, CovariateValue, UnitId};

/// Numeric matrix derived from the matched-on covariates
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Column names (`covariate` or `covariate=level` for one-hot columns)
    pub columns: Vec<String>,
    /// One row per unit, in [`MatchingData`] order
    pub values: DMatrix<f64>,
}

/// Complete-case matching input
#[derive(Debug, Clone)]
pub struct MatchingData {
    covariates: Vec<String>,
    kinds: Vec<CovariateKind>,
    unit_ids: Vec<UnitId>,
    treated: Vec<bool>,
    /// Row-major covariate values, one row per unit, none missing
    values: Vec<Vec<CovariateValue>>,
    excluded: Vec<ExcludedUnit>,
}

impl MatchingData {
    /// Snapshot the table at `extraction_date`
    ///
    /// # Arguments
    ///
    /// * `table` - Covariate table
    /// * `extraction_date` - Snapshot date
    /// * `flags` - Treatment flag per unit; units absent from it are excluded
    /// * `covariates` - Covariates to match on; empty selects every declared one
    pub fn from_table(
        table: &CovariateTable,
        extraction_date: NaiveDate,
        flags: &BTreeMap<UnitId, bool>,
        covariates: &[String],
    ) -> Result<Self> {
        let schema = table.schema();
        let covariates: Vec<String> = if covariates.is_empty() {
            schema.names()
        } else {
            covariates.to_vec()
        };
        if covariates.is_empty() {
            return Err(StudyError::ValidationError(
                "no covariates to match on".into(),
            ));
        }

        let mut kinds = Vec::with_capacity(covariates.len());
        let mut seen = BTreeSet::new();
        for name in &covariates {
            if !seen.insert(name) {
                return Err(StudyError::ValidationError(format!(
                    "covariate {name} listed twice"
                )));
            }
            let kind = schema.kind_of(name).ok_or_else(|| {
                StudyError::ValidationError(format!("covariate {name} is not declared"))
            })?;
            kinds.push(kind);
        }

        let records: BTreeMap<&UnitId, _> = table
            .records_for_date(extraction_date)
            .into_iter()
            .map(|record| (&record.unit_id, record))
            .collect();

        let mut data = Self {
            covariates,
            kinds,
            unit_ids: Vec::new(),
            treated: Vec::new(),
            values: Vec::new(),
            excluded: Vec::new(),
        };

        let all_ids: BTreeSet<&UnitId> = records.keys().copied().chain(flags.keys()).collect();
        for unit_id in all_ids {
            let treated = flags.get(unit_id).copied();
            let Some(record) = records.get(unit_id) else {
                data.exclude(unit_id, treated, ExclusionReason::NoCovariateRecord, Vec::new());
                continue;
            };
            let Some(is_treated) = treated else {
                data.exclude(unit_id, None, ExclusionReason::UnknownTreatment, Vec::new());
                continue;
            };
            let missing = record.missing_among(&data.covariates);
            if !missing.is_empty() {
                data.exclude(unit_id, treated, ExclusionReason::MissingCovariates, missing);
                continue;
            }
            let row = data
                .covariates
                .iter()
                .map(|name| record.get(name).clone())
                .collect();
            data.unit_ids.push(unit_id.clone());
            data.treated.push(is_treated);
            data.values.push(row);
        }

        if !data.excluded.is_empty() {
            warn!(
                "Excluded {} units from matching (missing covariates or treatment flag)",
                data.excluded.len()
            );
        }
        if data.treated_count() == 0 {
            return Err(StudyError::ValidationError(
                "no treated units with complete covariates".into(),
            ));
        }
        if data.control_count() == 0 {
            return Err(StudyError::ValidationError(
                "no control units with complete covariates".into(),
            ));
        }

        info!(
            "Prepared matching data for {}: {} treated, {} controls, {} covariates",
            extraction_date,
            data.treated_count(),
            data.control_count(),
            data.covariates.len()
        );
        Ok(data)
    }

    fn exclude(
        &mut self,
        unit_id: &UnitId,
        treated: Option<bool>,
        reason: ExclusionReason,
        missing: Vec<String>,
    ) {
        self.excluded.push(ExcludedUnit {
            unit_id: unit_id.clone(),
            treated,
            reason,
            missing,
        });
    }

    #[must_use]
    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    #[must_use]
    pub fn kinds(&self) -> &[CovariateKind] {
        &self.kinds
    }

    #[must_use]
    pub fn unit_ids(&self) -> &[UnitId] {
        &self.unit_ids
    }

    #[must_use]
    pub fn unit_id(&self, index: usize) -> &UnitId {
        &self.unit_ids[index]
    }

    #[must_use]
    pub fn treatment(&self) -> &[bool] {
        &self.treated
    }

    #[must_use]
    pub fn is_treated(&self, index: usize) -> bool {
        self.treated[index]
    }

    #[must_use]
    pub fn excluded(&self) -> &[ExcludedUnit] {
        &self.excluded
    }

    /// Number of complete units
    #[must_use]
    pub fn len(&self) -> usize {
        self.unit_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unit_ids.is_empty()
    }

    /// Indices of treated units, in id order
    #[must_use]
    pub fn treated_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.treated[i]).collect()
    }

    /// Indices of control units, in id order
    #[must_use]
    pub fn control_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.treated[i]).collect()
    }

    #[must_use]
    pub fn treated_count(&self) -> usize {
        self.treated.iter().filter(|t| **t).count()
    }

    #[must_use]
    pub fn control_count(&self) -> usize {
        self.len() - self.treated_count()
    }

    /// Index of a unit
    #[must_use]
    pub fn index_of(&self, unit_id: &UnitId) -> Option<usize> {
        self.unit_ids.binary_search(unit_id).ok()
    }

    /// Value of covariate `column` for unit `index`
    #[must_use]
    pub fn value(&self, index: usize, column: usize) -> &CovariateValue {
        &self.values[index][column]
    }

    /// Column index of a covariate
    #[must_use]
    pub fn column_of(&self, covariate: &str) -> Option<usize> {
        self.covariates.iter().position(|c| c == covariate)
    }

    /// Numeric values of one covariate for every unit
    #[must_use]
    pub fn numeric_column(&self, column: usize) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| row[column].as_f64().unwrap_or(f64::NAN))
            .collect()
    }

    /// Sorted distinct levels of a categorical covariate
    #[must_use]
    pub fn levels(&self, column: usize) -> Vec<String> {
        self.values
            .iter()
            .filter_map(|row| row[column].as_category())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Expand the covariates into a numeric design matrix
    ///
    /// Categorical covariates are one-hot encoded with the first sorted level
    /// dropped. Columns without variation carry no information for either
    /// the propensity model or the covariance and are dropped.
    #[must_use]
    pub fn design_matrix(&self) -> DesignMatrix {
        let mut columns: Vec<String> = Vec::new();
        let mut data: Vec<Vec<f64>> = Vec::new();

        for (column, (name, kind)) in self.covariates.iter().zip(&self.kinds).enumerate() {
            match kind {
                CovariateKind::Numeric => {
                    columns.push(name.clone());
                    data.push(self.numeric_column(column));
                }
                CovariateKind::Categorical => {
                    for level in self.levels(column).iter().skip(1) {
                        columns.push(format!("{name}={level}"));
                        data.push(
                            self.values
                                .iter()
                                .map(|row| {
                                    if row[column].as_category() == Some(level.as_str()) {
                                        1.0
                                    } else {
                                        0.0
                                    }
                                })
                                .collect(),
                        );
                    }
                }
            }
        }

        let mut kept_columns = Vec::with_capacity(columns.len());
        let mut kept_data = Vec::with_capacity(data.len());
        for (name, values) in columns.into_iter().zip(data) {
            if is_constant(&values) {
                warn!("Dropping design column {name}: no variation");
                continue;
            }
            kept_columns.push(name);
            kept_data.push(values);
        }

        let values = DMatrix::from_fn(self.len(), kept_data.len(), |r, c| kept_data[c][r]);
        DesignMatrix {
            columns: kept_columns,
            values,
        }
    }
}

fn is_constant(values: &[f64]) -> bool {
    values
        .first()
        .is_none_or(|first| values.iter().all(|v| (v - first).abs() < f64::EPSILON))
}
