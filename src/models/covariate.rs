//! Covariate values, records and the per-run schema they are validated against

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::unit::UnitId;
use crate::error::{Result, StudyError};

/// Kind of a covariate column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovariateKind {
    Numeric,
    Categorical,
}

/// A single covariate observation
///
/// `Missing` records a value the platform could not provide; it is never
/// silently replaced by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CovariateValue {
    Numeric(f64),
    Categorical(String),
    Missing,
}

impl CovariateValue {
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_category(&self) -> Option<&str> {
        match self {
            Self::Categorical(c) => Some(c),
            _ => None,
        }
    }

    /// Kind of the value, `None` for missing
    #[must_use]
    pub const fn kind(&self) -> Option<CovariateKind> {
        match self {
            Self::Numeric(_) => Some(CovariateKind::Numeric),
            Self::Categorical(_) => Some(CovariateKind::Categorical),
            Self::Missing => None,
        }
    }
}

/// Declared covariate columns for one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovariateSchema {
    fields: BTreeMap<String, CovariateKind>,
}

impl CovariateSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column to the schema
    #[must_use]
    pub fn with_field(mut self, name: &str, kind: CovariateKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    /// Kind of a declared column
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<CovariateKind> {
        self.fields.get(name).copied()
    }

    /// Declared columns in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, CovariateKind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Declared column names in name order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check a value against the declared kind of its column
    pub fn validate(&self, name: &str, value: &CovariateValue) -> Result<()> {
        let declared = self.kind_of(name).ok_or_else(|| {
            StudyError::SchemaError(format!("covariate {name} is not declared"))
        })?;
        match value.kind() {
            None => Ok(()),
            Some(kind) if kind == declared => match value {
                CovariateValue::Numeric(v) if !v.is_finite() => Err(StudyError::SchemaError(
                    format!("covariate {name} has non-finite value {v}"),
                )),
                _ => Ok(()),
            },
            Some(kind) => Err(StudyError::SchemaError(format!(
                "covariate {name} declared {declared:?} but got {kind:?}"
            ))),
        }
    }

    /// Merge another schema, failing if a column changes kind
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, kind) in other.fields() {
            match self.kind_of(name) {
                Some(existing) if existing != kind => {
                    return Err(StudyError::SchemaError(format!(
                        "covariate {name} redeclared as {kind:?} (was {existing:?})"
                    )));
                }
                _ => {
                    self.fields.insert(name.to_string(), kind);
                }
            }
        }
        Ok(())
    }
}

/// Covariates of one unit for one extraction date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateRecord {
    pub unit_id: UnitId,
    pub extraction_date: NaiveDate,
    pub values: BTreeMap<String, CovariateValue>,
}

impl CovariateRecord {
    #[must_use]
    pub fn new(unit_id: UnitId, extraction_date: NaiveDate) -> Self {
        Self {
            unit_id,
            extraction_date,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, name: &str, value: CovariateValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Value of a covariate, treating absent columns as missing
    #[must_use]
    pub fn get(&self, name: &str) -> &CovariateValue {
        self.values.get(name).unwrap_or(&CovariateValue::Missing)
    }

    /// Names of covariates that are missing among `names`
    #[must_use]
    pub fn missing_among(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.get(name).is_missing())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CovariateSchema {
        CovariateSchema::new()
            .with_field("elevation", CovariateKind::Numeric)
            .with_field("land_cover", CovariateKind::Categorical)
    }

    #[test]
    fn test_schema_accepts_matching_kinds_and_missing() {
        let schema = schema();
        assert!(schema.validate("elevation", &CovariateValue::Numeric(812.0)).is_ok());
        assert!(schema.validate("elevation", &CovariateValue::Missing).is_ok());
        assert!(
            schema
                .validate("land_cover", &CovariateValue::Categorical("forest".into()))
                .is_ok()
        );
    }

    #[test]
    fn test_schema_rejects_wrong_kind_and_undeclared() {
        let schema = schema();
        assert!(schema.validate("land_cover", &CovariateValue::Numeric(1.0)).is_err());
        assert!(schema.validate("rainfall", &CovariateValue::Numeric(1.0)).is_err());
        assert!(schema.validate("elevation", &CovariateValue::Numeric(f64::NAN)).is_err());
    }

    #[test]
    fn test_merge_rejects_kind_change() {
        let mut base = schema();
        let other = CovariateSchema::new().with_field("elevation", CovariateKind::Categorical);
        assert!(base.merge(&other).is_err());
    }

    #[test]
    fn test_absent_column_reads_as_missing() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let record = CovariateRecord::new(UnitId::from("V1"), date)
            .with_value("elevation", CovariateValue::Numeric(1.0));
        assert!(record.get("forest_cover").is_missing());
        assert_eq!(
            record.missing_among(&["elevation".to_string(), "forest_cover".to_string()]),
            vec!["forest_cover".to_string()]
        );
    }
}
