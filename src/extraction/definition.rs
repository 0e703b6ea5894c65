//! Covariate definitions: what to ask the geospatial platform for

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Result, StudyError};
use crate::models::{CovariateKind, CovariateSchema};

/// Statistic computed over the pixels/features selected by the reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStatistic {
    Mean,
    Median,
    Sum,
    Min,
    Max,
    StdDev,
    Count,
    /// Most frequent class; yields a categorical value
    Mode,
}

/// Spatial region the statistic is reduced over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpatialReduction {
    /// Pixels inside the village polygon
    WithinPolygon,
    /// Pixels inside the polygon grown by a buffer
    WithinBuffer { meters: f64 },
    /// Value at the polygon centroid
    AtCentroid,
    /// Distance from the polygon to the nearest feature of the dataset
    DistanceToNearest,
}

/// A named covariate and how to compute it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateDefinition {
    /// Column name in the covariate table
    pub name: String,
    /// Platform dataset identifier (image collection, feature collection, ...)
    pub dataset: String,
    /// Band or property within the dataset
    #[serde(default)]
    pub band: Option<String>,
    pub statistic: AggregationStatistic,
    pub reduction: SpatialReduction,
    /// Inclusive date range filter for time-varying datasets
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl CovariateDefinition {
    #[must_use]
    pub fn new(
        name: &str,
        dataset: &str,
        statistic: AggregationStatistic,
        reduction: SpatialReduction,
    ) -> Self {
        Self {
            name: name.to_string(),
            dataset: dataset.to_string(),
            band: None,
            statistic,
            reduction,
            start_date: None,
            end_date: None,
        }
    }

    #[must_use]
    pub fn with_band(mut self, band: &str) -> Self {
        self.band = Some(band.to_string());
        self
    }

    #[must_use]
    pub const fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Kind of value this definition produces
    #[must_use]
    pub const fn kind(&self) -> CovariateKind {
        match self.statistic {
            AggregationStatistic::Mode => CovariateKind::Categorical,
            _ => CovariateKind::Numeric,
        }
    }

    /// Check the definition is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StudyError::ValidationError("covariate with empty name".into()));
        }
        if self.dataset.trim().is_empty() {
            return Err(StudyError::ValidationError(format!(
                "covariate {} has no dataset",
                self.name
            )));
        }
        if let SpatialReduction::WithinBuffer { meters } = self.reduction {
            if !meters.is_finite() || meters <= 0.0 {
                return Err(StudyError::ValidationError(format!(
                    "covariate {} has invalid buffer of {meters} m",
                    self.name
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(StudyError::ValidationError(format!(
                    "covariate {} has start date {start} after end date {end}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Validate a set of definitions and derive the run's covariate schema
pub fn schema_from_definitions(definitions: &[CovariateDefinition]) -> Result<CovariateSchema> {
    let mut seen = BTreeSet::new();
    let mut schema = CovariateSchema::new();
    for definition in definitions {
        definition.validate()?;
        if !seen.insert(definition.name.as_str()) {
            return Err(StudyError::ValidationError(format!(
                "covariate {} defined twice",
                definition.name
            )));
        }
        schema = schema.with_field(&definition.name, definition.kind());
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_definitions() {
        let definitions = vec![
            CovariateDefinition::new(
                "elevation",
                "USGS/SRTMGL1_003",
                AggregationStatistic::Mean,
                SpatialReduction::WithinPolygon,
            ),
            CovariateDefinition::new(
                "land_cover",
                "ESA/WorldCover/v200",
                AggregationStatistic::Mode,
                SpatialReduction::WithinBuffer { meters: 500.0 },
            ),
        ];
        let schema = schema_from_definitions(&definitions).unwrap();
        assert_eq!(schema.kind_of("elevation"), Some(CovariateKind::Numeric));
        assert_eq!(schema.kind_of("land_cover"), Some(CovariateKind::Categorical));
    }

    #[test]
    fn test_invalid_definitions() {
        let duplicate = CovariateDefinition::new(
            "elevation",
            "dem",
            AggregationStatistic::Mean,
            SpatialReduction::WithinPolygon,
        );
        assert!(schema_from_definitions(&[duplicate.clone(), duplicate]).is_err());

        let bad_buffer = CovariateDefinition::new(
            "forest",
            "hansen",
            AggregationStatistic::Mean,
            SpatialReduction::WithinBuffer { meters: -1.0 },
        );
        assert!(bad_buffer.validate().is_err());

        let bad_dates = CovariateDefinition::new(
            "ndvi",
            "modis",
            AggregationStatistic::Median,
            SpatialReduction::WithinPolygon,
        )
        .with_date_range(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
        );
        assert!(bad_dates.validate().is_err());
    }
}
