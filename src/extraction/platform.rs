//! Access to the external geospatial data platform
//!
//! The toolkit does not implement the platform; it only consumes a query
//! interface taking a unit polygon, a dataset and a date range.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::definition::CovariateDefinition;
use crate::error::util::safe_read_to_string;
use crate::error::{Result, StudyError};
use crate::geometry::Polygon;
use crate::models::{CovariateValue, UnitId};

/// Failure of a single platform query
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Worth retrying (timeouts, rate limits, 5xx)
    #[error("transient platform failure: {0}")]
    Transient(String),
    /// Retrying will not help (unknown dataset, invalid region)
    #[error("permanent platform failure: {0}")]
    Permanent(String),
}

impl PlatformError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<PlatformError> for StudyError {
    fn from(error: PlatformError) -> Self {
        Self::PlatformError(error.to_string())
    }
}

/// One per-unit, per-covariate request
#[derive(Debug, Clone, Copy)]
pub struct PlatformQuery<'a> {
    pub unit_id: &'a UnitId,
    pub region: &'a Polygon,
    pub definition: &'a CovariateDefinition,
}

/// Query interface of a geospatial data platform
pub trait GeoPlatform: Send + Sync {
    /// Compute one aggregate statistic for one unit
    fn query(
        &self,
        query: PlatformQuery<'_>,
    ) -> impl Future<Output = std::result::Result<CovariateValue, PlatformError>> + Send;
}

/// Platform serving pre-fetched statistics
///
/// Used for offline runs from an exported statistics file and in tests.
/// Scripted transient failures are consumed one per query.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    values: HashMap<(UnitId, String), CovariateValue>,
    transient_failures: Mutex<HashMap<(UnitId, String), u32>>,
    permanent_failures: HashSet<(UnitId, String)>,
    queries: AtomicUsize,
}

impl InMemoryPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the value returned for a unit's covariate
    #[must_use]
    pub fn with_value(mut self, unit_id: &str, covariate: &str, value: CovariateValue) -> Self {
        self.values
            .insert((UnitId::from(unit_id), covariate.to_string()), value);
        self
    }

    /// Fail the next `times` queries for a unit's covariate with a transient error
    #[must_use]
    pub fn with_transient_failures(self, unit_id: &str, covariate: &str, times: u32) -> Self {
        if let Ok(mut failures) = self.transient_failures.lock() {
            failures.insert((UnitId::from(unit_id), covariate.to_string()), times);
        }
        self
    }

    /// Always fail queries for a unit's covariate with a permanent error
    #[must_use]
    pub fn with_permanent_failure(mut self, unit_id: &str, covariate: &str) -> Self {
        self.permanent_failures
            .insert((UnitId::from(unit_id), covariate.to_string()));
        self
    }

    /// Load statistics exported as `{"unit_id": {"covariate": value, ...}, ...}`
    ///
    /// Numbers become numeric values, strings categorical values and `null`
    /// an explicit missing value.
    pub fn load_json(path: &Path) -> Result<Self> {
        let text = safe_read_to_string(path, "pre-fetched platform statistics")?;
        let root: Value = serde_json::from_str(&text)?;
        let units = root.as_object().ok_or_else(|| {
            StudyError::ValidationError("statistics file must be a JSON object".into())
        })?;

        let mut platform = Self::new();
        for (unit_id, covariates) in units {
            let Some(covariates) = covariates.as_object() else {
                return Err(StudyError::ValidationError(format!(
                    "statistics for {unit_id} must be an object"
                )));
            };
            for (name, value) in covariates {
                let value = match value {
                    Value::Number(n) => CovariateValue::Numeric(n.as_f64().unwrap_or(f64::NAN)),
                    Value::String(s) => CovariateValue::Categorical(s.clone()),
                    Value::Null => CovariateValue::Missing,
                    other => {
                        return Err(StudyError::ValidationError(format!(
                            "unsupported statistic {other} for {unit_id}/{name}"
                        )));
                    }
                };
                platform = platform.with_value(unit_id, name, value);
            }
        }
        Ok(platform)
    }

    /// Number of queries served so far (including failed ones)
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn answer(&self, query: PlatformQuery<'_>) -> std::result::Result<CovariateValue, PlatformError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let key = (query.unit_id.clone(), query.definition.name.clone());

        if self.permanent_failures.contains(&key) {
            return Err(PlatformError::Permanent(format!(
                "dataset {} rejected region of {}",
                query.definition.dataset, query.unit_id
            )));
        }

        let mut failures = self
            .transient_failures
            .lock()
            .map_err(|_| PlatformError::Permanent("failure script poisoned".into()))?;
        if let Some(remaining) = failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::Transient(format!(
                    "timeout querying {} for {}",
                    query.definition.dataset, query.unit_id
                )));
            }
        }
        drop(failures);

        self.values.get(&key).cloned().ok_or_else(|| {
            PlatformError::Permanent(format!(
                "no {} statistic for {}",
                query.definition.name, query.unit_id
            ))
        })
    }
}

impl GeoPlatform for InMemoryPlatform {
    async fn query(
        &self,
        query: PlatformQuery<'_>,
    ) -> std::result::Result<CovariateValue, PlatformError> {
        self.answer(query)
    }
}
