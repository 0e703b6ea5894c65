//! Covariate extractor
//!
//! Queries the platform for every (unit, covariate) pair and materialises one
//! covariate record per unit. Units are independent, so their queries run
//! concurrently up to the configured limit; covariates of one unit are queried
//! in definition order and the unit's record is written once, after all of
//! them resolve.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

use super::definition::{CovariateDefinition, schema_from_definitions};
use super::platform::{GeoPlatform, PlatformQuery};
use super::retry::{RetryPolicy, run_with_retry};
use crate::error::Result;
use crate::geometry::{GeometryIssue, Polygon};
use crate::models::{
    AdministrativeUnit, CovariateRecord, CovariateSchema, CovariateTable, CovariateValue, UnitId,
};
use crate::utils::logging::progress;

/// Environment variable overriding the number of concurrent unit queries
pub const CONCURRENCY_ENV_VAR: &str = "RUBEHO_QUERY_CONCURRENCY";

/// Extraction settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub retry: RetryPolicy,
    /// Maximum units queried at once; defaults to the number of CPUs
    pub concurrency: Option<usize>,
}

impl ExtractionConfig {
    /// Concurrency limit: environment override, then configuration, then CPU count
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        get_query_concurrency()
            .or(self.concurrency)
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }
}

/// Read the concurrency override from the environment
#[must_use]
pub fn get_query_concurrency() -> Option<usize> {
    std::env::var(CONCURRENCY_ENV_VAR)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
}

/// A unit excluded before querying because of its geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub unit_id: UnitId,
    pub issue: GeometryIssue,
}

/// A covariate that could not be obtained for a unit; stored as missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQuery {
    pub unit_id: UnitId,
    pub covariate: String,
    pub attempts: u32,
    pub error: String,
}

/// What happened to every unit of an extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub extraction_date: NaiveDate,
    pub units_requested: usize,
    pub units_extracted: usize,
    pub skipped: Vec<SkippedUnit>,
    pub failed: Vec<FailedQuery>,
}

impl ExtractionReport {
    #[must_use]
    pub const fn new(extraction_date: NaiveDate, units_requested: usize) -> Self {
        Self {
            extraction_date,
            units_requested,
            units_extracted: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// No unit skipped and no query failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Covariate table together with the report of the run that produced it
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub table: CovariateTable,
    pub report: ExtractionReport,
}

struct UnitOutcome {
    record: CovariateRecord,
    failures: Vec<FailedQuery>,
}

/// Extracts covariates for administrative units from a geospatial platform
#[derive(Debug)]
pub struct CovariateExtractor<P> {
    platform: P,
    config: ExtractionConfig,
}

impl<P: GeoPlatform> CovariateExtractor<P> {
    #[must_use]
    pub const fn new(platform: P, config: ExtractionConfig) -> Self {
        Self { platform, config }
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Extract covariates into a fresh table
    pub async fn extract(
        &self,
        units: &[AdministrativeUnit],
        definitions: &[CovariateDefinition],
        extraction_date: NaiveDate,
    ) -> Result<ExtractionRun> {
        let schema = schema_from_definitions(definitions)?;
        let mut table = CovariateTable::new(schema);
        let report = self
            .extract_into(&mut table, units, definitions, extraction_date)
            .await?;
        Ok(ExtractionRun { table, report })
    }

    /// Extract covariates into an existing table
    ///
    /// Existing values with the same `(unit, covariate, extraction_date)`
    /// key are overwritten, so re-running is idempotent. A unit skipped for
    /// its geometry loses any record it had for `extraction_date`.
    pub async fn extract_into(
        &self,
        table: &mut CovariateTable,
        units: &[AdministrativeUnit],
        definitions: &[CovariateDefinition],
        extraction_date: NaiveDate,
    ) -> Result<ExtractionReport> {
        let start_time = Instant::now();
        let schema = schema_from_definitions(definitions)?;
        table.extend_schema(&schema)?;

        let mut report = ExtractionReport::new(extraction_date, units.len());
        let mut seen = BTreeSet::new();
        let mut eligible: Vec<(&UnitId, &Polygon)> = Vec::with_capacity(units.len());

        for unit in units {
            if !seen.insert(&unit.id) {
                warn!("Unit {} listed twice, extracting it once", unit.id);
                continue;
            }
            let issue = match &unit.boundary {
                None => Some(GeometryIssue::Missing),
                Some(boundary) => boundary.validate().err(),
            };
            match (issue, &unit.boundary) {
                (None, Some(boundary)) => eligible.push((&unit.id, boundary)),
                (issue, _) => {
                    let issue = issue.unwrap_or(GeometryIssue::Missing);
                    warn!("Skipping unit {}: {issue}", unit.id);
                    if table.remove(&unit.id, extraction_date).is_some() {
                        info!(
                            "Dropped the {extraction_date} record of skipped unit {}",
                            unit.id
                        );
                    }
                    report.skipped.push(SkippedUnit {
                        unit_id: unit.id.clone(),
                        issue,
                    });
                }
            }
        }

        info!(
            "Extracting {} covariates for {} units ({} skipped for geometry)",
            definitions.len(),
            eligible.len(),
            report.skipped.len()
        );

        let pb = progress::create_main_progress_bar(
            eligible.len() as u64,
            Some("Extracting covariates"),
        );
        let concurrency = self.config.effective_concurrency();
        let schema = &schema;
        let pb_ref = &pb;

        let mut outcomes: Vec<UnitOutcome> = stream::iter(eligible)
            .map(|(unit_id, region)| async move {
                let outcome = self
                    .extract_unit(unit_id, region, definitions, schema, extraction_date)
                    .await;
                pb_ref.inc(1);
                outcome
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // Completion order depends on latency; records are written in id order
        outcomes.sort_by(|a, b| a.record.unit_id.cmp(&b.record.unit_id));
        for outcome in outcomes {
            report.failed.extend(outcome.failures);
            table.upsert(outcome.record)?;
            report.units_extracted += 1;
        }
        report.skipped.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        progress::finish_progress_bar(&pb, Some("Extraction complete"));
        info!(
            "Extracted {} of {} units in {:?}: {} skipped, {} failed queries",
            report.units_extracted,
            report.units_requested,
            start_time.elapsed(),
            report.skipped.len(),
            report.failed.len()
        );

        Ok(report)
    }

    async fn extract_unit(
        &self,
        unit_id: &UnitId,
        region: &Polygon,
        definitions: &[CovariateDefinition],
        schema: &CovariateSchema,
        extraction_date: NaiveDate,
    ) -> UnitOutcome {
        let mut record = CovariateRecord::new(unit_id.clone(), extraction_date);
        let mut failures = Vec::new();

        for definition in definitions {
            let query = PlatformQuery {
                unit_id,
                region,
                definition,
            };
            let outcome = run_with_retry(&self.config.retry, || self.platform.query(query)).await;

            let value = match outcome.result {
                Ok(value) => match schema.validate(&definition.name, &value) {
                    Ok(()) => value,
                    Err(e) => {
                        warn!("Unit {unit_id}: discarding {} ({e})", definition.name);
                        failures.push(FailedQuery {
                            unit_id: unit_id.clone(),
                            covariate: definition.name.clone(),
                            attempts: outcome.attempts,
                            error: e.to_string(),
                        });
                        CovariateValue::Missing
                    }
                },
                Err(e) => {
                    warn!(
                        "Unit {unit_id}: {} failed after {} attempts ({e})",
                        definition.name, outcome.attempts
                    );
                    failures.push(FailedQuery {
                        unit_id: unit_id.clone(),
                        covariate: definition.name.clone(),
                        attempts: outcome.attempts,
                        error: e.to_string(),
                    });
                    CovariateValue::Missing
                }
            };
            debug!("Unit {unit_id}: {} = {value:?}", definition.name);
            record.values.insert(definition.name.clone(), value);
        }

        UnitOutcome { record, failures }
    }
}
