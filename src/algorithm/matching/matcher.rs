//! Core matching orchestration
//!
//! This module implements the Matcher struct which validates the
//! configuration, dispatches to the selected strategy and turns its index
//! based assignment into a `MatchingResult` keyed by unit ids.

use chrono::NaiveDate;
use log::info;
use std::collections::BTreeMap;
use std::time::Instant;

use super::assignment::Assignment;
use super::coarsening::CoarsenedExactMatching;
use super::criteria::{MatchingConfig, MatchingMethod};
use super::mahalanobis::MahalanobisMatching;
use super::preparation::MatchingData;
use super::propensity::PropensityScoreMatching;
use super::types::{
    MatchPair, MatchingResult, MethodDetails, PropensityScore, ShortMatch, UnmatchedUnit,
};
use super::validation::{validate_config, verify_result};
use crate::error::Result;
use crate::models::{CovariateTable, UnitId};

/// Treated-unit count above which distance rows are computed in parallel
pub const PARALLEL_THRESHOLD: usize = 1000;

/// What a strategy hands back to the matcher
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub assignment: Assignment,
    pub propensity_scores: Vec<PropensityScore>,
    pub details: MethodDetails,
}

/// A way of pairing treated units with controls
///
/// Strategies are pure: the same data and configuration always give the
/// same outcome.
pub trait MatchingStrategy {
    fn method(&self) -> MatchingMethod;

    fn match_units(&self, data: &MatchingData, config: &MatchingConfig) -> Result<StrategyOutcome>;
}

/// Matcher for pairing treated units with controls
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchingConfig,
}

impl Matcher {
    /// Create a new matcher with the given configuration
    #[must_use]
    pub const fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Build the matching input from a covariate table snapshot and match it
    pub fn match_table(
        &self,
        table: &CovariateTable,
        extraction_date: NaiveDate,
        flags: &BTreeMap<UnitId, bool>,
    ) -> Result<MatchingResult> {
        validate_config(&self.config)?;
        let data = MatchingData::from_table(table, extraction_date, flags, &self.config.covariates)?;
        self.perform_matching(&data)
    }

    /// Perform matching on prepared data
    ///
    /// # Arguments
    ///
    /// * `data` - Complete-case covariates and treatment flags
    ///
    /// # Returns
    ///
    /// Result containing the pairs, unmatched treated units and exclusions
    pub fn perform_matching(&self, data: &MatchingData) -> Result<MatchingResult> {
        let start_time = Instant::now();
        validate_config(&self.config)?;

        info!(
            "Matching {} treated units against {} controls ({})",
            data.treated_count(),
            data.control_count(),
            self.config.method
        );

        let outcome = match self.config.method {
            MatchingMethod::PropensityScore => {
                PropensityScoreMatching.match_units(data, &self.config)?
            }
            MatchingMethod::Mahalanobis => MahalanobisMatching.match_units(data, &self.config)?,
            MatchingMethod::CoarsenedExact => {
                CoarsenedExactMatching.match_units(data, &self.config)?
            }
        };

        let method = self.config.method;
        let ratio = self.config.matching_ratio;
        let assignment = outcome.assignment;

        let result = MatchingResult {
            method,
            matching_ratio: ratio,
            with_replacement: self.config.with_replacement,
            covariates: data.covariates().to_vec(),
            pairs: assignment
                .pairs
                .iter()
                .map(|p| MatchPair {
                    treated_id: data.unit_id(p.treated).clone(),
                    control_id: data.unit_id(p.control).clone(),
                    distance: p.distance,
                    rank: p.rank,
                    method,
                })
                .collect(),
            unmatched: assignment
                .unmatched
                .iter()
                .map(|&(t, reason)| UnmatchedUnit {
                    unit_id: data.unit_id(t).clone(),
                    reason,
                })
                .collect(),
            short_matched: assignment
                .short
                .iter()
                .map(|&(t, matched)| ShortMatch {
                    unit_id: data.unit_id(t).clone(),
                    matched,
                    requested: ratio,
                })
                .collect(),
            excluded: data.excluded().to_vec(),
            propensity_scores: outcome.propensity_scores,
            details: outcome.details,
            treated_count: data.treated_count(),
            control_count: data.control_count(),
            matching_time: start_time.elapsed(),
        };
        verify_result(&result)?;

        let elapsed = result.matching_time;
        info!(
            "Matching complete: {} in {:.2?} ({:.2} treated/sec)",
            result.summary(),
            elapsed,
            data.treated_count() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );

        Ok(result)
    }
}
