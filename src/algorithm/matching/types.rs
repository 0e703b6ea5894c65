//! Type definitions for the matching engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::criteria::MatchingMethod;
use crate::models::UnitId;

/// One treated-control pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub treated_id: UnitId,
    pub control_id: UnitId,
    /// Score difference or distance between the two units
    pub distance: f64,
    /// Position of this control among the treated unit's matches (1-based)
    pub rank: usize,
    pub method: MatchingMethod,
}

/// Why a treated unit received no match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// Every control is farther away than the caliper
    NoControlWithinCaliper,
    /// No control shares the unit's coarsened covariate signature
    NoExactStratum,
    /// Eligible controls existed but were all taken by closer treated units
    ControlsExhausted,
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoControlWithinCaliper => "no control within caliper",
            Self::NoExactStratum => "no control in exact stratum",
            Self::ControlsExhausted => "eligible controls exhausted",
        };
        f.write_str(text)
    }
}

/// A treated unit left without any match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedUnit {
    pub unit_id: UnitId,
    pub reason: UnmatchedReason,
}

/// A treated unit that received fewer controls than the matching ratio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortMatch {
    pub unit_id: UnitId,
    pub matched: usize,
    pub requested: usize,
}

/// Why a unit was left out of matching altogether
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// One or more matched-on covariates are missing
    MissingCovariates,
    /// The unit has no covariate record for the extraction date
    NoCovariateRecord,
    /// The unit is not in the treatment flag set
    UnknownTreatment,
}

/// A unit excluded listwise before matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedUnit {
    pub unit_id: UnitId,
    /// Treatment flag when known
    pub treated: Option<bool>,
    pub reason: ExclusionReason,
    /// Covariates that were missing
    pub missing: Vec<String>,
}

/// Estimated treatment probability of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropensityScore {
    pub unit_id: UnitId,
    pub treated: bool,
    pub score: f64,
    pub logit: f64,
}

/// Method-specific diagnostics of a matching run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MethodDetails {
    PropensityScore {
        /// Intercept and coefficients on the standardized design columns
        coefficients: Vec<(String, f64)>,
        iterations: usize,
        /// Caliper width after resolving standard deviation units
        caliper: Option<f64>,
    },
    Mahalanobis {
        /// Whether the covariance matrix had to be pseudo-inverted
        pseudo_inverse: bool,
        dimensions: usize,
    },
    CoarsenedExact {
        strata: usize,
        /// Strata holding at least one treated and one control unit
        matched_strata: usize,
    },
}

/// Result of the matching process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    pub method: MatchingMethod,
    pub matching_ratio: usize,
    pub with_replacement: bool,
    /// Covariates matched on, in column order
    pub covariates: Vec<String>,
    /// Pairs ordered by treated unit id, then rank
    pub pairs: Vec<MatchPair>,
    pub unmatched: Vec<UnmatchedUnit>,
    pub short_matched: Vec<ShortMatch>,
    pub excluded: Vec<ExcludedUnit>,
    /// Empty unless the propensity score method was used
    pub propensity_scores: Vec<PropensityScore>,
    pub details: MethodDetails,
    /// Treated units with complete covariates
    pub treated_count: usize,
    /// Control units with complete covariates
    pub control_count: usize,
    /// Time taken for matching
    pub matching_time: Duration,
}

impl MatchingResult {
    /// Treated units with at least one match
    #[must_use]
    pub fn matched_treated_count(&self) -> usize {
        let mut ids: Vec<&UnitId> = self.pairs.iter().map(|p| &p.treated_id).collect();
        ids.dedup();
        ids.len()
    }

    /// Times each control was used
    #[must_use]
    pub fn control_usage(&self) -> BTreeMap<&UnitId, usize> {
        let mut usage = BTreeMap::new();
        for pair in &self.pairs {
            *usage.entry(&pair.control_id).or_insert(0) += 1;
        }
        usage
    }

    /// Controls matched to a treated unit, by rank
    #[must_use]
    pub fn controls_for(&self, treated_id: &UnitId) -> Vec<&UnitId> {
        self.pairs
            .iter()
            .filter(|p| &p.treated_id == treated_id)
            .map(|p| &p.control_id)
            .collect()
    }

    /// Propensity score of a unit, when estimated
    #[must_use]
    pub fn propensity_score(&self, unit_id: &UnitId) -> Option<&PropensityScore> {
        self.propensity_scores.iter().find(|s| &s.unit_id == unit_id)
    }

    /// Generate a short human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} matching (1:{}, {} replacement): {} of {} treated matched with {} pairs, \
             {} unmatched, {} short, {} excluded",
            self.method,
            self.matching_ratio,
            if self.with_replacement { "with" } else { "without" },
            self.matched_treated_count(),
            self.treated_count,
            self.pairs.len(),
            self.unmatched.len(),
            self.short_matched.len(),
            self.excluded.len()
        )
    }
}
