//! Treatment-control matching for the impact evaluation
//!
//! This module pairs treated villages with statistically similar controls:
//!
//! 1. Matching configuration (method, ratio, replacement, caliper, coarsening)
//! 2. Complete-case preparation of the covariate table snapshot
//! 3. Three interchangeable strategies: propensity score, Mahalanobis
//!    distance and coarsened exact matching
//! 4. Deterministic greedy assignment shared by all strategies
//! 5. Covariate balance and common support assessment of the matched sets

pub mod assignment;
pub mod balance;
pub mod coarsening;
pub mod criteria;
pub mod mahalanobis;
pub mod matcher;
pub mod preparation;
pub mod propensity;
pub mod types;
pub mod validation;

pub use balance::{
    BalanceCalculator, BalanceConfig, BalanceMetric, BalanceReport, BalanceSummary,
    CommonSupport, ControlWeighting,
};
pub use coarsening::CoarsenedExactMatching;
pub use criteria::{
    BinSpec, Caliper, CaliperScale, MatchingConfig, MatchingConfigBuilder, MatchingMethod,
    ScoreMetric,
};
pub use mahalanobis::MahalanobisMatching;
pub use matcher::{Matcher, MatchingStrategy, StrategyOutcome};
pub use preparation::MatchingData;
pub use propensity::{PropensityScoreMatching, ScoreMatches, match_on_scores};
pub use types::{
    ExcludedUnit, ExclusionReason, MatchPair, MatchingResult, MethodDetails, PropensityScore,
    ShortMatch, UnmatchedReason, UnmatchedUnit,
};
