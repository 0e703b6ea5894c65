//! Matching configuration
//!
//! This module defines the method, ratio, replacement policy, caliper and
//! coarsening parameters that drive a matching run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strategy used to pair treated units with controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMethod {
    /// Nearest neighbour on an estimated propensity score
    #[default]
    PropensityScore,
    /// Nearest neighbour on covariance-weighted distance
    Mahalanobis,
    /// Exact matching on coarsened covariates
    CoarsenedExact,
}

impl MatchingMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PropensityScore => "propensity_score",
            Self::Mahalanobis => "mahalanobis",
            Self::CoarsenedExact => "coarsened_exact",
        }
    }
}

impl fmt::Display for MatchingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units the caliper width is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaliperScale {
    /// Width is in distance units directly
    #[default]
    Absolute,
    /// Width is a multiple of the standard deviation of the matching score
    StandardDeviations,
}

/// Maximum allowed distance for a valid match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Caliper {
    pub width: f64,
    #[serde(default)]
    pub scale: CaliperScale,
}

impl Caliper {
    #[must_use]
    pub const fn absolute(width: f64) -> Self {
        Self {
            width,
            scale: CaliperScale::Absolute,
        }
    }

    #[must_use]
    pub const fn standard_deviations(width: f64) -> Self {
        Self {
            width,
            scale: CaliperScale::StandardDeviations,
        }
    }

    /// Width in distance units given the spread of the matching score
    #[must_use]
    pub fn resolve(&self, score_std_dev: f64) -> f64 {
        match self.scale {
            CaliperScale::Absolute => self.width,
            CaliperScale::StandardDeviations => self.width * score_std_dev,
        }
    }
}

/// Scale on which propensity score distances are measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMetric {
    /// Absolute difference of probabilities
    #[default]
    Probability,
    /// Absolute difference of log-odds
    Logit,
}

/// How a numeric covariate is coarsened for exact matching
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BinSpec {
    /// Equal-width bins, count from Sturges' rule
    #[default]
    Sturges,
    /// Equal-width bins with a fixed count
    Count(usize),
    /// Explicit ascending cut points
    CutPoints(Vec<f64>),
}

/// Configuration for a matching run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub method: MatchingMethod,

    /// Controls matched to each treated unit (1 for 1:1, k for 1:k)
    pub matching_ratio: usize,

    /// Allow one control to serve several treated units
    pub with_replacement: bool,

    /// Maximum distance for a valid match (propensity and Mahalanobis only)
    pub caliper: Option<Caliper>,

    /// Covariates to match on; empty means every declared covariate
    pub covariates: Vec<String>,

    pub score_metric: ScoreMetric,

    /// Per-covariate coarsening; covariates not listed use the default
    pub coarsening: BTreeMap<String, BinSpec>,

    /// Iteration limit for the propensity model
    pub max_iterations: usize,

    /// Convergence tolerance on the largest coefficient update
    pub tolerance: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            method: MatchingMethod::PropensityScore,
            matching_ratio: 1,
            with_replacement: false,
            caliper: None,
            covariates: Vec::new(),
            score_metric: ScoreMetric::Probability,
            coarsening: BTreeMap::new(),
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }
}

impl MatchingConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for constructing matching configuration
    #[must_use]
    pub fn builder() -> MatchingConfigBuilder {
        MatchingConfigBuilder::new()
    }

    /// Bin specification for a covariate
    #[must_use]
    pub fn bin_spec(&self, covariate: &str) -> BinSpec {
        self.coarsening.get(covariate).cloned().unwrap_or_default()
    }

    /// Convert to a human-readable string representation
    #[must_use]
    pub fn to_string_representation(&self) -> String {
        let caliper = match self.caliper {
            Some(Caliper {
                width,
                scale: CaliperScale::Absolute,
            }) => format!("{width}"),
            Some(Caliper {
                width,
                scale: CaliperScale::StandardDeviations,
            }) => format!("{width} SD"),
            None => "none".to_string(),
        };
        format!(
            "Matching Configuration:\n\
             - Method: {}\n\
             - Ratio: 1:{}\n\
             - With replacement: {}\n\
             - Caliper: {}\n\
             - Covariates: {}",
            self.method,
            self.matching_ratio,
            self.with_replacement,
            caliper,
            if self.covariates.is_empty() {
                "all".to_string()
            } else {
                self.covariates.join(", ")
            }
        )
    }
}

/// Builder for constructing matching configuration
#[derive(Debug, Clone)]
pub struct MatchingConfigBuilder {
    config: MatchingConfig,
}

impl Default for MatchingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchingConfigBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MatchingConfig::default(),
        }
    }

    #[must_use]
    pub const fn method(mut self, method: MatchingMethod) -> Self {
        self.config.method = method;
        self
    }

    /// Set the matching ratio
    #[must_use]
    pub const fn matching_ratio(mut self, ratio: usize) -> Self {
        self.config.matching_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_replacement(mut self, replacement: bool) -> Self {
        self.config.with_replacement = replacement;
        self
    }

    #[must_use]
    pub const fn caliper(mut self, caliper: Caliper) -> Self {
        self.config.caliper = Some(caliper);
        self
    }

    #[must_use]
    pub fn covariates(mut self, covariates: &[&str]) -> Self {
        self.config.covariates = covariates.iter().map(|c| (*c).to_string()).collect();
        self
    }

    #[must_use]
    pub const fn score_metric(mut self, metric: ScoreMetric) -> Self {
        self.config.score_metric = metric;
        self
    }

    #[must_use]
    pub fn coarsen(mut self, covariate: &str, bins: BinSpec) -> Self {
        self.config.coarsening.insert(covariate.to_string(), bins);
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, iterations: usize) -> Self {
        self.config.max_iterations = iterations;
        self
    }

    /// Build the matching configuration
    #[must_use]
    pub fn build(self) -> MatchingConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_one_to_one_without_replacement() {
        let config = MatchingConfig::default();
        assert_eq!(config.matching_ratio, 1);
        assert!(!config.with_replacement);
        assert_eq!(config.method, MatchingMethod::PropensityScore);
    }

    #[test]
    fn test_builder_and_caliper_resolution() {
        let config = MatchingConfig::builder()
            .method(MatchingMethod::Mahalanobis)
            .matching_ratio(2)
            .caliper(Caliper::standard_deviations(0.2))
            .coarsen("elevation", BinSpec::Count(4))
            .build();
        assert_eq!(config.matching_ratio, 2);
        assert!((config.caliper.unwrap().resolve(0.5) - 0.1).abs() < 1e-12);
        assert_eq!(config.bin_spec("elevation"), BinSpec::Count(4));
        assert_eq!(config.bin_spec("forest_cover"), BinSpec::Sturges);
        assert!(config.to_string_representation().contains("1:2"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: MatchingConfig =
            serde_json::from_str(r#"{"method": "coarsened_exact", "with_replacement": true}"#)
                .unwrap();
        assert_eq!(config.method, MatchingMethod::CoarsenedExact);
        assert!(config.with_replacement);
        assert_eq!(config.max_iterations, 50);
    }
}
