//! Balance assessment for treated-control matching
//!
//! This module computes standardized mean differences between treated and
//! control groups before and after matching, checks common support, and
//! writes the resulting report as a text table, CSV or JSON. It never alters
//! the matches.

use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use super::preparation::MatchingData;
use super::types::MatchingResult;
use crate::error::util::write_atomically;
use crate::error::{Result, StudyError};
use crate::models::{CovariateKind, UnitId};
use crate::utils::io::escape_csv;

/// How controls matched more than once count in the matched group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlWeighting {
    /// Once per pair
    #[default]
    Frequency,
    /// Once, however often matched
    Unique,
}

/// Thresholds for the balance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// |SMD| at or above this marks a covariate as imbalanced
    pub imbalance_threshold: f64,
    /// Range overlap below this flags a common support problem
    pub min_overlap: f64,
    /// Minimum observations per group to compute a metric
    pub min_observations: usize,
    pub control_weighting: ControlWeighting,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            imbalance_threshold: 0.1,
            min_overlap: 0.5,
            min_observations: 2,
            control_weighting: ControlWeighting::Frequency,
        }
    }
}

impl BalanceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.imbalance_threshold.is_finite() || self.imbalance_threshold <= 0.0 {
            return Err(StudyError::ValidationError(
                "imbalance_threshold must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_overlap) {
            return Err(StudyError::ValidationError(
                "min_overlap must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Metric for balance between treated and controls for a single covariate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceMetric {
    /// Covariate name, with `=level` appended for categorical levels
    pub name: String,
    pub covariate: String,
    pub categorical: bool,

    /// Standardized difference between matched groups
    pub standardized_difference: f64,
    /// Standardized difference over the full sample before matching
    pub pre_match_standardized_difference: f64,

    /// Mean (or proportion) for matched treated units
    pub treated_mean: f64,
    /// Mean (or proportion) for matched controls
    pub control_mean: f64,
    pub treated_std: f64,
    pub control_std: f64,

    pub balanced: bool,
}

/// Overlap of treated and control ranges for one numeric quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSupport {
    pub name: String,
    pub treated_min: f64,
    pub treated_max: f64,
    pub control_min: f64,
    pub control_max: f64,
    /// Length of the range intersection over the length of the union
    pub overlap: f64,
    /// Share of matched treated values inside the control range
    pub matched_treated_in_support: f64,
    pub flagged: bool,
}

/// Summary statistics for a balance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// Number of metrics with |SMD| at or above the threshold
    pub imbalanced_covariates: usize,
    pub max_standardized_difference: f64,
    pub mean_absolute_standardized_difference: f64,
    pub pre_match_mean_absolute_standardized_difference: f64,
    pub total_covariates: usize,
    /// Quantities flagged for poor common support
    pub support_flags: usize,
    pub matched_treated: usize,
    /// Matched controls as counted under the configured weighting
    pub matched_controls: usize,
    /// No treated unit found a control, so nothing was assessed
    #[serde(default)]
    pub no_matched_pairs: bool,
}

/// Report on balance between treated units and their matched controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub imbalance_threshold: f64,
    pub control_weighting: ControlWeighting,
    pub metrics: Vec<BalanceMetric>,
    pub support: Vec<CommonSupport>,
    pub summary: BalanceSummary,
    /// Covariates without enough observations for a metric
    pub skipped_covariates: Vec<String>,
}

impl BalanceReport {
    /// Metrics ordered by descending absolute standardized difference
    #[must_use]
    pub fn sorted_metrics(&self) -> Vec<&BalanceMetric> {
        self.metrics
            .iter()
            .sorted_by(|a, b| {
                b.standardized_difference
                    .abs()
                    .total_cmp(&a.standardized_difference.abs())
            })
            .collect()
    }

    /// Metric for a covariate (or `covariate=level`)
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&BalanceMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Write the report to a CSV file
    pub fn write_to_csv(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Covariate,Type,Treated Mean,Control Mean,Treated SD,Control SD,Std Diff,Pre-match Std Diff,Balanced"
        );
        for metric in self.sorted_metrics() {
            let _ = writeln!(
                out,
                "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
                escape_csv(&metric.name),
                if metric.categorical { "Categorical" } else { "Continuous" },
                metric.treated_mean,
                metric.control_mean,
                metric.treated_std,
                metric.control_std,
                metric.standardized_difference,
                metric.pre_match_standardized_difference,
                metric.balanced
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Summary Statistics,,,,,,,,");
        if self.summary.no_matched_pairs {
            let _ = writeln!(out, "No matched pairs,true,,,,,,,");
        }
        let _ = writeln!(out, "Total covariates,{},,,,,,,", self.summary.total_covariates);
        let _ = writeln!(
            out,
            "Imbalanced covariates (|std diff| >= {}),{},,,,,,,",
            self.imbalance_threshold, self.summary.imbalanced_covariates
        );
        let _ = writeln!(
            out,
            "Maximum standardized difference,{:.6},,,,,,,",
            self.summary.max_standardized_difference
        );
        let _ = writeln!(
            out,
            "Mean absolute standardized difference,{:.6},,,,,,,",
            self.summary.mean_absolute_standardized_difference
        );
        let _ = writeln!(
            out,
            "Pre-match mean absolute standardized difference,{:.6},,,,,,,",
            self.summary.pre_match_mean_absolute_standardized_difference
        );
        let _ = writeln!(out, "Common support flags,{},,,,,,,", self.summary.support_flags);

        write_atomically(path, out.as_bytes())
    }

    /// Write the report to a JSON file
    pub fn write_to_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomically(path, &json)
    }
}

impl fmt::Display for BalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.summary.no_matched_pairs {
            return writeln!(
                f,
                "Balance Summary: no matched pairs, {} covariates not assessed",
                self.skipped_covariates.len()
            );
        }
        write!(
            f,
            "Balance Summary:\n\
             - Total covariates: {}\n\
             - Imbalanced covariates (|std diff| >= {}): {} ({:.1}%)\n\
             - Maximum standardized difference: {:.4}\n\
             - Mean absolute standardized difference: {:.4} (before matching {:.4})\n\
             - Common support flags: {}\n\n",
            self.summary.total_covariates,
            self.imbalance_threshold,
            self.summary.imbalanced_covariates,
            if self.summary.total_covariates > 0 {
                100.0 * self.summary.imbalanced_covariates as f64
                    / self.summary.total_covariates as f64
            } else {
                0.0
            },
            self.summary.max_standardized_difference,
            self.summary.mean_absolute_standardized_difference,
            self.summary.pre_match_mean_absolute_standardized_difference,
            self.summary.support_flags
        )?;

        f.write_str(
            "Covariate                      | Type        | Treated Mean | Control Mean | Std Diff | Before\n\
             -------------------------------|-------------|--------------|--------------|----------|---------\n",
        )?;
        for metric in self.sorted_metrics() {
            writeln!(
                f,
                "{:<30} | {:<11} | {:>12.4} | {:>12.4} | {:>8.4} | {:>8.4}",
                truncate_string(&metric.name, 30),
                if metric.categorical { "Categorical" } else { "Continuous" },
                metric.treated_mean,
                metric.control_mean,
                metric.standardized_difference,
                metric.pre_match_standardized_difference
            )?;
        }
        for support in self.support.iter().filter(|s| s.flagged) {
            writeln!(
                f,
                "Common support warning: {} overlap {:.2}",
                support.name, support.overlap
            )?;
        }
        Ok(())
    }
}

/// Calculator for balance metrics between treated and control groups
#[derive(Debug, Clone, Default)]
pub struct BalanceCalculator {
    config: BalanceConfig,
}

/// Row indices of the compared groups
struct Groups {
    treated: Vec<usize>,
    controls: Vec<usize>,
}

impl BalanceCalculator {
    #[must_use]
    pub const fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    /// Set threshold for marking a covariate as imbalanced
    #[must_use]
    pub const fn with_imbalance_threshold(mut self, threshold: f64) -> Self {
        self.config.imbalance_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_control_weighting(mut self, weighting: ControlWeighting) -> Self {
        self.config.control_weighting = weighting;
        self
    }

    /// Calculate balance of the matched sets in `result`
    ///
    /// A result without pairs gives an empty report flagged
    /// `no_matched_pairs`; the unmatched units stay in the result.
    ///
    /// # Arguments
    ///
    /// * `data` - The matching input the result was produced from
    /// * `result` - Matching result to assess
    pub fn calculate_balance(
        &self,
        data: &MatchingData,
        result: &MatchingResult,
    ) -> Result<BalanceReport> {
        self.config.validate()?;
        if result.pairs.is_empty() {
            warn!(
                "No matched pairs among {} treated units, balance not assessed",
                result.treated_count
            );
            return Ok(self.unassessed_report(data));
        }

        let matched = self.matched_groups(data, result)?;
        let full = Groups {
            treated: data.treated_indices(),
            controls: data.control_indices(),
        };

        let mut metrics = Vec::new();
        let mut support = Vec::new();
        let mut skipped = Vec::new();

        for (column, (name, kind)) in data.covariates().iter().zip(data.kinds()).enumerate() {
            match kind {
                CovariateKind::Numeric => {
                    let values = data.numeric_column(column);
                    match self.numeric_metric(name, &values, &matched, &full) {
                        Some(metric) => metrics.push(metric),
                        None => {
                            warn!("Too few observations to assess balance of {name}");
                            skipped.push(name.clone());
                        }
                    }
                    support.push(self.common_support(name, &values, &matched, &full));
                }
                CovariateKind::Categorical => {
                    if matched.treated.len() < self.config.min_observations
                        || matched.controls.len() < self.config.min_observations
                    {
                        warn!("Too few observations to assess balance of {name}");
                        skipped.push(name.clone());
                        continue;
                    }
                    for level in data.levels(column) {
                        let indicator: Vec<f64> = (0..data.len())
                            .map(|i| {
                                if data.value(i, column).as_category() == Some(level.as_str()) {
                                    1.0
                                } else {
                                    0.0
                                }
                            })
                            .collect();
                        metrics.push(self.proportion_metric(
                            name, &level, &indicator, &matched, &full,
                        ));
                    }
                }
            }
        }

        if !result.propensity_scores.is_empty() {
            let mut scores = vec![f64::NAN; data.len()];
            for score in &result.propensity_scores {
                if let Some(i) = data.index_of(&score.unit_id) {
                    scores[i] = score.score;
                }
            }
            support.push(self.common_support("propensity_score", &scores, &matched, &full));
        }

        let summary = self.calculate_summary_statistics(&metrics, &support, &matched);
        info!(
            "Balance assessment complete: {} of {} covariates are imbalanced (|stdiff| >= {}), \
             mean |stdiff| {:.4} (before matching {:.4})",
            summary.imbalanced_covariates,
            summary.total_covariates,
            self.config.imbalance_threshold,
            summary.mean_absolute_standardized_difference,
            summary.pre_match_mean_absolute_standardized_difference
        );

        Ok(BalanceReport {
            imbalance_threshold: self.config.imbalance_threshold,
            control_weighting: self.config.control_weighting,
            metrics,
            support,
            summary,
            skipped_covariates: skipped,
        })
    }

    fn unassessed_report(&self, data: &MatchingData) -> BalanceReport {
        BalanceReport {
            imbalance_threshold: self.config.imbalance_threshold,
            control_weighting: self.config.control_weighting,
            metrics: Vec::new(),
            support: Vec::new(),
            summary: BalanceSummary {
                imbalanced_covariates: 0,
                max_standardized_difference: 0.0,
                mean_absolute_standardized_difference: 0.0,
                pre_match_mean_absolute_standardized_difference: 0.0,
                total_covariates: 0,
                support_flags: 0,
                matched_treated: 0,
                matched_controls: 0,
                no_matched_pairs: true,
            },
            skipped_covariates: data.covariates().to_vec(),
        }
    }

    fn matched_groups(&self, data: &MatchingData, result: &MatchingResult) -> Result<Groups> {
        let index = |id: &UnitId| -> Result<usize> {
            data.index_of(id).ok_or_else(|| {
                StudyError::ValidationError(format!("matched unit {id} is not in the matching data"))
            })
        };

        let treated: BTreeSet<usize> = result
            .pairs
            .iter()
            .map(|p| index(&p.treated_id))
            .collect::<Result<_>>()?;
        let mut controls: Vec<usize> = result
            .pairs
            .iter()
            .map(|p| index(&p.control_id))
            .collect::<Result<_>>()?;
        if self.config.control_weighting == ControlWeighting::Unique {
            controls.sort_unstable();
            controls.dedup();
        }

        Ok(Groups {
            treated: treated.into_iter().collect(),
            controls,
        })
    }

    fn numeric_metric(
        &self,
        name: &str,
        values: &[f64],
        matched: &Groups,
        full: &Groups,
    ) -> Option<BalanceMetric> {
        let pick = |idx: &[usize]| -> Vec<f64> { idx.iter().map(|&i| values[i]).collect() };
        let treated = pick(&matched.treated);
        let controls = pick(&matched.controls);
        if treated.len() < self.config.min_observations
            || controls.len() < self.config.min_observations
        {
            return None;
        }

        let treated_mean = calculate_mean(&treated);
        let control_mean = calculate_mean(&controls);
        let treated_std = calculate_std_dev(&treated, treated_mean);
        let control_std = calculate_std_dev(&controls, control_mean);
        let standardized_difference =
            calculate_standardized_difference(treated_mean, control_mean, treated_std, control_std);

        let pre_treated = pick(&full.treated);
        let pre_controls = pick(&full.controls);
        let pre_t_mean = calculate_mean(&pre_treated);
        let pre_c_mean = calculate_mean(&pre_controls);
        let pre_match_standardized_difference = calculate_standardized_difference(
            pre_t_mean,
            pre_c_mean,
            calculate_std_dev(&pre_treated, pre_t_mean),
            calculate_std_dev(&pre_controls, pre_c_mean),
        );

        Some(BalanceMetric {
            name: name.to_string(),
            covariate: name.to_string(),
            categorical: false,
            standardized_difference,
            pre_match_standardized_difference,
            treated_mean,
            control_mean,
            treated_std,
            control_std,
            balanced: standardized_difference.abs() < self.config.imbalance_threshold,
        })
    }

    fn proportion_metric(
        &self,
        name: &str,
        level: &str,
        indicator: &[f64],
        matched: &Groups,
        full: &Groups,
    ) -> BalanceMetric {
        let proportion = |idx: &[usize]| -> f64 {
            if idx.is_empty() {
                0.0
            } else {
                idx.iter().map(|&i| indicator[i]).sum::<f64>() / idx.len() as f64
            }
        };
        // For proportions, sd = sqrt(p(1-p))
        let bernoulli_std = |p: f64| (p * (1.0 - p)).sqrt();

        let treated_mean = proportion(&matched.treated);
        let control_mean = proportion(&matched.controls);
        let treated_std = bernoulli_std(treated_mean);
        let control_std = bernoulli_std(control_mean);
        let standardized_difference =
            calculate_standardized_difference(treated_mean, control_mean, treated_std, control_std);

        let pre_t = proportion(&full.treated);
        let pre_c = proportion(&full.controls);
        let pre_match_standardized_difference =
            calculate_standardized_difference(pre_t, pre_c, bernoulli_std(pre_t), bernoulli_std(pre_c));

        BalanceMetric {
            name: format!("{name}={level}"),
            covariate: name.to_string(),
            categorical: true,
            standardized_difference,
            pre_match_standardized_difference,
            treated_mean,
            control_mean,
            treated_std,
            control_std,
            balanced: standardized_difference.abs() < self.config.imbalance_threshold,
        }
    }

    fn common_support(
        &self,
        name: &str,
        values: &[f64],
        matched: &Groups,
        full: &Groups,
    ) -> CommonSupport {
        let range = |idx: &[usize]| -> (f64, f64) {
            idx.iter()
                .map(|&i| values[i])
                .filter(|v| v.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                })
        };
        let (treated_min, treated_max) = range(&full.treated);
        let (control_min, control_max) = range(&full.controls);

        let intersection = (treated_max.min(control_max) - treated_min.max(control_min)).max(0.0);
        let union = treated_max.max(control_max) - treated_min.min(control_min);
        let overlap = if !union.is_finite() {
            0.0
        } else if union > 0.0 {
            intersection / union
        } else {
            // Both groups sit on a single identical value
            1.0
        };

        let in_support = matched
            .treated
            .iter()
            .filter(|&&i| (control_min..=control_max).contains(&values[i]))
            .count();
        let matched_treated_in_support = if matched.treated.is_empty() {
            0.0
        } else {
            in_support as f64 / matched.treated.len() as f64
        };

        let flagged = overlap < self.config.min_overlap;
        if flagged {
            warn!("Poor common support for {name}: overlap {overlap:.2}");
        }

        CommonSupport {
            name: name.to_string(),
            treated_min,
            treated_max,
            control_min,
            control_max,
            overlap,
            matched_treated_in_support,
            flagged,
        }
    }

    /// Calculate summary statistics for a set of balance metrics
    fn calculate_summary_statistics(
        &self,
        metrics: &[BalanceMetric],
        support: &[CommonSupport],
        matched: &Groups,
    ) -> BalanceSummary {
        let mut imbalanced = 0;
        let mut max_std_diff: f64 = 0.0;
        let mut sum_abs_std_diff = 0.0;
        let mut sum_abs_pre = 0.0;

        for metric in metrics {
            let abs_std_diff = metric.standardized_difference.abs();
            if !metric.balanced {
                imbalanced += 1;
            }
            max_std_diff = max_std_diff.max(abs_std_diff);
            sum_abs_std_diff += abs_std_diff;
            sum_abs_pre += metric.pre_match_standardized_difference.abs();
        }

        let mean = |sum: f64| {
            if metrics.is_empty() {
                0.0
            } else {
                sum / metrics.len() as f64
            }
        };

        BalanceSummary {
            imbalanced_covariates: imbalanced,
            max_standardized_difference: max_std_diff,
            mean_absolute_standardized_difference: mean(sum_abs_std_diff),
            pre_match_mean_absolute_standardized_difference: mean(sum_abs_pre),
            total_covariates: metrics.len(),
            support_flags: support.iter().filter(|s| s.flagged).count(),
            matched_treated: matched.treated.len(),
            matched_controls: matched.controls.len(),
            no_matched_pairs: false,
        }
    }
}

/// Calculate the mean of a slice of values
pub(crate) fn calculate_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.iter().sum::<f64>() / values.len() as f64
}

/// Calculate the sample standard deviation of a slice of values
pub(crate) fn calculate_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }

    let variance =
        values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    variance.sqrt()
}

/// Standardized difference with pooled standard deviation sqrt((s1² + s2²) / 2)
///
/// Two constant groups at different values are infinitely apart.
#[must_use]
pub fn calculate_standardized_difference(mean1: f64, mean2: f64, std1: f64, std2: f64) -> f64 {
    let pooled_std = (std2.mul_add(std2, std1.powi(2)) / 2.0).sqrt();

    if pooled_std > 0.0 {
        (mean1 - mean2) / pooled_std
    } else if (mean1 - mean2).abs() < f64::EPSILON {
        0.0
    } else {
        f64::INFINITY.copysign(mean1 - mean2)
    }
}

/// Truncate a string to a maximum length
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}
