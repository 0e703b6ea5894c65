//! Propensity score matching
//!
//! Treatment is regressed on the design matrix with a logistic model fitted
//! by iteratively reweighted least squares. Columns are standardized before
//! fitting so the convergence tolerance and the divergence check do not
//! depend on covariate units.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use super::assignment::{CandidateEdge, TIE_EPSILON, assign};
use super::balance::{calculate_mean, calculate_std_dev};
use super::criteria::{Caliper, MatchingConfig, MatchingMethod, ScoreMetric};
use super::matcher::{MatchingStrategy, StrategyOutcome};
use super::preparation::MatchingData;
use super::types::{
    MatchPair, MethodDetails, PropensityScore, ShortMatch, UnmatchedReason, UnmatchedUnit,
};
use crate::error::{Result, StudyError};
use crate::models::UnitId;

/// Fitted probabilities closer than this to 0 or 1 indicate separation
const SEPARATION_THRESHOLD: f64 = 1e-8;

/// Standardized coefficients beyond this magnitude indicate divergence
const DIVERGENCE_LIMIT: f64 = 50.0;

/// Logistic regression fitted on standardized columns
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticFit {
    /// Intercept first, then one coefficient per design column
    pub coefficients: Vec<f64>,
    pub iterations: usize,
    /// Linear predictor per row
    pub logits: Vec<f64>,
}

impl LogisticFit {
    /// Fitted probabilities per row
    #[must_use]
    pub fn probabilities(&self) -> Vec<f64> {
        self.logits.iter().map(|&eta| sigmoid(eta)).collect()
    }
}

/// Numerically stable logistic function
#[must_use]
pub fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

fn standardize(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let mut z = DMatrix::from_element(n, x.ncols() + 1, 1.0);
    for c in 0..x.ncols() {
        let column = x.column(c);
        let mean = column.mean();
        let sd = if n > 1 {
            (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let sd = if sd > 0.0 { sd } else { 1.0 };
        for r in 0..n {
            z[(r, c + 1)] = (x[(r, c)] - mean) / sd;
        }
    }
    z
}

/// Fit `treated ~ x` with an intercept by iteratively reweighted least squares
///
/// Perfect or quasi separation, a singular information matrix and failure to
/// converge within `max_iterations` are all reported as `ModelFitError`.
pub fn fit_logistic(
    x: &DMatrix<f64>,
    treated: &[bool],
    max_iterations: usize,
    tolerance: f64,
) -> Result<LogisticFit> {
    let n = x.nrows();
    if n != treated.len() {
        return Err(StudyError::ValidationError(format!(
            "design has {n} rows but {} treatment flags",
            treated.len()
        )));
    }
    let z = standardize(x);
    let k = z.ncols();
    if n <= k {
        return Err(StudyError::ModelFitError(format!(
            "{n} units cannot identify {k} model parameters"
        )));
    }

    let y = DVector::from_iterator(n, treated.iter().map(|&t| if t { 1.0 } else { 0.0 }));
    let mut beta = DVector::<f64>::zeros(k);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let eta = &z * &beta;
        let p = eta.map(sigmoid);
        let w = p.map(|pi| pi * (1.0 - pi));

        let gradient = z.transpose() * (&y - &p);
        let mut weighted = z.clone();
        for (r, mut row) in weighted.row_iter_mut().enumerate() {
            row *= w[r];
        }
        let information = z.transpose() * weighted;

        let cholesky = information.cholesky().ok_or_else(|| {
            StudyError::ModelFitError(format!(
                "singular information matrix at iteration {iterations} \
                 (collinear covariates or separation)"
            ))
        })?;
        let step = cholesky.solve(&gradient);
        beta += &step;

        if beta.amax() > DIVERGENCE_LIMIT {
            return Err(StudyError::ModelFitError(
                "coefficients diverge: treatment is perfectly or quasi separated by the covariates"
                    .into(),
            ));
        }
        debug!("IRLS iteration {iterations}: max step {:.3e}", step.amax());
        if step.amax() < tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(StudyError::ModelFitError(format!(
            "propensity model did not converge in {max_iterations} iterations"
        )));
    }

    let logits: Vec<f64> = (&z * &beta).iter().copied().collect();
    if logits.iter().map(|&eta| sigmoid(eta)).any(|p| {
        !(SEPARATION_THRESHOLD..=1.0 - SEPARATION_THRESHOLD).contains(&p)
    }) {
        return Err(StudyError::ModelFitError(
            "fitted probabilities of 0 or 1: treatment is separated by the covariates".into(),
        ));
    }

    Ok(LogisticFit {
        coefficients: beta.iter().copied().collect(),
        iterations,
        logits,
    })
}

/// Candidate edges between treated and control scores within the caliper
fn score_edges(
    scores: &[f64],
    treated: &[usize],
    controls: &[usize],
    caliper: Option<f64>,
) -> Vec<CandidateEdge> {
    let limit = caliper.map_or(f64::INFINITY, |c| c + TIE_EPSILON);
    treated
        .iter()
        .flat_map(|&t| {
            controls.iter().filter_map(move |&c| {
                let distance = (scores[t] - scores[c]).abs();
                (distance <= limit).then_some(CandidateEdge::new(t, c, distance))
            })
        })
        .collect()
}

/// Matches produced from precomputed scores
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMatches {
    pub pairs: Vec<MatchPair>,
    pub unmatched: Vec<UnmatchedUnit>,
    pub short_matched: Vec<ShortMatch>,
}

/// Nearest-score matching on given scores
///
/// `caliper` is an absolute width on the score scale.
#[must_use]
pub fn match_on_scores(
    treated: &[(UnitId, f64)],
    controls: &[(UnitId, f64)],
    ratio: usize,
    with_replacement: bool,
    caliper: Option<f64>,
) -> ScoreMatches {
    let mut units: Vec<(&UnitId, f64, bool)> = treated
        .iter()
        .map(|(id, s)| (id, *s, true))
        .chain(controls.iter().map(|(id, s)| (id, *s, false)))
        .collect();
    units.sort_by(|a, b| a.0.cmp(b.0));

    let scores: Vec<f64> = units.iter().map(|u| u.1).collect();
    let treated_idx: Vec<usize> = (0..units.len()).filter(|&i| units[i].2).collect();
    let control_idx: Vec<usize> = (0..units.len()).filter(|&i| !units[i].2).collect();

    let edges = score_edges(&scores, &treated_idx, &control_idx, caliper);
    let assignment = assign(
        &treated_idx,
        edges,
        ratio,
        with_replacement,
        UnmatchedReason::NoControlWithinCaliper,
    );

    ScoreMatches {
        pairs: assignment
            .pairs
            .iter()
            .map(|p| MatchPair {
                treated_id: units[p.treated].0.clone(),
                control_id: units[p.control].0.clone(),
                distance: p.distance,
                rank: p.rank,
                method: MatchingMethod::PropensityScore,
            })
            .collect(),
        unmatched: assignment
            .unmatched
            .iter()
            .map(|&(t, reason)| UnmatchedUnit {
                unit_id: units[t].0.clone(),
                reason,
            })
            .collect(),
        short_matched: assignment
            .short
            .iter()
            .map(|&(t, matched)| ShortMatch {
                unit_id: units[t].0.clone(),
                matched,
                requested: ratio,
            })
            .collect(),
    }
}

/// Nearest neighbour matching on an estimated propensity score
#[derive(Debug, Clone, Copy, Default)]
pub struct PropensityScoreMatching;

impl MatchingStrategy for PropensityScoreMatching {
    fn method(&self) -> MatchingMethod {
        MatchingMethod::PropensityScore
    }

    fn match_units(&self, data: &MatchingData, config: &MatchingConfig) -> Result<StrategyOutcome> {
        let design = data.design_matrix();
        let fit = fit_logistic(
            &design.values,
            data.treatment(),
            config.max_iterations,
            config.tolerance,
        )?;
        info!(
            "Propensity model converged in {} iterations on {} design columns",
            fit.iterations,
            design.columns.len()
        );

        let probabilities = fit.probabilities();
        let propensity_scores: Vec<PropensityScore> = (0..data.len())
            .map(|i| PropensityScore {
                unit_id: data.unit_id(i).clone(),
                treated: data.is_treated(i),
                score: probabilities[i],
                logit: fit.logits[i],
            })
            .collect();

        let metric_scores = match config.score_metric {
            ScoreMetric::Probability => probabilities,
            ScoreMetric::Logit => fit.logits.clone(),
        };
        let score_sd = calculate_std_dev(&metric_scores, calculate_mean(&metric_scores));
        let caliper = config.caliper.map(|c: Caliper| c.resolve(score_sd));

        let treated = data.treated_indices();
        let edges = score_edges(&metric_scores, &treated, &data.control_indices(), caliper);
        let assignment = assign(
            &treated,
            edges,
            config.matching_ratio,
            config.with_replacement,
            UnmatchedReason::NoControlWithinCaliper,
        );

        let coefficients = std::iter::once("(intercept)".to_string())
            .chain(design.columns)
            .zip(fit.coefficients)
            .collect();

        Ok(StrategyOutcome {
            assignment,
            propensity_scores,
            details: MethodDetails::PropensityScore {
                coefficients,
                iterations: fit.iterations,
                caliper,
            },
        })
    }
}
