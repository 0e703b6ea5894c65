//! Mahalanobis distance matching
//!
//! Distances use the sample covariance of the design matrix over all complete
//! units. A singular covariance (collinear covariates) falls back to the
//! Moore-Penrose pseudo-inverse.

use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use super::assignment::{CandidateEdge, TIE_EPSILON, assign};
use super::criteria::{MatchingConfig, MatchingMethod};
use super::matcher::{MatchingStrategy, PARALLEL_THRESHOLD, StrategyOutcome};
use super::preparation::MatchingData;
use super::types::{MethodDetails, UnmatchedReason};
use crate::error::{Result, StudyError};
use crate::utils::logging::progress;

/// Singular values below this are treated as zero by the pseudo-inverse
const PSEUDO_INVERSE_EPSILON: f64 = 1e-10;

/// Sample covariance of the columns of `x`
#[must_use]
pub fn sample_covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    if n < 2 {
        return DMatrix::zeros(x.ncols(), x.ncols());
    }
    let means = x.row_mean();
    let mut centered = x.clone();
    for mut row in centered.row_iter_mut() {
        row -= &means;
    }
    (centered.transpose() * &centered) / (n - 1) as f64
}

/// Inverse of the covariance, or its pseudo-inverse when singular
///
/// Returns the matrix and whether the pseudo-inverse was needed.
pub fn inverse_covariance(covariance: DMatrix<f64>) -> Result<(DMatrix<f64>, bool)> {
    if let Some(inverse) = covariance.clone().try_inverse() {
        if inverse.iter().all(|v| v.is_finite()) {
            return Ok((inverse, false));
        }
    }
    warn!("Covariance matrix is singular, using the pseudo-inverse");
    covariance
        .pseudo_inverse(PSEUDO_INVERSE_EPSILON)
        .map(|inverse| (inverse, true))
        .map_err(|e| StudyError::ValidationError(format!("covariance pseudo-inverse failed: {e}")))
}

/// Mahalanobis distance between two rows given the inverse covariance
#[must_use]
pub fn mahalanobis_distance(a: &DVector<f64>, b: &DVector<f64>, inverse: &DMatrix<f64>) -> f64 {
    let d = a - b;
    let squared = (d.transpose() * inverse * &d)[(0, 0)];
    squared.max(0.0).sqrt()
}

/// Nearest neighbour matching on Mahalanobis distance
#[derive(Debug, Clone, Copy, Default)]
pub struct MahalanobisMatching;

impl MatchingStrategy for MahalanobisMatching {
    fn method(&self) -> MatchingMethod {
        MatchingMethod::Mahalanobis
    }

    fn match_units(&self, data: &MatchingData, config: &MatchingConfig) -> Result<StrategyOutcome> {
        // Scale already checked by `validate_config`: absolute only
        let caliper = config.caliper.map(|c| c.width + TIE_EPSILON);

        let design = data.design_matrix();
        if design.columns.is_empty() {
            return Err(StudyError::ValidationError(
                "no covariate varies across units; nothing to match on".into(),
            ));
        }
        let (inverse, pseudo_inverse) = inverse_covariance(sample_covariance(&design.values))?;

        let rows: Vec<DVector<f64>> = (0..data.len())
            .map(|i| design.values.row(i).transpose())
            .collect();
        let treated = data.treated_indices();
        let controls = data.control_indices();

        let pb = progress::create_main_progress_bar(
            treated.len() as u64,
            Some("Computing Mahalanobis distances"),
        );
        let edges_for = |t: usize| -> Vec<CandidateEdge> {
            let edges = controls
                .iter()
                .filter_map(|&c| {
                    let distance = mahalanobis_distance(&rows[t], &rows[c], &inverse);
                    caliper
                        .is_none_or(|limit| distance <= limit)
                        .then_some(CandidateEdge::new(t, c, distance))
                })
                .collect();
            pb.inc(1);
            edges
        };

        // Same edges either way; assignment sorts them
        let edges: Vec<CandidateEdge> = if treated.len() >= PARALLEL_THRESHOLD {
            treated.par_iter().flat_map_iter(|&t| edges_for(t)).collect()
        } else {
            treated.iter().flat_map(|&t| edges_for(t)).collect()
        };
        progress::finish_progress_bar(&pb, Some("Distances computed"));

        info!(
            "Computed {} candidate edges over {} design columns{}",
            edges.len(),
            design.columns.len(),
            if pseudo_inverse { " (pseudo-inverse)" } else { "" }
        );

        let assignment = assign(
            &treated,
            edges,
            config.matching_ratio,
            config.with_replacement,
            UnmatchedReason::NoControlWithinCaliper,
        );

        Ok(StrategyOutcome {
            assignment,
            propensity_scores: Vec::new(),
            details: MethodDetails::Mahalanobis {
                pseudo_inverse,
                dimensions: design.columns.len(),
            },
        })
    }
}
