//! Validation of matching parameters and results

use std::collections::BTreeSet;

use super::criteria::{BinSpec, CaliperScale, MatchingConfig, MatchingMethod};
use super::types::MatchingResult;
use crate::error::{Result, StudyError};

/// Check a matching configuration before any data is touched
pub fn validate_config(config: &MatchingConfig) -> Result<()> {
    if config.matching_ratio == 0 {
        return Err(StudyError::ValidationError(
            "matching ratio must be at least 1".into(),
        ));
    }

    if let Some(caliper) = config.caliper {
        if !caliper.width.is_finite() || caliper.width <= 0.0 {
            return Err(StudyError::ValidationError(format!(
                "caliper width must be positive, got {}",
                caliper.width
            )));
        }
        match config.method {
            MatchingMethod::CoarsenedExact => {
                return Err(StudyError::ValidationError(
                    "coarsened exact matching does not take a caliper".into(),
                ));
            }
            MatchingMethod::Mahalanobis if caliper.scale == CaliperScale::StandardDeviations => {
                return Err(StudyError::ValidationError(
                    "Mahalanobis matching takes an absolute caliper only".into(),
                ));
            }
            _ => {}
        }
    }

    for (covariate, spec) in &config.coarsening {
        match spec {
            BinSpec::Count(0) => {
                return Err(StudyError::ValidationError(format!(
                    "covariate {covariate} needs at least one bin"
                )));
            }
            BinSpec::CutPoints(cuts)
                if cuts.iter().any(|c| !c.is_finite()) || cuts.windows(2).any(|w| w[0] >= w[1]) =>
            {
                return Err(StudyError::ValidationError(format!(
                    "cut points of {covariate} must be finite and strictly ascending"
                )));
            }
            _ => {}
        }
    }

    if config.max_iterations == 0 {
        return Err(StudyError::ValidationError(
            "max_iterations must be at least 1".into(),
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(StudyError::ValidationError(
            "tolerance must be positive".into(),
        ));
    }

    Ok(())
}

/// Check the structural invariants of a matching result
///
/// Without replacement no control may appear in two pairs, and no treated
/// unit may receive more controls than the ratio allows.
pub fn verify_result(result: &MatchingResult) -> Result<()> {
    if !result.with_replacement {
        if let Some((control, uses)) = result.control_usage().into_iter().find(|(_, n)| *n > 1) {
            return Err(StudyError::ValidationError(format!(
                "control {control} used {uses} times without replacement"
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for pair in &result.pairs {
        if pair.rank == 0 || pair.rank > result.matching_ratio {
            return Err(StudyError::ValidationError(format!(
                "treated {} has a match of rank {} with ratio 1:{}",
                pair.treated_id, pair.rank, result.matching_ratio
            )));
        }
        if !seen.insert((&pair.treated_id, &pair.control_id)) {
            return Err(StudyError::ValidationError(format!(
                "pair {} - {} listed twice",
                pair.treated_id, pair.control_id
            )));
        }
    }

    Ok(())
}
