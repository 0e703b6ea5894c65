//! Coarsened exact matching
//!
//! Numeric covariates are cut into bins and categorical covariates are kept
//! as they are; units match only within identical bin signatures. Inside a
//! stratum controls are ranked by standardized Euclidean distance on the
//! numeric covariates.

use log::info;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use super::assignment::{CandidateEdge, assign};
use super::criteria::{BinSpec, MatchingConfig, MatchingMethod};
use super::matcher::{MatchingStrategy, StrategyOutcome};
use super::preparation::MatchingData;
use super::types::{MethodDetails, UnmatchedReason};
use crate::error::Result;
use crate::models::CovariateKind;

/// Bin labels of one unit, one entry per covariate
pub type Signature = SmallVec<[String; 4]>;

/// Number of bins from Sturges' rule
#[must_use]
pub fn sturges_bins(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    ((n as f64).log2().ceil() as usize) + 1
}

/// Interior cut points of `bins` equal-width bins over `values`
#[must_use]
pub fn equal_width_cuts(values: &[f64], bins: usize) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if bins <= 1 || !min.is_finite() || !max.is_finite() || max <= min {
        return Vec::new();
    }
    let width = (max - min) / bins as f64;
    (1..bins).map(|i| (i as f64).mul_add(width, min)).collect()
}

/// Bin index of a value: the number of cut points at or below it
#[must_use]
pub fn bin_index(cuts: &[f64], value: f64) -> usize {
    cuts.partition_point(|&cut| cut <= value)
}

/// Cut points for one covariate; specs are checked by `validate_config`
fn resolve_cuts(spec: &BinSpec, values: &[f64]) -> Vec<f64> {
    match spec {
        BinSpec::Sturges => equal_width_cuts(values, sturges_bins(values.len())),
        BinSpec::Count(n) => equal_width_cuts(values, *n),
        BinSpec::CutPoints(cuts) => cuts.clone(),
    }
}

/// Bin signature of every unit
#[must_use]
pub fn signatures(data: &MatchingData, config: &MatchingConfig) -> Vec<Signature> {
    let mut signatures: Vec<Signature> = vec![SmallVec::new(); data.len()];
    for (column, (name, kind)) in data.covariates().iter().zip(data.kinds()).enumerate() {
        match kind {
            CovariateKind::Numeric => {
                let values = data.numeric_column(column);
                let cuts = resolve_cuts(&config.bin_spec(name), &values);
                for (signature, value) in signatures.iter_mut().zip(&values) {
                    signature.push(format!("b{}", bin_index(&cuts, *value)));
                }
            }
            CovariateKind::Categorical => {
                for (i, signature) in signatures.iter_mut().enumerate() {
                    let level = data.value(i, column).as_category().unwrap_or_default();
                    signature.push(format!("c:{level}"));
                }
            }
        }
    }
    signatures
}

/// Numeric columns divided by their standard deviation
fn standardized_numeric(data: &MatchingData) -> Vec<Vec<f64>> {
    let mut columns = Vec::new();
    for (column, kind) in data.kinds().iter().enumerate() {
        if *kind != CovariateKind::Numeric {
            continue;
        }
        let values = data.numeric_column(column);
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sd = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        if sd > 0.0 {
            columns.push(values.iter().map(|v| v / sd).collect());
        }
    }
    columns
}

/// Exact matching on coarsened covariates
#[derive(Debug, Clone, Copy, Default)]
pub struct CoarsenedExactMatching;

impl MatchingStrategy for CoarsenedExactMatching {
    fn method(&self) -> MatchingMethod {
        MatchingMethod::CoarsenedExact
    }

    fn match_units(&self, data: &MatchingData, config: &MatchingConfig) -> Result<StrategyOutcome> {
        let signatures = signatures(data, config);
        let mut strata: BTreeMap<&Signature, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (i, signature) in signatures.iter().enumerate() {
            let (treated, controls) = strata.entry(signature).or_default();
            if data.is_treated(i) {
                treated.push(i);
            } else {
                controls.push(i);
            }
        }

        let scaled = standardized_numeric(data);
        let distance = |a: usize, b: usize| -> f64 {
            scaled
                .iter()
                .map(|column| (column[a] - column[b]).powi(2))
                .sum::<f64>()
                .sqrt()
        };

        let mut edges = Vec::new();
        let mut matched_strata = 0;
        for (treated, controls) in strata.values() {
            if treated.is_empty() || controls.is_empty() {
                continue;
            }
            matched_strata += 1;
            for &t in treated {
                edges.extend(controls.iter().map(|&c| CandidateEdge::new(t, c, distance(t, c))));
            }
        }

        info!(
            "Coarsened {} units into {} strata, {} holding both groups",
            data.len(),
            strata.len(),
            matched_strata
        );

        let assignment = assign(
            &data.treated_indices(),
            edges,
            config.matching_ratio,
            config.with_replacement,
            UnmatchedReason::NoExactStratum,
        );

        Ok(StrategyOutcome {
            assignment,
            propensity_scores: Vec::new(),
            details: MethodDetails::CoarsenedExact {
                strata: strata.len(),
                matched_strata,
            },
        })
    }
}
