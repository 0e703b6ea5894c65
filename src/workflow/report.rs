//! Run report
//!
//! Everything a reviewer needs to judge a run without re-reading the inputs:
//! units skipped for geometry, failed platform queries, units excluded for
//! missing covariates, unmatched treated units and the balance summary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MatchingRun, RunState};
use crate::algorithm::matching::{
    BalanceSummary, ExcludedUnit, MatchingConfig, MethodDetails, ShortMatch, UnmatchedUnit,
};
use crate::error::StudyError;
use crate::extraction::{ExtractionReport, FailedQuery, SkippedUnit};
use crate::labeling::{LabelApplyReport, LabelProgress, SkippedLabel};
use crate::registry::ProgramMatchReport;

/// Serializable summary of one matching run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub extraction_date: NaiveDate,
    pub config: MatchingConfig,
    pub decision_note: Option<String>,
    /// Error that aborted the run before it was validated
    #[serde(default)]
    pub failure: Option<String>,

    pub treated_count: usize,
    pub control_count: usize,
    pub matched_treated: usize,
    pub pairs: usize,
    pub details: Option<MethodDetails>,

    pub skipped_units: Vec<SkippedUnit>,
    pub failed_queries: Vec<FailedQuery>,
    pub excluded: Vec<ExcludedUnit>,
    pub unmatched: Vec<UnmatchedUnit>,
    pub short_matched: Vec<ShortMatch>,
    pub balance: Option<BalanceSummary>,

    pub program: Option<ProgramMatchReport>,
    pub labels: Option<LabelApplyReport>,
    pub skipped_labels: Vec<SkippedLabel>,
    #[serde(default)]
    pub label_progress: Option<LabelProgress>,
}

impl RunReport {
    /// Build the report of a run in whatever state it has reached
    #[must_use]
    pub fn from_run(run: &MatchingRun) -> Self {
        let result = run.result();
        Self {
            run_id: run.run_id().to_string(),
            state: run.state(),
            created_at: run.created_at(),
            extraction_date: run.extraction_date(),
            config: run.config().clone(),
            decision_note: run.decision_note().map(str::to_string),
            failure: None,
            treated_count: result.map_or(0, |r| r.treated_count),
            control_count: result.map_or(0, |r| r.control_count),
            matched_treated: result.map_or(0, |r| r.matched_treated_count()),
            pairs: result.map_or(0, |r| r.pairs.len()),
            details: result.map(|r| r.details.clone()),
            skipped_units: Vec::new(),
            failed_queries: Vec::new(),
            excluded: result.map(|r| r.excluded.clone()).unwrap_or_default(),
            unmatched: result.map(|r| r.unmatched.clone()).unwrap_or_default(),
            short_matched: result.map(|r| r.short_matched.clone()).unwrap_or_default(),
            balance: run.balance().map(|b| b.summary.clone()),
            program: None,
            labels: None,
            skipped_labels: Vec::new(),
            label_progress: None,
        }
    }

    /// Attach the extraction outcome that produced the run's snapshot
    #[must_use]
    pub fn with_extraction(mut self, report: &ExtractionReport) -> Self {
        self.skipped_units = report.skipped.clone();
        self.failed_queries = report.failed.clone();
        self
    }

    /// Record the error that aborted the run
    #[must_use]
    pub fn with_failure(mut self, error: &StudyError) -> Self {
        self.failure = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn with_program(mut self, report: ProgramMatchReport) -> Self {
        self.program = Some(report);
        self
    }

    #[must_use]
    pub fn with_labels(mut self, report: LabelApplyReport, skipped: Vec<SkippedLabel>) -> Self {
        self.labels = Some(report);
        self.skipped_labels = skipped;
        self
    }

    #[must_use]
    pub fn with_label_progress(mut self, progress: LabelProgress) -> Self {
        self.label_progress = Some(progress);
        self
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.state)?;
        if let Some(failure) = &self.failure {
            writeln!(f, "- Aborted: {failure}")?;
        }
        writeln!(f, "- Extraction date: {}", self.extraction_date)?;
        writeln!(
            f,
            "- Method: {} 1:{} ({} replacement)",
            self.config.method,
            self.config.matching_ratio,
            if self.config.with_replacement { "with" } else { "without" }
        )?;
        writeln!(
            f,
            "- Matched treated: {} of {} ({} pairs, {} controls available)",
            self.matched_treated, self.treated_count, self.pairs, self.control_count
        )?;
        writeln!(
            f,
            "- Skipped units: {}, failed queries: {}, excluded: {}",
            self.skipped_units.len(),
            self.failed_queries.len(),
            self.excluded.len()
        )?;
        writeln!(
            f,
            "- Unmatched treated: {}, short matched: {}",
            self.unmatched.len(),
            self.short_matched.len()
        )?;
        if self.balance.as_ref().is_some_and(|b| b.no_matched_pairs) {
            writeln!(f, "- No matched pairs, balance not assessed")?;
        } else if let Some(balance) = &self.balance {
            writeln!(
                f,
                "- Mean |SMD|: {:.4} (before matching {:.4}), imbalanced covariates: {}",
                balance.mean_absolute_standardized_difference,
                balance.pre_match_mean_absolute_standardized_difference,
                balance.imbalanced_covariates
            )?;
        }
        if let Some(progress) = &self.label_progress {
            writeln!(
                f,
                "- Labels: {}/{} treatment villages mapped ({:.1}%)",
                progress.overall.mapped, progress.overall.total, progress.overall.percent
            )?;
        }
        if let Some(note) = &self.decision_note {
            writeln!(f, "- Decision note: {note}")?;
        }
        Ok(())
    }
}
