//! Matching run lifecycle
//!
//! A run moves `Unmatched → Matched → Validated → Accepted | Rejected`.
//! Each run carries a version id `<method>_<UTC timestamp>`; changing the
//! parameters creates a new run instead of mutating an old one.

pub mod pipeline;
pub mod report;
pub mod writer;

use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algorithm::matching::{
    BalanceCalculator, BalanceConfig, BalanceReport, Matcher, MatchingConfig, MatchingData,
    MatchingResult,
};
use crate::error::{Result, StudyError};

pub use pipeline::{PipelineOutcome, run_pipeline};
pub use report::RunReport;
pub use writer::ResultWriter;

/// Lifecycle state of a matching run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Unmatched,
    Matched,
    Validated,
    Accepted,
    Rejected,
}

impl RunState {
    /// Whether `next` directly follows this state
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unmatched, Self::Matched)
                | (Self::Matched, Self::Validated)
                | (Self::Validated, Self::Accepted | Self::Rejected)
        )
    }

    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
            Self::Validated => "validated",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(text)
    }
}

/// One versioned matching run
#[derive(Debug, Clone)]
pub struct MatchingRun {
    run_id: String,
    created_at: DateTime<Utc>,
    extraction_date: NaiveDate,
    config: MatchingConfig,
    state: RunState,
    result: Option<MatchingResult>,
    balance: Option<BalanceReport>,
    decision_note: Option<String>,
}

impl MatchingRun {
    /// Create a run in the `Unmatched` state
    #[must_use]
    pub fn new(config: MatchingConfig, extraction_date: NaiveDate) -> Self {
        let created_at = Utc::now();
        Self {
            run_id: format!(
                "{}_{}",
                config.method,
                created_at.format("%Y%m%dT%H%M%S%.3fZ")
            ),
            created_at,
            extraction_date,
            config,
            state: RunState::Unmatched,
            result: None,
            balance: None,
            decision_note: None,
        }
    }

    /// A new run with different parameters; this run is left untouched
    #[must_use]
    pub fn rerun_with(&self, config: MatchingConfig) -> Self {
        Self::new(config, self.extraction_date)
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(StudyError::StateError(format!(
                "run {} cannot move from {} to {next}",
                self.run_id, self.state
            )));
        }
        info!("Run {}: {} -> {next}", self.run_id, self.state);
        self.state = next;
        Ok(())
    }

    /// Match the prepared data
    ///
    /// A failed model fit aborts the run and leaves it `Unmatched`.
    pub fn execute(&mut self, data: &MatchingData) -> Result<&MatchingResult> {
        if self.state != RunState::Unmatched {
            return Err(StudyError::StateError(format!(
                "run {} was already matched",
                self.run_id
            )));
        }
        let result = Matcher::new(self.config.clone()).perform_matching(data)?;
        self.transition(RunState::Matched)?;
        Ok(self.result.insert(result))
    }

    /// Assess balance of the matched sets
    pub fn validate(
        &mut self,
        data: &MatchingData,
        balance_config: &BalanceConfig,
    ) -> Result<&BalanceReport> {
        if self.state != RunState::Matched {
            return Err(StudyError::StateError(format!(
                "run {} is {}, only matched runs can be validated",
                self.run_id, self.state
            )));
        }
        let result = self.result.as_ref().ok_or_else(|| {
            StudyError::StateError(format!("run {} has no matching result", self.run_id))
        })?;
        let report = BalanceCalculator::new(balance_config.clone()).calculate_balance(data, result)?;
        self.transition(RunState::Validated)?;
        Ok(self.balance.insert(report))
    }

    /// Accept the validated run
    pub fn accept(&mut self, note: Option<&str>) -> Result<()> {
        self.transition(RunState::Accepted)?;
        self.decision_note = note.map(str::to_string);
        Ok(())
    }

    /// Reject the validated run; rejected runs are final
    pub fn reject(&mut self, reason: &str) -> Result<()> {
        self.transition(RunState::Rejected)?;
        self.decision_note = Some(reason.to_string());
        Ok(())
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn extraction_date(&self) -> NaiveDate {
        self.extraction_date
    }

    #[must_use]
    pub const fn config(&self) -> &MatchingConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub const fn result(&self) -> Option<&MatchingResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub const fn balance(&self) -> Option<&BalanceReport> {
        self.balance.as_ref()
    }

    #[must_use]
    pub fn decision_note(&self) -> Option<&str> {
        self.decision_note.as_deref()
    }
}
