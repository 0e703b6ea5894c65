//! Run output writer
//!
//! Each run gets its own directory `<results>/<run_id>/`; nothing outside it
//! is touched, so earlier runs stay as they were written.

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::{MatchingRun, RunReport};
use crate::algorithm::matching::{MatchPair, PropensityScore};
use crate::error::util::{ensure_directory, write_atomically};
use crate::error::{Result, StudyError};
use crate::utils::io::{escape_csv, read_records, write_records};

pub const MATCHES_PARQUET: &str = "matches.parquet";
pub const MATCHES_CSV: &str = "matches.csv";
pub const BALANCE_CSV: &str = "balance.csv";
pub const BALANCE_JSON: &str = "balance.json";
pub const REPORT_JSON: &str = "report.json";
pub const SCORES_CSV: &str = "propensity_scores.csv";
pub const LABEL_PROGRESS_CSV: &str = "label_progress.csv";

/// One matched pair as stored in `matches.parquet`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub run_id: String,
    pub treated_id: String,
    pub control_id: String,
    pub distance: f64,
    pub rank: u64,
    pub method: String,
}

impl MatchRow {
    fn from_pair(run_id: &str, pair: &MatchPair) -> Self {
        Self {
            run_id: run_id.to_string(),
            treated_id: pair.treated_id.as_str().to_string(),
            control_id: pair.control_id.as_str().to_string(),
            distance: pair.distance,
            rank: pair.rank as u64,
            method: pair.method.as_str().to_string(),
        }
    }
}

/// Writes the artefacts of matching runs
#[derive(Debug, Clone)]
pub struct ResultWriter {
    results_dir: PathBuf,
}

impl ResultWriter {
    #[must_use]
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Directory holding the outputs of a run
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.results_dir.join(run_id)
    }

    /// Write every available artefact of a run
    ///
    /// Rewriting the same run replaces its files, so a run can be written
    /// again after it is accepted or rejected.
    pub fn write(&self, run: &MatchingRun, report: &RunReport) -> Result<PathBuf> {
        if report.run_id != run.run_id() {
            return Err(StudyError::ValidationError(format!(
                "report of run {} does not belong to run {}",
                report.run_id,
                run.run_id()
            )));
        }

        let dir = self.run_dir(run.run_id());
        ensure_directory(&dir, "matching run outputs")?;

        if let Some(result) = run.result() {
            let rows: Vec<MatchRow> = result
                .pairs
                .iter()
                .map(|p| MatchRow::from_pair(run.run_id(), p))
                .collect();
            write_records(&dir.join(MATCHES_PARQUET), &rows)?;
            write_matches_csv(&dir.join(MATCHES_CSV), &rows)?;

            if !result.propensity_scores.is_empty() {
                write_scores_csv(&dir.join(SCORES_CSV), &result.propensity_scores)?;
            }
        }

        if let Some(balance) = run.balance() {
            balance.write_to_csv(&dir.join(BALANCE_CSV))?;
            balance.write_to_json(&dir.join(BALANCE_JSON))?;
        }

        if let Some(progress) = &report.label_progress {
            progress.write_to_csv(&dir.join(LABEL_PROGRESS_CSV))?;
        }

        let json = serde_json::to_vec_pretty(report)?;
        write_atomically(&dir.join(REPORT_JSON), &json)?;

        info!("Wrote run {} ({}) to {}", run.run_id(), run.state(), dir.display());
        Ok(dir)
    }

    /// Read back the matched pairs of a written run
    pub fn read_matches(&self, run_id: &str) -> Result<Vec<MatchRow>> {
        read_records(&self.run_dir(run_id).join(MATCHES_PARQUET))
    }

    /// Read back the report of a written run
    pub fn read_report(&self, run_id: &str) -> Result<RunReport> {
        let path = self.run_dir(run_id).join(REPORT_JSON);
        let text = crate::error::util::safe_read_to_string(&path, "run report")?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn write_matches_csv(path: &Path, rows: &[MatchRow]) -> Result<()> {
    let mut out = String::from("run_id,treated_id,control_id,distance,rank,method\n");
    for row in rows {
        let _ = writeln!(
            out,
            "{},{},{},{:.9},{},{}",
            escape_csv(&row.run_id),
            escape_csv(&row.treated_id),
            escape_csv(&row.control_id),
            row.distance,
            row.rank,
            row.method
        );
    }
    write_atomically(path, out.as_bytes())
}

fn write_scores_csv(path: &Path, scores: &[PropensityScore]) -> Result<()> {
    let mut out = String::from("unit_id,treated,score,logit\n");
    for score in scores {
        let _ = writeln!(
            out,
            "{},{},{:.9},{:.9}",
            escape_csv(score.unit_id.as_str()),
            score.treated,
            score.score,
            score.logit
        );
    }
    write_atomically(path, out.as_bytes())
}
