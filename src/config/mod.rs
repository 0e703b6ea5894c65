//! Configuration for a full pipeline run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::algorithm::matching::{BalanceConfig, MatchingConfig};
use crate::error::util::safe_read_to_string;
use crate::error::{Result, StudyError};
use crate::extraction::{CovariateDefinition, ExtractionConfig};

/// Configuration for the `rubeho-match` pipeline
///
/// Relative paths are resolved against the directory of the configuration
/// file when loaded with [`PipelineConfig::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registry of administrative units (GeoJSON feature collection)
    pub registry_path: PathBuf,
    /// Program ward/district lists (JSON); optional
    pub program_path: Option<PathBuf>,
    /// Treatment annotations (GeoJSON feature collection); optional
    pub labels_path: Option<PathBuf>,
    /// Pre-fetched platform statistics (JSON)
    pub platform_stats_path: PathBuf,
    /// Existing covariate table to extend; optional
    pub covariates_path: Option<PathBuf>,
    /// Directory receiving covariate snapshots and run outputs
    pub results_dir: PathBuf,
    /// Extraction date of the snapshot; defaults to today (UTC)
    pub extraction_date: Option<NaiveDate>,
    pub covariates: Vec<CovariateDefinition>,
    pub extraction: ExtractionConfig,
    pub matching: MatchingConfig,
    pub balance: BalanceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("registry.geojson"),
            program_path: None,
            labels_path: None,
            platform_stats_path: PathBuf::from("platform_stats.json"),
            covariates_path: None,
            results_dir: PathBuf::from("results"),
            extraction_date: None,
            covariates: Vec::new(),
            extraction: ExtractionConfig::default(),
            matching: MatchingConfig::default(),
            balance: BalanceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = safe_read_to_string(path, "pipeline configuration")?;
        let mut config: Self = serde_json::from_str(&text)
            .map_err(|e| StudyError::ConfigError(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.registry_path);
        resolve(&mut self.platform_stats_path);
        resolve(&mut self.results_dir);
        for p in [
            &mut self.program_path,
            &mut self.labels_path,
            &mut self.covariates_path,
        ]
        .into_iter()
        .flatten()
        {
            resolve(p);
        }
    }

    /// Check the parts of the configuration that can be checked without data
    pub fn validate(&self) -> Result<()> {
        if self.covariates.is_empty() {
            return Err(StudyError::ConfigError(
                "at least one covariate definition is required".into(),
            ));
        }
        for definition in &self.covariates {
            definition
                .validate()
                .map_err(|e| StudyError::ConfigError(e.to_string()))?;
        }
        if self.extraction.retry.max_attempts == 0 {
            return Err(StudyError::ConfigError(
                "extraction.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.extraction.concurrency == Some(0) {
            return Err(StudyError::ConfigError(
                "extraction.concurrency must be at least 1".into(),
            ));
        }
        crate::algorithm::matching::validation::validate_config(&self.matching)
            .map_err(|e| StudyError::ConfigError(e.to_string()))?;
        self.balance
            .validate()
            .map_err(|e| StudyError::ConfigError(e.to_string()))
    }

    /// Extraction date, defaulting to today (UTC)
    #[must_use]
    pub fn extraction_date(&self) -> NaiveDate {
        self.extraction_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }

    /// Path of the covariate snapshot for the extraction date
    #[must_use]
    pub fn covariate_snapshot_path(&self) -> PathBuf {
        self.results_dir.join(format!(
            "covariates_{}.parquet",
            self.extraction_date().format("%Y%m%d")
        ))
    }
}
