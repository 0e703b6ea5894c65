//! End-to-end pipeline: registry, labels, extraction, matching, balance, outputs

use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;

use super::{MatchingRun, ResultWriter, RunReport};
use crate::algorithm::matching::{BalanceConfig, MatchingData};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::error::util::ensure_directory;
use crate::extraction::{CovariateExtractor, ExtractionRun, InMemoryPlatform};
use crate::labeling::{
    FileLabelStore, LabelApplyReport, LabelProgress, LabelStore, SkippedLabel, apply_labels,
};
use crate::models::AdministrativeUnit;
use crate::registry::{ProgramList, Registry};
use crate::utils::io::{read_covariate_table, write_covariate_table};
use crate::utils::logging::{create_spinner, finish_progress_bar};

/// Everything a pipeline run produced
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The run, left `Validated` for review
    pub run: MatchingRun,
    pub report: RunReport,
    pub snapshot_path: PathBuf,
    pub run_dir: PathBuf,
}

/// Label outcomes carried into the run report
struct LabelOutcome {
    applied: LabelApplyReport,
    skipped: Vec<SkippedLabel>,
    progress: LabelProgress,
}

/// Run the whole pipeline described by a configuration
///
/// The platform is read from the pre-fetched statistics file named in the
/// configuration. The run ends `Validated`; accepting or rejecting it is
/// left to the analyst. A run aborted by a failed model fit still writes
/// its report before the error is returned.
pub async fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutcome> {
    let start = Instant::now();
    let extraction_date = config.extraction_date();

    let mut registry = Registry::load_geojson(&config.registry_path)
        .map_err(|e| e.context("loading the ward/village registry"))?;

    let program_report = match &config.program_path {
        Some(path) => {
            let program =
                ProgramList::load(path).map_err(|e| e.context("loading the program list"))?;
            Some(registry.apply_program(&program))
        }
        None => None,
    };

    let labels = match &config.labels_path {
        Some(path) => {
            let load = FileLabelStore::new(path)
                .load_all()
                .map_err(|e| e.context("reading treatment labels"))?;
            let applied = apply_labels(&mut registry, &load.annotations);
            let progress = LabelProgress::compute(&registry, &load.annotations);
            info!("{progress}");
            Some(LabelOutcome {
                applied,
                skipped: load.skipped,
                progress,
            })
        }
        None => None,
    };

    let platform = InMemoryPlatform::load_json(&config.platform_stats_path)
        .map_err(|e| e.context("loading platform statistics"))?;
    let extractor = CovariateExtractor::new(platform, config.extraction.clone());
    let units: Vec<AdministrativeUnit> = registry.units().cloned().collect();

    let ExtractionRun {
        table,
        report: extraction_report,
    } = match &config.covariates_path {
        Some(path) if path.exists() => {
            let spinner = create_spinner(Some("Reading covariate table"));
            let mut table = read_covariate_table(path)
                .map_err(|e| e.context(format!("reading covariate table {}", path.display())))?;
            finish_progress_bar(&spinner, Some("Covariate table loaded"));
            let report = extractor
                .extract_into(&mut table, &units, &config.covariates, extraction_date)
                .await?;
            ExtractionRun { table, report }
        }
        other => {
            if let Some(path) = other {
                warn!(
                    "Covariate table {} not found, extracting into a new one",
                    path.display()
                );
            }
            extractor
                .extract(&units, &config.covariates, extraction_date)
                .await?
        }
    };
    if !extraction_report.is_clean() {
        warn!(
            "Extraction skipped {} units and failed {} queries",
            extraction_report.skipped.len(),
            extraction_report.failed.len()
        );
    }

    ensure_directory(&config.results_dir, "pipeline results")?;
    let snapshot_path = config.covariate_snapshot_path();
    write_covariate_table(&table, Some(extraction_date), &snapshot_path)?;
    info!("Covariate snapshot written to {}", snapshot_path.display());

    let data = MatchingData::from_table(
        &table,
        extraction_date,
        &registry.treatment_flags(),
        &config.matching.covariates,
    )?;

    let writer = ResultWriter::new(&config.results_dir);
    let mut run = MatchingRun::new(config.matching.clone(), extraction_date);
    let matched = match_and_validate(&mut run, &data, &config.balance);

    let mut report = RunReport::from_run(&run).with_extraction(&extraction_report);
    if let Some(program) = program_report {
        report = report.with_program(program);
    }
    if let Some(labels) = labels {
        report = report
            .with_labels(labels.applied, labels.skipped)
            .with_label_progress(labels.progress);
    }

    if let Err(e) = matched {
        report = report.with_failure(&e);
        let run_dir = writer.write(&run, &report)?;
        warn!(
            "Run {} aborted ({e}), report written to {}",
            run.run_id(),
            run_dir.display()
        );
        return Err(e);
    }

    let run_dir = writer.write(&run, &report)?;
    info!(
        "Run {} awaiting review in {} (total {:?})",
        run.run_id(),
        run_dir.display(),
        start.elapsed()
    );

    Ok(PipelineOutcome {
        run,
        report,
        snapshot_path,
        run_dir,
    })
}

fn match_and_validate(
    run: &mut MatchingRun,
    data: &MatchingData,
    balance_config: &BalanceConfig,
) -> Result<()> {
    run.execute(data)?;
    let balance = run.validate(data, balance_config)?;
    info!("{balance}");
    Ok(())
}
