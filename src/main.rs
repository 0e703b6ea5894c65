use anyhow::{Context, Result, bail};
use log::info;
use rubeho_match::PipelineConfig;
use rubeho_match::workflow::run_pipeline;
use std::path::PathBuf;

#[global_allocator]
static ALLOC: snmalloc_rs::SnMalloc = snmalloc_rs::SnMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(config_path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: rubeho-match <config.json>");
    };

    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("loading configuration {}", config_path.display()))?;
    info!(
        "Matching with {} for extraction date {}",
        config.matching.to_string_representation(),
        config.extraction_date()
    );

    let outcome = run_pipeline(&config)
        .await
        .context("running the matching pipeline")?;

    info!("{}", outcome.report);
    info!("Outputs written to {}", outcome.run_dir.display());
    Ok(())
}
