//! End-to-end pipeline run from configuration files

use serde_json::{Map, Value, json};
use std::path::Path;

use rubeho_match::algorithm::matching::{ExclusionReason, UnmatchedReason};
use rubeho_match::geometry::{GeometryIssue, Polygon, polygon_to_geojson};
use rubeho_match::utils::io::read_covariate_table;
use rubeho_match::utils::test::{SyntheticStudy, synthetic_study};
use rubeho_match::workflow::run_pipeline;
use rubeho_match::workflow::ResultWriter;
use rubeho_match::workflow::writer::{
    BALANCE_CSV, BALANCE_JSON, LABEL_PROGRESS_CSV, MATCHES_PARQUET, REPORT_JSON,
};
use rubeho_match::{Annotation, CovariateValue, FileLabelStore, LabelStore, PipelineConfig, RunState};

const BOWTIE_UNIT: &str = "C0003";
const LABELLED_UNIT: &str = "C0005";

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

fn mahalanobis_matching() -> Value {
    json!({ "method": "mahalanobis", "matching_ratio": 1 })
}

fn write_inputs(dir: &Path, study: &SyntheticStudy, matching: &Value) {
    let bowtie = Polygon::from_coords(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 1.0)]);
    let features: Vec<Value> = study
        .units
        .iter()
        .map(|unit| {
            let geometry = if unit.id.as_str() == BOWTIE_UNIT {
                polygon_to_geojson(&bowtie)
            } else {
                unit.boundary.as_ref().map_or(Value::Null, polygon_to_geojson)
            };
            json!({
                "type": "Feature",
                "properties": {
                    "unit_id": unit.id.as_str(),
                    "village_name": unit.village_name,
                    "ward_name": unit.ward_name,
                    "dist_name": unit.district,
                    "reg_name": unit.region,
                    "is_treatment": if unit.is_treatment { "TRUE" } else { "FALSE" },
                },
                "geometry": geometry,
            })
        })
        .collect();
    write_json(
        &dir.join("registry.geojson"),
        &json!({ "type": "FeatureCollection", "features": features }),
    );

    let mut stats = Map::new();
    for record in study.table.records() {
        let values: Map<String, Value> = record
            .values
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    CovariateValue::Numeric(v) => json!(v),
                    CovariateValue::Categorical(c) => json!(c),
                    CovariateValue::Missing => Value::Null,
                };
                (name.clone(), value)
            })
            .collect();
        stats.insert(record.unit_id.as_str().to_string(), Value::Object(values));
    }
    write_json(&dir.join("platform_stats.json"), &Value::Object(stats));

    let square = Polygon::from_coords(&[(36.5, -7.5), (36.51, -7.5), (36.51, -7.49), (36.5, -7.49)]);
    FileLabelStore::new(dir.join("labels.geojson"))
        .save(&Annotation::new(&format!("Village {LABELLED_UNIT}"), "Ward", square, true))
        .unwrap();

    write_json(
        &dir.join("config.json"),
        &json!({
            "registry_path": "registry.geojson",
            "labels_path": "labels.geojson",
            "platform_stats_path": "platform_stats.json",
            "results_dir": "results",
            "extraction_date": "2024-06-01",
            "covariates": serde_json::to_value(SyntheticStudy::definitions()).unwrap(),
            "extraction": {
                "retry": { "max_attempts": 1, "initial_backoff_ms": 0, "max_backoff_ms": 0 },
                "concurrency": 4
            },
            "matching": matching,
            "balance": { "imbalance_threshold": 0.1 }
        }),
    );
}

#[tokio::test]
async fn test_pipeline_from_configuration_files() {
    let dir = tempfile::tempdir().unwrap();
    let study = synthetic_study(15, 45, 0.2, 31);
    write_inputs(dir.path(), &study, &mahalanobis_matching());

    let config = PipelineConfig::load(&dir.path().join("config.json")).unwrap();
    assert_eq!(config.results_dir, dir.path().join("results"));

    let outcome = run_pipeline(&config).await.unwrap();
    let report = &outcome.report;

    assert_eq!(outcome.run.state(), RunState::Validated);
    assert!(outcome.run.run_id().starts_with("mahalanobis_"));

    // The self-intersecting unit is skipped, then excluded for lack of a record
    assert_eq!(report.skipped_units.len(), 1);
    assert_eq!(report.skipped_units[0].unit_id.as_str(), BOWTIE_UNIT);
    assert_eq!(report.skipped_units[0].issue, GeometryIssue::SelfIntersection);
    assert!(report.excluded.iter().any(|e| {
        e.unit_id.as_str() == BOWTIE_UNIT && e.reason == ExclusionReason::NoCovariateRecord
    }));

    // The label turned one control into a treated unit
    assert_eq!(report.labels.as_ref().map(|l| l.applied), Some(1));
    assert_eq!(report.treated_count, 16);
    assert_eq!(report.control_count, 43);
    assert_eq!(report.pairs, 16);

    let snapshot = read_covariate_table(&outcome.snapshot_path).unwrap();
    assert_eq!(snapshot.len(), 59);
    assert!(outcome.snapshot_path.ends_with("covariates_20240601.parquet"));

    // Only the labelled village counts as mapped
    let progress = report.label_progress.as_ref().unwrap();
    assert_eq!(progress.overall.total, 16);
    assert_eq!(progress.overall.mapped, 1);
    assert_eq!(progress.overall.remaining, 15);

    for file in [MATCHES_PARQUET, BALANCE_CSV, REPORT_JSON, LABEL_PROGRESS_CSV] {
        assert!(outcome.run_dir.join(file).exists(), "{file} was not written");
    }
}

#[tokio::test]
async fn test_run_without_any_match_is_still_reported() {
    let dir = tempfile::tempdir().unwrap();
    let study = synthetic_study(15, 45, 0.2, 31);
    let matching = json!({
        "method": "mahalanobis",
        "matching_ratio": 1,
        "caliper": { "width": 1e-9, "scale": "absolute" }
    });
    write_inputs(dir.path(), &study, &matching);

    let config = PipelineConfig::load(&dir.path().join("config.json")).unwrap();
    let outcome = run_pipeline(&config).await.unwrap();
    let report = &outcome.report;

    assert_eq!(outcome.run.state(), RunState::Validated);
    assert_eq!(report.pairs, 0);
    assert_eq!(report.unmatched.len(), 16);
    assert!(
        report
            .unmatched
            .iter()
            .all(|u| u.reason == UnmatchedReason::NoControlWithinCaliper)
    );
    assert!(report.balance.as_ref().is_some_and(|b| b.no_matched_pairs));

    let written = ResultWriter::new(&config.results_dir)
        .read_report(outcome.run.run_id())
        .unwrap();
    assert_eq!(written.unmatched.len(), 16);
    assert_eq!(written.skipped_units.len(), 1);
    for file in [MATCHES_PARQUET, BALANCE_JSON, REPORT_JSON] {
        assert!(outcome.run_dir.join(file).exists(), "{file} was not written");
    }
}

#[tokio::test]
async fn test_failed_model_fit_writes_report_before_aborting() {
    let dir = tempfile::tempdir().unwrap();
    // Treated units sit far outside the control range
    let study = synthetic_study(15, 45, 30.0, 31);
    write_inputs(dir.path(), &study, &json!({ "method": "propensity_score" }));

    let mut config = PipelineConfig::load(&dir.path().join("config.json")).unwrap();
    config.labels_path = None;
    let err = run_pipeline(&config).await.unwrap_err();
    assert!(matches!(err, rubeho_match::StudyError::ModelFitError(_)));

    let run_dirs: Vec<_> = std::fs::read_dir(&config.results_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(run_dirs.len(), 1);

    let text = std::fs::read_to_string(run_dirs[0].join(REPORT_JSON)).unwrap();
    let report: rubeho_match::RunReport = serde_json::from_str(&text).unwrap();
    assert_eq!(report.state, RunState::Unmatched);
    assert!(report.failure.is_some());
    assert_eq!(report.skipped_units.len(), 1);
    assert!(!run_dirs[0].join(MATCHES_PARQUET).exists());
}

#[test]
fn test_configuration_without_covariates_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    write_json(&path, &json!({ "registry_path": "registry.geojson" }));
    assert!(matches!(
        PipelineConfig::load(&path),
        Err(rubeho_match::StudyError::ConfigError(_))
    ));
}
