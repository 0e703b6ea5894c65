//! Tests for covariate extraction against an in-memory platform

use rubeho_match::extraction::{
    CovariateExtractor, ExtractionConfig, InMemoryPlatform, RetryPolicy,
};
use rubeho_match::geometry::{GeometryIssue, Polygon};
use rubeho_match::utils::test::{SyntheticStudy, synthetic_study};
use rubeho_match::{AdministrativeUnit, CovariateValue, UnitId};

fn offline_config(max_attempts: u32) -> ExtractionConfig {
    ExtractionConfig {
        retry: RetryPolicy::immediate(max_attempts),
        concurrency: Some(4),
    }
}

#[tokio::test]
async fn test_extraction_reproduces_platform_values() {
    let study = synthetic_study(5, 15, 0.0, 2);
    let extractor = CovariateExtractor::new(study.platform(), offline_config(1));

    let run = extractor
        .extract(&study.units, &SyntheticStudy::definitions(), study.extraction_date)
        .await
        .unwrap();

    assert!(run.report.is_clean());
    assert_eq!(run.report.units_extracted, 20);
    assert_eq!(run.table, study.table);
}

#[tokio::test]
async fn test_extracting_twice_is_idempotent() {
    let study = synthetic_study(4, 8, 0.0, 6);
    let extractor = CovariateExtractor::new(study.platform(), offline_config(1));
    let definitions = SyntheticStudy::definitions();

    let mut run = extractor
        .extract(&study.units, &definitions, study.extraction_date)
        .await
        .unwrap();
    let first = run.table.clone();

    extractor
        .extract_into(&mut run.table, &study.units, &definitions, study.extraction_date)
        .await
        .unwrap();

    assert_eq!(run.table, first);
    assert_eq!(run.table.len(), 12);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let study = synthetic_study(1, 2, 0.0, 4);
    let platform = study
        .platform()
        .with_transient_failures("C0000", "elevation", 2);
    let extractor = CovariateExtractor::new(platform, offline_config(3));

    let run = extractor
        .extract(&study.units, &SyntheticStudy::definitions(), study.extraction_date)
        .await
        .unwrap();

    assert!(run.report.failed.is_empty());
    let record = run
        .table
        .get(&UnitId::from("C0000"), study.extraction_date)
        .unwrap();
    assert!(matches!(record.get("elevation"), CovariateValue::Numeric(_)));
}

#[tokio::test]
async fn test_exhausted_retries_store_missing_values() {
    let study = synthetic_study(1, 2, 0.0, 4);
    let platform = study
        .platform()
        .with_transient_failures("C0001", "rainfall", 5)
        .with_permanent_failure("T0000", "forest_cover");
    let extractor = CovariateExtractor::new(platform, offline_config(2));

    let run = extractor
        .extract(&study.units, &SyntheticStudy::definitions(), study.extraction_date)
        .await
        .unwrap();

    assert_eq!(run.report.failed.len(), 2);
    let transient = run
        .report
        .failed
        .iter()
        .find(|f| f.unit_id.as_str() == "C0001")
        .unwrap();
    assert_eq!(transient.attempts, 2);
    let permanent = run
        .report
        .failed
        .iter()
        .find(|f| f.unit_id.as_str() == "T0000")
        .unwrap();
    assert_eq!(permanent.attempts, 1);

    let record = run
        .table
        .get(&UnitId::from("C0001"), study.extraction_date)
        .unwrap();
    assert!(record.get("rainfall").is_missing());
    // The unit's other covariates are still recorded
    assert!(!record.get("elevation").is_missing());
}

#[tokio::test]
async fn test_invalid_geometry_is_skipped_and_reported() {
    let square = Polygon::from_coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
    let bowtie = Polygon::from_coords(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 1.0)]);
    let units = vec![
        AdministrativeUnit::new("V1", "Ruaha", "Mikumi").with_boundary(square),
        AdministrativeUnit::new("V2", "Ihanda", "Mikumi").with_boundary(bowtie),
        AdministrativeUnit::new("V3", "Kitete", "Mikumi"),
    ];
    let platform = InMemoryPlatform::new()
        .with_value("V1", "elevation", CovariateValue::Numeric(1_020.0))
        .with_value("V2", "elevation", CovariateValue::Numeric(990.0));
    let definitions: Vec<_> = SyntheticStudy::definitions()
        .into_iter()
        .filter(|d| d.name == "elevation")
        .collect();
    let extractor = CovariateExtractor::new(platform, offline_config(1));

    let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let run = extractor.extract(&units, &definitions, date).await.unwrap();

    assert_eq!(run.report.units_extracted, 1);
    assert_eq!(run.report.skipped.len(), 2);
    assert_eq!(run.report.skipped[0].unit_id.as_str(), "V2");
    assert_eq!(run.report.skipped[0].issue, GeometryIssue::SelfIntersection);
    assert_eq!(run.report.skipped[1].issue, GeometryIssue::Missing);
    assert!(run.table.get(&UnitId::from("V2"), date).is_none());
    // Only the valid unit was queried
    assert_eq!(extractor.platform().query_count(), 1);
}

#[tokio::test]
async fn test_unit_turned_invalid_loses_its_record() {
    let square = Polygon::from_coords(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
    let bowtie = Polygon::from_coords(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 1.0)]);
    let platform = InMemoryPlatform::new()
        .with_value("V1", "elevation", CovariateValue::Numeric(1_020.0))
        .with_value("V2", "elevation", CovariateValue::Numeric(990.0));
    let definitions: Vec<_> = SyntheticStudy::definitions()
        .into_iter()
        .filter(|d| d.name == "elevation")
        .collect();
    let extractor = CovariateExtractor::new(platform, offline_config(1));
    let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let earlier = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    let valid = vec![
        AdministrativeUnit::new("V1", "Ruaha", "Mikumi").with_boundary(square.clone()),
        AdministrativeUnit::new("V2", "Ihanda", "Mikumi").with_boundary(square.clone()),
    ];
    let mut run = extractor.extract(&valid, &definitions, date).await.unwrap();
    extractor
        .extract_into(&mut run.table, &valid, &definitions, earlier)
        .await
        .unwrap();
    assert_eq!(run.table.len(), 4);

    let edited = vec![
        AdministrativeUnit::new("V1", "Ruaha", "Mikumi").with_boundary(bowtie),
        AdministrativeUnit::new("V2", "Ihanda", "Mikumi").with_boundary(square),
    ];
    let report = extractor
        .extract_into(&mut run.table, &edited, &definitions, date)
        .await
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].issue, GeometryIssue::SelfIntersection);
    assert!(run.table.get(&UnitId::from("V1"), date).is_none());
    // Records of other dates are versions of their own and stay
    assert!(run.table.get(&UnitId::from("V1"), earlier).is_some());
    assert!(run.table.get(&UnitId::from("V2"), date).is_some());
}
