//! Tests for the matching run lifecycle and its written outputs

use rubeho_match::algorithm::matching::{BalanceConfig, Caliper, MatchingConfig, MatchingMethod};
use rubeho_match::utils::test::synthetic_study;
use rubeho_match::workflow::writer::{
    BALANCE_CSV, BALANCE_JSON, MATCHES_CSV, MATCHES_PARQUET, REPORT_JSON,
};
use rubeho_match::{
    CovariateKind, CovariateSchema, MatchingData, MatchingRun, ResultWriter, RunReport, RunState,
    StudyError,
};

use crate::utils::{build_table, elevation_row, prepare, test_date};

fn matched_data() -> MatchingData {
    let study = synthetic_study(20, 60, 0.3, 12);
    MatchingData::from_table(&study.table, study.extraction_date, &study.flags, &[]).unwrap()
}

#[test]
fn test_run_walks_through_every_state() {
    let data = matched_data();
    let mut run = MatchingRun::new(MatchingConfig::default(), test_date());
    assert_eq!(run.state(), RunState::Unmatched);

    run.execute(&data).unwrap();
    assert_eq!(run.state(), RunState::Matched);
    assert!(run.result().is_some());

    run.validate(&data, &BalanceConfig::default()).unwrap();
    assert_eq!(run.state(), RunState::Validated);
    assert!(run.balance().is_some());

    run.accept(Some("balance acceptable")).unwrap();
    assert_eq!(run.state(), RunState::Accepted);
    assert_eq!(run.decision_note(), Some("balance acceptable"));
}

#[test]
fn test_invalid_transitions_are_rejected() {
    let data = matched_data();
    let mut run = MatchingRun::new(MatchingConfig::default(), test_date());

    assert!(matches!(
        run.validate(&data, &BalanceConfig::default()),
        Err(StudyError::StateError(_))
    ));
    assert!(matches!(run.reject("too early"), Err(StudyError::StateError(_))));

    run.execute(&data).unwrap();
    assert!(matches!(run.execute(&data), Err(StudyError::StateError(_))));
    assert!(matches!(run.accept(None), Err(StudyError::StateError(_))));

    run.validate(&data, &BalanceConfig::default()).unwrap();
    run.reject("forest cover imbalanced").unwrap();
    assert_eq!(run.state(), RunState::Rejected);
    assert!(matches!(run.accept(None), Err(StudyError::StateError(_))));
    assert_eq!(run.decision_note(), Some("forest cover imbalanced"));
}

#[test]
fn test_run_without_pairs_reaches_validated() {
    let data = matched_data();
    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .caliper(Caliper::absolute(1e-9))
        .build();
    let mut run = MatchingRun::new(config, test_date());

    let result = run.execute(&data).unwrap();
    assert!(result.pairs.is_empty());
    assert_eq!(result.unmatched.len(), 20);

    let balance = run.validate(&data, &BalanceConfig::default()).unwrap();
    assert!(balance.summary.no_matched_pairs);
    assert!(balance.metrics.is_empty());
    assert_eq!(balance.skipped_covariates.len(), data.covariates().len());
    assert_eq!(run.state(), RunState::Validated);

    let report = RunReport::from_run(&run);
    assert_eq!(report.unmatched.len(), 20);
    assert!(report.to_string().contains("No matched pairs"));
}

#[test]
fn test_rerun_creates_a_new_run() {
    let data = matched_data();
    let mut run = MatchingRun::new(MatchingConfig::default(), test_date());
    run.execute(&data).unwrap();

    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .build();
    let mut rerun = run.rerun_with(config);

    assert_eq!(run.state(), RunState::Matched);
    assert_eq!(rerun.state(), RunState::Unmatched);
    assert!(rerun.run_id().starts_with("mahalanobis_"));
    assert_ne!(rerun.run_id(), run.run_id());
    assert_eq!(rerun.extraction_date(), run.extraction_date());

    rerun.execute(&data).unwrap();
    assert_eq!(
        run.result().unwrap().method,
        MatchingMethod::PropensityScore
    );
}

#[test]
fn test_failed_model_fit_aborts_the_run() {
    let schema = CovariateSchema::new().with_field("elevation", CovariateKind::Numeric);
    // Elevation separates treated from controls perfectly
    let (table, flags) = build_table(
        schema,
        vec![
            elevation_row("C1", false, 100.0),
            elevation_row("C2", false, 200.0),
            elevation_row("C3", false, 300.0),
            elevation_row("T1", true, 900.0),
            elevation_row("T2", true, 1_000.0),
            elevation_row("T3", true, 1_100.0),
        ],
    );
    let data = prepare(&table, &flags);
    let mut run = MatchingRun::new(MatchingConfig::default(), test_date());

    assert!(matches!(
        run.execute(&data),
        Err(StudyError::ModelFitError(_))
    ));
    assert_eq!(run.state(), RunState::Unmatched);
    assert!(run.result().is_none());
}

#[test]
fn test_writer_round_trip() {
    let data = matched_data();
    let mut run = MatchingRun::new(MatchingConfig::default(), test_date());
    run.execute(&data).unwrap();
    run.validate(&data, &BalanceConfig::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let writer = ResultWriter::new(dir.path());
    let report = RunReport::from_run(&run);
    let run_dir = writer.write(&run, &report).unwrap();

    assert_eq!(run_dir, dir.path().join(run.run_id()));
    for file in [MATCHES_PARQUET, MATCHES_CSV, BALANCE_CSV, BALANCE_JSON, REPORT_JSON] {
        assert!(run_dir.join(file).exists(), "{file} was not written");
    }

    let rows = writer.read_matches(run.run_id()).unwrap();
    let pairs = &run.result().unwrap().pairs;
    assert_eq!(rows.len(), pairs.len());
    for (row, pair) in rows.iter().zip(pairs) {
        assert_eq!(row.treated_id, pair.treated_id.as_str());
        assert_eq!(row.control_id, pair.control_id.as_str());
        assert_eq!(row.rank, pair.rank as u64);
        assert_eq!(row.method, "propensity_score");
    }

    let read_back = writer.read_report(run.run_id()).unwrap();
    assert_eq!(read_back.state, RunState::Validated);
    assert_eq!(read_back.pairs, pairs.len());

    // Accepting rewrites the same run directory
    run.accept(None).unwrap();
    writer.write(&run, &RunReport::from_run(&run)).unwrap();
    assert_eq!(
        writer.read_report(run.run_id()).unwrap().state,
        RunState::Accepted
    );
}
