//! Tests for Mahalanobis distance matching on synthetic studies

use rubeho_match::algorithm::matching::{
    BalanceCalculator, BalanceConfig, Caliper, ControlWeighting, Matcher, MatchingConfig, MatchingMethod,
    MethodDetails, UnmatchedReason,
};
use rubeho_match::utils::test::synthetic_study;

fn mahalanobis_config() -> MatchingConfig {
    MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .build()
}

#[test]
fn test_same_distribution_is_balanced_after_matching() {
    let study = synthetic_study(80, 400, 0.0, 42);
    let result = Matcher::new(mahalanobis_config())
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    assert_eq!(result.treated_count, 80);
    assert_eq!(result.pairs.len(), 80);
    assert!(result.unmatched.is_empty());
    for treated in study.treated_ids() {
        assert_eq!(result.controls_for(&treated).len(), 1);
    }
    assert!(matches!(
        result.details,
        MethodDetails::Mahalanobis {
            pseudo_inverse: false,
            ..
        }
    ));

    let data = rubeho_match::MatchingData::from_table(
        &study.table,
        study.extraction_date,
        &study.flags,
        &[],
    )
    .unwrap();
    let report = BalanceCalculator::new(BalanceConfig::default())
        .calculate_balance(&data, &result)
        .unwrap();

    assert!(
        report.summary.mean_absolute_standardized_difference < 0.1,
        "mean |SMD| was {}",
        report.summary.mean_absolute_standardized_difference
    );
    assert!(report.metric("elevation").is_some());
    assert!(report.metric("land_cover=forest").is_some());
}

#[test]
fn test_controls_are_not_reused_without_replacement() {
    let study = synthetic_study(60, 90, 0.8, 3);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .matching_ratio(2)
        .build();
    let result = Matcher::new(config)
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    assert!(result.control_usage().values().all(|&uses| uses == 1));
    // 60 treated asking for 2 controls each exhaust the 90 controls
    assert_eq!(result.pairs.len(), 90);
    assert!(result.short_matched.len() + result.unmatched.len() >= 15);
    assert!(
        result
            .unmatched
            .iter()
            .all(|u| u.reason == UnmatchedReason::ControlsExhausted)
    );
    for pair in &result.pairs {
        assert!((1..=2).contains(&pair.rank));
    }
}

#[test]
fn test_with_replacement_gives_every_treated_a_full_match() {
    let study = synthetic_study(30, 20, 0.5, 11);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .matching_ratio(2)
        .with_replacement(true)
        .build();
    let result = Matcher::new(config)
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    assert_eq!(result.pairs.len(), 60);
    assert!(result.short_matched.is_empty());
    assert!(result.control_usage().values().any(|&uses| uses > 1));

    let data = rubeho_match::MatchingData::from_table(
        &study.table,
        study.extraction_date,
        &study.flags,
        &[],
    )
    .unwrap();
    let frequency = BalanceCalculator::default()
        .with_imbalance_threshold(0.25)
        .calculate_balance(&data, &result)
        .unwrap();
    let unique = BalanceCalculator::default()
        .with_control_weighting(ControlWeighting::Unique)
        .calculate_balance(&data, &result)
        .unwrap();

    assert_eq!(frequency.imbalance_threshold, 0.25);
    assert_eq!(frequency.summary.matched_controls, 60);
    assert_eq!(
        unique.summary.matched_controls,
        result.control_usage().len()
    );
    assert_eq!(unique.control_weighting, ControlWeighting::Unique);
}

#[test]
fn test_matching_is_deterministic() {
    let study = synthetic_study(40, 120, 0.3, 8);
    let first = Matcher::new(mahalanobis_config())
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();
    let second = Matcher::new(mahalanobis_config())
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();
    assert_eq!(first.pairs, second.pairs);
}

#[test]
fn test_absolute_caliper_leaves_distant_treated_unmatched() {
    let study = synthetic_study(20, 20, 3.0, 5);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .caliper(Caliper::absolute(0.05))
        .build();
    let result = Matcher::new(config)
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    assert!(!result.unmatched.is_empty());
    assert!(result.pairs.iter().all(|p| p.distance <= 0.05 + 1e-9));
    assert!(
        result
            .unmatched
            .iter()
            .any(|u| u.reason == UnmatchedReason::NoControlWithinCaliper)
    );
}

#[test]
fn test_standard_deviation_caliper_is_rejected() {
    let study = synthetic_study(5, 10, 0.0, 1);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::Mahalanobis)
        .caliper(Caliper::standard_deviations(0.2))
        .build();
    let err = Matcher::new(config)
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap_err();
    assert!(matches!(
        err,
        rubeho_match::StudyError::ValidationError(_)
    ));
}
