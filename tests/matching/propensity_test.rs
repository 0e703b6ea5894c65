//! Tests for propensity score matching

use rubeho_match::algorithm::matching::{
    BalanceCalculator, BalanceConfig, Caliper, Matcher, MatchingConfig, MethodDetails,
    ScoreMetric, UnmatchedReason, match_on_scores,
};
use rubeho_match::utils::test::synthetic_study;
use rubeho_match::{MatchingData, UnitId};

fn scored(units: &[(&str, f64)]) -> Vec<(UnitId, f64)> {
    units.iter().map(|(id, s)| (UnitId::from(*id), *s)).collect()
}

#[test]
fn test_caliper_example_leaves_far_treated_unmatched() {
    let treated = scored(&[("A", 0.62), ("B", 0.71)]);
    let controls = scored(&[("C", 0.60), ("D", 0.90), ("E", 0.63)]);

    let matches = match_on_scores(&treated, &controls, 1, false, Some(0.05));

    assert_eq!(matches.pairs.len(), 1);
    assert_eq!(matches.pairs[0].treated_id.as_str(), "A");
    assert_eq!(matches.pairs[0].control_id.as_str(), "E");
    assert!((matches.pairs[0].distance - 0.01).abs() < 1e-12);
    assert_eq!(matches.unmatched.len(), 1);
    assert_eq!(matches.unmatched[0].unit_id.as_str(), "B");
    assert_eq!(
        matches.unmatched[0].reason,
        UnmatchedReason::NoControlWithinCaliper
    );
}

#[test]
fn test_equidistant_controls_break_ties_on_lower_id() {
    let treated = scored(&[("T1", 0.5)]);
    let controls = scored(&[("C2", 0.4), ("C1", 0.6)]);
    let matches = match_on_scores(&treated, &controls, 1, false, None);
    assert_eq!(matches.pairs[0].control_id.as_str(), "C1");

    // Input order does not matter
    let reversed = scored(&[("C1", 0.6), ("C2", 0.4)]);
    let again = match_on_scores(&treated, &reversed, 1, false, None);
    assert_eq!(matches.pairs, again.pairs);
}

#[test]
fn test_contested_control_goes_to_closest_treated() {
    let treated = scored(&[("T1", 0.50), ("T2", 0.52)]);
    let controls = scored(&[("C1", 0.53), ("C2", 0.30)]);
    let matches = match_on_scores(&treated, &controls, 1, false, None);

    let partner = |t: &str| {
        matches
            .pairs
            .iter()
            .find(|p| p.treated_id.as_str() == t)
            .map(|p| p.control_id.as_str().to_string())
    };
    assert_eq!(partner("T2").as_deref(), Some("C1"));
    assert_eq!(partner("T1").as_deref(), Some("C2"));
}

#[test]
fn test_ranks_follow_distance_with_replacement() {
    let treated = scored(&[("T1", 0.5), ("T2", 0.55)]);
    let controls = scored(&[("C1", 0.45), ("C2", 0.52), ("C3", 0.9)]);
    let matches = match_on_scores(&treated, &controls, 2, true, None);

    assert_eq!(matches.pairs.len(), 4);
    let t1: Vec<&str> = matches
        .pairs
        .iter()
        .filter(|p| p.treated_id.as_str() == "T1")
        .map(|p| p.control_id.as_str())
        .collect();
    assert_eq!(t1, vec!["C2", "C1"]);
    assert!(matches.short_matched.is_empty());
}

#[test]
fn test_matching_on_estimated_scores_improves_balance() {
    let study = synthetic_study(50, 200, 0.5, 21);
    let data = MatchingData::from_table(&study.table, study.extraction_date, &study.flags, &[])
        .unwrap();
    let result = Matcher::new(MatchingConfig::default())
        .perform_matching(&data)
        .unwrap();

    assert_eq!(result.pairs.len(), 50);
    assert_eq!(result.propensity_scores.len(), 250);

    let mean_score = |treated: bool| {
        let scores: Vec<f64> = result
            .propensity_scores
            .iter()
            .filter(|s| s.treated == treated)
            .map(|s| s.score)
            .collect();
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    assert!(mean_score(true) > mean_score(false));
    assert!(
        result
            .propensity_scores
            .iter()
            .all(|s| s.score > 0.0 && s.score < 1.0)
    );

    let report = BalanceCalculator::new(BalanceConfig::default())
        .calculate_balance(&data, &result)
        .unwrap();
    assert!(
        report.summary.mean_absolute_standardized_difference
            < report.summary.pre_match_mean_absolute_standardized_difference
    );
    assert!(report.support.iter().any(|s| s.name == "propensity_score"));
}

#[test]
fn test_standard_deviation_caliper_resolves_on_score_scale() {
    let study = synthetic_study(40, 160, 0.8, 9);
    let config = MatchingConfig::builder()
        .caliper(Caliper::standard_deviations(0.2))
        .score_metric(ScoreMetric::Logit)
        .build();
    let result = Matcher::new(config)
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    let MethodDetails::PropensityScore { caliper, .. } = &result.details else {
        panic!("expected propensity score details");
    };
    let width = caliper.unwrap();
    assert!(width > 0.0);

    for pair in &result.pairs {
        assert!(pair.distance <= width + 1e-9);
        let t = result.propensity_score(&pair.treated_id).unwrap();
        let c = result.propensity_score(&pair.control_id).unwrap();
        assert!(((t.logit - c.logit).abs() - pair.distance).abs() < 1e-9);
    }
}
