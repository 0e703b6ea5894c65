//! Tests for coarsened exact matching

use rubeho_match::algorithm::matching::{
    BinSpec, Caliper, Matcher, MatchingConfig, MatchingMethod, MethodDetails, UnmatchedReason,
};
use rubeho_match::utils::test::synthetic_study;
use rubeho_match::{CovariateKind, CovariateSchema, UnitId};

use crate::utils::{build_table, elevation_row, land_cover_table, prepare};

fn cem_config() -> MatchingConfig {
    MatchingConfig::builder()
        .method(MatchingMethod::CoarsenedExact)
        .build()
}

#[test]
fn test_treated_without_stratum_is_reported() {
    let (table, flags) = land_cover_table(&[
        ("T1", true, "wetland"),
        ("T2", true, "forest"),
        ("C1", false, "forest"),
        ("C2", false, "forest"),
        ("C3", false, "cropland"),
    ]);
    let data = prepare(&table, &flags);
    let result = Matcher::new(cem_config()).perform_matching(&data).unwrap();

    assert_eq!(result.pairs.len(), 1);
    assert_eq!(result.pairs[0].treated_id.as_str(), "T2");
    assert_eq!(result.pairs[0].control_id.as_str(), "C1");
    assert_eq!(result.unmatched.len(), 1);
    assert_eq!(result.unmatched[0].unit_id.as_str(), "T1");
    assert_eq!(result.unmatched[0].reason, UnmatchedReason::NoExactStratum);
    assert_eq!(
        result.details,
        MethodDetails::CoarsenedExact {
            strata: 3,
            matched_strata: 1,
        }
    );
}

#[test]
fn test_explicit_cut_points_define_strata() {
    let schema = CovariateSchema::new().with_field("elevation", CovariateKind::Numeric);
    // Bins: (-inf, 1000) [1000, 1500) [1500, inf)
    let (table, flags) = build_table(
        schema,
        vec![
            elevation_row("T1", true, 950.0),
            elevation_row("T2", true, 1_600.0),
            elevation_row("C1", false, 1_200.0),
            elevation_row("C2", false, 990.0),
            elevation_row("C3", false, 1_000.0),
        ],
    );
    let data = prepare(&table, &flags);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::CoarsenedExact)
        .coarsen("elevation", BinSpec::CutPoints(vec![1_000.0, 1_500.0]))
        .build();
    let result = Matcher::new(config).perform_matching(&data).unwrap();

    assert_eq!(result.controls_for(&UnitId::from("T1")), vec![&UnitId::from("C2")]);
    assert!(result.controls_for(&UnitId::from("T2")).is_empty());
    assert_eq!(result.unmatched[0].reason, UnmatchedReason::NoExactStratum);
}

#[test]
fn test_sturges_binning_on_synthetic_study() {
    let study = synthetic_study(40, 200, 0.0, 17);
    let result = Matcher::new(cem_config())
        .match_table(&study.table, study.extraction_date, &study.flags)
        .unwrap();

    let MethodDetails::CoarsenedExact {
        strata,
        matched_strata,
    } = result.details
    else {
        panic!("expected coarsened exact details");
    };
    assert!(strata > 1);
    assert!(matched_strata <= strata);
    assert!(result.control_usage().values().all(|&uses| uses == 1));
    assert!(
        result
            .unmatched
            .iter()
            .all(|u| u.reason != UnmatchedReason::NoControlWithinCaliper)
    );
}

#[test]
fn test_caliper_is_rejected() {
    let (table, flags) = land_cover_table(&[("T1", true, "forest"), ("C1", false, "forest")]);
    let data = prepare(&table, &flags);
    let config = MatchingConfig::builder()
        .method(MatchingMethod::CoarsenedExact)
        .caliper(Caliper::absolute(0.1))
        .build();
    assert!(Matcher::new(config).perform_matching(&data).is_err());
}
