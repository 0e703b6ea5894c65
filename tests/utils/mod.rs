use chrono::NaiveDate;
use std::collections::BTreeMap;

use rubeho_match::algorithm::matching::MatchingData;
use rubeho_match::{CovariateKind, CovariateRecord, CovariateSchema, CovariateTable, UnitId};

/// Extraction date used by hand-built tables
#[must_use]
pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Build a table and flags from `(id, treated, record)` rows
pub fn build_table(
    schema: CovariateSchema,
    rows: Vec<(&str, bool, CovariateRecord)>,
) -> (CovariateTable, BTreeMap<UnitId, bool>) {
    let mut table = CovariateTable::new(schema);
    let mut flags = BTreeMap::new();
    for (id, treated, record) in rows {
        table.upsert(record).unwrap();
        flags.insert(UnitId::from(id), treated);
    }
    (table, flags)
}

/// One `(id, treated, record)` row with a single elevation value
pub fn elevation_row(id: &str, treated: bool, elevation: f64) -> (&str, bool, CovariateRecord) {
    let record = CovariateRecord::new(UnitId::from(id), test_date())
        .with_value("elevation", rubeho_match::CovariateValue::Numeric(elevation));
    (id, treated, record)
}

/// Single categorical covariate table
pub fn land_cover_table(rows: &[(&str, bool, &str)]) -> (CovariateTable, BTreeMap<UnitId, bool>) {
    let schema = CovariateSchema::new().with_field("land_cover", CovariateKind::Categorical);
    let rows = rows
        .iter()
        .map(|(id, treated, class)| {
            let record = CovariateRecord::new(UnitId::from(*id), test_date()).with_value(
                "land_cover",
                rubeho_match::CovariateValue::Categorical((*class).to_string()),
            );
            (*id, *treated, record)
        })
        .collect();
    build_table(schema, rows)
}

/// Prepare matching data over every declared covariate
pub fn prepare(table: &CovariateTable, flags: &BTreeMap<UnitId, bool>) -> MatchingData {
    MatchingData::from_table(table, test_date(), flags, &[]).unwrap()
}
