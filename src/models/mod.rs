//! Domain models: administrative units, covariates and the covariate table

pub mod covariate;
pub mod table;
pub mod unit;

pub use covariate::{CovariateKind, CovariateRecord, CovariateSchema, CovariateValue};
pub use table::CovariateTable;
pub use unit::{
    AdministrativeUnit, ProgramLocationType, UnitId, village_ward_key, ward_district_key,
};
