//! Treatment/control village matching for impact evaluation.
//!
//! The crate loads a ward/village registry, applies treatment labels,
//! extracts covariates from a geospatial platform into a versioned
//! covariate table, pairs treated villages with similar controls and checks
//! covariate balance of the matched sets.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod extraction;
pub mod geometry;
pub mod labeling;
pub mod models;
pub mod registry;
pub mod utils;
pub mod workflow;

// Re-export the most common types for easier use
// Core types
pub use config::PipelineConfig;
pub use error::{Result, StudyError};
pub use models::{
    AdministrativeUnit, CovariateKind, CovariateRecord, CovariateSchema, CovariateTable,
    CovariateValue, UnitId,
};
pub use registry::{ProgramList, Registry};

// Labeling and extraction
pub use extraction::{CovariateDefinition, CovariateExtractor, ExtractionConfig, GeoPlatform};
pub use labeling::{Annotation, FileLabelStore, LabelProgress, LabelStore};

// Matching
pub use algorithm::matching::{
    BalanceCalculator, BalanceConfig, BalanceReport, Matcher, MatchingConfig, MatchingData,
    MatchingMethod, MatchingResult,
};

// Run lifecycle
pub use workflow::{MatchingRun, ResultWriter, RunReport, RunState};
