//! Covariate extraction from an external geospatial data platform
//!
//! 1. Covariate definitions (dataset, statistic, spatial reduction)
//! 2. The platform query interface and an in-memory implementation
//! 3. Bounded retry of failed queries
//! 4. The extractor producing one covariate record per unit

pub mod definition;
pub mod extractor;
pub mod platform;
pub mod retry;

pub use definition::{
    AggregationStatistic, CovariateDefinition, SpatialReduction, schema_from_definitions,
};
pub use extractor::{
    CovariateExtractor, ExtractionConfig, ExtractionReport, ExtractionRun, FailedQuery,
    SkippedUnit,
};
pub use platform::{GeoPlatform, InMemoryPlatform, PlatformError, PlatformQuery};
pub use retry::RetryPolicy;
