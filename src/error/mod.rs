//! Error handling for the matching toolkit.

pub mod util;

use std::io;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for registry loading, extraction, matching and validation
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    /// Error opening, reading or writing a file
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Error building or reading Arrow data
    #[error("Arrow error: {0}")]
    ArrowError(#[from] ArrowError),

    /// Error reading or writing Parquet data
    #[error("Parquet error: {0}")]
    ParquetError(#[from] ParquetError),

    /// Error parsing or writing JSON / GeoJSON
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error converting between records and Arrow batches
    #[error("Serde-arrow error: {0}")]
    SerdeArrowError(#[from] serde_arrow::Error),

    /// Invalid or missing geometry
    #[error("Geometry error: {0}")]
    GeometryError(String),

    /// Failure reported by the geospatial data platform
    #[error("Platform error: {0}")]
    PlatformError(String),

    /// Covariate value does not match the declared schema
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// The propensity model could not be fitted (e.g. perfect separation)
    #[error("Model fit error: {0}")]
    ModelFitError(String),

    /// Invalid input or parameters
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid run state transition
    #[error("State error: {0}")]
    StateError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StudyError {
    /// Prefix the message of string-carrying variants with extra context
    #[must_use]
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::GeometryError(msg) => Self::GeometryError(format!("{context}: {msg}")),
            Self::PlatformError(msg) => Self::PlatformError(format!("{context}: {msg}")),
            Self::SchemaError(msg) => Self::SchemaError(format!("{context}: {msg}")),
            Self::ModelFitError(msg) => Self::ModelFitError(format!("{context}: {msg}")),
            Self::ValidationError(msg) => Self::ValidationError(format!("{context}: {msg}")),
            Self::StateError(msg) => Self::StateError(format!("{context}: {msg}")),
            Self::ConfigError(msg) => Self::ConfigError(format!("{context}: {msg}")),
            Self::IoError(e) => Self::IoError(io::Error::new(e.kind(), format!("{context}: {e}"))),
            other => other,
        }
    }
}

/// Result type for toolkit operations
pub type Result<T> = std::result::Result<T, StudyError>;
