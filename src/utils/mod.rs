//! Shared utilities: file IO, logging and progress, test fixtures

pub mod io;
pub mod logging;
pub mod test;

/// Environment variable overriding the number of rows per written Arrow batch
pub const BATCH_SIZE_ENV_VAR: &str = "RUBEHO_BATCH_SIZE";

/// Default number of rows per written Arrow batch
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Helper function to get batch size from environment
#[must_use]
pub fn get_batch_size() -> Option<usize> {
    std::env::var(BATCH_SIZE_ENV_VAR)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
}
