//! IO utilities for Parquet and CSV outputs

pub mod parquet;

pub use parquet::{
    read_covariate_table, read_records, write_covariate_table, write_records,
};

/// Escape a field for CSV output
#[must_use]
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
