//! Utility functions for error handling
//!
//! File helpers that attach the purpose of the access to any failure.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, StudyError};

/// Read a file to string, explaining what the file was needed for on failure
///
/// # Arguments
/// * `path` - The path to the file to read
/// * `purpose` - Why the file is being read (for error context)
pub fn safe_read_to_string(path: &Path, purpose: &str) -> Result<String> {
    if !path.exists() {
        return Err(StudyError::IoError(io::Error::new(
            io::ErrorKind::NotFound,
            format!("File not found: {} (needed for: {purpose})", path.display()),
        )));
    }

    if !path.is_file() {
        return Err(StudyError::IoError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path is not a file: {} (expected a file for: {purpose})", path.display()),
        )));
    }

    fs::read_to_string(path).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::PermissionDenied => "Permission denied - check file permissions".to_string(),
            io::ErrorKind::InvalidData => {
                "File contains invalid UTF-8 data - cannot read as text".to_string()
            }
            _ => format!("Failed to read file content for: {purpose}"),
        };
        StudyError::IoError(io::Error::new(
            e.kind(),
            format!("{context} ({}): {e}", path.display()),
        ))
    })
}

/// Make sure a directory exists, creating it (and its parents) when needed
pub fn ensure_directory(path: &Path, purpose: &str) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(StudyError::IoError(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Path is not a directory: {} (expected a directory for: {purpose})", path.display()),
        )));
    }

    fs::create_dir_all(path).map_err(|e| {
        StudyError::IoError(io::Error::new(
            e.kind(),
            format!("Failed to create directory {} for {purpose}: {e}", path.display()),
        ))
    })
}

/// Write a file atomically by writing a sibling temp file and renaming it
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
