//! Error handling for ERA5 pipeline operations.
//!
//! Provides error types with context for raw-file discovery, variable
//! decoding, coordinate-key joining, and chronological sorting failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Era5Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Input root not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Could not derive (year, month) for raw file: {path}")]
    Discovery { path: PathBuf },

    #[error("Column mapping failed for variable '{variable}': {reason}")]
    ColumnMapping { variable: String, reason: String },

    #[error("Decode failed for '{variable}' in {path}: {reason}")]
    Decode {
        path: PathBuf,
        variable: String,
        reason: String,
    },

    #[error("No decodable variables in raw file: {path}")]
    NoVariablesExtracted { path: PathBuf },

    #[error("Join failed for variable '{variable}' in unit {year}-{month:02}: {reason}")]
    Join {
        year: i32,
        month: u32,
        variable: String,
        reason: String,
    },

    #[error("No joinable variables for unit {year}-{month:02}")]
    NoJoinableVariables { year: i32, month: u32 },

    #[error("Sort failed for {path}: {reason}")]
    Sort { path: PathBuf, reason: String },

    #[error("Cleanup failed for {path}: {reason}")]
    Cleanup { path: PathBuf, reason: String },

    #[error("Worker task failed: {reason}")]
    Task { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl Era5Error {
    /// Cleanup failures are warning-grade: logged and recorded, never fatal.
    pub fn is_warning(&self) -> bool {
        matches!(self, Era5Error::Cleanup { .. })
    }
}

pub type Result<T> = std::result::Result<T, Era5Error>;
