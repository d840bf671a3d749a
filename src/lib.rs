//! ERA5 Processor Library
//!
//! A Rust library for converting raw ERA5 GRIB archives into joined,
//! chronologically sorted tabular datasets.
//!
//! This library provides tools for:
//! - Decoding GRIB2 files into per-variable (time, latitude, longitude,
//!   value) tables, chunked along the time dimension
//! - Joining the variable tables of one (year, month) unit on the shared
//!   coordinate key under a bounded memory ceiling
//! - Sorting joined tables chronologically in place with atomic replacement
//! - Orchestrating the stages over thousands of independent units with
//!   bounded worker pools, per-unit failure isolation, and resumability

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod schema;

pub mod extract;
pub mod join;
pub mod pipeline;
pub mod sort;

pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use config::{ExtractConfig, JoinConfig, PipelineConfig, SortConfig};
pub use error::{Era5Error, Result};
pub use extract::VariableExtractor;
pub use join::UnitJoiner;
pub use models::{OutputFormat, RunSummary, UnitKey, UnitState};
pub use pipeline::BatchOrchestrator;
pub use schema::VariableRegistry;
pub use sort::ChronologicalSorter;
