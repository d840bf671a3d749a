//! Configuration management and validation.
//!
//! Provides configuration structures for the extraction, joining, sorting,
//! and batching stages of the pipeline. The default variable exclusions are
//! carried here as explicit configuration, threaded through the orchestrator
//! rather than consulted as ambient state by the stage components.

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_EXCLUDE_VARIABLES, DEFAULT_JOIN_CHUNK_SIZE,
    DEFAULT_MAX_ROWS_IN_MEMORY, DEFAULT_SORT_BATCH_SIZE, DEFAULT_SORT_CHUNK_SIZE,
    DEFAULT_TIME_CHUNK_SIZE,
};
use crate::error::{Era5Error, Result};
use crate::models::OutputFormat;
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};

/// Supported compression algorithms for parquet output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Variable Extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Only decode these variables, if set (overrides `exclude_variables`)
    pub include_variables: Option<Vec<String>>,

    /// Variables skipped when no include list is given
    pub exclude_variables: Vec<String>,

    /// Time steps per output segment; bounds peak memory per file
    pub time_chunk_size: usize,

    /// Decimal places kept for latitude/longitude, if set
    pub decimal_precision: Option<u32>,

    /// Drop metadata columns whose value is constant across a chunk
    pub prune_constant_columns: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            include_variables: None,
            exclude_variables: DEFAULT_EXCLUDE_VARIABLES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            time_chunk_size: DEFAULT_TIME_CHUNK_SIZE,
            decimal_precision: Some(4),
            prune_constant_columns: true,
        }
    }
}

impl ExtractConfig {
    /// Decide whether a discovered variable should be decoded
    pub fn wants_variable(&self, variable: &str) -> bool {
        match &self.include_variables {
            Some(included) => included.iter().any(|v| v == variable),
            None => !self.exclude_variables.iter().any(|v| v == variable),
        }
    }
}

/// Coordinate-Key Joiner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Only join these variables, if set
    pub include_variables: Option<Vec<String>>,

    /// Variables excluded from the join when no include list is given
    pub exclude_variables: Vec<String>,

    /// Rows read at a time from each segment file
    pub chunk_size: usize,

    /// Accumulated rows that force a flush to the staging file
    pub max_rows_in_memory: usize,

    /// On-disk encoding of the joined table
    pub output_format: OutputFormat,

    /// Compression for parquet output
    pub compression: CompressionAlgorithm,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            include_variables: None,
            exclude_variables: DEFAULT_EXCLUDE_VARIABLES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chunk_size: DEFAULT_JOIN_CHUNK_SIZE,
            max_rows_in_memory: DEFAULT_MAX_ROWS_IN_MEMORY,
            output_format: OutputFormat::Parquet,
            compression: CompressionAlgorithm::Snappy,
        }
    }
}

impl JoinConfig {
    pub fn wants_variable(&self, variable: &str) -> bool {
        match &self.include_variables {
            Some(included) => included.iter().any(|v| v == variable),
            None => !self.exclude_variables.iter().any(|v| v == variable),
        }
    }
}

/// Chronological Sorter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortConfig {
    /// Rows per CSV read chunk
    pub chunk_size: usize,

    /// Copy the original into a backup directory before sorting
    pub backup: bool,

    /// Files handed to each sort worker at a time
    pub batch_size: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_SORT_CHUNK_SIZE,
            backup: false,
            batch_size: DEFAULT_SORT_BATCH_SIZE,
        }
    }
}

/// Global pipeline configuration threaded through the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub extract: ExtractConfig,
    pub join: JoinConfig,
    pub sort: SortConfig,

    /// Bounded worker counts for each stage
    pub extract_workers: usize,
    pub join_workers: usize,
    pub sort_workers: usize,

    /// (year, month) units processed per batch
    pub batch_size: usize,

    /// Seconds to wait between batches, letting system resources recover
    pub batch_delay_secs: u64,

    /// Keep per-variable intermediates after a successful join
    pub keep_processed: bool,

    /// Run the whole-run chronological sort pass
    pub sort_chronologically: bool,

    /// Restrict discovery to (start_year, end_year) inclusive, if set
    pub year_range: Option<(i32, i32)>,

    /// Re-run units whose joined output already exists
    pub force_reprocess: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = num_cpus::get_physical().max(1);
        Self {
            extract: ExtractConfig::default(),
            join: JoinConfig::default(),
            sort: SortConfig::default(),
            extract_workers: workers,
            join_workers: workers,
            sort_workers: workers,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_secs: 0,
            keep_processed: false,
            sort_chronologically: true,
            year_range: None,
            force_reprocess: false,
        }
    }
}

impl PipelineConfig {
    /// Restrict extraction and joining to the given variables
    pub fn with_include_variables(mut self, variables: Vec<String>) -> Self {
        self.extract.include_variables = Some(variables.clone());
        self.join.include_variables = Some(variables);
        self
    }

    /// Replace the default exclusion list for extraction and joining
    pub fn with_exclude_variables(mut self, variables: Vec<String>) -> Self {
        self.extract.exclude_variables = variables.clone();
        self.join.exclude_variables = variables;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.extract_workers = workers;
        self.join_workers = workers;
        self.sort_workers = workers;
        self
    }

    pub fn with_year_range(mut self, start: i32, end: i32) -> Self {
        self.year_range = Some((start, end));
        self
    }

    pub fn with_keep_processed(mut self) -> Self {
        self.keep_processed = true;
        self
    }

    pub fn without_sort(mut self) -> Self {
        self.sort_chronologically = false;
        self
    }

    /// Validate cross-field consistency before a run
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Era5Error::Configuration {
                message: "batch size must be greater than 0".to_string(),
            });
        }
        if self.extract_workers == 0 || self.join_workers == 0 || self.sort_workers == 0 {
            return Err(Era5Error::Configuration {
                message: "worker counts must be greater than 0".to_string(),
            });
        }
        if self.extract.time_chunk_size == 0 {
            return Err(Era5Error::Configuration {
                message: "extractor chunk size must be greater than 0".to_string(),
            });
        }
        if self.join.max_rows_in_memory == 0 {
            return Err(Era5Error::Configuration {
                message: "max rows in memory must be greater than 0".to_string(),
            });
        }
        if let Some((start, end)) = self.year_range {
            if start > end {
                return Err(Era5Error::Configuration {
                    message: format!("invalid year range: {start} > {end}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes_are_threaded_into_both_stages() {
        let config = PipelineConfig::default();
        assert!(!config.extract.wants_variable("tp"));
        assert!(!config.join.wants_variable("vimd"));
        assert!(config.extract.wants_variable("2t"));
    }

    #[test]
    fn test_include_list_overrides_excludes() {
        let config =
            PipelineConfig::default().with_include_variables(vec!["tp".to_string()]);
        // tp is in the default exclude list but an include list wins
        assert!(config.extract.wants_variable("tp"));
        assert!(!config.extract.wants_variable("2t"));
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.extract.time_chunk_size = 0;
        assert!(config.validate().is_err());

        let config = PipelineConfig::default().with_year_range(2022, 2020);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compression_mapping() {
        assert!(matches!(
            CompressionAlgorithm::Snappy.to_polars_compression(),
            ParquetCompression::Snappy
        ));
        assert!(matches!(
            CompressionAlgorithm::Uncompressed.to_polars_compression(),
            ParquetCompression::Uncompressed
        ));
    }
}
