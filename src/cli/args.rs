//! Command-line argument definitions for the ERA5 processor
//!
//! Defines the CLI surface using the clap derive API: the full pipeline
//! (`run`) plus independently invocable `extract`, `join`, and `sort`
//! subcommands.

use crate::config::{CompressionAlgorithm, PipelineConfig};
use crate::error::{Era5Error, Result};
use crate::models::OutputFormat;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments for the ERA5 pipeline
#[derive(Debug, Clone, Parser)]
#[command(
    name = "era5-processor",
    version,
    about = "Convert ERA5 GRIB archives into joined, chronologically sorted tables",
    long_about = "A pipeline that decodes ERA5 GRIB archives into per-variable tables, \
                  joins them on the (time, latitude, longitude) coordinate key, and \
                  sorts the joined output chronologically. Units of work are (year, month) \
                  months; failures are isolated per unit and re-runs resume from the \
                  on-disk layout."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run the full pipeline: extract, join, optional cleanup and sort
    Run(RunArgs),
    /// Extract one raw GRIB file into per-variable tables
    Extract(ExtractArgs),
    /// Join the variable tables of one (year, month) unit
    Join(JoinArgs),
    /// Chronologically sort every joined file under a directory
    Sort(SortArgs),
}

/// On-disk encoding choices exposed on the CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormatArg {
    Csv,
    Parquet,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(value: OutputFormatArg) -> Self {
        match value {
            OutputFormatArg::Csv => OutputFormat::Csv,
            OutputFormatArg::Parquet => OutputFormat::Parquet,
        }
    }
}

/// Parquet compression choices exposed on the CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompressionArg {
    Snappy,
    Zstd,
    Lz4,
    Uncompressed,
}

impl From<CompressionArg> for CompressionAlgorithm {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Snappy => CompressionAlgorithm::Snappy,
            CompressionArg::Zstd => CompressionAlgorithm::Zstd,
            CompressionArg::Lz4 => CompressionAlgorithm::Lz4,
            CompressionArg::Uncompressed => CompressionAlgorithm::Uncompressed,
        }
    }
}

/// Comma-separated variable list, e.g. `2t,10u,10v`
#[derive(Debug, Clone)]
pub struct VariableList {
    pub variables: Vec<String>,
}

impl FromStr for VariableList {
    type Err = Era5Error;

    fn from_str(s: &str) -> Result<Self> {
        let variables: Vec<String> = s
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        if variables.is_empty() {
            return Err(Era5Error::Configuration {
                message: "variable list cannot be empty".to_string(),
            });
        }
        Ok(VariableList { variables })
    }
}

/// Arguments for the full pipeline run
#[derive(Debug, Clone, Parser)]
pub struct RunArgs {
    /// Directory containing raw GRIB files
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    pub input: PathBuf,

    /// Base directory for processed, joined, and log output
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: PathBuf,

    /// Variables to extract (comma-separated); overrides the exclude list
    #[arg(long = "variables", value_name = "LIST")]
    pub variables: Option<VariableList>,

    /// Variables to exclude (comma-separated)
    #[arg(long = "exclude-variables", value_name = "LIST")]
    pub exclude_variables: Option<VariableList>,

    /// Decimal places kept for latitude/longitude
    #[arg(long = "decimal-precision", value_name = "N", default_value_t = 4)]
    pub decimal_precision: u32,

    /// Output format for joined tables
    #[arg(long = "output-format", value_enum, default_value = "parquet")]
    pub output_format: OutputFormatArg,

    /// Compression for parquet output
    #[arg(long = "compress", value_enum, default_value = "snappy")]
    pub compress: CompressionArg,

    /// Time steps per extractor chunk
    #[arg(long = "chunk", value_name = "STEPS", default_value_t = 24)]
    pub chunk: usize,

    /// Rows per joiner read chunk
    #[arg(long = "join-chunk-size", value_name = "ROWS", default_value_t = 10_000)]
    pub join_chunk_size: usize,

    /// Rows held in memory before the joiner flushes to staging
    #[arg(long = "max-memory-rows", value_name = "ROWS", default_value_t = 30_000)]
    pub max_memory_rows: usize,

    /// Worker pool size for every stage (per-stage flags override)
    #[arg(short = 'j', long = "workers", value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Worker pool size for extraction
    #[arg(long = "extract-workers", value_name = "COUNT")]
    pub extract_workers: Option<usize>,

    /// Worker pool size for joining
    #[arg(long = "join-workers", value_name = "COUNT")]
    pub join_workers: Option<usize>,

    /// Worker pool size for sorting
    #[arg(long = "sort-workers", value_name = "COUNT")]
    pub sort_workers: Option<usize>,

    /// (year, month) units per batch
    #[arg(long = "batch-size", value_name = "UNITS", default_value_t = 10)]
    pub batch_size: usize,

    /// Seconds to wait between batches
    #[arg(long = "batch-delay", value_name = "SECONDS", default_value_t = 0)]
    pub batch_delay: u64,

    /// Keep per-variable intermediates after joining
    #[arg(long = "keep-processed")]
    pub keep_processed: bool,

    /// Sort joined files chronologically after all batches
    #[arg(long = "sort-chronologically")]
    pub sort_chronologically: bool,

    /// Create backups before sorting
    #[arg(long = "sort-backup")]
    pub sort_backup: bool,

    /// Files handed to each sort worker at a time
    #[arg(long = "sort-batch-size", value_name = "FILES", default_value_t = 1)]
    pub sort_batch_size: usize,

    /// First year to process
    #[arg(long = "start-year", value_name = "YEAR")]
    pub start_year: Option<i32>,

    /// Last year to process
    #[arg(long = "end-year", value_name = "YEAR")]
    pub end_year: Option<i32>,

    /// Re-run units whose joined output already exists
    #[arg(long = "force")]
    pub force: bool,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl RunArgs {
    pub fn validate(&self) -> Result<()> {
        if !self.input.exists() {
            return Err(Era5Error::Configuration {
                message: format!("input path does not exist: {}", self.input.display()),
            });
        }
        if !self.input.is_dir() {
            return Err(Era5Error::Configuration {
                message: format!("input path is not a directory: {}", self.input.display()),
            });
        }
        if let (Some(start), Some(end)) = (self.start_year, self.end_year) {
            if start > end {
                return Err(Era5Error::Configuration {
                    message: format!("start year {start} is after end year {end}"),
                });
            }
        }
        Ok(())
    }

    /// Build the pipeline configuration from the CLI surface
    pub fn to_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();

        if let Some(list) = &self.variables {
            config = config.with_include_variables(list.variables.clone());
        }
        if let Some(list) = &self.exclude_variables {
            config = config.with_exclude_variables(list.variables.clone());
        }

        config.extract.time_chunk_size = self.chunk;
        config.extract.decimal_precision = Some(self.decimal_precision);
        config.join.chunk_size = self.join_chunk_size;
        config.join.max_rows_in_memory = self.max_memory_rows;
        config.join.output_format = self.output_format.into();
        config.join.compression = self.compress.into();
        config.sort.backup = self.sort_backup;
        config.sort.batch_size = self.sort_batch_size;

        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(workers) = self.extract_workers {
            config.extract_workers = workers;
        }
        if let Some(workers) = self.join_workers {
            config.join_workers = workers;
        }
        if let Some(workers) = self.sort_workers {
            config.sort_workers = workers;
        }

        config.batch_size = self.batch_size;
        config.batch_delay_secs = self.batch_delay;
        config.keep_processed = self.keep_processed;
        config.sort_chronologically = self.sort_chronologically;
        config.force_reprocess = self.force;

        match (self.start_year, self.end_year) {
            (Some(start), Some(end)) => config.year_range = Some((start, end)),
            (Some(start), None) => config.year_range = Some((start, i32::MAX)),
            (None, Some(end)) => config.year_range = Some((i32::MIN, end)),
            (None, None) => {}
        }

        config
    }

    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

/// Arguments for extracting one raw file
#[derive(Debug, Clone, Parser)]
pub struct ExtractArgs {
    /// Raw GRIB file to decode
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: PathBuf,

    /// Root of the processed output tree
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: PathBuf,

    /// Unit year; derived from the filename when omitted
    #[arg(long = "year", value_name = "YEAR")]
    pub year: Option<i32>,

    /// Unit month; derived from the filename when omitted
    #[arg(long = "month", value_name = "MONTH")]
    pub month: Option<u32>,

    /// Variables to extract (comma-separated)
    #[arg(long = "variables", value_name = "LIST")]
    pub variables: Option<VariableList>,

    /// Variables to exclude (comma-separated)
    #[arg(long = "exclude-variables", value_name = "LIST")]
    pub exclude_variables: Option<VariableList>,

    /// Time steps per output segment
    #[arg(long = "chunk", value_name = "STEPS", default_value_t = 24)]
    pub chunk: usize,

    /// Decimal places kept for latitude/longitude
    #[arg(long = "decimal-precision", value_name = "N")]
    pub decimal_precision: Option<u32>,

    /// Keep constant metadata columns instead of pruning them
    #[arg(long = "keep-constants")]
    pub keep_constants: bool,

    /// Increase logging verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ExtractArgs {
    pub fn validate(&self) -> Result<()> {
        if !self.input.is_file() {
            return Err(Era5Error::Configuration {
                message: format!("input is not a file: {}", self.input.display()),
            });
        }
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(Era5Error::Configuration {
                    message: format!("month must be 1-12, got {month}"),
                });
            }
        }
        Ok(())
    }
}

/// Arguments for joining one unit
#[derive(Debug, Clone, Parser)]
pub struct JoinArgs {
    /// Root of the processed tree
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    pub input: PathBuf,

    /// Output file path (.csv or .parquet)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    /// Unit year
    #[arg(long = "year", value_name = "YEAR")]
    pub year: i32,

    /// Unit month
    #[arg(long = "month", value_name = "MONTH")]
    pub month: u32,

    /// Variables to include (comma-separated)
    #[arg(long = "include-vars", value_name = "LIST")]
    pub include_vars: Option<VariableList>,

    /// Variables to exclude (comma-separated)
    #[arg(long = "exclude-vars", value_name = "LIST")]
    pub exclude_vars: Option<VariableList>,

    /// Rows per read chunk
    #[arg(long = "chunk-size", value_name = "ROWS", default_value_t = 100_000)]
    pub chunk_size: usize,

    /// Rows held in memory before flushing to staging
    #[arg(long = "max-memory-rows", value_name = "ROWS", default_value_t = 1_000_000)]
    pub max_memory_rows: usize,

    /// Increase logging verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl JoinArgs {
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.month) {
            return Err(Era5Error::Configuration {
                message: format!("month must be 1-12, got {}", self.month),
            });
        }
        if !self.input.exists() {
            return Err(Era5Error::Configuration {
                message: format!("input path does not exist: {}", self.input.display()),
            });
        }
        Ok(())
    }
}

/// Arguments for the standalone sort pass
#[derive(Debug, Clone, Parser)]
pub struct SortArgs {
    /// Directory containing joined files
    #[arg(short = 'i', long = "input-dir", value_name = "PATH")]
    pub input_dir: PathBuf,

    /// Rows per CSV read chunk
    #[arg(long = "chunk-size", value_name = "ROWS", default_value_t = 100_000)]
    pub chunk_size: usize,

    /// Create backups before sorting
    #[arg(long = "backup")]
    pub backup: bool,

    /// Files sorted in parallel
    #[arg(long = "max-workers", value_name = "COUNT", default_value_t = 1)]
    pub max_workers: usize,

    /// Increase logging verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SortArgs {
    pub fn validate(&self) -> Result<()> {
        if !self.input_dir.is_dir() {
            return Err(Era5Error::Configuration {
                message: format!("input is not a directory: {}", self.input_dir.display()),
            });
        }
        if self.max_workers == 0 {
            return Err(Era5Error::Configuration {
                message: "max workers must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_variable_list_parsing() {
        let list = VariableList::from_str("2t,10u, 10v ").unwrap();
        assert_eq!(list.variables, vec!["2t", "10u", "10v"]);

        assert!(VariableList::from_str("").is_err());
        assert!(VariableList::from_str(",,,").is_err());
    }

    #[test]
    fn test_run_args_build_config() {
        let temp = TempDir::new().unwrap();
        let args = Args::parse_from([
            "era5-processor",
            "run",
            "--input",
            temp.path().to_str().unwrap(),
            "--output",
            "/tmp/out",
            "--variables",
            "2t,10u",
            "--chunk",
            "12",
            "--batch-size",
            "4",
            "--sort-chronologically",
            "--start-year",
            "2020",
            "--end-year",
            "2021",
        ]);

        let Some(Commands::Run(run)) = args.command else {
            panic!("expected run subcommand");
        };
        assert!(run.validate().is_ok());

        let config = run.to_config();
        assert_eq!(config.extract.time_chunk_size, 12);
        assert_eq!(config.batch_size, 4);
        assert!(config.sort_chronologically);
        assert_eq!(config.year_range, Some((2020, 2021)));
        assert!(config.extract.wants_variable("2t"));
        assert!(!config.extract.wants_variable("sp"));
    }

    #[test]
    fn test_run_args_validation_rejects_bad_years() {
        let temp = TempDir::new().unwrap();
        let args = Args::parse_from([
            "era5-processor",
            "run",
            "--input",
            temp.path().to_str().unwrap(),
            "--output",
            "/tmp/out",
            "--start-year",
            "2022",
            "--end-year",
            "2020",
        ]);
        let Some(Commands::Run(run)) = args.command else {
            panic!("expected run subcommand");
        };
        assert!(run.validate().is_err());
    }

    #[test]
    fn test_join_args_validation() {
        let temp = TempDir::new().unwrap();
        let args = Args::parse_from([
            "era5-processor",
            "join",
            "--input",
            temp.path().to_str().unwrap(),
            "--output",
            "/tmp/joined_202105.csv",
            "--year",
            "2021",
            "--month",
            "13",
        ]);
        let Some(Commands::Join(join)) = args.command else {
            panic!("expected join subcommand");
        };
        assert!(join.validate().is_err());
    }

    #[test]
    fn test_log_level_flags() {
        let temp = TempDir::new().unwrap();
        let parse_with = |extra: &[&str]| {
            let mut argv = vec![
                "era5-processor",
                "run",
                "--input",
                temp.path().to_str().unwrap(),
                "--output",
                "/tmp/out",
            ];
            argv.extend_from_slice(extra);
            let args = Args::parse_from(argv);
            let Some(Commands::Run(run)) = args.command else {
                panic!("expected run subcommand");
            };
            run
        };

        assert_eq!(parse_with(&[]).get_log_level(), "info");
        assert_eq!(parse_with(&["-v"]).get_log_level(), "debug");
        assert_eq!(parse_with(&["-vv"]).get_log_level(), "trace");
        assert_eq!(parse_with(&["--quiet"]).get_log_level(), "error");
    }
}
