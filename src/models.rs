//! Core data structures for the ERA5 pipeline.
//!
//! Defines processing-unit keys and lifecycle states, per-stage reports,
//! and the run summary assembled by the orchestrator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The (year, month) granularity at which extraction, joining, and sorting
/// are tracked and parallelized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub year: i32,
    pub month: u32,
}

impl UnitKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// First instant of the unit's month, the base for synthesized timestamps
    pub fn base_time(&self) -> Option<NaiveDateTime> {
        chrono::NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Compact `YYYYMM` form used in output filenames
    pub fn compact(&self) -> String {
        format!("{}{:02}", self.year, self.month)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Lifecycle state of one processing unit. Transitions are owned by the
/// orchestrator; stage components only report results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Discovered,
    Extracting,
    Extracted,
    ExtractFailed,
    Joining,
    Joined,
    JoinFailed,
    Cleaned,
    Sorted,
    SortFailed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::ExtractFailed
                | UnitState::JoinFailed
                | UnitState::SortFailed
                | UnitState::Cleaned
                | UnitState::Sorted
        )
    }
}

/// One (year, month) unit with its raw inputs and output bookkeeping
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    pub key: UnitKey,
    pub state: UnitState,
    pub raw_files: Vec<PathBuf>,
    pub joined_output: Option<PathBuf>,
}

impl ProcessingUnit {
    pub fn new(key: UnitKey) -> Self {
        Self {
            key,
            state: UnitState::Discovered,
            raw_files: Vec::new(),
            joined_output: None,
        }
    }
}

/// On-disk encoding of the joined table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }

    /// Infer the format from a path extension, defaulting to CSV
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }
}

/// Outcome of extracting one raw file
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub variables_extracted: Vec<String>,
    pub variables_failed: Vec<String>,
    pub segments_written: usize,
    pub rows_written: usize,
}

/// Outcome of joining one unit
#[derive(Debug, Clone, Default)]
pub struct JoinReport {
    pub variables_joined: Vec<String>,
    pub variables_skipped: Vec<String>,
    pub rows: usize,
    pub output_path: PathBuf,
}

/// Outcome of sorting one joined file
#[derive(Debug, Clone)]
pub struct SortReport {
    pub path: PathBuf,
    pub rows: usize,
    pub time_parsed: bool,
}

/// End-of-run counters, reported per stage
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub units_discovered: usize,
    pub files_skipped_no_key: usize,
    pub units_resumed: usize,
    pub extract_succeeded: usize,
    pub extract_failed: usize,
    pub join_succeeded: usize,
    pub join_failed: usize,
    pub units_cleaned: usize,
    pub sort_succeeded: usize,
    pub sort_failed: usize,
}

impl RunSummary {
    /// True when every attempted stage completed without failures
    pub fn is_clean(&self) -> bool {
        self.extract_failed == 0 && self.join_failed == 0 && self.sort_failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_unit_key_display_and_compact() {
        let key = UnitKey::new(2021, 5);
        assert_eq!(key.to_string(), "2021-05");
        assert_eq!(key.compact(), "202105");
    }

    #[test]
    fn test_unit_key_base_time() {
        let key = UnitKey::new(2021, 5);
        let base = key.base_time().unwrap();
        assert_eq!(base.format("%Y-%m-%d %H:%M:%S").to_string(), "2021-05-01 00:00:00");

        // Month 13 is not a valid base
        assert!(UnitKey::new(2021, 13).base_time().is_none());
    }

    #[test]
    fn test_unit_keys_order_chronologically() {
        let mut keys = vec![
            UnitKey::new(2022, 1),
            UnitKey::new(2021, 12),
            UnitKey::new(2021, 5),
        ];
        keys.sort();
        assert_eq!(keys[0], UnitKey::new(2021, 5));
        assert_eq!(keys[2], UnitKey::new(2022, 1));
    }

    #[test]
    fn test_terminal_states() {
        assert!(UnitState::Sorted.is_terminal());
        assert!(UnitState::ExtractFailed.is_terminal());
        assert!(!UnitState::Extracted.is_terminal());
        assert!(!UnitState::Joining.is_terminal());
    }

    #[test]
    fn test_output_format_from_path() {
        assert_eq!(
            OutputFormat::from_path(Path::new("joined_202105.parquet")),
            OutputFormat::Parquet
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("joined_202105.csv")),
            OutputFormat::Csv
        );
        // Unknown extensions default to CSV, mirroring the writer fallback
        assert_eq!(
            OutputFormat::from_path(Path::new("joined_202105.dat")),
            OutputFormat::Csv
        );
    }
}
