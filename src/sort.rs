//! In-place chronological sorting of joined tables.
//!
//! Rewrites a joined file with rows ordered by (time, latitude, longitude)
//! ascending. String time columns are parsed to timestamps for ordering; if
//! parsing fails the sort falls back to lexicographic ordering on the raw
//! strings and logs a warning. Output goes to a temporary sibling and is
//! atomically renamed over the original, so a crash mid-sort never leaves a
//! half-written file behind.
//!
//! Known limitation: although CSV input is read in low-memory mode, the sort
//! itself materializes the full row set, so memory is bounded by total table
//! size rather than the configured chunk size.

use crate::config::SortConfig;
use crate::constants::{
    BACKUP_BLOCK_SIZE, LARGE_FILE_THRESHOLD_BYTES, LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
    TIMESTAMP_FORMAT,
};
use crate::error::{Era5Error, Result};
use crate::models::{OutputFormat, SortReport};
use polars::prelude::*;
use std::fs::File;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Temporary column holding the parsed timestamps during the sort
const SORT_KEY: &str = "__sort_ts";

/// Sorts joined tables chronologically, in place
#[derive(Debug, Clone)]
pub struct ChronologicalSorter {
    config: SortConfig,
}

impl ChronologicalSorter {
    pub fn new(config: SortConfig) -> Self {
        Self { config }
    }

    /// Sort one joined file by (time, latitude, longitude), ascending.
    pub fn sort_file(&self, path: &Path) -> Result<SortReport> {
        info!(file = %path.display(), "sorting chronologically");

        if self.config.backup {
            self.create_backup(path)?;
        }

        let format = OutputFormat::from_path(path);
        let df = self.read_table(path, format)?;

        if df.column(TIME_COLUMN).is_err() {
            return Err(Era5Error::Sort {
                path: path.to_path_buf(),
                reason: format!("no '{TIME_COLUMN}' column"),
            });
        }

        let (mut sorted, time_parsed) = self.sort_rows(path, df)?;

        let temp_path = temp_sibling(path);
        self.write_table(&temp_path, format, &mut sorted)?;
        std::fs::rename(&temp_path, path)?;

        debug!(file = %path.display(), rows = sorted.height(), "sort complete");
        Ok(SortReport {
            path: path.to_path_buf(),
            rows: sorted.height(),
            time_parsed,
        })
    }

    /// Sort by a parsed timestamp key when the time column parses, falling
    /// back to the raw strings otherwise. The time column itself is written
    /// back unchanged either way.
    fn sort_rows(&self, path: &Path, df: DataFrame) -> Result<(DataFrame, bool)> {
        let sort_options = SortMultipleOptions::default().with_maintain_order(true);

        let time_dtype = df.column(TIME_COLUMN)?.dtype().clone();
        if !matches!(time_dtype, DataType::String) {
            // already a structured timestamp (e.g. parquet round trip)
            let sorted = df.sort(
                [TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN],
                sort_options,
            )?;
            return Ok((sorted, true));
        }

        let keyed = df
            .clone()
            .lazy()
            .with_columns([col(TIME_COLUMN)
                .str()
                .to_datetime(
                    Some(TimeUnit::Milliseconds),
                    None,
                    StrptimeOptions {
                        format: Some(TIMESTAMP_FORMAT.into()),
                        strict: true,
                        ..Default::default()
                    },
                    lit("raise"),
                )
                .alias(SORT_KEY)])
            .collect();

        match keyed {
            Ok(keyed) => {
                let mut sorted = keyed.sort(
                    [SORT_KEY, LATITUDE_COLUMN, LONGITUDE_COLUMN],
                    sort_options,
                )?;
                let _ = sorted.drop_in_place(SORT_KEY);
                Ok((sorted, true))
            }
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "time column did not parse, falling back to lexicographic order"
                );
                let sorted = df.sort(
                    [TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN],
                    sort_options,
                )?;
                Ok((sorted, false))
            }
        }
    }

    fn read_table(&self, path: &Path, format: OutputFormat) -> Result<DataFrame> {
        let df = match format {
            OutputFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
            OutputFormat::Csv => CsvReadOptions::default()
                .with_has_header(true)
                .with_low_memory(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?,
        };
        Ok(df)
    }

    fn write_table(&self, path: &Path, format: OutputFormat, df: &mut DataFrame) -> Result<()> {
        match format {
            OutputFormat::Parquet => {
                ParquetWriter::new(File::create(path)?).finish(df)?;
            }
            OutputFormat::Csv => {
                let batch_size = NonZeroUsize::new(self.config.chunk_size)
                    .unwrap_or(NonZeroUsize::new(1024).expect("nonzero literal"));
                CsvWriter::new(File::create(path)?)
                    .include_header(true)
                    .with_batch_size(batch_size)
                    .finish(df)?;
            }
        }
        Ok(())
    }

    /// Copy the original into `backup/` beside it; large files stream in
    /// fixed-size blocks.
    fn create_backup(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let backup_dir = parent.join("backup");
        std::fs::create_dir_all(&backup_dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| Era5Error::Sort {
                path: path.to_path_buf(),
                reason: "path has no file name".to_string(),
            })?;
        let backup_path = backup_dir.join(file_name);
        debug!(backup = %backup_path.display(), "creating backup");

        let size = std::fs::metadata(path)?.len();
        if size > LARGE_FILE_THRESHOLD_BYTES {
            let mut src = File::open(path)?;
            let mut dst = File::create(&backup_path)?;
            let mut buffer = vec![0u8; BACKUP_BLOCK_SIZE];
            loop {
                let read = src.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                dst.write_all(&buffer[..read])?;
            }
        } else {
            std::fs::copy(path, &backup_path)?;
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{file_name}.sorted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(path: &Path, rows: &[&str]) {
        let mut content = String::from("time,latitude,longitude,temp,tag\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        std::fs::write(path, content).unwrap();
    }

    fn read_csv(path: &Path) -> DataFrame {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .unwrap()
            .finish()
            .unwrap()
    }

    fn column_strings(df: &DataFrame, name: &str) -> Vec<String> {
        let col = df.column(name).unwrap();
        (0..df.height())
            .map(|i| col.get(i).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_sort_orders_by_time_then_coordinates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        write_csv(
            &path,
            &[
                "2021-05-01 02:00:00,50.0,-1.0,280.1,a",
                "2021-05-01 00:00:00,50.25,-1.0,280.2,b",
                "2021-05-01 00:00:00,50.0,-0.75,280.3,c",
                "2021-05-01 00:00:00,50.0,-1.0,280.4,d",
                "2021-05-01 01:00:00,50.0,-1.0,280.5,e",
            ],
        );

        let sorter = ChronologicalSorter::new(SortConfig::default());
        let report = sorter.sort_file(&path).unwrap();
        assert!(report.time_parsed);
        assert_eq!(report.rows, 5);

        let df = read_csv(&path);
        let tags = column_strings(&df, "tag");
        assert_eq!(
            tags,
            vec!["\"d\"", "\"c\"", "\"b\"", "\"e\"", "\"a\""]
                .into_iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        // three rows share an identical coordinate key; tags must keep order
        write_csv(
            &path,
            &[
                "2021-05-01 01:00:00,50.0,-1.0,280.0,later",
                "2021-05-01 00:00:00,50.0,-1.0,280.1,first",
                "2021-05-01 00:00:00,50.0,-1.0,280.2,second",
                "2021-05-01 00:00:00,50.0,-1.0,280.3,third",
            ],
        );

        let sorter = ChronologicalSorter::new(SortConfig::default());
        sorter.sort_file(&path).unwrap();

        let df = read_csv(&path);
        let tags = column_strings(&df, "tag");
        assert_eq!(tags[0], "\"first\"");
        assert_eq!(tags[1], "\"second\"");
        assert_eq!(tags[2], "\"third\"");
        assert_eq!(tags[3], "\"later\"");
    }

    #[test]
    fn test_sort_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        write_csv(
            &path,
            &[
                "2021-05-01 01:00:00,50.0,-1.0,280.0,a",
                "2021-05-01 00:00:00,50.0,-1.0,280.1,b",
            ],
        );

        let sorter = ChronologicalSorter::new(SortConfig::default());
        sorter.sort_file(&path).unwrap();
        let first_pass = std::fs::read(&path).unwrap();

        sorter.sort_file(&path).unwrap();
        let second_pass = std::fs::read(&path).unwrap();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_unparseable_time_falls_back_to_lexicographic() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        write_csv(
            &path,
            &[
                "step-2,50.0,-1.0,280.0,a",
                "step-1,50.0,-1.0,280.1,b",
                "step-10,50.0,-1.0,280.2,c",
            ],
        );

        let sorter = ChronologicalSorter::new(SortConfig::default());
        let report = sorter.sort_file(&path).unwrap();
        assert!(!report.time_parsed);

        let df = read_csv(&path);
        let times = column_strings(&df, "time");
        // lexicographic, not temporal: step-10 before step-2
        assert_eq!(times[0], "\"step-1\"");
        assert_eq!(times[1], "\"step-10\"");
        assert_eq!(times[2], "\"step-2\"");
    }

    #[test]
    fn test_missing_time_column_is_a_sort_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        std::fs::write(&path, "latitude,longitude,temp\n50.0,-1.0,280.0\n").unwrap();

        let sorter = ChronologicalSorter::new(SortConfig::default());
        let result = sorter.sort_file(&path);
        assert!(matches!(result, Err(Era5Error::Sort { .. })));
    }

    #[test]
    fn test_backup_copy_before_sort() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        write_csv(
            &path,
            &[
                "2021-05-01 01:00:00,50.0,-1.0,280.0,a",
                "2021-05-01 00:00:00,50.0,-1.0,280.1,b",
            ],
        );
        let original = std::fs::read(&path).unwrap();

        let mut config = SortConfig::default();
        config.backup = true;
        let sorter = ChronologicalSorter::new(config);
        sorter.sort_file(&path).unwrap();

        let backup = temp.path().join("backup").join("joined_202105.csv");
        assert!(backup.exists());
        // the backup holds the pre-sort bytes
        assert_eq!(std::fs::read(&backup).unwrap(), original);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("joined_202105.csv");
        write_csv(&path, &["2021-05-01 00:00:00,50.0,-1.0,280.0,a"]);

        let sorter = ChronologicalSorter::new(SortConfig::default());
        sorter.sort_file(&path).unwrap();
        assert!(!temp.path().join("joined_202105.csv.sorted").exists());
    }
}
