//! Bounded staging for the coordinate-key join.
//!
//! Normalized chunks accumulate in memory and spill to a per-variable
//! staging CSV once the configured row ceiling is crossed, so resident
//! memory stays bounded regardless of total variable size. The merge phase
//! reads the staging file back, never the in-memory chunks.

use crate::error::Result;
use polars::prelude::*;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A fully staged variable, ready for the merge phase
#[derive(Debug, Clone)]
pub struct StagedVariable {
    pub variable: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Accumulates normalized chunks and appends them to one staging CSV
#[derive(Debug)]
pub struct StagingWriter {
    variable: String,
    path: PathBuf,
    max_rows_in_memory: usize,
    pending: Vec<DataFrame>,
    pending_rows: usize,
    written_rows: usize,
    header_written: bool,
}

impl StagingWriter {
    pub fn new(variable: impl Into<String>, path: impl Into<PathBuf>, max_rows_in_memory: usize) -> Self {
        Self {
            variable: variable.into(),
            path: path.into(),
            max_rows_in_memory: max_rows_in_memory.max(1),
            pending: Vec::new(),
            pending_rows: 0,
            written_rows: 0,
            header_written: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accumulate one chunk, spilling to disk when the ceiling is crossed
    pub fn push(&mut self, chunk: DataFrame) -> Result<()> {
        if chunk.height() == 0 {
            return Ok(());
        }
        self.pending_rows += chunk.height();
        self.pending.push(chunk);

        if self.pending_rows >= self.max_rows_in_memory {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush any remaining rows and hand back the staged variable
    pub fn finish(mut self) -> Result<StagedVariable> {
        if !self.pending.is_empty() {
            self.flush()?;
        }
        debug!(
            variable = self.variable.as_str(),
            rows = self.written_rows,
            staging = %self.path.display(),
            "staging complete"
        );
        Ok(StagedVariable {
            variable: self.variable,
            path: self.path,
            rows: self.written_rows,
        })
    }

    fn flush(&mut self) -> Result<()> {
        let mut chunks = std::mem::take(&mut self.pending);
        let mut combined = chunks.remove(0);
        for chunk in chunks {
            combined.vstack_mut(&chunk)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        CsvWriter::new(file)
            .include_header(!self.header_written)
            .finish(&mut combined)?;

        self.header_written = true;
        self.written_rows += combined.height();
        self.pending_rows = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(values: &[f64]) -> DataFrame {
        let times: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, _)| format!("2021-05-01 {i:02}:00:00"))
            .collect();
        df!(
            "time" => times,
            "latitude" => vec![50.0; values.len()],
            "longitude" => vec![-1.0; values.len()],
            "value" => values,
        )
        .unwrap()
    }

    fn read_back(path: &Path) -> DataFrame {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .unwrap()
            .finish()
            .unwrap()
    }

    #[test]
    fn test_single_flush_at_finish() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("2t_data.csv");
        let mut writer = StagingWriter::new("2t", &path, 1000);

        writer.push(chunk(&[1.0, 2.0])).unwrap();
        writer.push(chunk(&[3.0])).unwrap();
        // below the ceiling: nothing on disk yet
        assert!(!path.exists());

        let staged = writer.finish().unwrap();
        assert_eq!(staged.rows, 3);

        let df = read_back(&path);
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 4);
    }

    #[test]
    fn test_spill_appends_without_repeating_header() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("10u_data.csv");
        let mut writer = StagingWriter::new("10u", &path, 2);

        writer.push(chunk(&[1.0, 2.0])).unwrap();
        // ceiling crossed: first spill happened
        assert!(path.exists());
        writer.push(chunk(&[3.0, 4.0])).unwrap();
        let staged = writer.finish().unwrap();

        assert_eq!(staged.rows, 4);
        let df = read_back(&path);
        // a repeated header line would surface as a 5th (string) row
        assert_eq!(df.height(), 4);
    }

    #[test]
    fn test_empty_chunks_are_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sp_data.csv");
        let mut writer = StagingWriter::new("sp", &path, 10);

        writer.push(chunk(&[])).unwrap();
        let staged = writer.finish().unwrap();
        assert_eq!(staged.rows, 0);
        assert!(!path.exists());
    }
}
