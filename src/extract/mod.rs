//! Variable extraction from raw gridded files.
//!
//! Decodes each selected variable of a GRIB2 file into a flat table of
//! (time, latitude, longitude, value) rows, written as CSV segments under
//! `processed/<year>/<month>/<variable>/`. The time dimension is processed
//! in fixed-size windows so peak memory is bounded per file, and each window
//! lands in its own segment file so a partial write never corrupts a sibling
//! chunk.

pub mod grib;

use crate::config::ExtractConfig;
use crate::constants::{
    variable_chunk_file_name, variable_file_name, LATITUDE_COLUMN, LONGITUDE_COLUMN, TIME_COLUMN,
    TIMESTAMP_FORMAT, VALUE_COLUMN,
};
use crate::error::{Era5Error, Result};
use crate::models::{ExtractReport, UnitKey};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

use self::grib::GridField;

/// Decodes raw gridded files into per-variable tables
#[derive(Debug, Clone)]
pub struct VariableExtractor {
    config: ExtractConfig,
}

impl VariableExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        Self { config }
    }

    /// Extract every selected variable of one raw file.
    ///
    /// A decode failure in one variable is recorded and does not stop the
    /// others; the call fails only when the file yields no variables at all.
    pub fn extract_file(
        &self,
        raw_file: &Path,
        unit: UnitKey,
        output_root: &Path,
    ) -> Result<ExtractReport> {
        let all_variables = grib::list_variables(raw_file)?;
        if all_variables.is_empty() {
            return Err(Era5Error::NoVariablesExtracted {
                path: raw_file.to_path_buf(),
            });
        }
        debug!(
            file = %raw_file.display(),
            variables = ?all_variables,
            "discovered variables"
        );

        let selected: Vec<String> = all_variables
            .into_iter()
            .filter(|v| self.config.wants_variable(v))
            .collect();

        if selected.is_empty() {
            warn!(
                file = %raw_file.display(),
                "no variables left after include/exclude filters"
            );
            return Ok(ExtractReport::default());
        }

        let mut report = ExtractReport::default();
        for variable in &selected {
            match self.extract_variable(raw_file, unit, variable, output_root) {
                Ok((segments, rows)) => {
                    info!(
                        %unit,
                        variable = variable.as_str(),
                        segments,
                        rows,
                        "extracted variable"
                    );
                    report.variables_extracted.push(variable.clone());
                    report.segments_written += segments;
                    report.rows_written += rows;
                }
                Err(e) => {
                    warn!(%unit, variable = variable.as_str(), error = %e, "variable decode failed, continuing");
                    report.variables_failed.push(variable.clone());
                }
            }
        }

        if report.variables_extracted.is_empty() {
            return Err(Era5Error::NoVariablesExtracted {
                path: raw_file.to_path_buf(),
            });
        }

        Ok(report)
    }

    /// Decode one variable and write its time-chunked segments.
    fn extract_variable(
        &self,
        raw_file: &Path,
        unit: UnitKey,
        variable: &str,
        output_root: &Path,
    ) -> Result<(usize, usize)> {
        let fields = grib::read_fields(raw_file, variable)?;
        let base_time = unit.base_time().ok_or_else(|| Era5Error::Configuration {
            message: format!("unit {unit} has no valid base time"),
        })?;

        let variable_dir = output_root
            .join(unit.year.to_string())
            .join(format!("{:02}", unit.month))
            .join(variable);
        std::fs::create_dir_all(&variable_dir)?;

        let total_steps = fields.len();
        let windows = window_ranges(total_steps, self.config.time_chunk_size);
        let single_segment = windows.len() == 1;

        let mut segments = 0usize;
        let mut rows = 0usize;
        for (start, end) in windows {
            let mut df = self.field_frame(&fields[start..end], base_time, start)?;
            if self.config.prune_constant_columns {
                prune_constant_columns(&mut df);
            }

            let file_name = if single_segment {
                variable_file_name(unit.year, unit.month, variable)
            } else {
                variable_chunk_file_name(unit.year, unit.month, variable, start, end)
            };
            let segment_path = variable_dir.join(file_name);
            write_csv(&segment_path, &mut df)?;

            debug!(
                %unit,
                variable,
                segment = %segment_path.display(),
                rows = df.height(),
                "wrote segment"
            );
            segments += 1;
            rows += df.height();
        }

        Ok((segments, rows))
    }

    /// Flatten a window of fields into a (time, latitude, longitude, value)
    /// frame. The k-th field of a variable is the unit's base time plus k
    /// hours.
    fn field_frame(
        &self,
        fields: &[GridField],
        base_time: chrono::NaiveDateTime,
        step_offset: usize,
    ) -> Result<DataFrame> {
        let points: usize = fields.iter().map(|f| f.len()).sum();
        let mut times = Vec::with_capacity(points);
        let mut latitudes = Vec::with_capacity(points);
        let mut longitudes = Vec::with_capacity(points);
        let mut values = Vec::with_capacity(points);

        for (offset, field) in fields.iter().enumerate() {
            let step = step_offset + offset;
            let stamp = (base_time + chrono::Duration::hours(step as i64))
                .format(TIMESTAMP_FORMAT)
                .to_string();
            for i in 0..field.len() {
                times.push(stamp.clone());
                latitudes.push(self.round_coordinate(field.latitudes[i]));
                longitudes.push(self.round_coordinate(field.longitudes[i]));
                values.push(field.values[i]);
            }
        }

        let df = df!(
            TIME_COLUMN => times,
            LATITUDE_COLUMN => latitudes,
            LONGITUDE_COLUMN => longitudes,
            VALUE_COLUMN => values,
        )?;
        Ok(df)
    }

    fn round_coordinate(&self, value: f64) -> f64 {
        match self.config.decimal_precision {
            Some(precision) => {
                let factor = 10f64.powi(precision as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}

/// Half-open [start, end) windows covering `total` time steps
fn window_ranges(total: usize, chunk: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk).min(total);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// Drop metadata columns (anything outside the four core roles) whose value
/// is constant across the chunk; constant metadata is recoverable from the
/// segment path.
fn prune_constant_columns(df: &mut DataFrame) {
    let core = [TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN, VALUE_COLUMN];
    let to_drop: Vec<String> = df
        .get_column_names()
        .iter()
        .filter(|name| !core.contains(&name.as_str()))
        .filter(|name| {
            df.column(name.as_str())
                .ok()
                .and_then(|c| c.as_materialized_series().n_unique().ok())
                .is_some_and(|n| n <= 1)
        })
        .map(|name| name.to_string())
        .collect();

    for name in to_drop {
        debug!(column = name.as_str(), "pruning constant column");
        let _ = df.drop_in_place(&name);
    }
}

fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let file = File::create(path)?;
    CsvWriter::new(file).include_header(true).finish(df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fields(steps: usize) -> Vec<GridField> {
        (0..steps)
            .map(|step| GridField {
                latitudes: vec![50.0, 50.0, 50.25],
                longitudes: vec![-1.0, -0.75, -1.0],
                values: vec![Some(280.0 + step as f64), Some(281.0), None],
            })
            .collect()
    }

    #[test]
    fn test_window_ranges() {
        assert_eq!(window_ranges(10, 24), vec![(0, 10)]);
        assert_eq!(window_ranges(48, 24), vec![(0, 24), (24, 48)]);
        assert_eq!(window_ranges(50, 24), vec![(0, 24), (24, 48), (48, 50)]);
        assert!(window_ranges(0, 24).is_empty());
    }

    #[test]
    fn test_field_frame_synthesizes_hourly_timestamps() {
        let extractor = VariableExtractor::new(ExtractConfig::default());
        let base = UnitKey::new(2021, 5).base_time().unwrap();
        let fields = test_fields(2);

        let df = extractor.field_frame(&fields, base, 24).unwrap();
        assert_eq!(df.height(), 6);

        let times = df.column(TIME_COLUMN).unwrap();
        let first = times.get(0).unwrap().to_string();
        let last = times.get(5).unwrap().to_string();
        // step 24 from 2021-05-01 00:00 is 2021-05-02 00:00
        assert!(first.contains("2021-05-02 00:00:00"), "got {first}");
        assert!(last.contains("2021-05-02 01:00:00"), "got {last}");
    }

    #[test]
    fn test_field_frame_preserves_nulls() {
        let extractor = VariableExtractor::new(ExtractConfig::default());
        let base = UnitKey::new(2021, 5).base_time().unwrap();
        let df = extractor.field_frame(&test_fields(1), base, 0).unwrap();

        let values = df.column(VALUE_COLUMN).unwrap();
        assert_eq!(values.null_count(), 1);
    }

    #[test]
    fn test_coordinate_rounding() {
        let mut config = ExtractConfig::default();
        config.decimal_precision = Some(2);
        let extractor = VariableExtractor::new(config);
        assert_eq!(extractor.round_coordinate(50.12745), 50.13);
        assert_eq!(extractor.round_coordinate(-0.004), -0.0);

        let mut config = ExtractConfig::default();
        config.decimal_precision = None;
        let extractor = VariableExtractor::new(config);
        assert_eq!(extractor.round_coordinate(50.12745), 50.12745);
    }

    #[test]
    fn test_prune_constant_columns() {
        let mut df = df!(
            TIME_COLUMN => &["2021-05-01 00:00:00", "2021-05-01 01:00:00"],
            LATITUDE_COLUMN => &[50.0, 50.0],
            LONGITUDE_COLUMN => &[-1.0, -1.0],
            "step" => &[0i64, 0],
            "level" => &[2i64, 3],
            VALUE_COLUMN => &[280.0, 281.0],
        )
        .unwrap();

        prune_constant_columns(&mut df);

        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        // constant 'step' is pruned; varying 'level' and the constant-valued
        // core coordinate columns stay
        assert!(!names.contains(&"step".to_string()));
        assert!(names.contains(&"level".to_string()));
        assert!(names.contains(&LATITUDE_COLUMN.to_string()));
    }

    #[test]
    fn test_extract_file_fails_on_unreadable_input() {
        let extractor = VariableExtractor::new(ExtractConfig::default());
        let temp = tempfile::TempDir::new().unwrap();
        let bogus = temp.path().join("202105.grib");
        std::fs::write(&bogus, b"definitely not grib").unwrap();

        let result = extractor.extract_file(&bogus, UnitKey::new(2021, 5), temp.path());
        assert!(result.is_err());
    }
}
