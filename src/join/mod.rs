//! Coordinate-key joining of per-variable tables.
//!
//! Merges every variable table of one (year, month) unit into a single wide
//! table keyed by (time, latitude, longitude). The first successfully staged
//! variable seeds the coordinate frame; every other variable left-joins onto
//! it, so a missing key contributes a null and never drops a row. A variable
//! that cannot be mapped, staged, or merged is skipped with a warning; the
//! unit fails only when nothing at all is joinable.

pub mod staging;

use crate::config::JoinConfig;
use crate::constants::{STAGING_DIR_NAME, VALUE_COLUMN};
use crate::error::{Era5Error, Result};
use crate::models::{JoinReport, OutputFormat, UnitKey};
use crate::schema::{reconcile_key_names, ColumnMapping, JoinKeys, VariableRegistry};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::staging::{StagedVariable, StagingWriter};

/// Joins the variable tables of one processing unit
#[derive(Debug, Clone)]
pub struct UnitJoiner {
    config: JoinConfig,
    registry: VariableRegistry,
}

impl UnitJoiner {
    /// Create a joiner; the registry is validated eagerly so a malformed
    /// entry fails at startup, not mid-run.
    pub fn new(config: JoinConfig, registry: VariableRegistry) -> Result<Self> {
        registry.validate()?;
        Ok(Self { config, registry })
    }

    /// Join all variable tables for `unit` into a single table at
    /// `output_path` (CSV or Parquet by extension).
    pub fn join_unit(
        &self,
        processed_root: &Path,
        unit: UnitKey,
        output_path: &Path,
    ) -> Result<JoinReport> {
        let tables = collect_variable_tables(processed_root, unit)?;
        let tables: BTreeMap<String, Vec<PathBuf>> = tables
            .into_iter()
            .filter(|(variable, _)| self.config.wants_variable(variable))
            .collect();

        if tables.is_empty() {
            return Err(Era5Error::NoJoinableVariables {
                year: unit.year,
                month: unit.month,
            });
        }
        info!(%unit, variables = tables.len(), "joining unit");

        let mut skipped: Vec<String> = Vec::new();

        // Column-role inference from one sample file per variable
        let mut mappings: Vec<(String, Vec<PathBuf>, ColumnMapping)> = Vec::new();
        for (variable, files) in tables {
            match self.infer_mapping(&variable, &files[0]) {
                Ok(mapping) => mappings.push((variable, files, mapping)),
                Err(e) => {
                    warn!(%unit, variable = variable.as_str(), error = %e, "variable unmappable, excluded from join");
                    skipped.push(variable);
                }
            }
        }

        let keys = reconcile_key_names(mappings.iter().map(|(_, _, m)| m));
        debug!(%unit, time = keys.time.as_str(), latitude = keys.latitude.as_str(), longitude = keys.longitude.as_str(), "canonical join keys");

        // Stage each variable's rows, normalized to the canonical columns
        let staging_dir = output_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(STAGING_DIR_NAME);
        std::fs::create_dir_all(&staging_dir)?;

        let mut staged: Vec<StagedVariable> = Vec::new();
        for (variable, files, mapping) in &mappings {
            match self.stage_variable(variable, files, mapping, &keys, &staging_dir) {
                Ok(var) if var.rows > 0 => staged.push(var),
                Ok(_) => {
                    warn!(%unit, variable = variable.as_str(), "no rows staged, excluded from join");
                    skipped.push(variable.clone());
                }
                Err(e) => {
                    warn!(%unit, variable = variable.as_str(), error = %e, "staging failed, excluded from join");
                    skipped.push(variable.clone());
                }
            }
        }

        if staged.is_empty() {
            let _ = std::fs::remove_dir_all(&staging_dir);
            return Err(Era5Error::NoJoinableVariables {
                year: unit.year,
                month: unit.month,
            });
        }

        // The first staged variable seeds the deduplicated coordinate frame
        let base = &staged[0];
        debug!(%unit, base = base.variable.as_str(), "building base coordinate frame");
        let base_df = read_staged(&base.path, &keys)?;
        let mut joined = base_df
            .lazy()
            .select(key_exprs(&keys))
            .unique_stable(None, UniqueKeepStrategy::First);

        let mut joined_variables: Vec<String> = Vec::new();
        for var in &staged {
            match self.merge_variable(var, &keys) {
                Ok(lf) => {
                    joined = joined.join(
                        lf,
                        key_exprs(&keys),
                        key_exprs(&keys),
                        JoinArgs::new(JoinType::Left),
                    );
                    joined_variables.push(var.variable.clone());
                }
                Err(e) => {
                    warn!(%unit, variable = var.variable.as_str(), error = %e, "merge failed, column omitted");
                    skipped.push(var.variable.clone());
                }
            }
        }

        let mut final_df = joined.collect()?;
        info!(
            %unit,
            rows = final_df.height(),
            columns = final_df.width(),
            "join complete"
        );

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.write_output(output_path, &mut final_df)?;

        // Staging files are only removed once the final write succeeded
        if let Err(e) = std::fs::remove_dir_all(&staging_dir) {
            warn!(staging = %staging_dir.display(), error = %e, "could not remove staging directory");
        }

        Ok(JoinReport {
            variables_joined: joined_variables,
            variables_skipped: skipped,
            rows: final_df.height(),
            output_path: output_path.to_path_buf(),
        })
    }

    /// Resolve the column mapping for a variable from one sample file
    fn infer_mapping(&self, variable: &str, sample_file: &Path) -> Result<ColumnMapping> {
        let columns = read_column_names(sample_file)?;
        self.registry
            .resolve(variable, &columns)
            .map_err(|failure| Era5Error::ColumnMapping {
                variable: variable.to_string(),
                reason: failure.reason(),
            })
    }

    /// Stream one variable's segment files into its staging CSV
    fn stage_variable(
        &self,
        variable: &str,
        files: &[PathBuf],
        mapping: &ColumnMapping,
        keys: &JoinKeys,
        staging_dir: &Path,
    ) -> Result<StagedVariable> {
        let staging_path = staging_dir.join(format!("{variable}_data.csv"));
        let mut writer =
            StagingWriter::new(variable, &staging_path, self.config.max_rows_in_memory);

        for file in files {
            let df = read_csv(file)?;

            // Segment files can drift from the sampled schema; re-infer
            // before giving up on one.
            let columns: Vec<String> = df
                .get_column_names()
                .iter()
                .map(|n| n.to_string())
                .collect();
            let file_mapping = if mapping_applies(mapping, &columns) {
                mapping.clone()
            } else {
                match self.registry.resolve(variable, &columns) {
                    Ok(m) => m,
                    Err(failure) => {
                        warn!(
                            file = %file.display(),
                            reason = failure.reason().as_str(),
                            "segment file unmappable, skipped"
                        );
                        continue;
                    }
                }
            };

            let normalized = normalize_chunk(&df, &file_mapping, keys)?;
            let mut offset = 0i64;
            while (offset as usize) < normalized.height() {
                writer.push(normalized.slice(offset, self.config.chunk_size))?;
                offset += self.config.chunk_size as i64;
            }
        }

        writer.finish()
    }

    /// Prepare one staged variable for the left join
    fn merge_variable(&self, var: &StagedVariable, keys: &JoinKeys) -> Result<LazyFrame> {
        let mut df = read_staged(&var.path, keys)?;
        df.rename(VALUE_COLUMN, var.variable.as_str().into())?;
        Ok(df.lazy())
    }

    fn write_output(&self, output_path: &Path, df: &mut DataFrame) -> Result<()> {
        match OutputFormat::from_path(output_path) {
            OutputFormat::Parquet => {
                let file = File::create(output_path)?;
                ParquetWriter::new(file)
                    .with_compression(self.config.compression.to_polars_compression())
                    .finish(df)?;
            }
            OutputFormat::Csv => {
                let file = File::create(output_path)?;
                CsvWriter::new(file).include_header(true).finish(df)?;
            }
        }
        Ok(())
    }
}

/// Group the unit's segment files by variable directory, in deterministic
/// (alphabetical) discovery order.
fn collect_variable_tables(
    processed_root: &Path,
    unit: UnitKey,
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let unit_dir = processed_root
        .join(unit.year.to_string())
        .join(format!("{:02}", unit.month));

    let mut tables: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    if !unit_dir.exists() {
        return Ok(tables);
    }

    for entry in std::fs::read_dir(&unit_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let variable = entry.file_name().to_string_lossy().to_string();

        let mut files: Vec<PathBuf> = std::fs::read_dir(entry.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();

        if !files.is_empty() {
            tables.insert(variable, files);
        }
    }

    Ok(tables)
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Read the column names of a sample file without materializing data
fn read_column_names(path: &Path) -> Result<Vec<String>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_n_rows(Some(5))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect())
}

fn mapping_applies(mapping: &ColumnMapping, columns: &[String]) -> bool {
    [
        &mapping.time,
        &mapping.latitude,
        &mapping.longitude,
        &mapping.value,
    ]
    .iter()
    .all(|name| columns.iter().any(|c| c == *name))
}

/// Select the mapped columns and rename them to the canonical key names
/// plus the staging value column.
fn normalize_chunk(df: &DataFrame, mapping: &ColumnMapping, keys: &JoinKeys) -> Result<DataFrame> {
    let mut chunk = df.select([
        mapping.time.as_str(),
        mapping.latitude.as_str(),
        mapping.longitude.as_str(),
        mapping.value.as_str(),
    ])?;

    for (from, to) in [
        (&mapping.time, &keys.time),
        (&mapping.latitude, &keys.latitude),
        (&mapping.longitude, &keys.longitude),
        (&mapping.value, &VALUE_COLUMN.to_string()),
    ] {
        if from != to {
            chunk.rename(from.as_str(), to.as_str().into())?;
        }
    }
    Ok(chunk)
}

/// Read a staging file with the key columns normalized to joinable dtypes
fn read_staged(path: &Path, keys: &JoinKeys) -> Result<DataFrame> {
    let df = read_csv(path)?;
    let df = df
        .lazy()
        .with_columns([
            col(keys.time.as_str()).cast(DataType::String),
            col(keys.latitude.as_str()).cast(DataType::Float64),
            col(keys.longitude.as_str()).cast(DataType::Float64),
        ])
        .collect()?;
    Ok(df)
}

fn key_exprs(keys: &JoinKeys) -> [Expr; 3] {
    [
        col(keys.time.as_str()),
        col(keys.latitude.as_str()),
        col(keys.longitude.as_str()),
    ]
}
