//! Column-role resolution for variable tables.
//!
//! A declarative registry maps known variable names to the value column their
//! tables carry; a generic detector handles unregistered variables. The
//! detector never guesses: an unresolved or ambiguous role excludes the
//! variable from the join instead of silently picking a column.

use crate::constants::{
    LATITUDE_CANDIDATES, LATITUDE_COLUMN, LONGITUDE_CANDIDATES, LONGITUDE_COLUMN,
    METADATA_COLUMNS, TIME_CANDIDATES, TIME_COLUMN, VALUE_COLUMN,
};
use crate::error::{Era5Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Per-variable association of column names to the four join roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub time: String,
    pub latitude: String,
    pub longitude: String,
    pub value: String,
}

/// Why a variable could not be mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingFailure {
    /// A required role had no candidate column
    MissingRole(&'static str),
    /// More than one column was left as a value candidate
    AmbiguousValue(Vec<String>),
}

impl MappingFailure {
    pub fn reason(&self) -> String {
        match self {
            MappingFailure::MissingRole(role) => format!("no candidate column for role '{role}'"),
            MappingFailure::AmbiguousValue(cols) => {
                format!("ambiguous value column, candidates: {cols:?}")
            }
        }
    }
}

/// Registry of fixed value-column names for known variables.
///
/// Decoders in the wild disagree on value column naming: a `2t` table may
/// carry `t2m`, a `10u` table `u10`. Registered variables resolve without
/// the generic detector.
#[derive(Debug, Clone)]
pub struct VariableRegistry {
    value_columns: HashMap<String, String>,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl VariableRegistry {
    pub fn empty() -> Self {
        Self {
            value_columns: HashMap::new(),
        }
    }

    /// Registry preloaded with the ECMWF surface variables this pipeline sees
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (variable, column) in [
            ("2t", "t2m"),
            ("2d", "d2m"),
            ("10u", "u10"),
            ("10v", "v10"),
            ("100u", "u100"),
            ("100v", "v100"),
            ("10fg", "fg10"),
            ("i10fg", "i10fg"),
            ("sp", "sp"),
            ("tp", "tp"),
            ("lsp", "lsp"),
            ("cp", "cp"),
            ("tcc", "tcc"),
            ("lcc", "lcc"),
            ("mcc", "mcc"),
            ("hcc", "hcc"),
            ("cbh", "cbh"),
            ("cape", "cape"),
            ("cin", "cin"),
            ("vimd", "vimd"),
        ] {
            registry
                .value_columns
                .insert(variable.to_string(), column.to_string());
        }
        registry
    }

    pub fn register(&mut self, variable: impl Into<String>, value_column: impl Into<String>) {
        self.value_columns
            .insert(variable.into(), value_column.into());
    }

    pub fn value_column(&self, variable: &str) -> Option<&str> {
        self.value_columns.get(variable).map(|s| s.as_str())
    }

    /// Eager startup validation: every registered name must be usable as a
    /// column identifier.
    pub fn validate(&self) -> Result<()> {
        for (variable, column) in &self.value_columns {
            if variable.trim().is_empty() || column.trim().is_empty() {
                return Err(Era5Error::Configuration {
                    message: format!(
                        "registry entry '{variable}' -> '{column}' has an empty name"
                    ),
                });
            }
            if column.contains(',') || column.chars().any(char::is_whitespace) {
                return Err(Era5Error::Configuration {
                    message: format!("registry column name '{column}' is not a valid identifier"),
                });
            }
        }
        Ok(())
    }

    /// Resolve the four column roles for a variable given its table columns.
    pub fn resolve(
        &self,
        variable: &str,
        columns: &[String],
    ) -> std::result::Result<ColumnMapping, MappingFailure> {
        let time = find_candidate(columns, TIME_CANDIDATES)
            .ok_or(MappingFailure::MissingRole("time"))?;
        let latitude = find_candidate(columns, LATITUDE_CANDIDATES)
            .ok_or(MappingFailure::MissingRole("latitude"))?;
        let longitude = find_candidate(columns, LONGITUDE_CANDIDATES)
            .ok_or(MappingFailure::MissingRole("longitude"))?;

        let value = self.resolve_value_column(variable, columns)?;

        debug!(
            variable,
            time = time.as_str(),
            latitude = latitude.as_str(),
            longitude = longitude.as_str(),
            value = value.as_str(),
            "resolved column mapping"
        );

        Ok(ColumnMapping {
            time,
            latitude,
            longitude,
            value,
        })
    }

    fn resolve_value_column(
        &self,
        variable: &str,
        columns: &[String],
    ) -> std::result::Result<String, MappingFailure> {
        // Registered variables resolve directly
        if let Some(registered) = self.value_column(variable) {
            if let Some(col) = columns.iter().find(|c| c.as_str() == registered) {
                return Ok(col.clone());
            }
        }

        // Canonical name, the variable's own name, then transformed forms
        let lowercase = variable.to_lowercase();
        let suffixed = format!("{variable}m");
        let reversed: String = variable.chars().rev().collect();
        for candidate in [
            VALUE_COLUMN,
            variable,
            lowercase.as_str(),
            suffixed.as_str(),
            reversed.as_str(),
        ] {
            if let Some(col) = columns.iter().find(|c| c.as_str() == candidate) {
                return Ok(col.clone());
            }
        }

        // Last resort: the sole column left after removing keys and metadata
        let remaining: Vec<String> = columns
            .iter()
            .filter(|c| {
                let lower = c.to_lowercase();
                !TIME_CANDIDATES.contains(&lower.as_str())
                    && !LATITUDE_CANDIDATES.contains(&lower.as_str())
                    && !LONGITUDE_CANDIDATES.contains(&lower.as_str())
                    && !METADATA_COLUMNS.contains(&lower.as_str())
            })
            .cloned()
            .collect();

        match remaining.len() {
            1 => Ok(remaining.into_iter().next().unwrap()),
            0 => Err(MappingFailure::MissingRole("value")),
            _ => Err(MappingFailure::AmbiguousValue(remaining)),
        }
    }
}

fn find_candidate(columns: &[String], candidates: &[&str]) -> Option<String> {
    columns
        .iter()
        .find(|c| candidates.contains(&c.to_lowercase().as_str()))
        .cloned()
}

/// Canonical join-key column names for one unit's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKeys {
    pub time: String,
    pub latitude: String,
    pub longitude: String,
}

impl Default for JoinKeys {
    fn default() -> Self {
        Self {
            time: TIME_COLUMN.to_string(),
            latitude: LATITUDE_COLUMN.to_string(),
            longitude: LONGITUDE_COLUMN.to_string(),
        }
    }
}

/// Select the plurality name for each key role across the unit's variables.
/// Ties resolve to the first name seen in discovery order.
pub fn reconcile_key_names<'a, I>(mappings: I) -> JoinKeys
where
    I: IntoIterator<Item = &'a ColumnMapping>,
{
    let mut time_names = Vec::new();
    let mut lat_names = Vec::new();
    let mut lon_names = Vec::new();

    for mapping in mappings {
        time_names.push(mapping.time.as_str());
        lat_names.push(mapping.latitude.as_str());
        lon_names.push(mapping.longitude.as_str());
    }

    let defaults = JoinKeys::default();
    JoinKeys {
        time: plurality(&time_names).unwrap_or(defaults.time),
        latitude: plurality(&lat_names).unwrap_or(defaults.latitude),
        longitude: plurality(&lon_names).unwrap_or(defaults.longitude),
    }
}

fn plurality(names: &[&str]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for name in names {
        match counts.iter_mut().find(|(n, _)| n == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    // ties keep the first-seen name
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((name, count)),
        }
    }
    best.map(|(name, _)| name.to_string())
}
