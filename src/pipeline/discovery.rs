//! Raw-file discovery and processing-unit key derivation.
//!
//! Walks the input root for GRIB extensions and derives each file's
//! (year, month) key from filename patterns, with a directory-structure
//! fallback. Files without a derivable key are logged and skipped, never
//! fatal.

use crate::constants::RAW_FILE_EXTENSIONS;
use crate::error::{Era5Error, Result};
use crate::models::UnitKey;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// `YYYYMM` anywhere in the file name
fn basic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})(\d{2})").expect("valid pattern"))
}

/// `era5_YYYY_MM` / `era5-YYYYMM` style names
fn era5_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)era5[_-](\d{4})[_-]?(\d{2})").expect("valid pattern"))
}

/// Discovered raw files grouped by unit, in chronological order, plus the
/// count of files skipped for lack of a derivable key.
pub fn discover_raw_files(
    input_root: &Path,
    year_range: Option<(i32, i32)>,
) -> Result<(BTreeMap<UnitKey, Vec<PathBuf>>, usize)> {
    if !input_root.exists() {
        return Err(Era5Error::InputNotFound {
            path: input_root.to_path_buf(),
        });
    }

    let mut groups: BTreeMap<UnitKey, Vec<PathBuf>> = BTreeMap::new();
    let mut skipped = 0usize;
    let mut total = 0usize;

    for entry in walkdir::WalkDir::new(input_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_raw_file(path) {
            continue;
        }
        total += 1;

        let Some(key) = derive_unit_key(path) else {
            warn!(file = %path.display(), "could not determine year/month, skipping");
            skipped += 1;
            continue;
        };

        if let Some((start, end)) = year_range {
            if key.year < start || key.year > end {
                debug!(file = %path.display(), %key, "outside year range");
                continue;
            }
        }

        groups.entry(key).or_default().push(path.to_path_buf());
    }

    for files in groups.values_mut() {
        files.sort();
    }

    info!(
        total,
        matched = groups.values().map(|v| v.len()).sum::<usize>(),
        units = groups.len(),
        "raw file discovery complete"
    );
    Ok((groups, skipped))
}

fn is_raw_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            RAW_FILE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Derive the (year, month) key for one raw file.
pub fn derive_unit_key(path: &Path) -> Option<UnitKey> {
    let file_name = path.file_name()?.to_string_lossy();

    if let Some(caps) = basic_pattern().captures(&file_name) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if (1..=12).contains(&month) {
            return Some(UnitKey::new(year, month));
        }
    }

    if let Some(caps) = era5_pattern().captures(&file_name) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if (1..=12).contains(&month) {
            return Some(UnitKey::new(year, month));
        }
    }

    // Fallback: a 4-digit year directory, optionally followed by a month
    // directory, e.g. <root>/2021/05/data.grib
    let components: Vec<String> = path
        .parent()?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    for (i, part) in components.iter().enumerate() {
        if part.len() == 4 {
            if let Ok(year) = part.parse::<i32>() {
                if let Some(next) = components.get(i + 1) {
                    if let Ok(month) = next.parse::<u32>() {
                        if (1..=12).contains(&month) {
                            return Some(UnitKey::new(year, month));
                        }
                    }
                }
            }
        }
    }

    None
}
