//! Resumability index over the persisted output layout.
//!
//! The on-disk layout stays the source of truth, but one scan at startup
//! builds a (year, month) → known-outputs lookup so re-runs do not rescan
//! the whole tree for every unit.

use crate::constants::{JOINED_DIR_NAME, PROCESSED_DIR_NAME};
use crate::error::Result;
use crate::models::UnitKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct IndexEntry {
    joined_output: Option<PathBuf>,
    has_processed: bool,
}

/// One-scan lookup of per-unit outputs under the output root
#[derive(Debug, Clone, Default)]
pub struct UnitIndex {
    entries: HashMap<UnitKey, IndexEntry>,
}

impl UnitIndex {
    /// Build the index from the persisted layout.
    pub fn scan(output_root: &Path) -> Result<Self> {
        let mut index = Self::default();

        let joined_root = output_root.join(JOINED_DIR_NAME);
        for extension in ["csv", "parquet"] {
            let pattern = format!("{}/**/joined_*.{extension}", joined_root.display());
            if let Ok(paths) = glob::glob(&pattern) {
                for path in paths.filter_map(|p| p.ok()) {
                    if let Some(key) = parse_joined_file_name(&path) {
                        index.entries.entry(key).or_default().joined_output = Some(path);
                    }
                }
            }
        }

        let processed_root = output_root.join(PROCESSED_DIR_NAME);
        if processed_root.exists() {
            for year_entry in std::fs::read_dir(&processed_root)?.filter_map(|e| e.ok()) {
                let Ok(year) = year_entry.file_name().to_string_lossy().parse::<i32>() else {
                    continue;
                };
                if !year_entry.file_type()?.is_dir() {
                    continue;
                }
                for month_entry in std::fs::read_dir(year_entry.path())?.filter_map(|e| e.ok()) {
                    let Ok(month) = month_entry.file_name().to_string_lossy().parse::<u32>()
                    else {
                        continue;
                    };
                    if (1..=12).contains(&month) {
                        index
                            .entries
                            .entry(UnitKey::new(year, month))
                            .or_default()
                            .has_processed = true;
                    }
                }
            }
        }

        debug!(units = index.entries.len(), "output index built");
        Ok(index)
    }

    /// Joined output known for this unit, if any
    pub fn joined_output(&self, key: UnitKey) -> Option<&Path> {
        self.entries
            .get(&key)
            .and_then(|e| e.joined_output.as_deref())
    }

    pub fn is_joined(&self, key: UnitKey) -> bool {
        self.joined_output(key).is_some()
    }

    /// Per-variable intermediates known for this unit
    pub fn has_processed(&self, key: UnitKey) -> bool {
        self.entries.get(&key).is_some_and(|e| e.has_processed)
    }

    pub fn record_joined(&mut self, key: UnitKey, path: PathBuf) {
        self.entries.entry(key).or_default().joined_output = Some(path);
    }

    pub fn record_processed(&mut self, key: UnitKey) {
        self.entries.entry(key).or_default().has_processed = true;
    }

    pub fn record_cleaned(&mut self, key: UnitKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.has_processed = false;
        }
    }

    /// Every known joined output, in chronological unit order
    pub fn all_joined_outputs(&self) -> Vec<PathBuf> {
        let mut with_keys: Vec<(UnitKey, PathBuf)> = self
            .entries
            .iter()
            .filter_map(|(key, e)| e.joined_output.clone().map(|p| (*key, p)))
            .collect();
        with_keys.sort_by_key(|(key, _)| *key);
        with_keys.into_iter().map(|(_, p)| p).collect()
    }
}

/// Parse `joined_<YYYYMM>` stems back into unit keys
pub fn parse_joined_file_name(path: &Path) -> Option<UnitKey> {
    let stem = path.file_stem()?.to_string_lossy();
    let compact = stem.strip_prefix("joined_")?;
    if compact.len() != 6 {
        return None;
    }
    let year: i32 = compact[..4].parse().ok()?;
    let month: u32 = compact[4..].parse().ok()?;
    (1..=12).contains(&month).then(|| UnitKey::new(year, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_joined_file_name() {
        assert_eq!(
            parse_joined_file_name(Path::new("joined/2021/joined_202105.csv")),
            Some(UnitKey::new(2021, 5))
        );
        assert_eq!(
            parse_joined_file_name(Path::new("joined_202113.parquet")),
            None
        );
        assert_eq!(parse_joined_file_name(Path::new("other_202105.csv")), None);
    }

    #[test]
    fn test_scan_picks_up_joined_and_processed() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let joined_dir = root.join(JOINED_DIR_NAME).join("2021");
        std::fs::create_dir_all(&joined_dir).unwrap();
        std::fs::write(joined_dir.join("joined_202105.csv"), b"x").unwrap();
        std::fs::write(joined_dir.join("joined_202106.parquet"), b"x").unwrap();
        std::fs::write(joined_dir.join("readme.txt"), b"x").unwrap();

        let processed_dir = root.join(PROCESSED_DIR_NAME).join("2021").join("07");
        std::fs::create_dir_all(&processed_dir).unwrap();

        let index = UnitIndex::scan(root).unwrap();
        assert!(index.is_joined(UnitKey::new(2021, 5)));
        assert!(index.is_joined(UnitKey::new(2021, 6)));
        assert!(!index.is_joined(UnitKey::new(2021, 7)));
        assert!(index.has_processed(UnitKey::new(2021, 7)));
        assert!(!index.has_processed(UnitKey::new(2021, 5)));

        let outputs = index.all_joined_outputs();
        assert_eq!(outputs.len(), 2);
        // chronological order
        assert!(outputs[0].to_string_lossy().contains("202105"));
    }

    #[test]
    fn test_scan_of_empty_root() {
        let temp = TempDir::new().unwrap();
        let index = UnitIndex::scan(temp.path()).unwrap();
        assert!(index.all_joined_outputs().is_empty());
        assert!(!index.is_joined(UnitKey::new(2021, 5)));
    }

    #[test]
    fn test_record_and_clean_transitions() {
        let mut index = UnitIndex::default();
        let key = UnitKey::new(2021, 5);

        index.record_processed(key);
        assert!(index.has_processed(key));

        index.record_joined(key, PathBuf::from("joined/2021/joined_202105.csv"));
        assert!(index.is_joined(key));

        index.record_cleaned(key);
        assert!(!index.has_processed(key));
        assert!(index.is_joined(key));
    }
}
