//! Integration tests for the join → sort flow over synthetic variable tables
//!
//! These tests lay down per-variable segment files the way the extractor
//! writes them, then drive the joiner and sorter end to end and check the
//! coordinate-frame invariants on the results.

use anyhow::Result;
use era5_processor::join::UnitJoiner;
use era5_processor::models::UnitKey;
use era5_processor::schema::VariableRegistry;
use era5_processor::sort::ChronologicalSorter;
use era5_processor::{JoinConfig, SortConfig};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write one segment file for a variable under the processed tree
fn write_segment(
    root: &Path,
    unit: UnitKey,
    variable: &str,
    file_name: &str,
    header: &str,
    rows: &[&str],
) -> PathBuf {
    let dir = root
        .join(unit.year.to_string())
        .join(format!("{:02}", unit.month))
        .join(variable);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file_name);
    let mut content = String::from(header);
    content.push('\n');
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?)
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect()
}

fn column_strings(df: &DataFrame, name: &str) -> Vec<String> {
    let col = df.column(name).unwrap();
    (0..df.height())
        .map(|i| col.get(i).unwrap().to_string())
        .collect()
}

/// The unit (2021, 05) carries wind_u and temp; wind_v failed to decode
/// upstream so its table is absent. The join must produce exactly the two
/// surviving variable columns, and the sort pass must leave the rows
/// ascending by (time, latitude, longitude).
#[test]
fn test_failed_variable_absent_from_joined_output() -> Result<()> {
    let temp = TempDir::new()?;
    let processed = temp.path().join("processed");
    let unit = UnitKey::new(2021, 5);

    write_segment(
        &processed,
        unit,
        "wind_u",
        "202105_wind_u.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 01:00:00,50.0,-1.0,3.4",
            "2021-05-01 00:00:00,50.25,-1.0,3.1",
            "2021-05-01 00:00:00,50.0,-1.0,3.2",
        ],
    );
    write_segment(
        &processed,
        unit,
        "temp",
        "202105_temp.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 00:00:00,50.0,-1.0,280.1",
            "2021-05-01 00:00:00,50.25,-1.0,280.4",
            "2021-05-01 01:00:00,50.0,-1.0,280.2",
        ],
    );
    // no wind_v directory: its decode failed upstream

    let joined_path = temp.path().join("joined").join("joined_202105.csv");
    let joiner = UnitJoiner::new(JoinConfig::default(), VariableRegistry::with_defaults())?;
    let report = joiner.join_unit(&processed, unit, &joined_path)?;

    assert_eq!(report.variables_joined, vec!["temp", "wind_u"]);
    let df = read_csv(&joined_path)?;
    let names = column_names(&df);
    assert!(names.contains(&"temp".to_string()));
    assert!(names.contains(&"wind_u".to_string()));
    assert!(!names.contains(&"wind_v".to_string()));
    assert_eq!(df.height(), 3);

    // the whole-run sort pass runs over the joined output
    let sorter = ChronologicalSorter::new(SortConfig::default());
    let sort_report = sorter.sort_file(&joined_path)?;
    assert!(sort_report.time_parsed);

    let sorted = read_csv(&joined_path)?;
    let times = column_strings(&sorted, "time");
    let lats = column_strings(&sorted, "latitude");
    let keys: Vec<(String, String)> = times.into_iter().zip(lats).collect();
    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(keys, expected, "rows must ascend by (time, latitude)");
    Ok(())
}

/// Every base-variable key must survive the join even when later variables
/// miss some of them; missing cells are nulls, never dropped rows.
#[test]
fn test_joined_key_set_equals_base_key_set() -> Result<()> {
    let temp = TempDir::new()?;
    let processed = temp.path().join("processed");
    let unit = UnitKey::new(2021, 5);

    // base variable split across two time-chunk segments, with a duplicate
    // key between them
    write_segment(
        &processed,
        unit,
        "a_base",
        "202105_a_base_chunk_0_2.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 00:00:00,50.0,-1.0,1.0",
            "2021-05-01 01:00:00,50.0,-1.0,2.0",
        ],
    );
    write_segment(
        &processed,
        unit,
        "a_base",
        "202105_a_base_chunk_2_4.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 02:00:00,50.0,-1.0,3.0",
            "2021-05-01 03:00:00,50.0,-1.0,4.0",
        ],
    );
    // a later variable covering only half the keys
    write_segment(
        &processed,
        unit,
        "b_partial",
        "202105_b_partial.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 00:00:00,50.0,-1.0,9.0",
            "2021-05-01 03:00:00,50.0,-1.0,9.3",
        ],
    );

    let joined_path = temp.path().join("joined_202105.csv");
    // a tiny memory ceiling forces the staging spill path
    let config = JoinConfig {
        max_rows_in_memory: 2,
        chunk_size: 2,
        ..JoinConfig::default()
    };
    let joiner = UnitJoiner::new(config, VariableRegistry::with_defaults())?;
    let report = joiner.join_unit(&processed, unit, &joined_path)?;

    assert_eq!(report.rows, 4);
    let df = read_csv(&joined_path)?;
    assert_eq!(df.height(), 4);
    assert_eq!(df.column("a_base")?.null_count(), 0);
    assert_eq!(df.column("b_partial")?.null_count(), 2);
    Ok(())
}

/// Variables disagreeing on the time column name and on the value column
/// shape still merge on the same logical key via the plurality name and the
/// variable registry.
#[test]
fn test_heterogeneous_tables_reconcile_and_merge() -> Result<()> {
    let temp = TempDir::new()?;
    let processed = temp.path().join("processed");
    let unit = UnitKey::new(2021, 5);

    // registered variable with its decoder-native column names
    write_segment(
        &processed,
        unit,
        "10u",
        "202105_10u.csv",
        "valid_time,lat,lon,u10",
        &["2021-05-01 00:00:00,50.0,-1.0,3.2"],
    );
    write_segment(
        &processed,
        unit,
        "2t",
        "202105_2t.csv",
        "time,latitude,longitude,t2m",
        &["2021-05-01 00:00:00,50.0,-1.0,281.4"],
    );
    write_segment(
        &processed,
        unit,
        "sp",
        "202105_sp.csv",
        "time,latitude,longitude,value",
        &["2021-05-01 00:00:00,50.0,-1.0,101325.0"],
    );

    let joined_path = temp.path().join("joined_202105.csv");
    let joiner = UnitJoiner::new(JoinConfig::default(), VariableRegistry::with_defaults())?;
    let report = joiner.join_unit(&processed, unit, &joined_path)?;

    assert_eq!(report.variables_joined.len(), 3);
    let df = read_csv(&joined_path)?;
    // plurality name is 'time' (2 of 3); every variable merged on it
    let names = column_names(&df);
    assert!(names.contains(&"time".to_string()));
    assert!(!names.contains(&"valid_time".to_string()));
    assert_eq!(df.height(), 1);
    for variable in ["10u", "2t", "sp"] {
        assert_eq!(
            df.column(variable)?.null_count(),
            0,
            "{variable} did not merge onto the shared key"
        );
    }
    Ok(())
}

/// Sorting an already-sorted parquet table is byte-stable at the row level
/// and keeps the schema intact.
#[test]
fn test_sort_parquet_roundtrip() -> Result<()> {
    let temp = TempDir::new()?;
    let processed = temp.path().join("processed");
    let unit = UnitKey::new(2021, 5);

    write_segment(
        &processed,
        unit,
        "temp",
        "202105_temp.csv",
        "time,latitude,longitude,value",
        &[
            "2021-05-01 01:00:00,50.0,-1.0,280.2",
            "2021-05-01 00:00:00,50.0,-1.0,280.1",
        ],
    );

    let joined_path = temp.path().join("joined_202105.parquet");
    let joiner = UnitJoiner::new(JoinConfig::default(), VariableRegistry::with_defaults())?;
    joiner.join_unit(&processed, unit, &joined_path)?;

    let sorter = ChronologicalSorter::new(SortConfig::default());
    sorter.sort_file(&joined_path)?;
    let first = ParquetReader::new(std::fs::File::open(&joined_path)?).finish()?;

    sorter.sort_file(&joined_path)?;
    let second = ParquetReader::new(std::fs::File::open(&joined_path)?).finish()?;

    assert_eq!(first.height(), second.height());
    assert!(first.equals_missing(&second));

    let times = column_strings(&first, "time");
    let mut expected = times.clone();
    expected.sort();
    assert_eq!(times, expected);
    Ok(())
}
