//! Application constants for the ERA5 processor
//!
//! This module contains default values, canonical column names, filename
//! conventions, and the GRIB parameter mappings used throughout the pipeline.

// =============================================================================
// Variable Selection Defaults
// =============================================================================

/// Variables excluded by default: these do not carry values at all common
/// timeframes and would poison the join's coordinate frame.
pub const DEFAULT_EXCLUDE_VARIABLES: &[&str] =
    &["10fg", "cbh", "cin", "cp", "i10fg", "lsp", "tp", "vimd"];

/// Raw gridded file extensions recognized during discovery
pub const RAW_FILE_EXTENSIONS: &[&str] = &["grib", "grb", "grib2", "grb2"];

// =============================================================================
// Canonical Column Names and Role Candidates
// =============================================================================

/// Canonical coordinate-key column names used in extractor output and as
/// defaults for join-key reconciliation.
pub const TIME_COLUMN: &str = "time";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";
pub const VALUE_COLUMN: &str = "value";

/// Column names accepted as the time role (compared case-insensitively)
pub const TIME_CANDIDATES: &[&str] = &["time", "time1", "time2", "valid_time"];

/// Column names accepted as the latitude role
pub const LATITUDE_CANDIDATES: &[&str] = &["latitude", "lat"];

/// Column names accepted as the longitude role
pub const LONGITUDE_CANDIDATES: &[&str] = &["longitude", "lon"];

/// Metadata columns that are never value candidates
pub const METADATA_COLUMNS: &[&str] = &["number", "step", "surface", "level"];

/// Timestamp format written by the extractor and parsed by the sorter
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Processing Defaults
// =============================================================================

/// Time steps per extractor chunk (one day of hourly data)
pub const DEFAULT_TIME_CHUNK_SIZE: usize = 24;

/// Rows read per joiner chunk
pub const DEFAULT_JOIN_CHUNK_SIZE: usize = 10_000;

/// Accumulated rows that force a staging flush in the joiner
pub const DEFAULT_MAX_ROWS_IN_MEMORY: usize = 30_000;

/// Units per orchestrator batch
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Rows per sorter read chunk
pub const DEFAULT_SORT_CHUNK_SIZE: usize = 100_000;

/// Files handed to each sort worker at a time
pub const DEFAULT_SORT_BATCH_SIZE: usize = 1;

/// Backup copies stream in blocks of this size for files over
/// [`LARGE_FILE_THRESHOLD_BYTES`]
pub const BACKUP_BLOCK_SIZE: usize = 1024 * 1024;
pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 1_000_000_000;

// =============================================================================
// Persisted Layout
// =============================================================================

/// Directory names under the output root
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const JOINED_DIR_NAME: &str = "joined";
pub const LOG_DIR_NAME: &str = "logs";

/// Staging directory created next to a join output, removed on success
pub const STAGING_DIR_NAME: &str = "temp_joins";

/// Filename for a joined unit, without extension
pub fn joined_file_stem(year: i32, month: u32) -> String {
    format!("joined_{year}{month:02}")
}

/// Filename for a full variable table (single chunk)
pub fn variable_file_name(year: i32, month: u32, variable: &str) -> String {
    format!("{year}{month:02}_{variable}.csv")
}

/// Filename for one time-chunk segment of a variable table
pub fn variable_chunk_file_name(
    year: i32,
    month: u32,
    variable: &str,
    start: usize,
    end: usize,
) -> String {
    format!("{year}{month:02}_{variable}_chunk_{start}_{end}.csv")
}

// =============================================================================
// GRIB Parameter Identification
// =============================================================================

/// (discipline, category, number) → ECMWF-style short name for the surface
/// parameters this pipeline commonly sees. Unlisted parameters fall back to
/// a deterministic `d{D}c{C}n{N}` name so they remain extractable.
pub const GRIB_SHORT_NAMES: &[(u8, u8, u8, &str)] = &[
    (0, 0, 0, "2t"),    // 2 metre temperature
    (0, 0, 6, "2d"),    // 2 metre dewpoint temperature
    (0, 1, 8, "tp"),    // total precipitation
    (0, 1, 9, "lsp"),   // large-scale precipitation
    (0, 1, 10, "cp"),   // convective precipitation
    (0, 2, 2, "10u"),   // 10 metre U wind component
    (0, 2, 3, "10v"),   // 10 metre V wind component
    (0, 2, 22, "10fg"), // 10 metre wind gust
    (0, 3, 0, "sp"),    // surface pressure
    (0, 6, 1, "tcc"),   // total cloud cover
    (0, 6, 3, "lcc"),   // low cloud cover
    (0, 6, 4, "mcc"),   // medium cloud cover
    (0, 6, 5, "hcc"),   // high cloud cover
    (0, 6, 11, "cbh"),  // cloud base height
    (0, 7, 6, "cape"),  // convective available potential energy
    (0, 7, 7, "cin"),   // convective inhibition
];

/// Resolve a GRIB parameter triple to its short name
pub fn grib_short_name(discipline: u8, category: u8, number: u8) -> String {
    GRIB_SHORT_NAMES
        .iter()
        .find(|(d, c, n, _)| *d == discipline && *c == category && *n == number)
        .map(|(_, _, _, name)| (*name).to_string())
        .unwrap_or_else(|| format!("d{discipline}c{category}n{number}"))
}
