//! Thin decode layer over GRIB2 raw files.
//!
//! Each submessage in an ERA5 archive is one 2-D field: one variable at one
//! time step. This module exposes the two views the extractor needs: the set
//! of variables a file contains, and the ordered field sequence for one
//! variable. Parameter identity is the (discipline, category, number) triple
//! mapped through the short-name table.

use crate::constants::grib_short_name;
use crate::error::{Era5Error, Result};
use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One decoded 2-D field: grid point coordinates and values for a single
/// time step. Non-finite packed values are surfaced as nulls.
#[derive(Debug, Clone)]
pub struct GridField {
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<Option<f64>>,
}

impl GridField {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// List the variables present in a raw file, in first-appearance order.
pub fn list_variables(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let grib2 = grib::from_reader(BufReader::new(file))
        .map_err(|e| file_error(path, "failed to parse GRIB2 structure", e))?;

    let mut variables = Vec::new();
    for (_idx, submessage) in grib2.iter() {
        let discipline = submessage.indicator().discipline;
        let prod_def = submessage.prod_def();
        let (category, number) = match (prod_def.parameter_category(), prod_def.parameter_number())
        {
            (Some(category), Some(number)) => (category, number),
            _ => continue,
        };
        let name = grib_short_name(discipline, category, number);
        if !variables.contains(&name) {
            variables.push(name);
        }
    }
    Ok(variables)
}

/// Decode every field of one variable, in file order (chronological for
/// ERA5 monthly archives).
pub fn read_fields(path: &Path, variable: &str) -> Result<Vec<GridField>> {
    let file = File::open(path)?;
    let grib2 = grib::from_reader(BufReader::new(file))
        .map_err(|e| file_error(path, "failed to parse GRIB2 structure", e))?;

    let mut fields = Vec::new();
    for (_idx, submessage) in grib2.iter() {
        let discipline = submessage.indicator().discipline;
        let prod_def = submessage.prod_def();
        let (category, number) = match (prod_def.parameter_category(), prod_def.parameter_number())
        {
            (Some(category), Some(number)) => (category, number),
            _ => continue,
        };
        if grib_short_name(discipline, category, number) != variable {
            continue;
        }

        let mut latitudes = Vec::new();
        let mut longitudes = Vec::new();
        for (lat, lon) in submessage
            .latlons()
            .map_err(|e| decode_error(path, variable, "failed to compute grid coordinates", e))?
        {
            latitudes.push(lat as f64);
            longitudes.push(lon as f64);
        }

        let decoder = grib::Grib2SubmessageDecoder::from(submessage)
            .map_err(|e| decode_error(path, variable, "failed to create decoder", e))?;
        let values: Vec<Option<f64>> = decoder
            .dispatch()
            .map_err(|e| decode_error(path, variable, "failed to unpack values", e))?
            .map(|v| if v.is_finite() { Some(v as f64) } else { None })
            .collect();

        if values.len() != latitudes.len() {
            return Err(Era5Error::Decode {
                path: path.to_path_buf(),
                variable: variable.to_string(),
                reason: format!(
                    "grid has {} points but {} values were unpacked",
                    latitudes.len(),
                    values.len()
                ),
            });
        }

        fields.push(GridField {
            latitudes,
            longitudes,
            values,
        });
    }

    if fields.is_empty() {
        return Err(Era5Error::Decode {
            path: path.to_path_buf(),
            variable: variable.to_string(),
            reason: "no submessages matched the variable".to_string(),
        });
    }

    Ok(fields)
}

fn file_error(path: &Path, context: &str, e: impl Debug) -> Era5Error {
    Era5Error::Decode {
        path: path.to_path_buf(),
        variable: "<file>".to_string(),
        reason: format!("{context}: {e:?}"),
    }
}

fn decode_error(path: &Path, variable: &str, context: &str, e: impl Debug) -> Era5Error {
    Era5Error::Decode {
        path: path.to_path_buf(),
        variable: variable.to_string(),
        reason: format!("{context}: {e:?}"),
    }
}
