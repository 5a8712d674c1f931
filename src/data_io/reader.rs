use super::{Field, FieldError, FieldSource, Grid, InputVariable};
use crate::time_utils::{decode_time_values, Calendar, TimeError, TimeUnits};
use chrono::NaiveDateTime;
use ndarray::{Array3, Axis};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("NetCDF error in {path}: {source}")]
    Netcdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("No input datasets found")]
    NoInputs,

    #[error("Variable not found: {0}")]
    MissingVariable(String),

    #[error("Missing attribute {attribute} on {variable}")]
    MissingAttribute { variable: String, attribute: String },

    #[error("{variable} has no samples between {start} and {end}")]
    EmptyWindow {
        variable: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("Grid of {0} does not match the shared grid")]
    GridMismatch(String),

    #[error("Unexpected layout for {variable} in {path}: dimensions {dims:?}")]
    Layout {
        variable: String,
        path: PathBuf,
        dims: Vec<String>,
    },

    #[error("Time axis error: {0}")]
    Time(#[from] TimeError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decimal places kept on lat/lon so that grids from different files compare equal
const COORDINATE_DECIMALS: i32 = 1;

fn round_coordinate(value: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_DECIMALS);
    (value * scale).round() / scale
}

#[derive(Debug, Clone)]
struct FileIndex {
    path: PathBuf,
    times: Vec<NaiveDateTime>,
    /// Record index in the file of each entry in `times`
    rows: Vec<usize>,
}

#[derive(Debug, Clone)]
struct VariableIndex {
    calendar: Calendar,
    units: String,
    files: Vec<FileIndex>,
}

/// Multi-file NetCDF archive laid out as `{input_dir}/{var}/{version}/*.nc`.
///
/// Each file's time axis is decoded once when the archive is discovered;
/// window loads then only read the overlapping hyperslabs.
#[derive(Debug, Clone)]
pub struct NetCdfArchive {
    input_dir: PathBuf,
    version: String,
    grid: Grid,
    variables: BTreeMap<InputVariable, VariableIndex>,
}

fn open(path: &Path) -> Result<netcdf::File, ReaderError> {
    netcdf::open(path).map_err(|source| ReaderError::Netcdf {
        path: path.to_path_buf(),
        source,
    })
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        netcdf::AttributeValue::Strs(mut s) if !s.is_empty() => Some(s.remove(0)),
        _ => None,
    }
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Double(v) => Some(v),
        netcdf::AttributeValue::Float(v) => Some(v as f64),
        netcdf::AttributeValue::Int(v) => Some(v as f64),
        netcdf::AttributeValue::Short(v) => Some(v as f64),
        _ => None,
    }
}

fn read_coordinate(file: &netcdf::File, path: &Path, names: &[&str]) -> Result<Vec<f64>, ReaderError> {
    let var = names
        .iter()
        .find_map(|name| file.variable(name))
        .ok_or_else(|| ReaderError::MissingVariable(names[0].to_string()))?;
    let values: Vec<f64> = var.get_values(..).map_err(|source| ReaderError::Netcdf {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(values.into_iter().map(round_coordinate).collect())
}

fn read_grid(path: &Path) -> Result<Grid, ReaderError> {
    let file = open(path)?;
    let latitudes = read_coordinate(&file, path, &["lat", "latitude"])?;
    let longitudes = read_coordinate(&file, path, &["lon", "longitude"])?;
    Ok(Grid::new(latitudes, longitudes))
}

/// Decoded time axis of a file, with the records that have a calendar date.
struct TimeAxis {
    times: Vec<NaiveDateTime>,
    rows: Vec<usize>,
    calendar: Calendar,
}

fn read_time_axis(path: &Path) -> Result<TimeAxis, ReaderError> {
    let file = open(path)?;
    let var = file
        .variable("time")
        .ok_or_else(|| ReaderError::MissingVariable("time".to_string()))?;

    let units = string_attribute(&var, "units").ok_or_else(|| ReaderError::MissingAttribute {
        variable: "time".to_string(),
        attribute: "units".to_string(),
    })?;
    let calendar = match string_attribute(&var, "calendar") {
        Some(name) => name.parse()?,
        None => Calendar::Standard,
    };

    let values: Vec<f64> = var.get_values(..).map_err(|source| ReaderError::Netcdf {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = decode_time_values(&values, &TimeUnits::parse(&units)?, calendar)?;

    let mut times = Vec::with_capacity(decoded.len());
    let mut rows = Vec::with_capacity(decoded.len());
    for (row, t) in decoded.into_iter().enumerate() {
        if let Some(t) = t {
            times.push(t);
            rows.push(row);
        }
    }
    if rows.len() < values.len() {
        warn!(
            "{}: dropped {} {} records without a proleptic Gregorian date",
            path.display(),
            values.len() - rows.len(),
            calendar
        );
    }

    Ok(TimeAxis { times, rows, calendar })
}

/// Sorted `*.nc` files in a directory; an absent directory yields no files.
fn list_netcdf_files(dir: &Path) -> Result<Vec<PathBuf>, ReaderError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "nc") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl NetCdfArchive {
    /// Index every variable found under `input_dir`.
    ///
    /// Variables without files are skipped with a warning; an archive with
    /// no variables at all is an error.
    pub fn discover(input_dir: impl AsRef<Path>, version: &str) -> Result<Self, ReaderError> {
        let input_dir = input_dir.as_ref().to_path_buf();
        let mut variables = BTreeMap::new();
        let mut grid: Option<Grid> = None;

        for variable in InputVariable::ALL {
            let dir = input_dir.join(variable.name()).join(version);
            info!("Looking for files in {}/*.nc", dir.display());
            let paths = list_netcdf_files(&dir)?;
            if paths.is_empty() {
                warn!("No files found for variable: {}", variable);
                continue;
            }

            let variable_grid = read_grid(&paths[0])?;
            match &grid {
                Some(shared) if *shared != variable_grid => {
                    return Err(ReaderError::GridMismatch(variable.name().to_string()));
                }
                Some(_) => {}
                None => grid = Some(variable_grid),
            }

            let mut files = Vec::with_capacity(paths.len());
            let mut calendar = None;
            for path in paths {
                let TimeAxis {
                    times,
                    rows,
                    calendar: file_calendar,
                } = read_time_axis(&path)?;
                match calendar {
                    None => calendar = Some(file_calendar),
                    Some(c) if c != file_calendar => warn!(
                        "{}: calendar {} differs from {} in earlier files",
                        path.display(),
                        file_calendar,
                        c
                    ),
                    Some(_) => {}
                }
                files.push(FileIndex { path, times, rows });
            }
            files.sort_by_key(|f| f.times.first().copied());

            let units = {
                let file = open(&files[0].path)?;
                let units = file
                    .variable(variable.name())
                    .and_then(|var| string_attribute(&var, "units"));
                units.unwrap_or_default()
            };
            let calendar = calendar.unwrap_or_default();
            info!(
                "{}: {} files, calendar {}",
                variable,
                files.len(),
                calendar
            );

            variables.insert(
                variable,
                VariableIndex {
                    calendar,
                    units,
                    files,
                },
            );
        }

        let grid = grid.ok_or(ReaderError::NoInputs)?;
        Ok(Self {
            input_dir,
            version: version.to_string(),
            grid,
            variables,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Calendar recorded on the time axis of `variable`
    pub fn calendar(&self, variable: InputVariable) -> Option<Calendar> {
        self.variables.get(&variable).map(|v| v.calendar)
    }

    /// Read the records behind `file.times[range]`.
    fn read_slab(
        &self,
        variable: InputVariable,
        file: &FileIndex,
        range: std::ops::Range<usize>,
    ) -> Result<Array3<f64>, ReaderError> {
        let rows = &file.rows[range];
        let (first, last) = match (rows.first(), rows.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                let (ny, nx) = self.grid.shape();
                return Ok(Array3::zeros((0, ny, nx)));
            }
        };
        let range = first..last + 1;

        let nc = open(&file.path)?;
        let var = nc
            .variable(variable.name())
            .ok_or_else(|| ReaderError::MissingVariable(variable.name().to_string()))?;

        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if shape.len() != 3 || shape[1..] != [self.grid.latitudes.len(), self.grid.longitudes.len()] {
            return Err(ReaderError::Layout {
                variable: variable.name().to_string(),
                path: file.path.clone(),
                dims,
            });
        }

        let (ny, nx) = (shape[1], shape[2]);
        let nt = range.len();
        let mut values: Vec<f64> = var
            .get_values((range, 0..ny, 0..nx))
            .map_err(|source| ReaderError::Netcdf {
                path: file.path.clone(),
                source,
            })?;

        let fill = numeric_attribute(&var, "_FillValue").or_else(|| numeric_attribute(&var, "missing_value"));
        if let Some(fill) = fill {
            values
                .iter_mut()
                .filter(|v| **v == fill)
                .for_each(|v| *v = f64::NAN);
        }

        let slab = Array3::from_shape_vec((nt, ny, nx), values).map_err(|_| ReaderError::Layout {
            variable: variable.name().to_string(),
            path: file.path.clone(),
            dims,
        })?;

        if rows.len() == nt {
            Ok(slab)
        } else {
            let offsets: Vec<usize> = rows.iter().map(|r| r - first).collect();
            Ok(slab.select(Axis(0), &offsets))
        }
    }
}

impl FieldSource for NetCdfArchive {
    fn available(&self) -> Vec<InputVariable> {
        self.variables.keys().copied().collect()
    }

    fn grid(&self) -> Result<Grid, ReaderError> {
        Ok(self.grid.clone())
    }

    fn load(
        &self,
        variable: InputVariable,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Field, ReaderError> {
        let index = self
            .variables
            .get(&variable)
            .ok_or_else(|| ReaderError::MissingVariable(variable.name().to_string()))?;

        let mut times = Vec::new();
        let mut slabs = Vec::new();
        for file in &index.files {
            let i0 = file.times.partition_point(|t| *t < start);
            let i1 = file.times.partition_point(|t| *t < end);
            if i1 <= i0 {
                continue;
            }
            debug!(
                "{}: reading steps {}..{} from {}",
                variable,
                i0,
                i1,
                file.path.display()
            );
            slabs.push(self.read_slab(variable, file, i0..i1)?);
            times.extend_from_slice(&file.times[i0..i1]);
        }

        let (ny, nx) = self.grid.shape();
        let data = if slabs.is_empty() {
            Array3::zeros((0, ny, nx))
        } else {
            let views: Vec<_> = slabs.iter().map(|s| s.view()).collect();
            ndarray::concatenate(Axis(0), &views)
                .map_err(|_| ReaderError::GridMismatch(variable.name().to_string()))?
        };

        Ok(Field::new(
            variable.name(),
            index.units.clone(),
            index.calendar,
            times,
            data,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_coordinate() {
        assert_eq!(round_coordinate(-33.86999), -33.9);
        assert_eq!(round_coordinate(151.2049), 151.2);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let files = list_netcdf_files(Path::new("definitely/not/here")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_empty_archive_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = NetCdfArchive::discover(dir.path(), "v1");
        assert!(matches!(result, Err(ReaderError::NoInputs)));
    }
}
