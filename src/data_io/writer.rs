use super::{Grid, OutputField, OutputVariable, OUTPUT_FILL_VALUE};
use crate::config::Config;
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("NetCDF error while writing {path}: {source}")]
    Netcdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{variable}: grid is {grid:?} but data is {data:?}")]
    GridMismatch {
        variable: String,
        grid: (usize, usize),
        data: (usize, usize),
    },

    #[error("Invalid year {0}")]
    InvalidYear(i32),
}

/// Storage settings applied to every output variable
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    pub compression_level: i32,
    pub shuffle: bool,
    pub fill_value: f32,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            compression_level: 1,
            shuffle: true,
            fill_value: OUTPUT_FILL_VALUE,
        }
    }
}

/// Provenance attached as global attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub model: String,
    pub scenario: String,
    pub experiment: String,
}

/// Writes one NetCDF file per annual output variable.
///
/// Files are written one after the other; each file is closed before the
/// next one is created.
pub struct AnnualWriter {
    pub output_dir: PathBuf,
    /// File name pattern with `{variable}`, `{model}`, `{scenario}`, `{experiment}` and `{year}`
    pub output_pattern: String,
    pub encoding: Encoding,
    pub provenance: Provenance,
}

impl AnnualWriter {
    pub fn new(output_dir: impl AsRef<Path>, output_pattern: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            output_pattern: output_pattern.into(),
            encoding: Encoding::default(),
            provenance: Provenance::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            output_pattern: config.output_pattern.clone(),
            encoding: Encoding {
                compression_level: config.compression_level,
                ..Encoding::default()
            },
            provenance: Provenance {
                model: config.model.clone(),
                scenario: config.scenario.clone(),
                experiment: config.experiment.clone(),
            },
        }
    }

    pub fn file_path(&self, variable: OutputVariable, year: i32) -> PathBuf {
        let name = self
            .output_pattern
            .replace("{variable}", variable.name())
            .replace("{model}", &self.provenance.model)
            .replace("{scenario}", &self.provenance.scenario)
            .replace("{experiment}", &self.provenance.experiment)
            .replace("{year}", &year.to_string());
        self.output_dir.join(name)
    }

    /// Write every field in order, consuming them so each is released once written.
    pub fn write_all(
        &self,
        fields: Vec<OutputField>,
        grid: &Grid,
        year: i32,
    ) -> Result<Vec<PathBuf>, WriterError> {
        let mut written = Vec::with_capacity(fields.len());
        for field in fields {
            written.push(self.write(&field, grid, year)?);
            info!("Finished {}", field.variable);
        }
        Ok(written)
    }

    /// Write one annual series to its own file.
    pub fn write(&self, field: &OutputField, grid: &Grid, year: i32) -> Result<PathBuf, WriterError> {
        let (nt, ny, nx) = field.data.dim();
        if (ny, nx) != grid.shape() {
            return Err(WriterError::GridMismatch {
                variable: field.variable.name().to_string(),
                grid: grid.shape(),
                data: (ny, nx),
            });
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.file_path(field.variable, year);
        info!("Writing {} ({} steps) to {}", field.variable, nt, path.display());

        let err = |source: netcdf::Error| WriterError::Netcdf {
            path: path.clone(),
            source,
        };

        let epoch = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or(WriterError::InvalidYear(year))?;

        let mut file = netcdf::create(&path).map_err(err)?;

        file.add_unlimited_dimension("time").map_err(err)?;
        file.add_dimension("lat", ny).map_err(err)?;
        file.add_dimension("lon", nx).map_err(err)?;

        file.add_attribute("title", field.variable.long_name()).map_err(err)?;
        file.add_attribute("source", "wbgt_rust heat-stress pipeline").map_err(err)?;
        file.add_attribute("model", self.provenance.model.as_str()).map_err(err)?;
        file.add_attribute("scenario", self.provenance.scenario.as_str()).map_err(err)?;
        file.add_attribute("experiment", self.provenance.experiment.as_str()).map_err(err)?;
        file.add_attribute("Conventions", "CF-1.7").map_err(err)?;
        let creation_time = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        file.add_attribute("history", format!("Created on {}", creation_time))
            .map_err(err)?;

        {
            let mut time_var = file.add_variable::<f64>("time", &["time"]).map_err(err)?;
            time_var
                .put_attribute("units", format!("hours since {}", epoch.format("%Y-%m-%d %H:%M:%S")))
                .map_err(err)?;
            time_var.put_attribute("calendar", "proleptic_gregorian").map_err(err)?;
            time_var.put_attribute("standard_name", "time").map_err(err)?;
            let hours: Vec<f64> = field
                .times
                .iter()
                .map(|t| (*t - epoch).num_seconds() as f64 / 3600.0)
                .collect();
            time_var.put_values(&hours, ..).map_err(err)?;
        }

        for (name, values, units, standard_name) in [
            ("lat", &grid.latitudes, "degrees_north", "latitude"),
            ("lon", &grid.longitudes, "degrees_east", "longitude"),
        ] {
            let mut var = file.add_variable::<f64>(name, &[name]).map_err(err)?;
            var.put_attribute("units", units).map_err(err)?;
            var.put_attribute("standard_name", standard_name).map_err(err)?;
            var.put_values(values.as_slice(), ..).map_err(err)?;
        }

        {
            let mut var = file
                .add_variable::<f32>(field.variable.name(), &["time", "lat", "lon"])
                .map_err(err)?;
            var.set_chunking(&[1, ny, nx]).map_err(err)?;
            var.set_compression(self.encoding.compression_level, self.encoding.shuffle)
                .map_err(err)?;
            var.set_fill_value(self.encoding.fill_value).map_err(err)?;
            var.put_attribute("long_name", field.variable.long_name()).map_err(err)?;
            var.put_attribute("units", field.variable.units()).map_err(err)?;

            let fill = self.encoding.fill_value;
            let values: Vec<f32> = field
                .data
                .iter()
                .map(|&v| if v.is_finite() { v } else { fill })
                .collect();
            var.put_values(&values, (0..nt, 0..ny, 0..nx)).map_err(err)?;
        }

        drop(file);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_pattern() {
        let mut writer = AnnualWriter::new(
            "/tmp/out",
            "{variable}_{model}_{scenario}_{experiment}_{year}.nc",
        );
        writer.provenance = Provenance {
            model: "ACCESS-CM2".to_string(),
            scenario: "ssp126".to_string(),
            experiment: "r4i1p1f1".to_string(),
        };
        assert_eq!(
            writer.file_path(OutputVariable::Wbgt, 2040),
            PathBuf::from("/tmp/out/wbgt_ACCESS-CM2_ssp126_r4i1p1f1_2040.nc")
        );
    }

    #[test]
    fn test_default_encoding() {
        let encoding = Encoding::default();
        assert_eq!(encoding.compression_level, 1);
        assert!(encoding.shuffle);
        assert_eq!(encoding.fill_value, 1.0e20);
    }
}
