pub mod memory;
pub mod reader;
pub mod writer;

pub use memory::MemorySource;
pub use reader::{NetCdfArchive, ReaderError};
pub use writer::{AnnualWriter, WriterError};

use crate::time_utils::{Calendar, MonthWindow};
use chrono::NaiveDateTime;
use ndarray::{s, Array3, Axis};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fill value used for persisted outputs
pub const OUTPUT_FILL_VALUE: f32 = 1.0e20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("{name}: data has {data} time steps but the axis has {axis}")]
    AxisLength {
        name: String,
        data: usize,
        axis: usize,
    },

    #[error("{left} and {right} do not share the same time axis")]
    AxisMismatch { left: String, right: String },

    #[error("{left} has shape {left_shape:?} but {right} has shape {right_shape:?}")]
    ShapeMismatch {
        left: String,
        left_shape: (usize, usize, usize),
        right: String,
        right_shape: (usize, usize, usize),
    },

    #[error("{0}: time axis is not strictly increasing")]
    UnorderedAxis(String),

    #[error("Nothing to concatenate for {0}")]
    Empty(String),
}

/// Rectangular latitude/longitude domain shared by every field.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    /// Latitude coordinates (degrees)
    pub latitudes: Vec<f64>,
    /// Longitude coordinates (degrees)
    pub longitudes: Vec<f64>,
}

impl Grid {
    pub fn new(latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        Self {
            latitudes,
            longitudes,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes.len(), self.longitudes.len())
    }

    /// Both axes strictly increasing or strictly decreasing.
    pub fn is_monotonic(&self) -> bool {
        fn strict(values: &[f64]) -> bool {
            values.windows(2).all(|w| w[1] > w[0]) || values.windows(2).all(|w| w[1] < w[0])
        }
        strict(&self.latitudes) && strict(&self.longitudes)
    }
}

/// One physical quantity on a `(time, lat, lon)` array.
///
/// Every transformation returns a new `Field`; the data is never mutated in
/// place once a field has been handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub units: String,
    /// Calendar of the source time axis, used for calendar-aware resampling
    pub calendar: Calendar,
    pub times: Vec<NaiveDateTime>,
    pub data: Array3<f64>,
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        calendar: Calendar,
        times: Vec<NaiveDateTime>,
        data: Array3<f64>,
    ) -> Result<Self, FieldError> {
        let name = name.into();
        if data.len_of(Axis(0)) != times.len() {
            return Err(FieldError::AxisLength {
                name,
                data: data.len_of(Axis(0)),
                axis: times.len(),
            });
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FieldError::UnorderedAxis(name));
        }

        Ok(Self {
            name,
            units: units.into(),
            calendar,
            times,
            data,
        })
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Copy of the samples with `start <= t < end`.
    pub fn select(&self, start: NaiveDateTime, end: NaiveDateTime) -> Field {
        let i0 = self.times.partition_point(|t| *t < start);
        let i1 = self.times.partition_point(|t| *t < end).max(i0);

        Field {
            name: self.name.clone(),
            units: self.units.clone(),
            calendar: self.calendar,
            times: self.times[i0..i1].to_vec(),
            data: self.data.slice(s![i0..i1, .., ..]).to_owned(),
        }
    }

    /// New field on the same axis and calendar with replaced data.
    pub fn derive(&self, name: impl Into<String>, units: impl Into<String>, data: Array3<f64>) -> Result<Field, FieldError> {
        let name = name.into();
        if data.dim() != self.shape() {
            return Err(FieldError::ShapeMismatch {
                left: self.name.clone(),
                left_shape: self.shape(),
                right: name,
                right_shape: data.dim(),
            });
        }
        Ok(Field {
            name,
            units: units.into(),
            calendar: self.calendar,
            times: self.times.clone(),
            data,
        })
    }

    /// Fails unless both fields share the time axis and the array shape.
    pub fn ensure_aligned(&self, other: &Field) -> Result<(), FieldError> {
        if self.times != other.times {
            return Err(FieldError::AxisMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        if self.shape() != other.shape() {
            return Err(FieldError::ShapeMismatch {
                left: self.name.clone(),
                left_shape: self.shape(),
                right: other.name.clone(),
                right_shape: other.shape(),
            });
        }
        Ok(())
    }

    /// Spatial mean of one time step, ignoring non-finite values.
    pub fn spatial_mean(&self, index: usize) -> Option<f64> {
        let slab = self.data.index_axis(Axis(0), index);
        let (sum, count) = slab
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

/// Variables read from the model archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputVariable {
    Tas,
    Huss,
    Uas,
    Vas,
    Rsds,
    Rsus,
    Rlds,
    Rlus,
    Ps,
    Rsdsdir,
}

impl InputVariable {
    pub const ALL: [InputVariable; 10] = [
        InputVariable::Tas,
        InputVariable::Huss,
        InputVariable::Uas,
        InputVariable::Vas,
        InputVariable::Rsds,
        InputVariable::Rsus,
        InputVariable::Rlds,
        InputVariable::Rlus,
        InputVariable::Ps,
        InputVariable::Rsdsdir,
    ];

    /// Variable name, also used as directory and NetCDF variable name
    pub fn name(&self) -> &'static str {
        match self {
            InputVariable::Tas => "tas",
            InputVariable::Huss => "huss",
            InputVariable::Uas => "uas",
            InputVariable::Vas => "vas",
            InputVariable::Rsds => "rsds",
            InputVariable::Rsus => "rsus",
            InputVariable::Rlds => "rlds",
            InputVariable::Rlus => "rlus",
            InputVariable::Ps => "ps",
            InputVariable::Rsdsdir => "rsdsdir",
        }
    }

    /// Radiative variables are read with one extra day of leading padding.
    pub fn is_radiative(&self) -> bool {
        matches!(
            self,
            InputVariable::Rsds
                | InputVariable::Rsus
                | InputVariable::Rlds
                | InputVariable::Rlus
                | InputVariable::Rsdsdir
        )
    }
}

impl fmt::Display for InputVariable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Heat-stress quantities produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputVariable {
    NaturalWetBulb,
    BlackGlobe,
    Wbgt,
}

impl OutputVariable {
    pub const ALL: [OutputVariable; 3] = [
        OutputVariable::NaturalWetBulb,
        OutputVariable::BlackGlobe,
        OutputVariable::Wbgt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OutputVariable::NaturalWetBulb => "tnw",
            OutputVariable::BlackGlobe => "tg",
            OutputVariable::Wbgt => "wbgt",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            OutputVariable::NaturalWetBulb => "Natural Wet Bulb Temperature",
            OutputVariable::BlackGlobe => "Black Globe Temperature",
            OutputVariable::Wbgt => "Wet Bulb Globe Temperature",
        }
    }

    pub fn units(&self) -> &'static str {
        "degK"
    }
}

impl FromStr for OutputVariable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tnw" => Ok(OutputVariable::NaturalWetBulb),
            "tg" => Ok(OutputVariable::BlackGlobe),
            "wbgt" => Ok(OutputVariable::Wbgt),
            other => Err(format!("Unknown output variable: {}", other)),
        }
    }
}

impl fmt::Display for OutputVariable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A derived heat-stress series stored as 32-bit floats.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputField {
    pub variable: OutputVariable,
    pub times: Vec<NaiveDateTime>,
    pub data: Array3<f32>,
}

impl OutputField {
    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Concatenate monthly pieces along time, in the order given.
    ///
    /// The joined axis must stay strictly increasing, so a month that is
    /// missing or out of order is an error rather than a silent gap.
    pub fn concat(parts: Vec<OutputField>) -> Result<OutputField, FieldError> {
        let variable = parts
            .first()
            .map(|p| p.variable)
            .ok_or_else(|| FieldError::Empty("output series".to_string()))?;

        let mut times = Vec::with_capacity(parts.iter().map(|p| p.n_times()).sum());
        for part in &parts {
            if part.variable != variable {
                return Err(FieldError::AxisMismatch {
                    left: variable.name().to_string(),
                    right: part.variable.name().to_string(),
                });
            }
            times.extend_from_slice(&part.times);
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FieldError::UnorderedAxis(variable.name().to_string()));
        }

        let views: Vec<_> = parts.iter().map(|p| p.data.view()).collect();
        let data = ndarray::concatenate(Axis(0), &views).map_err(|_| {
            let first = parts[0].data.dim();
            let bad = parts
                .iter()
                .map(|p| p.data.dim())
                .find(|d| (d.1, d.2) != (first.1, first.2))
                .unwrap_or(first);
            FieldError::ShapeMismatch {
                left: variable.name().to_string(),
                left_shape: first,
                right: variable.name().to_string(),
                right_shape: bad,
            }
        })?;

        Ok(OutputField {
            variable,
            times,
            data,
        })
    }
}

/// All inputs needed for one month, as a statically typed record.
///
/// Meteorological fields cover the month itself; radiative fields also carry
/// the last day of the previous month in their own calendar.
#[derive(Debug, Clone)]
pub struct MonthInputs {
    pub window: MonthWindow,
    pub grid: Grid,
    pub tas: Field,
    pub huss: Field,
    pub ps: Field,
    pub uas: Field,
    pub vas: Field,
    pub rsds: Field,
    pub rsus: Field,
    pub rlds: Field,
    pub rlus: Field,
    pub rsdsdir: Field,
}

/// Anything that can hand out windows of the input variables.
pub trait FieldSource: Sync {
    /// Variables this source can serve
    fn available(&self) -> Vec<InputVariable>;

    /// Shared spatial grid
    fn grid(&self) -> Result<Grid, ReaderError>;

    /// Samples of `variable` with `start <= t < end`
    fn load(
        &self,
        variable: InputVariable,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Field, ReaderError>;

    /// Load every variable needed for `window`.
    fn load_month(&self, window: &MonthWindow) -> Result<MonthInputs, ReaderError> {
        let available = self.available();
        if available.is_empty() {
            return Err(ReaderError::NoInputs);
        }
        if let Some(missing) = InputVariable::ALL.iter().find(|v| !available.contains(v)) {
            return Err(ReaderError::MissingVariable(missing.name().to_string()));
        }

        let grid = self.grid()?;
        let fetch = |variable: InputVariable| -> Result<Field, ReaderError> {
            let (start, field) = if variable.is_radiative() {
                // The padding day depends on the field's own calendar
                let field = self.load(variable, window.lookback_start, window.end)?;
                let start = window.padded_start(field.calendar);
                (start, field.select(start, window.end))
            } else {
                (window.start, self.load(variable, window.start, window.end)?)
            };
            if field.n_times() == 0 {
                return Err(ReaderError::EmptyWindow {
                    variable: variable.name().to_string(),
                    start,
                    end: window.end,
                });
            }
            let (_, ny, nx) = field.shape();
            if (ny, nx) != grid.shape() {
                return Err(ReaderError::GridMismatch(variable.name().to_string()));
            }
            Ok(field)
        };

        Ok(MonthInputs {
            window: *window,
            tas: fetch(InputVariable::Tas)?,
            huss: fetch(InputVariable::Huss)?,
            ps: fetch(InputVariable::Ps)?,
            uas: fetch(InputVariable::Uas)?,
            vas: fetch(InputVariable::Vas)?,
            rsds: fetch(InputVariable::Rsds)?,
            rsus: fetch(InputVariable::Rsus)?,
            rlds: fetch(InputVariable::Rlds)?,
            rlus: fetch(InputVariable::Rlus)?,
            rsdsdir: fetch(InputVariable::Rsdsdir)?,
            grid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hours(n: usize) -> Vec<NaiveDateTime> {
        let t0 = NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n).map(|i| t0 + chrono::Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_field_rejects_axis_length_mismatch() {
        let result = Field::new("tas", "K", Calendar::Standard, hours(3), Array3::zeros((2, 1, 1)));
        assert!(matches!(result, Err(FieldError::AxisLength { .. })));
    }

    #[test]
    fn test_select_is_half_open() {
        let times = hours(6);
        let data = Array3::from_shape_fn((6, 1, 1), |(t, _, _)| t as f64);
        let field = Field::new("tas", "K", Calendar::Standard, times.clone(), data).unwrap();
        let window = field.select(times[1], times[4]);
        assert_eq!(window.n_times(), 3);
        assert_eq!(window.data[[0, 0, 0]], 1.0);
        assert_eq!(window.data[[2, 0, 0]], 3.0);
    }

    #[test]
    fn test_concat_rejects_out_of_order_months() {
        let times = hours(4);
        let a = OutputField {
            variable: OutputVariable::Wbgt,
            times: times[2..].to_vec(),
            data: Array3::zeros((2, 1, 1)),
        };
        let b = OutputField {
            variable: OutputVariable::Wbgt,
            times: times[..2].to_vec(),
            data: Array3::zeros((2, 1, 1)),
        };
        assert!(matches!(
            OutputField::concat(vec![a, b]),
            Err(FieldError::UnorderedAxis(_))
        ));
    }

    #[test]
    fn test_output_variable_metadata() {
        assert_eq!(OutputVariable::Wbgt.name(), "wbgt");
        assert_eq!(OutputVariable::BlackGlobe.long_name(), "Black Globe Temperature");
        assert_eq!(OutputVariable::NaturalWetBulb.units(), "degK");
        assert_eq!("TG".parse::<OutputVariable>().unwrap(), OutputVariable::BlackGlobe);
    }
}
