use super::interpolate::{interpolate_hourly, InterpolationError};
use crate::data_io::{Field, FieldError, MonthInputs};
use chrono::{Datelike, NaiveDateTime, Timelike};
use ndarray::{Array3, Axis, Zip};
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound on the diffuse fraction
pub const MAX_DIFFUSE_FRACTION: f64 = 0.9;

/// Solar zenith angle beyond which the sun counts as set (degrees)
pub const HORIZON_ZENITH_DEG: f64 = 89.5;

/// Cosine of [`HORIZON_ZENITH_DEG`]
pub fn horizon_cosine() -> f64 {
    HORIZON_ZENITH_DEG.to_radians().cos()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadiationError {
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// A source-specific repair applied to native direct radiation before use.
pub trait BoundaryCorrection: Send + Sync {
    fn name(&self) -> &str;

    /// Return a corrected copy; the input field is left untouched.
    fn apply(&self, field: &Field) -> Field;
}

/// Repairs the corrupted sample at 00:30 on the first day of each month.
///
/// The sample is replaced by the mean of its immediate neighbours on the
/// native axis. A flagged sample without both neighbours is kept as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstOfMonthHalfHourFix;

impl FirstOfMonthHalfHourFix {
    pub fn is_target(t: &NaiveDateTime) -> bool {
        t.day() == 1 && t.hour() == 0 && t.minute() == 30
    }
}

impl BoundaryCorrection for FirstOfMonthHalfHourFix {
    fn name(&self) -> &str {
        "first-of-month 00:30 repair"
    }

    fn apply(&self, field: &Field) -> Field {
        let mut fixed = field.clone();
        let n = field.n_times();

        for (i, t) in field.times.iter().enumerate() {
            if !Self::is_target(t) {
                continue;
            }
            if i == 0 || i + 1 >= n {
                warn!("{}: no neighbours to repair sample at {}", field.name, t);
                continue;
            }

            let before = field.spatial_mean(i);
            let prev = field.data.index_axis(Axis(0), i - 1);
            let next = field.data.index_axis(Axis(0), i + 1);
            Zip::from(fixed.data.index_axis_mut(Axis(0), i))
                .and(&prev)
                .and(&next)
                .for_each(|v, &a, &b| *v = 0.5 * (a + b));

            info!(
                "{} at {}: spatial mean {:?} before fix, {:?} after",
                field.name,
                t,
                before,
                fixed.spatial_mean(i)
            );
        }

        fixed
    }
}

/// Diffuse shortwave as global minus direct, on the native axis.
pub fn diffuse_radiation(rsds: &Field, rsdsdir: &Field) -> Result<Field, FieldError> {
    rsds.ensure_aligned(rsdsdir)?;
    let data = &rsds.data - &rsdsdir.data;
    rsds.derive("rsdsdiff", rsds.units.clone(), data)
}

/// Single-point diffuse fraction with horizon and positivity masking.
///
/// `rsdsdiff` is the diffuse component; the value is zero whenever the sun
/// is at or below the horizon cutoff or there is no downwelling shortwave.
pub fn diffuse_fraction_value(rsds: f64, rsdsdiff: f64, cza: f64) -> f64 {
    if cza <= horizon_cosine() || rsds <= 0.0 || !rsds.is_finite() {
        return 0.0;
    }
    let f = (rsds - rsdsdiff) / rsds;
    if f.is_nan() {
        0.0
    } else {
        f.clamp(0.0, MAX_DIFFUSE_FRACTION)
    }
}

/// Diffuse fraction field from hourly global and diffuse shortwave.
pub fn diffuse_fraction(rsds: &Field, rsdsdiff: &Field, cza: &Array3<f64>) -> Result<Field, FieldError> {
    rsds.ensure_aligned(rsdsdiff)?;
    if cza.dim() != rsds.shape() {
        return Err(FieldError::ShapeMismatch {
            left: rsds.name.clone(),
            left_shape: rsds.shape(),
            right: "cza".to_string(),
            right_shape: cza.dim(),
        });
    }

    let mut data = Array3::<f64>::zeros(rsds.shape());
    Zip::from(&mut data)
        .and(&rsds.data)
        .and(&rsdsdiff.data)
        .and(cza)
        .par_for_each(|f, &sw, &diff, &cz| *f = diffuse_fraction_value(sw, diff, cz));

    rsds.derive("f", "1", data)
}

/// Hourly radiation components for one month.
#[derive(Debug, Clone)]
pub struct RadiationFields {
    pub rsds: Field,
    pub rsus: Field,
    pub rlds: Field,
    pub rlus: Field,
    pub rsdsdir: Field,
    pub rsdsdiff: Field,
}

impl RadiationFields {
    pub fn n_times(&self) -> usize {
        self.rsds.n_times()
    }
}

/// Repair, split and resample the radiative inputs of one month.
///
/// `corrections` run in order on the native direct-beam field before the
/// diffuse residual is formed. Diffuse radiation is resampled on the
/// calendar of `rsds`, each other component on its own calendar.
pub fn reconstruct_radiation(
    inputs: &MonthInputs,
    corrections: &[Box<dyn BoundaryCorrection>],
) -> Result<RadiationFields, RadiationError> {
    let (year, month) = (inputs.window.year, inputs.window.month);

    let mut rsdsdir = inputs.rsdsdir.clone();
    for correction in corrections {
        info!("Applying {} to {}", correction.name(), rsdsdir.name);
        rsdsdir = correction.apply(&rsdsdir);
    }

    let rsdsdiff = diffuse_radiation(&inputs.rsds, &rsdsdir)?;

    Ok(RadiationFields {
        rsds: interpolate_hourly(&inputs.rsds, year, month)?,
        rsus: interpolate_hourly(&inputs.rsus, year, month)?,
        rlds: interpolate_hourly(&inputs.rlds, year, month)?,
        rlus: interpolate_hourly(&inputs.rlus, year, month)?,
        rsdsdir: interpolate_hourly(&rsdsdir, year, month)?,
        rsdsdiff: interpolate_hourly(&rsdsdiff, year, month)?,
    })
}
