use crate::data_io::{Field, FieldError};
use crate::time_utils::{calendar_seconds, hourly_axis, TimeError};
use chrono::NaiveDateTime;
use ndarray::{Array3, Axis, Zip};
use num_traits::Float;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("{0}: cannot interpolate a field without samples")]
    Empty(String),

    /// Targets must lie inside the native axis; callers pad the source window.
    #[error("{name}: target {target} lies outside the native range {first} to {last}")]
    OutOfRange {
        name: String,
        target: NaiveDateTime,
        first: NaiveDateTime,
        last: NaiveDateTime,
    },

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Generic linear interpolation between two values
pub fn lin_interp<T: Float>(v0: T, v1: T, fac: T) -> T {
    v0 + (v1 - v0) * fac
}

/// Bracketing samples and weight for one target time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub lower: usize,
    pub upper: usize,
    /// Weight of the upper sample; zero on an exact native match
    pub fac: f64,
}

/// Locate every target on the native axis (both given as epoch seconds).
///
/// Returns the index of the first target outside the native range on failure.
pub fn brackets(native: &[i64], targets: &[i64]) -> Result<Vec<Bracket>, usize> {
    let (Some(&first), Some(&last)) = (native.first(), native.last()) else {
        return Err(0);
    };

    targets
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            if t < first || t > last {
                return Err(i);
            }
            let upper = native.partition_point(|&x| x < t);
            if native[upper] == t {
                return Ok(Bracket {
                    lower: upper,
                    upper,
                    fac: 0.0,
                });
            }
            let lower = upper - 1;
            let fac = (t - native[lower]) as f64 / (native[upper] - native[lower]) as f64;
            Ok(Bracket { lower, upper, fac })
        })
        .collect()
}

/// Linearly resample `field` onto `targets`.
///
/// Every target must lie within the field's own time range; nothing is
/// extrapolated or clamped. Weights are measured in the field's calendar.
/// Time slabs are filled in parallel.
pub fn interpolate_to_axis(field: &Field, targets: &[NaiveDateTime]) -> Result<Field, InterpolationError> {
    if field.n_times() == 0 {
        return Err(InterpolationError::Empty(field.name.clone()));
    }

    let to_seconds = |t: &NaiveDateTime| calendar_seconds(t, field.calendar);
    let native: Vec<i64> = field.times.iter().map(to_seconds).collect();
    let target_secs: Vec<i64> = targets.iter().map(to_seconds).collect();
    let weights = brackets(&native, &target_secs).map_err(|i| InterpolationError::OutOfRange {
        name: field.name.clone(),
        target: targets[i],
        first: field.times[0],
        last: field.times[field.n_times() - 1],
    })?;

    let (_, ny, nx) = field.shape();
    let mut data = Array3::<f64>::zeros((targets.len(), ny, nx));
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(weights.par_iter())
        .for_each(|(mut slab, b)| {
            let v0 = field.data.index_axis(Axis(0), b.lower);
            if b.lower == b.upper {
                slab.assign(&v0);
                return;
            }
            let v1 = field.data.index_axis(Axis(0), b.upper);
            Zip::from(&mut slab)
                .and(&v0)
                .and(&v1)
                .for_each(|out, &a, &b1| *out = lin_interp(a, b1, b.fac));
        });

    Ok(Field::new(
        field.name.clone(),
        field.units.clone(),
        field.calendar,
        targets.to_vec(),
        data,
    )?)
}

/// Resample `field` onto the hourly axis of one month.
///
/// The axis follows the field's own calendar, so Feb-29 is absent for
/// non-standard calendars. The native axis must bracket the whole month.
pub fn interpolate_hourly(field: &Field, year: i32, month: u32) -> Result<Field, InterpolationError> {
    let axis = hourly_axis(year, month, field.calendar)?;
    interpolate_to_axis(field, &axis)
}
