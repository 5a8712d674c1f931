//! Solar geometry on the model grid.
//!
//! Declination and the equation of time follow the NOAA fractional-year
//! series. The hour angle is taken from UTC time and longitude, so no time
//! zone information is needed.

use crate::parallel::map_time_blocks_concat;
use crate::time_utils::fractional_hour;
use chrono::{Datelike, NaiveDateTime};
use ndarray::{Array2, Array3, Zip};
use std::f64::consts::PI;

/// Window-mean cosine returned when the sun stays down for the whole window
pub const NO_SUN_SENTINEL: f64 = -0.5;

/// Latitude/longitude meshgrid in radians, shaped `(lat, lon)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RadianGrid {
    pub lat: Array2<f64>,
    pub lon: Array2<f64>,
}

impl RadianGrid {
    pub fn shape(&self) -> (usize, usize) {
        self.lat.dim()
    }
}

/// Outer-product meshgrid of the coordinates, converted to radians.
pub fn to_radian_grid(latitudes: &[f64], longitudes: &[f64]) -> RadianGrid {
    let shape = (latitudes.len(), longitudes.len());
    RadianGrid {
        lat: Array2::from_shape_fn(shape, |(i, _)| latitudes[i].to_radians()),
        lon: Array2::from_shape_fn(shape, |(_, j)| longitudes[j].to_radians()),
    }
}

/// Sun position terms that only depend on time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// Declination (radians)
    pub declination: f64,
    /// Equation of time (minutes)
    pub equation_of_time: f64,
}

impl SolarPosition {
    pub fn at(t: &NaiveDateTime) -> Self {
        let days_in_year = if crate::time_utils::is_leap_year(t.year()) {
            366.0
        } else {
            365.0
        };
        let gamma = 2.0 * PI / days_in_year * (t.ordinal0() as f64 + (fractional_hour(t) - 12.0) / 24.0);

        let equation_of_time = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());

        let declination = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();

        Self {
            declination,
            equation_of_time,
        }
    }

    /// Hour angle (radians, zero at solar noon) for a UTC time and longitude.
    pub fn hour_angle(&self, t: &NaiveDateTime, lon: f64) -> f64 {
        let true_solar_minutes = fractional_hour(t) * 60.0 + self.equation_of_time + 4.0 * lon.to_degrees();
        (true_solar_minutes / 4.0 - 180.0).to_radians()
    }
}

/// Sunset hour angle; 0 during polar night and π during polar day.
pub fn sunset_hour_angle(lat: f64, declination: f64) -> f64 {
    let x = -lat.tan() * declination.tan();
    if x >= 1.0 {
        0.0
    } else if x <= -1.0 {
        PI
    } else {
        x.acos()
    }
}

/// Wrap an angle into `[-π, π)`.
fn wrap_angle(h: f64) -> f64 {
    (h + PI).rem_euclid(2.0 * PI) - PI
}

/// Cosine of the zenith angle, averaged over the sunlit part of a window.
///
/// The window spans `step_hours` centred on the hour angle `h`. When the sun
/// is down for the whole window the instantaneous value at `h` is returned.
pub fn mean_cos_zenith(lat: f64, declination: f64, h: f64, step_hours: f64) -> f64 {
    let a = lat.sin() * declination.sin();
    let b = lat.cos() * declination.cos();
    let h = wrap_angle(h);
    let instant = a + b * h.cos();

    let half = 0.5 * step_hours * PI / 12.0;
    if half <= 0.0 {
        return instant;
    }
    let (w0, w1) = (h - half, h + half);
    let h0 = sunset_hour_angle(lat, declination);

    let mut integral = 0.0;
    let mut sunlit = 0.0;
    for k in [-1.0, 0.0, 1.0] {
        let lo = w0.max(-h0 + 2.0 * PI * k);
        let hi = w1.min(h0 + 2.0 * PI * k);
        if hi > lo {
            integral += a * (hi - lo) + b * (hi.sin() - lo.sin());
            sunlit += hi - lo;
        }
    }

    if sunlit > 0.0 {
        integral / sunlit
    } else {
        instant
    }
}

/// Cosine of the zenith angle at every cell for one time.
pub fn cos_zenith_instant(t: &NaiveDateTime, grid: &RadianGrid) -> Array2<f64> {
    let sun = SolarPosition::at(t);
    let mut out = Array2::zeros(grid.shape());
    Zip::from(&mut out)
        .and(&grid.lat)
        .and(&grid.lon)
        .for_each(|c, &lat, &lon| {
            *c = lat.sin() * sun.declination.sin()
                + lat.cos() * sun.declination.cos() * sun.hour_angle(t, lon).cos();
        });
    out
}

/// Zenith cosine averaged over the sunlit part of a `step_hours` window
/// centred on `t`, at every cell.
///
/// Values are either strictly positive or exactly [`NO_SUN_SENTINEL`] when
/// the sun stays below the horizon for the whole window.
pub fn cos_zenith_day_avg(t: &NaiveDateTime, grid: &RadianGrid, step_hours: f64) -> Array2<f64> {
    let sun = SolarPosition::at(t);
    let mut out = Array2::zeros(grid.shape());
    Zip::from(&mut out)
        .and(&grid.lat)
        .and(&grid.lon)
        .for_each(|c, &lat, &lon| {
            let mean = mean_cos_zenith(lat, sun.declination, sun.hour_angle(t, lon), step_hours);
            *c = if mean > 0.0 { mean } else { NO_SUN_SENTINEL };
        });
    out
}

/// Zenith geometry for a whole time axis.
#[derive(Debug, Clone)]
pub struct ZenithFields {
    /// Instantaneous cosine, `(time, lat, lon)`
    pub cza: Array3<f64>,
    /// Sunlit-window mean cosine with the no-sun sentinel, `(time, lat, lon)`
    pub czda: Array3<f64>,
}

fn stack_slabs<F>(times: &[NaiveDateTime], grid: &RadianGrid, block_size: usize, slab: F) -> Array3<f64>
where
    F: Fn(&NaiveDateTime) -> Array2<f64> + Sync + Send,
{
    let (ny, nx) = grid.shape();
    let result: Result<Array3<f64>, std::convert::Infallible> =
        map_time_blocks_concat(times.len(), (ny, nx), block_size, |range| {
            let mut block = Array3::zeros((range.len(), ny, nx));
            for (mut out, t) in block.outer_iter_mut().zip(&times[range]) {
                out.assign(&slab(t));
            }
            Ok(block)
        });
    match result {
        Ok(array) => array,
        Err(never) => match never {},
    }
}

/// Compute both zenith fields block-wise over `times`.
pub fn zenith_fields(times: &[NaiveDateTime], grid: &RadianGrid, step_hours: f64, block_size: usize) -> ZenithFields {
    ZenithFields {
        cza: stack_slabs(times, grid, block_size, |t| cos_zenith_instant(t, grid)),
        czda: stack_slabs(times, grid, block_size, |t| cos_zenith_day_avg(t, grid, step_hours)),
    }
}
