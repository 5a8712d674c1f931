use crate::data_io::{Field, FieldError};
use ndarray::{Array3, Zip};

/// Ratio of the molecular weights of water vapour and dry air
pub const EPSILON: f64 = 0.622;

/// Vapour pressure (same units as `surface_pressure`) from specific humidity.
///
/// Defined for `0 <= q < 1`; slightly negative model humidities are treated
/// as dry air and `q >= 1` yields NaN.
pub fn vapor_pressure(specific_humidity: f64, surface_pressure: f64) -> f64 {
    let q = specific_humidity.max(0.0);
    if q >= 1.0 {
        return f64::NAN;
    }
    let r = q / (1.0 - q);
    surface_pressure * r / (EPSILON + r)
}

/// Scalar wind speed from its two horizontal components
pub fn wind_speed(u: f64, v: f64) -> f64 {
    u.hypot(v)
}

fn binary_field<F>(a: &Field, b: &Field, name: &str, units: &str, op: F) -> Result<Field, FieldError>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    a.ensure_aligned(b)?;
    let mut data = Array3::<f64>::zeros(a.shape());
    Zip::from(&mut data)
        .and(&a.data)
        .and(&b.data)
        .par_for_each(|out, &x, &y| *out = op(x, y));
    a.derive(name, units, data)
}

/// Vapour pressure field (Pa) from `huss` and `ps`
pub fn vapor_pressure_field(huss: &Field, ps: &Field) -> Result<Field, FieldError> {
    binary_field(huss, ps, "ea", &ps.units, vapor_pressure)
}

/// 10 m wind speed field from `uas` and `vas`
pub fn wind_speed_field(uas: &Field, vas: &Field) -> Result<Field, FieldError> {
    binary_field(uas, vas, "wind10m", &uas.units, wind_speed)
}
