use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ndarray::Array3;
use wbgt_rust::data_io::Field;
use wbgt_rust::math::{
    diffuse_fraction, diffuse_radiation, horizon_cosine, interpolate_hourly, interpolate_to_axis,
    BoundaryCorrection, FirstOfMonthHalfHourFix, InterpolationError, MAX_DIFFUSE_FRACTION,
};
use wbgt_rust::time_utils::Calendar;

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// Three-hourly samples from the last day of January through early March
fn three_hourly(calendar: Calendar) -> Field {
    let start = at(2030, 1, 31, 0, 0);
    let times: Vec<_> = (0..(30 * 8))
        .map(|i| start + Duration::hours(3 * i))
        .collect();
    let n = times.len();
    let data = Array3::from_shape_fn((n, 2, 2), |(t, i, j)| (t * 10 + i + j) as f64);
    Field::new("rsds", "W m-2", calendar, times, data).unwrap()
}

#[test]
fn test_interpolation_exact_at_native_points() {
    let field = three_hourly(Calendar::Standard);
    let hourly = interpolate_hourly(&field, 2030, 2).unwrap();
    assert_eq!(hourly.n_times(), 28 * 24);

    for (k, t) in hourly.times.iter().enumerate() {
        if let Some(native) = field.times.iter().position(|x| x == t) {
            assert_eq!(hourly.data[[k, 1, 0]], field.data[[native, 1, 0]]);
        }
    }
}

#[test]
fn test_interpolation_linear_between_points() {
    let field = three_hourly(Calendar::Standard);
    let hourly = interpolate_hourly(&field, 2030, 2).unwrap();
    // 2030-02-01 01:00 lies one third of the way from 00:00 to 03:00
    let native = field.times.iter().position(|t| *t == at(2030, 2, 1, 0, 0)).unwrap();
    let a = field.data[[native, 0, 1]];
    let b = field.data[[native + 1, 0, 1]];
    assert_relative_eq!(hourly.data[[1, 0, 1]], a + (b - a) / 3.0, epsilon = 1e-12);
    assert_eq!(hourly.calendar, Calendar::Standard);
}

#[test]
fn test_interpolation_refuses_to_extrapolate() {
    let field = three_hourly(Calendar::Standard);
    let result = interpolate_hourly(&field, 2030, 4);
    assert!(matches!(result, Err(InterpolationError::OutOfRange { .. })));

    let early = interpolate_to_axis(&field, &[at(2030, 1, 30, 0, 0)]);
    assert!(matches!(early, Err(InterpolationError::OutOfRange { .. })));
}

#[test]
fn test_boundary_fix_only_touches_first_of_month_half_hour() {
    let start = at(2030, 2, 28, 22, 30);
    let times: Vec<_> = (0..6).map(|i| start + Duration::hours(i)).collect();
    let data = Array3::from_shape_fn((6, 1, 2), |(t, _, j)| (t * t) as f64 + j as f64 * 0.5 + 0.1);
    let field = Field::new("rsdsdir", "W m-2", Calendar::Standard, times, data).unwrap();

    let fixed = FirstOfMonthHalfHourFix.apply(&field);
    let target = fixed.times.iter().position(|t| *t == at(2030, 3, 1, 0, 30)).unwrap();
    assert_eq!(target, 2);

    for t in 0..6 {
        for j in 0..2 {
            if t == target {
                let expected = (field.data[[t - 1, 0, j]] + field.data[[t + 1, 0, j]]) / 2.0;
                assert_eq!(fixed.data[[t, 0, j]], expected);
            } else {
                assert_eq!(fixed.data[[t, 0, j]].to_bits(), field.data[[t, 0, j]].to_bits());
            }
        }
    }
    // Input is left untouched
    assert_eq!(field.data[[2, 0, 0]], 4.1);
}

#[test]
fn test_boundary_fix_without_neighbour_keeps_sample() {
    let times = vec![at(2030, 3, 1, 0, 30), at(2030, 3, 1, 1, 30)];
    let data = Array3::from_shape_vec((2, 1, 1), vec![999.0, 1.0]).unwrap();
    let field = Field::new("rsdsdir", "W m-2", Calendar::Standard, times, data).unwrap();
    assert_eq!(FirstOfMonthHalfHourFix.apply(&field), field);
}

#[test]
fn test_diffuse_fraction_bounds_and_masks() {
    let times = vec![at(2030, 1, 1, 0, 0), at(2030, 1, 1, 1, 0)];
    // Cells: zero radiation, sun below the cutoff, normal, diffuse > global
    let rsds = Array3::from_shape_vec((2, 1, 4), vec![0.0, 500.0, 500.0, 100.0, 0.0, 800.0, 800.0, 50.0]).unwrap();
    let rsdsdir = Array3::from_shape_vec((2, 1, 4), vec![0.0, 300.0, 300.0, -60.0, 0.0, 790.0, 790.0, -10.0]).unwrap();
    let cza = Array3::from_shape_vec(
        (2, 1, 4),
        vec![0.5, horizon_cosine(), 0.5, 0.5, 0.5, 0.0, 0.9, 0.9],
    )
    .unwrap();

    let rsds = Field::new("rsds", "W m-2", Calendar::Standard, times.clone(), rsds).unwrap();
    let rsdsdir = Field::new("rsdsdir", "W m-2", Calendar::Standard, times, rsdsdir).unwrap();
    let rsdsdiff = diffuse_radiation(&rsds, &rsdsdir).unwrap();
    let f = diffuse_fraction(&rsds, &rsdsdiff, &cza).unwrap();

    assert!(f.data.iter().all(|v| v.is_finite() && (0.0..=MAX_DIFFUSE_FRACTION).contains(v)));
    assert_eq!(f.data[[0, 0, 0]], 0.0);
    assert_eq!(f.data[[0, 0, 1]], 0.0);
    assert_relative_eq!(f.data[[0, 0, 2]], 0.6, epsilon = 1e-12);
    assert_eq!(f.data[[0, 0, 3]], 0.0);
    assert_eq!(f.data[[1, 0, 1]], 0.0);
    assert_eq!(f.data[[1, 0, 2]], MAX_DIFFUSE_FRACTION);
}

#[test]
fn test_noleap_interpolation_bridges_february_in_leap_year() {
    // Half-hourly samples either side of a 365-day month boundary in 2024
    let times = vec![at(2024, 2, 28, 23, 30), at(2024, 3, 1, 0, 30)];
    let data = Array3::from_shape_vec((2, 1, 1), vec![100.0, 200.0]).unwrap();
    let field = Field::new("rsds", "W m-2", Calendar::NoLeap, times, data).unwrap();

    let hourly = interpolate_to_axis(&field, &[at(2024, 3, 1, 0, 0)]).unwrap();
    assert_relative_eq!(hourly.data[[0, 0, 0]], 150.0, epsilon = 1e-12);
}
