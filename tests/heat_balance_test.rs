use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ndarray::Array3;
use wbgt_rust::data_io::{Field, FieldError};
use wbgt_rust::heat_balance::{
    evaluate_heat_balance, wbgt_index, HeatBalanceError, HeatBalanceInputs, HeatBalanceSolver,
    LiljegrenSolver, PointInputs, SolverError,
};
use wbgt_rust::time_utils::Calendar;

fn sunny_noon() -> PointInputs {
    PointInputs {
        tas: 300.0,
        ea: 1500.0,
        ps: 100000.0,
        wind2m: 1.0,
        cza: 0.9,
        czda: 0.6,
        rsds: 900.0,
        rsus: 150.0,
        rlds: 400.0,
        rlus: 470.0,
        f: 0.7,
    }
}

fn dry_night() -> PointInputs {
    PointInputs {
        tas: 300.0,
        ea: 1000.0,
        ps: 100000.0,
        wind2m: 2.0,
        cza: -0.4,
        czda: -0.5,
        rsds: 0.0,
        rsus: 0.0,
        rlds: 380.0,
        rlus: 460.0,
        f: 0.0,
    }
}

#[test]
fn test_wbgt_weights() {
    assert_relative_eq!(wbgt_index(300.0, 320.0, 305.0), 304.5, epsilon = 1e-9);
}

#[test]
fn test_sunny_globe_above_air_temperature() {
    let solver = LiljegrenSolver::default();
    let out = solver.evaluate(&sunny_noon()).unwrap();
    assert!(out.tg > 305.0 && out.tg < 340.0, "tg = {}", out.tg);
    assert!(out.tnw < out.tg);
    assert!(out.wbgt > out.tnw && out.wbgt < out.tg);
    assert_relative_eq!(out.wbgt, wbgt_index(out.tnw, out.tg, 300.0), epsilon = 1e-9);
}

#[test]
fn test_dry_night_wet_bulb_below_air_temperature() {
    let solver = LiljegrenSolver::default();
    let tnw = solver.natural_wet_bulb(&dry_night()).unwrap();
    assert!(tnw > 280.0 && tnw < 295.0, "tnw = {}", tnw);
}

#[test]
fn test_more_sun_means_hotter_globe() {
    let solver = LiljegrenSolver::default();
    let mut weak = sunny_noon();
    weak.rsds = 300.0;
    weak.rsus = 50.0;
    assert!(solver.black_globe(&weak).unwrap() < solver.black_globe(&sunny_noon()).unwrap());
}

#[test]
fn test_non_finite_input_is_an_error() {
    let solver = LiljegrenSolver::default();
    let mut p = sunny_noon();
    p.rlds = f64::NAN;
    assert!(matches!(
        solver.black_globe(&p),
        Err(SolverError::NonFiniteInput { name: "rlds", .. })
    ));
}

/// Fails wherever the air temperature is above a threshold
struct ThresholdSolver(f64);

impl HeatBalanceSolver for ThresholdSolver {
    fn wind_2m(&self, wind10m: f64, _czda: f64, _rsds: f64) -> f64 {
        wind10m
    }

    fn natural_wet_bulb(&self, p: &PointInputs) -> Result<f64, SolverError> {
        if p.tas > self.0 {
            Err(SolverError::NoConvergence {
                quantity: "wick",
                iterations: 1,
            })
        } else {
            Ok(p.tas - 5.0)
        }
    }

    fn black_globe(&self, p: &PointInputs) -> Result<f64, SolverError> {
        Ok(p.tas + 10.0)
    }
}

fn hours(n: usize) -> Vec<NaiveDateTime> {
    let t0 = NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n).map(|i| t0 + Duration::hours(i as i64)).collect()
}

fn constant(name: &str, n: usize, value: f64) -> Field {
    Field::new(name, "", Calendar::Standard, hours(n), Array3::from_elem((n, 2, 2), value)).unwrap()
}

#[test]
fn test_field_evaluation_and_fail_fast() {
    let n = 50;
    let tas = constant("tas", n, 300.0);
    let (ea, ps, wind) = (constant("ea", n, 1500.0), constant("ps", n, 1e5), constant("wind2m", n, 1.0));
    let (rsds, rsus) = (constant("rsds", n, 0.0), constant("rsus", n, 0.0));
    let (rlds, rlus) = (constant("rlds", n, 400.0), constant("rlus", n, 460.0));
    let f = constant("f", n, 0.0);
    let cz = Array3::from_elem((n, 2, 2), 0.3);

    let inputs = HeatBalanceInputs {
        tas: &tas,
        ea: &ea,
        ps: &ps,
        wind2m: &wind,
        cza: &cz,
        czda: &cz,
        rsds: &rsds,
        rsus: &rsus,
        rlds: &rlds,
        rlus: &rlus,
        f: &f,
    };
    let out = evaluate_heat_balance(&ThresholdSolver(310.0), &inputs, 24).unwrap();
    assert_eq!(out.wbgt.dim(), (n, 2, 2));
    assert!(out.wbgt.iter().all(|&v| (v as f64 - 298.5).abs() < 1e-3));
    assert_eq!(out.times, tas.times);

    let mut hot = tas.clone();
    hot.data[[30, 1, 0]] = 320.0;
    let inputs = HeatBalanceInputs { tas: &hot, ..inputs };
    match evaluate_heat_balance(&ThresholdSolver(310.0), &inputs, 24) {
        Err(HeatBalanceError::Point { time, lat, lon, .. }) => {
            assert_eq!(time, tas.times[30]);
            assert_eq!((lat, lon), (1, 0));
        }
        other => panic!("expected a point failure, got {:?}", other),
    }
}

#[test]
fn test_misaligned_inputs_rejected() {
    let tas = constant("tas", 24, 300.0);
    let short = constant("ea", 23, 1500.0);
    let cz = Array3::from_elem((24, 2, 2), 0.3);
    let inputs = HeatBalanceInputs {
        tas: &tas,
        ea: &short,
        ps: &tas,
        wind2m: &tas,
        cza: &cz,
        czda: &cz,
        rsds: &tas,
        rsus: &tas,
        rlds: &tas,
        rlus: &tas,
        f: &tas,
    };
    assert!(matches!(
        evaluate_heat_balance(&LiljegrenSolver::default(), &inputs, 24),
        Err(HeatBalanceError::Field(FieldError::AxisMismatch { .. }))
    ));
}
