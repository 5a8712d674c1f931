pub mod liljegren;

pub use liljegren::LiljegrenSolver;

use crate::data_io::{Field, FieldError};
use crate::parallel::map_time_blocks;
use chrono::NaiveDateTime;
use ndarray::{s, Array3, Axis, Zip};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Input {name} is not finite ({value})")]
    NonFiniteInput { name: &'static str, value: f64 },

    #[error("{quantity} temperature did not converge in {iterations} iterations")]
    NoConvergence {
        quantity: &'static str,
        iterations: usize,
    },

    #[error("Non-physical {quantity} state: {value}")]
    NonPhysical { quantity: &'static str, value: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeatBalanceError {
    #[error("Heat balance failed at {time} (lat index {lat}, lon index {lon}): {source}")]
    Point {
        time: NaiveDateTime,
        lat: usize,
        lon: usize,
        #[source]
        source: SolverError,
    },

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Meteorological and radiative state at one cell and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointInputs {
    /// Air temperature (K)
    pub tas: f64,
    /// Vapour pressure (Pa)
    pub ea: f64,
    /// Surface pressure (Pa)
    pub ps: f64,
    /// Wind speed at sensor height (m/s)
    pub wind2m: f64,
    /// Instantaneous zenith cosine
    pub cza: f64,
    /// Zenith cosine averaged over the sunlit part of the step, or the no-sun sentinel
    pub czda: f64,
    /// Downwelling shortwave (W/m²)
    pub rsds: f64,
    /// Upwelling shortwave (W/m²)
    pub rsus: f64,
    /// Downwelling longwave (W/m²)
    pub rlds: f64,
    /// Upwelling longwave (W/m²)
    pub rlus: f64,
    /// Direct fraction of the downwelling shortwave
    pub f: f64,
}

impl PointInputs {
    pub fn named_values(&self) -> [(&'static str, f64); 11] {
        [
            ("tas", self.tas),
            ("ea", self.ea),
            ("ps", self.ps),
            ("wind2m", self.wind2m),
            ("cza", self.cza),
            ("czda", self.czda),
            ("rsds", self.rsds),
            ("rsus", self.rsus),
            ("rlds", self.rlds),
            ("rlus", self.rlus),
            ("f", self.f),
        ]
    }
}

/// The three heat-stress temperatures (K) at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatStress {
    pub tnw: f64,
    pub tg: f64,
    pub wbgt: f64,
}

/// Outdoor WBGT from its three component temperatures
pub fn wbgt_index(tnw: f64, tg: f64, tas: f64) -> f64 {
    0.7 * tnw + 0.2 * tg + 0.1 * tas
}

/// A pointwise heat-balance model.
///
/// Implementations must be pure: the same inputs always give the same
/// outputs, so evaluation order across blocks does not matter.
pub trait HeatBalanceSolver: Send + Sync {
    /// Wind speed at sensor height from the 10 m wind
    fn wind_2m(&self, wind10m: f64, czda: f64, rsds: f64) -> f64;

    /// Natural wet-bulb temperature (K)
    fn natural_wet_bulb(&self, inputs: &PointInputs) -> Result<f64, SolverError>;

    /// Black-globe temperature (K)
    fn black_globe(&self, inputs: &PointInputs) -> Result<f64, SolverError>;

    fn evaluate(&self, inputs: &PointInputs) -> Result<HeatStress, SolverError> {
        let tnw = self.natural_wet_bulb(inputs)?;
        let tg = self.black_globe(inputs)?;
        Ok(HeatStress {
            tnw,
            tg,
            wbgt: wbgt_index(tnw, tg, inputs.tas),
        })
    }
}

/// Sensor-height wind field from the 10 m wind speed.
pub fn wind_2m_field<S: HeatBalanceSolver + ?Sized>(
    solver: &S,
    wind10m: &Field,
    czda: &Array3<f64>,
    rsds: &Field,
) -> Result<Field, FieldError> {
    wind10m.ensure_aligned(rsds)?;
    if czda.dim() != wind10m.shape() {
        return Err(FieldError::ShapeMismatch {
            left: wind10m.name.clone(),
            left_shape: wind10m.shape(),
            right: "czda".to_string(),
            right_shape: czda.dim(),
        });
    }

    let mut data = Array3::<f64>::zeros(wind10m.shape());
    Zip::from(&mut data)
        .and(&wind10m.data)
        .and(czda)
        .and(&rsds.data)
        .par_for_each(|w, &u, &cz, &sw| *w = solver.wind_2m(u, cz, sw));

    wind10m.derive("wind2m", wind10m.units.clone(), data)
}

/// Every field the heat balance reads, on one shared hourly axis.
#[derive(Debug, Clone, Copy)]
pub struct HeatBalanceInputs<'a> {
    pub tas: &'a Field,
    pub ea: &'a Field,
    pub ps: &'a Field,
    pub wind2m: &'a Field,
    pub cza: &'a Array3<f64>,
    pub czda: &'a Array3<f64>,
    pub rsds: &'a Field,
    pub rsus: &'a Field,
    pub rlds: &'a Field,
    pub rlus: &'a Field,
    pub f: &'a Field,
}

impl<'a> HeatBalanceInputs<'a> {
    /// All fields must share the time axis and shape of `tas`.
    pub fn validate(&self) -> Result<(), FieldError> {
        for field in [self.ea, self.ps, self.wind2m, self.rsds, self.rsus, self.rlds, self.rlus, self.f] {
            self.tas.ensure_aligned(field)?;
        }
        for (name, array) in [("cza", self.cza), ("czda", self.czda)] {
            if array.dim() != self.tas.shape() {
                return Err(FieldError::ShapeMismatch {
                    left: self.tas.name.clone(),
                    left_shape: self.tas.shape(),
                    right: name.to_string(),
                    right_shape: array.dim(),
                });
            }
        }
        Ok(())
    }

    fn point(&self, idx: (usize, usize, usize)) -> PointInputs {
        let (t, i, j) = idx;
        PointInputs {
            tas: self.tas.data[[t, i, j]],
            ea: self.ea.data[[t, i, j]],
            ps: self.ps.data[[t, i, j]],
            wind2m: self.wind2m.data[[t, i, j]],
            cza: self.cza[[t, i, j]],
            czda: self.czda[[t, i, j]],
            rsds: self.rsds.data[[t, i, j]],
            rsus: self.rsus.data[[t, i, j]],
            rlds: self.rlds.data[[t, i, j]],
            rlus: self.rlus.data[[t, i, j]],
            f: self.f.data[[t, i, j]],
        }
    }
}

/// Heat-stress outputs for a month, stored as 32-bit floats.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatStressFields {
    pub times: Vec<NaiveDateTime>,
    pub tnw: Array3<f32>,
    pub tg: Array3<f32>,
    pub wbgt: Array3<f32>,
}

struct Block {
    tnw: Array3<f32>,
    tg: Array3<f32>,
    wbgt: Array3<f32>,
}

/// Evaluate the solver at every cell and time step.
///
/// Time blocks run in parallel; the first point that fails aborts the whole
/// evaluation and no partial output is returned.
pub fn evaluate_heat_balance<S: HeatBalanceSolver + ?Sized>(
    solver: &S,
    inputs: &HeatBalanceInputs<'_>,
    block_size: usize,
) -> Result<HeatStressFields, HeatBalanceError> {
    inputs.validate()?;
    let (nt, ny, nx) = inputs.tas.shape();
    let times = &inputs.tas.times;

    let blocks = map_time_blocks(nt, block_size, |range| {
        let shape = (range.len(), ny, nx);
        let mut block = Block {
            tnw: Array3::zeros(shape),
            tg: Array3::zeros(shape),
            wbgt: Array3::zeros(shape),
        };
        for (k, t) in range.clone().enumerate() {
            for i in 0..ny {
                for j in 0..nx {
                    let point = inputs.point((t, i, j));
                    let out = solver.evaluate(&point).map_err(|source| HeatBalanceError::Point {
                        time: times[t],
                        lat: i,
                        lon: j,
                        source,
                    })?;
                    block.tnw[[k, i, j]] = out.tnw as f32;
                    block.tg[[k, i, j]] = out.tg as f32;
                    block.wbgt[[k, i, j]] = out.wbgt as f32;
                }
            }
        }
        Ok::<_, HeatBalanceError>(block)
    })?;

    let mut result = HeatStressFields {
        times: times.clone(),
        tnw: Array3::zeros((nt, ny, nx)),
        tg: Array3::zeros((nt, ny, nx)),
        wbgt: Array3::zeros((nt, ny, nx)),
    };
    let mut offset = 0;
    for block in blocks {
        let len = block.tnw.len_of(Axis(0));
        result.tnw.slice_mut(s![offset..offset + len, .., ..]).assign(&block.tnw);
        result.tg.slice_mut(s![offset..offset + len, .., ..]).assign(&block.tg);
        result.wbgt.slice_mut(s![offset..offset + len, .., ..]).assign(&block.wbgt);
        offset += len;
    }

    Ok(result)
}
