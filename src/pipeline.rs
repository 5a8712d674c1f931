use crate::config::Config;
use crate::data_io::{FieldError, FieldSource, Grid, OutputField, OutputVariable, ReaderError};
use crate::heat_balance::{
    evaluate_heat_balance, wind_2m_field, HeatBalanceError, HeatBalanceInputs, HeatBalanceSolver,
    HeatStressFields,
};
use crate::math::{
    diffuse_fraction, reconstruct_radiation, to_radian_grid, vapor_pressure_field, wind_speed_field,
    zenith_fields, BoundaryCorrection, FirstOfMonthHalfHourFix, RadiationError,
};
use crate::time_utils::{MonthWindow, TimeError};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, info_span};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Radiation error: {0}")]
    Radiation(#[from] RadiationError),

    #[error(transparent)]
    HeatBalance(#[from] HeatBalanceError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Time(#[from] TimeError),

    #[error("Month {year}-{month:02} failed: {source}")]
    MonthFailed {
        year: i32,
        month: u32,
        #[source]
        source: Box<PipelineError>,
    },
}

/// Heat-stress outputs for one month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthOutputs {
    pub year: i32,
    pub month: u32,
    pub fields: HeatStressFields,
}

impl MonthOutputs {
    pub fn n_times(&self) -> usize {
        self.fields.times.len()
    }

    /// Split into labelled output fields, moving the arrays out.
    ///
    /// Variables repeated in `variables` are only returned once.
    pub fn into_outputs(self, variables: &[OutputVariable]) -> Vec<OutputField> {
        let HeatStressFields { times, tnw, tg, wbgt } = self.fields;
        let mut slots = [Some(tnw), Some(tg), Some(wbgt)];
        variables
            .iter()
            .filter_map(|&variable| {
                let slot = match variable {
                    OutputVariable::NaturalWetBulb => 0,
                    OutputVariable::BlackGlobe => 1,
                    OutputVariable::Wbgt => 2,
                };
                slots[slot].take().map(|data| OutputField {
                    variable,
                    times: times.clone(),
                    data,
                })
            })
            .collect()
    }
}

/// Annual series, one per requested output, plus the grid they live on.
#[derive(Debug, Clone)]
pub struct AnnualOutputs {
    pub year: i32,
    pub grid: Grid,
    pub series: Vec<OutputField>,
}

impl AnnualOutputs {
    /// Join months in the order given; each series must be strictly increasing in time.
    pub fn assemble(
        year: i32,
        grid: Grid,
        months: Vec<MonthOutputs>,
        variables: &[OutputVariable],
    ) -> Result<Self, FieldError> {
        let mut parts: Vec<Vec<OutputField>> = variables.iter().map(|_| Vec::with_capacity(months.len())).collect();
        for month in months {
            for output in month.into_outputs(variables) {
                if let Some(index) = variables.iter().position(|&v| v == output.variable) {
                    parts[index].push(output);
                }
            }
        }

        let series = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(OutputField::concat)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { year, grid, series })
    }

    pub fn get(&self, variable: OutputVariable) -> Option<&OutputField> {
        self.series.iter().find(|s| s.variable == variable)
    }
}

/// One fixed pipeline from archive fields to heat-stress series.
pub struct Pipeline<'a, S: FieldSource + ?Sized, H: HeatBalanceSolver + ?Sized> {
    pub config: &'a Config,
    pub source: &'a S,
    pub solver: &'a H,
    pub corrections: Vec<Box<dyn BoundaryCorrection>>,
}

impl<'a, S: FieldSource + ?Sized, H: HeatBalanceSolver + ?Sized> Pipeline<'a, S, H> {
    /// Pipeline with the corrections selected in `config`.
    pub fn new(config: &'a Config, source: &'a S, solver: &'a H) -> Self {
        let mut corrections: Vec<Box<dyn BoundaryCorrection>> = Vec::new();
        if config.boundary_fix {
            corrections.push(Box::new(FirstOfMonthHalfHourFix));
        }
        Self {
            config,
            source,
            solver,
            corrections,
        }
    }

    pub fn with_corrections(mut self, corrections: Vec<Box<dyn BoundaryCorrection>>) -> Self {
        self.corrections = corrections;
        self
    }

    /// Run every stage for one calendar month.
    pub fn process_month(&self, year: i32, month: u32) -> Result<MonthOutputs, PipelineError> {
        let span = info_span!("month", year, month);
        let _guard = span.enter();
        let started = Instant::now();

        let window = MonthWindow::new(year, month)?;
        info!("Month {:02}: {} to {}", month, window.start.date(), window.end.date());

        let inputs = self.source.load_month(&window)?;
        let block_size = self.config.block_size;

        let radiation = reconstruct_radiation(&inputs, &self.corrections)?;

        let grid = to_radian_grid(&inputs.grid.latitudes, &inputs.grid.longitudes);
        let zenith = zenith_fields(&inputs.tas.times, &grid, self.config.solar_step_hours, block_size);

        info!("Calculating vapour pressure");
        let ea = vapor_pressure_field(&inputs.huss, &inputs.ps)?;

        info!("Calculating wind speeds");
        let wind10m = wind_speed_field(&inputs.uas, &inputs.vas)?;
        let wind2m = wind_2m_field(self.solver, &wind10m, &zenith.czda, &radiation.rsds)?;

        let f = diffuse_fraction(&radiation.rsds, &radiation.rsdsdiff, &zenith.cza)?;

        info!("Calculating Tnw, Tg, WBGT");
        let fields = evaluate_heat_balance(
            self.solver,
            &HeatBalanceInputs {
                tas: &inputs.tas,
                ea: &ea,
                ps: &inputs.ps,
                wind2m: &wind2m,
                cza: &zenith.cza,
                czda: &zenith.czda,
                rsds: &radiation.rsds,
                rsus: &radiation.rsus,
                rlds: &radiation.rlds,
                rlus: &radiation.rlus,
                f: &f,
            },
            block_size,
        )?;

        info!(
            "Finished month {:02} for year {} ({} steps, {:.1?})",
            month,
            year,
            fields.times.len(),
            started.elapsed()
        );

        Ok(MonthOutputs { year, month, fields })
    }

    /// Process months 1 to 12 in order and assemble the annual series.
    ///
    /// The first failing month stops the run; later months are not attempted.
    pub fn run_year(&self, year: i32) -> Result<AnnualOutputs, PipelineError> {
        info!("===== Processing year {} =====", year);
        let mut months = Vec::with_capacity(12);
        for month in 1..=12 {
            let outputs = self
                .process_month(year, month)
                .map_err(|source| PipelineError::MonthFailed {
                    year,
                    month,
                    source: Box::new(source),
                })?;
            months.push(outputs);
        }

        info!("Concatenating year {} results", year);
        let grid = self.source.grid()?;
        Ok(AnnualOutputs::assemble(
            year,
            grid,
            months,
            &self.config.output_variables,
        )?)
    }
}
