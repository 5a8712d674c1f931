pub mod config;
pub mod data_io;
pub mod heat_balance;
pub mod math;
pub mod parallel;
pub mod pipeline;
pub mod time_utils;

pub use config::{Config, ConfigError, Constants};
pub use pipeline::{AnnualOutputs, MonthOutputs, Pipeline, PipelineError};
