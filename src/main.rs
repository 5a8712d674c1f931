use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wbgt_rust::{
    config::{Config, ConfigError},
    data_io::{AnnualWriter, NetCdfArchive},
    heat_balance::LiljegrenSolver,
    parallel::with_thread_pool,
    pipeline::Pipeline,
};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(
        "Processing year {}, model {}, experiment {}",
        config.year, config.model, config.experiment
    );

    let input_dir = config.input_dir();
    info!("Opening datasets under {}", input_dir.display());
    let archive = NetCdfArchive::discover(&input_dir, &config.version)?;

    let solver = LiljegrenSolver::new(config.constants.clone());
    let pipeline = Pipeline::new(config, &archive, &solver);
    let annual = with_thread_pool(config.num_threads, || pipeline.run_year(config.year))??;

    let writer = AnnualWriter::from_config(config);
    let written = writer.write_all(annual.series, &annual.grid, annual.year)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }
    info!("All processing complete");
    Ok(())
}

fn main() -> ExitCode {
    let config = match Config::from_args() {
        Ok(config) => config,
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.verbose);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
