use crate::data_io::OutputVariable;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Usage errors, including a missing or non-integer year
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Physical constants of the globe/wick heat balance.
///
/// Values follow Liljegren et al. (2008), "Modeling the wet bulb globe
/// temperature using standard meteorological measurements".
#[derive(Clone, Debug, PartialEq)]
pub struct Constants {
    /// Stefan-Boltzmann constant (W/(m²·K⁴))
    pub stefan_boltzmann: f64,
    /// Specific heat of dry air at constant pressure (J/(kg·K))
    pub cp: f64,
    /// Molecular weight of dry air (kg/kmol)
    pub m_air: f64,
    /// Molecular weight of water vapour (kg/kmol)
    pub m_h2o: f64,
    /// Universal gas constant (J/(kmol·K))
    pub r_gas: f64,

    // Wick (natural wet-bulb thermometer)
    pub emis_wick: f64,
    pub alb_wick: f64,
    /// Wick diameter (m)
    pub d_wick: f64,
    /// Wick length (m)
    pub l_wick: f64,

    // Globe thermometer
    pub emis_globe: f64,
    pub alb_globe: f64,
    /// Globe diameter (m)
    pub d_globe: f64,

    /// Below this cosine the beam terms are dropped
    pub cza_min: f64,
    /// Floor on the wind speed seen by the sensors (m/s)
    pub min_speed: f64,
    /// Height of the input wind (m)
    pub wind_height: f64,
    /// Height of the sensors (m)
    pub ref_height: f64,

    /// Fixed-point convergence tolerance (K)
    pub convergence: f64,
    /// Iteration cap before a solve is reported as failed
    pub max_iterations: usize,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            stefan_boltzmann: 5.6696e-8,
            cp: 1003.5,
            m_air: 28.97,
            m_h2o: 18.015,
            r_gas: 8314.34,

            emis_wick: 0.95,
            alb_wick: 0.4,
            d_wick: 0.007,
            l_wick: 0.0254,

            emis_globe: 0.95,
            alb_globe: 0.05,
            d_globe: 0.0508,

            cza_min: 0.00873,
            min_speed: 0.13,
            wind_height: 10.0,
            ref_height: 2.0,

            convergence: 0.02,
            max_iterations: 200,
        }
    }
}

impl Constants {
    /// Gas constant for dry air (J/(kg·K))
    pub fn r_air(&self) -> f64 {
        self.r_gas / self.m_air
    }

    /// Prandtl number
    pub fn prandtl(&self) -> f64 {
        self.cp / (self.cp + 1.25 * self.r_air())
    }

    /// cp·M_air/M_h2o, used in the wick evaporation term
    pub fn ratio(&self) -> f64 {
        self.cp * self.m_air / self.m_h2o
    }
}

pub const DEFAULT_INPUT_ROOT: &str = "/g/data/xv83/CCAM/output/CMIP6/DD/AUS-10i/CSIRO";
pub const DEFAULT_VERSION: &str = "v20250912";
pub const DEFAULT_OUTPUT_PATTERN: &str =
    "{variable}_AUS-10i_{model}_{scenario}_{experiment}_CSIRO_CCAM-v2203-SN_v1-r1_1hr_{year}01010000-{year}12312300.nc";

/// Run configuration, passed explicitly into the pipeline
#[derive(Clone, Debug)]
pub struct Config {
    /// Heat-balance constants
    pub constants: Constants,

    /// Year to process
    pub year: i32,
    /// Driving model identifier
    pub model: String,
    /// Ensemble member / experiment identifier
    pub experiment: String,
    /// Emission scenario
    pub scenario: String,

    /// Root of the regional model archive
    pub input_root: PathBuf,
    /// Dataset version directory under each variable
    pub version: String,
    /// Output directory for annual files
    pub output_dir: PathBuf,
    /// Output file name pattern
    pub output_pattern: String,
    /// Which annual series to write
    pub output_variables: Vec<OutputVariable>,
    /// Deflate level for output files
    pub compression_level: i32,

    /// Worker threads; 0 keeps the rayon default
    pub num_threads: usize,
    /// Time steps per parallel block
    pub block_size: usize,
    /// Averaging interval for the zenith geometry (hours)
    pub solar_step_hours: f64,
    /// Apply the first-of-month direct-radiation repair
    pub boundary_fix: bool,
    /// Verbose output
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            constants: Constants::default(),
            year: 2015,
            model: String::new(),
            experiment: String::new(),
            scenario: String::from("ssp126"),
            input_root: PathBuf::from(DEFAULT_INPUT_ROOT),
            version: String::from(DEFAULT_VERSION),
            output_dir: PathBuf::from("./output"),
            output_pattern: String::from(DEFAULT_OUTPUT_PATTERN),
            output_variables: OutputVariable::ALL.to_vec(),
            compression_level: 1,
            num_threads: 0,
            block_size: 24,
            solar_step_hours: 1.0,
            boundary_fix: true,
            verbose: false,
        }
    }
}

fn build_cli() -> Command {
    Command::new("wbgt_rust")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Hourly WBGT, natural wet-bulb and black-globe temperature for one model year")
        .arg(
            Arg::new("year")
                .value_name("YEAR")
                .help("Year to process")
                .value_parser(value_parser!(i32))
                .required(true),
        )
        .arg(
            Arg::new("model")
                .value_name("MODEL")
                .help("Driving model identifier")
                .required(true),
        )
        .arg(
            Arg::new("experiment")
                .value_name("EXPERIMENT")
                .help("Experiment / ensemble member identifier")
                .required(true),
        )
        .arg(
            Arg::new("input-root")
                .long("input-root")
                .value_name("DIR")
                .help("Root of the regional model archive")
                .default_value(DEFAULT_INPUT_ROOT),
        )
        .arg(
            Arg::new("scenario")
                .long("scenario")
                .value_name("SCENARIO")
                .help("Emission scenario")
                .default_value("ssp126"),
        )
        .arg(
            Arg::new("dataset-version")
                .long("dataset-version")
                .value_name("VERSION")
                .help("Dataset version directory")
                .default_value(DEFAULT_VERSION),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory for annual files")
                .default_value("./output"),
        )
        .arg(
            Arg::new("output-pattern")
                .short('p')
                .long("output-pattern")
                .value_name("PATTERN")
                .help("Output file name pattern")
                .default_value(DEFAULT_OUTPUT_PATTERN),
        )
        .arg(
            Arg::new("variables")
                .long("variables")
                .value_name("LIST")
                .help("Comma separated outputs to write: tnw,tg,wbgt")
                .default_value("tnw,tg,wbgt"),
        )
        .arg(
            Arg::new("compression-level")
                .long("compression-level")
                .value_name("LEVEL")
                .help("Deflate level (0-9)")
                .value_parser(value_parser!(i32))
                .default_value("1"),
        )
        .arg(
            Arg::new("num-threads")
                .short('j')
                .long("num-threads")
                .value_name("COUNT")
                .help("Number of worker threads (0 = all cores)")
                .value_parser(value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("block-size")
                .long("block-size")
                .value_name("STEPS")
                .help("Time steps per parallel block")
                .value_parser(value_parser!(usize))
                .default_value("24"),
        )
        .arg(
            Arg::new("no-boundary-fix")
                .long("no-boundary-fix")
                .help("Skip the first-of-month direct radiation repair")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue),
        )
}

fn string_arg(matches: &ArgMatches, id: &str) -> Result<String, ConfigError> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| ConfigError::Invalid(format!("missing argument: {}", id)))
}

fn copied_arg<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T, ConfigError> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| ConfigError::Invalid(format!("missing argument: {}", id)))
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn from_args() -> Result<Self, ConfigError> {
        Self::try_parse_from(std::env::args_os())
    }

    /// Parse configuration from an explicit argument list (first item is the binary name)
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = build_cli().try_get_matches_from(args)?;

        let output_variables = string_arg(&matches, "variables")?
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<OutputVariable>().map_err(ConfigError::Invalid))
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            constants: Constants::default(),
            year: copied_arg(&matches, "year")?,
            model: string_arg(&matches, "model")?,
            experiment: string_arg(&matches, "experiment")?,
            scenario: string_arg(&matches, "scenario")?,
            input_root: PathBuf::from(string_arg(&matches, "input-root")?),
            version: string_arg(&matches, "dataset-version")?,
            output_dir: PathBuf::from(string_arg(&matches, "output-dir")?),
            output_pattern: string_arg(&matches, "output-pattern")?,
            output_variables,
            compression_level: copied_arg(&matches, "compression-level")?,
            num_threads: copied_arg(&matches, "num-threads")?,
            block_size: copied_arg(&matches, "block-size")?,
            solar_step_hours: 1.0,
            boundary_fix: !matches.get_flag("no-boundary-fix"),
            verbose: matches.get_flag("verbose"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Directory holding one sub-directory per input variable
    pub fn input_dir(&self) -> PathBuf {
        self.input_root
            .join(&self.model)
            .join(&self.scenario)
            .join(&self.experiment)
            .join("CCAM-v2203-SN")
            .join("v1-r1")
            .join("1hr")
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=9).contains(&self.compression_level) {
            return Err(ConfigError::Invalid(
                "Compression level must be between 0 and 9".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("Block size must be positive".to_string()));
        }
        if self.solar_step_hours <= 0.0 || self.solar_step_hours > 24.0 {
            return Err(ConfigError::Invalid(
                "Solar averaging step must be in (0, 24] hours".to_string(),
            ));
        }
        if self.output_variables.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one output variable is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let config = Config::try_parse_from(["wbgt_rust", "2040", "ACCESS-CM2", "r4i1p1f1"]).unwrap();
        assert_eq!(config.year, 2040);
        assert_eq!(config.model, "ACCESS-CM2");
        assert_eq!(config.experiment, "r4i1p1f1");
        assert_eq!(config.output_variables, OutputVariable::ALL.to_vec());
        assert!(config.boundary_fix);
        assert!(config
            .input_dir()
            .ends_with("ACCESS-CM2/ssp126/r4i1p1f1/CCAM-v2203-SN/v1-r1/1hr"));
    }

    #[test]
    fn test_non_integer_year_is_usage_error() {
        let result = Config::try_parse_from(["wbgt_rust", "twenty", "ACCESS-CM2", "r4i1p1f1"]);
        assert!(matches!(result, Err(ConfigError::Cli(_))));
    }

    #[test]
    fn test_missing_year_is_usage_error() {
        let result = Config::try_parse_from(["wbgt_rust"]);
        assert!(matches!(result, Err(ConfigError::Cli(_))));
    }

    #[test]
    fn test_variable_selection() {
        let config = Config::try_parse_from([
            "wbgt_rust",
            "2040",
            "m",
            "e",
            "--variables",
            "wbgt",
            "--no-boundary-fix",
        ])
        .unwrap();
        assert_eq!(config.output_variables, vec![OutputVariable::Wbgt]);
        assert!(!config.boundary_fix);
    }

    #[test]
    fn test_validation_rejects_bad_compression() {
        let result = Config::try_parse_from(["wbgt_rust", "2040", "m", "e", "--compression-level", "12"]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_constants_derived_values() {
        let constants = Constants::default();
        assert!((constants.r_air() - 287.0).abs() < 0.1);
        assert!(constants.prandtl() > 0.7 && constants.prandtl() < 0.75);
    }
}
