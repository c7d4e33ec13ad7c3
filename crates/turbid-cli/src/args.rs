//! Command-line interface definition.

use std::path::PathBuf;

/// Recover optical properties from integrating-sphere measurements by
/// inverse adding-doubling.
#[derive(clap::Parser, Debug)]
#[clap(
    name = "turbid",
    about = "Inverse adding-doubling for layered turbid samples."
)]
pub struct CliArgs {
    /// Instrument description file (.rxt).
    pub input: PathBuf,

    /// Output path; defaults to the input with a .txt extension.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Number of quadrature points per hemisphere.
    #[clap(short, long, value_name = "N")]
    pub quadrature: Option<usize>,

    /// Verbosity: 0 = errors, 1 = warnings, 2 = info, 3 = debug, 4 = trace.
    #[clap(short = 'V', long, default_value_t = 1, value_name = "N")]
    pub verbosity: u8,

    /// Convergence tolerance for the inverse search.
    #[clap(short = 'e', long, value_name = "TOL")]
    pub tolerance: Option<f64>,

    /// Hold the albedo fixed at this value.
    #[clap(short = 'a', value_name = "A")]
    pub fixed_a: Option<f64>,

    /// Hold the optical thickness fixed at this value.
    #[clap(short = 'b', value_name = "B")]
    pub fixed_b: Option<f64>,

    /// Hold the anisotropy fixed at this value.
    #[clap(short = 'g', value_name = "G")]
    pub fixed_g: Option<f64>,

    /// Override the reflectance of the calibration standard.
    #[clap(short = 'r', long = "r-std", value_name = "R")]
    pub r_std: Option<f64>,

    /// Override the sample refractive index.
    #[clap(short = 'n', long = "n-sample", value_name = "N")]
    pub n_sample: Option<f64>,

    /// Use only the reflection measurement, even when more are present.
    #[clap(short = 'R', long)]
    pub reflection_only: bool,

    /// The measured reflectance excludes the direct (specular) beam.
    #[clap(short = 'X', long)]
    pub exclude_direct: bool,
}

/// Maps the numeric verbosity to a log filter.
pub fn log_filter(level: u8) -> log::LevelFilter {
    match level {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}
