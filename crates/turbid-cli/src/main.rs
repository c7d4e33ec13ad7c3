//! Command-line inverse adding-doubling.
//!
//! `turbid input.rxt` reads an instrument description, recovers the optical
//! properties at every wavelength, and writes `input.txt`.

mod args;
mod error;
mod rxt;
mod txt;

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;

use args::CliArgs;
use error::CliError;
use turbid::Solver;

fn main() {
    let args = CliArgs::parse();
    init_logger(&args);
    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn init_logger(args: &CliArgs) {
    env_logger::builder()
        .format(|buf, record| {
            let module = record
                .module_path()
                .and_then(|p| p.split("::").next())
                .unwrap_or("turbid");
            writeln!(buf, "{:5} [{}]: {}", record.level(), module, record.args())
        })
        .filter_level(args::log_filter(args.verbosity))
        .init();
}

fn run(args: &CliArgs) -> Result<(), CliError> {
    let mut file = rxt::read(&args.input)?;
    apply_overrides(args, &mut file);
    file.experiment.sample.validate()?;

    if args.verbosity >= 2 {
        log::info!("sample description:\n{}", file.experiment.sample);
    }
    log::info!(
        "inverting {} wavelengths from {}",
        file.rows.len(),
        args.input.display()
    );

    let results = file.experiment.invert_batch(&file.rows);

    // refit each recovered point once to report the fitted measurements
    let mut solver = Solver::new();
    let mut rows = Vec::with_capacity(results.len());
    for ((wavelength, measured), outcome) in file
        .wavelengths
        .iter()
        .zip(file.rows.iter())
        .zip(results.into_iter())
    {
        let inversion = outcome?;
        let mut sample = file.experiment.sample.clone();
        sample.a = inversion.a;
        sample.b = inversion.b;
        sample.g = inversion.g;
        let fitted = file.experiment.measured_rt(&mut solver, &sample)?;
        rows.push(txt::ResultRow {
            wavelength: *wavelength,
            measured: *measured,
            fitted,
            inversion,
        });
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input));
    let mut out = std::fs::File::create(&output)?;
    txt::write(&mut out, &file.experiment, &rows)?;
    log::info!("wrote {}", output.display());
    Ok(())
}

fn apply_overrides(args: &CliArgs, file: &mut rxt::InstrumentFile) {
    let exp = &mut file.experiment;
    if let Some(q) = args.quadrature {
        exp.sample.quad_pts = q;
    }
    if let Some(tol) = args.tolerance {
        exp.options.tolerance = tol;
    }
    if let Some(n) = args.n_sample {
        exp.sample.n = n;
    }
    if let Some(r) = args.r_std {
        if let Some(sphere) = exp.r_sphere.as_mut() {
            sphere.r_std = r;
        }
        if let Some(sphere) = exp.t_sphere.as_mut() {
            sphere.r_std = r;
        }
    }
    exp.default_a = args.fixed_a;
    exp.default_b = args.fixed_b;
    exp.default_g = args.fixed_g;
    if args.exclude_direct {
        exp.f_unscattered_in_mr = 0.0;
    }
    if args.reflection_only {
        for row in &mut file.rows {
            row.m_t = None;
            row.m_u = None;
        }
    }
}

fn default_output(input: &Path) -> PathBuf {
    let mut out = input.to_path_buf();
    out.set_extension("txt");
    out
}
