//! Writer for the `.txt` result format.
//!
//! The output echoes the instrument description as `#` comments and then
//! emits one tab-separated row per wavelength:
//!
//! ```text
//! lambda  M_R  fit(M_R)  M_T  fit(M_T)  M_U  fit(M_U)  mu_a  mu_s'  g  status
//! ```
//!
//! where status is `*` on success, `?` on a warning (unconverged or timed
//! out) and `!` on failure.

use std::io::Write;

use turbid::{Experiment, Inversion, Measurement, Sample};

/// Everything needed to report one wavelength.
pub struct ResultRow {
    /// Wavelength in nm.
    pub wavelength: f64,
    /// The measured values.
    pub measured: Measurement,
    /// Predicted measurements at the recovered optical properties.
    pub fitted: (f64, f64, f64),
    /// The recovered optical properties.
    pub inversion: Inversion,
}

fn opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{x:.5}"),
        None => "     -".into(),
    }
}

/// Writes the result table with its commented header.
pub fn write(
    out: &mut impl Write,
    experiment: &Experiment,
    rows: &[ResultRow],
) -> std::io::Result<()> {
    let s = &experiment.sample;
    writeln!(out, "# Inverse Adding-Doubling")?;
    writeln!(out, "#")?;
    writeln!(out, "# Sample")?;
    writeln!(out, "#   thickness           = {:.3} mm", s.d)?;
    writeln!(out, "#   refractive index    = {:.4}", s.n)?;
    writeln!(out, "#   top slide index     = {:.4}", s.n_above)?;
    writeln!(out, "#   bottom slide index  = {:.4}", s.n_below)?;
    writeln!(out, "#   cos(incident angle) = {:.4}", s.nu_0)?;
    writeln!(out, "#   quadrature points   = {}", s.quad_pts)?;
    writeln!(out, "# Analysis")?;
    writeln!(out, "#   spheres             = {}", experiment.num_spheres)?;
    writeln!(
        out,
        "#   tolerance           = {:.1e}",
        experiment.options.tolerance
    )?;
    if let Some(sphere) = &experiment.r_sphere {
        writeln!(out, "# Reflection sphere")?;
        writeln!(out, "#   diameter            = {:.1} mm", sphere.diameter())?;
        writeln!(out, "#   wall reflectance    = {:.4}", sphere.r_wall)?;
        writeln!(out, "#   standard            = {:.4}", sphere.r_std)?;
    }
    if let Some(sphere) = &experiment.t_sphere {
        writeln!(out, "# Transmission sphere")?;
        writeln!(out, "#   diameter            = {:.1} mm", sphere.diameter())?;
        writeln!(out, "#   wall reflectance    = {:.4}", sphere.r_wall)?;
        writeln!(out, "#   standard            = {:.4}", sphere.r_std)?;
    }
    writeln!(out, "#")?;
    writeln!(
        out,
        "#lambda\tM_R\tfit\tM_T\tfit\tM_U\tfit\tmu_a\tmu_s'\tg\tstatus"
    )?;

    for row in rows {
        let inv = &row.inversion;
        let recovered = Sample {
            a: inv.a,
            b: inv.b,
            g: inv.g,
            ..s.clone()
        };
        writeln!(
            out,
            "{:.1}\t{}\t{:.5}\t{}\t{:.5}\t{}\t{:.5}\t{:.4}\t{:.4}\t{:.4}\t{}",
            row.wavelength,
            opt(row.measured.m_r),
            row.fitted.0,
            opt(row.measured.m_t),
            row.fitted.1,
            opt(row.measured.m_u),
            row.fitted.2,
            recovered.mu_a(),
            recovered.mu_sp(),
            inv.g,
            inv.status.flag(),
        )?;
    }
    Ok(())
}
