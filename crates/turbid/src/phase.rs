//! Azimuth-averaged Henyey-Greenstein redistribution matrices.
//!
//! The redistribution function `h(ν_i, ν_j)` is the phase function averaged
//! over the azimuth between an incident cone `ν_j` and an exiting cone
//! `ν_i`. Two matrices capture it on the quadrature: `h⁺⁺` for scattering
//! within a hemisphere and `h⁺⁻` for scattering across. Both are symmetric.

use nalgebra::DMatrix;
use turbid_base::math::{ellint_e, legendre};

use crate::sample::Quadrature;

/// How the redistribution matrices are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseFunction {
    /// δ-M truncated Legendre expansion (the default). The order equals the
    /// number of quadrature directions; the companion albedo/thickness
    /// transform lives on [`crate::Sample`].
    #[default]
    Legendre,
    /// Direct closed form via complete elliptic integrals. No δ-M transform
    /// is applied, so this is mainly a diagnostic for moderate `g`.
    Elliptic,
}

/// Redistribution matrices `(h⁺⁺, h⁺⁻)` for anisotropy `g` on the given
/// quadrature.
pub fn redistribution(
    g: f64,
    quad: &Quadrature,
    method: PhaseFunction,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = quad.len();
    if g == 0.0 {
        let ones = DMatrix::from_element(n, n, 1.0);
        return (ones.clone(), ones);
    }
    match method {
        PhaseFunction::Legendre => hg_legendre(g, quad),
        PhaseFunction::Elliptic => hg_elliptic(g, quad),
    }
}

/// δ-M Legendre expansion (Wiscombe). The expansion is truncated at the
/// quadrature order `M = n`, each moment renormalized by the truncated
/// forward peak: `χ_k* = (gᵏ - gᴹ) / (1 - gᴹ)`.
fn hg_legendre(g: f64, quad: &Quadrature) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = quad.len();
    let g_m = g.powi(n as i32);
    let mut hp = DMatrix::from_element(n, n, 1.0);
    let mut hm = DMatrix::from_element(n, n, 1.0);

    // P_k at every node, k = 1..n-1
    let mut pk = vec![vec![0.0; n]; n];
    for (k, row) in pk.iter_mut().enumerate() {
        for (i, v) in row.iter_mut().enumerate() {
            *v = legendre(k, quad.nu[i]);
        }
    }

    for k in 1..n {
        let chi = (2.0 * k as f64 + 1.0) * (g.powi(k as i32) - g_m) / (1.0 - g_m);
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        for i in 0..n {
            for j in 0..=i {
                let term = chi * pk[k][i] * pk[k][j];
                hp[(i, j)] += term;
                hm[(i, j)] += sign * term;
            }
        }
    }
    mirror_lower(&mut hp);
    mirror_lower(&mut hm);
    (hp, hm)
}

/// Direct integration of the Henyey-Greenstein phase function over azimuth,
/// expressed through the complete elliptic integral of the second kind.
fn hg_elliptic(g: f64, quad: &Quadrature) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = quad.len();
    let mut hp = DMatrix::zeros(n, n);
    let mut hm = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let ni = quad.nu[i];
            let nj = quad.nu[j];
            let gamma = 2.0 * g * (1.0 - ni * ni).sqrt() * (1.0 - nj * nj).sqrt();
            hp[(i, j)] = hg_closed_form(g, 1.0 + g * g - 2.0 * g * ni * nj, gamma);
            hm[(i, j)] = hg_closed_form(g, 1.0 + g * g + 2.0 * g * ni * nj, gamma);
        }
    }
    mirror_lower(&mut hp);
    mirror_lower(&mut hm);
    (hp, hm)
}

fn hg_closed_form(g: f64, alpha: f64, gamma: f64) -> f64 {
    let c = 2.0 / std::f64::consts::PI * (1.0 - g * g) / ((alpha - gamma) * (alpha + gamma).sqrt());
    c * ellint_e((2.0 * gamma / (alpha + gamma)).sqrt())
}

fn mirror_lower(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in i + 1..n {
            m[(i, j)] = m[(j, i)];
        }
    }
}
