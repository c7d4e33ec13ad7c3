//! Adding and doubling of layer matrices.
//!
//! Layer matrices compose through the star product `X ⋆ Y = X C Y` with
//! `C = diag(2νw)`; the identity of that product is `E = diag(1/2νw)`. The
//! internal-reflection series `E + R R + R R R R + …` between two layers is
//! summed by a single linear solve, never by explicit inversion. Boundary
//! layers are diagonal, which collapses one side of each product into a
//! row or column scaling; those fast paths are kept separate below.

use nalgebra::DMatrix;
use turbid_base::error::{Result, TurbidError};

use crate::sample::Quadrature;

/// Relative Tikhonov ridge used when a solve meets a singular matrix.
const RIDGE: f64 = 1e-10;

/// Solves `A X = B`.
///
/// A singular `A` is retried once with a small ridge on the diagonal before
/// giving up; diffuse reflectances keep the spectral radius of the series
/// below one, so this only triggers on degenerate inputs.
pub(crate) fn left_solve(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    context: &'static str,
) -> Result<DMatrix<f64>> {
    if let Some(x) = a.clone().lu().solve(b) {
        return Ok(x);
    }
    log::warn!("singular system in {context}; retrying with ridge regularization");
    let scale = a.iter().map(|v| v.abs()).fold(0.0_f64, f64::max);
    let mut ridged = a.clone();
    for i in 0..ridged.nrows() {
        ridged[(i, i)] += RIDGE * scale.max(1.0);
    }
    ridged
        .lu()
        .solve(b)
        .ok_or(TurbidError::Singular { context })
}

/// Solves `X A = B`, i.e. computes `B A⁻¹`.
pub(crate) fn right_solve(
    b: &DMatrix<f64>,
    a: &DMatrix<f64>,
    context: &'static str,
) -> Result<DMatrix<f64>> {
    left_solve(&a.transpose(), &b.transpose(), context).map(|x| x.transpose())
}

/// Scales column `j` of a copy of `m` by `s[j]`.
fn scale_cols(m: &DMatrix<f64>, s: &[f64]) -> DMatrix<f64> {
    let mut out = m.clone();
    for (j, &sj) in s.iter().enumerate() {
        out.column_mut(j).scale_mut(sj);
    }
    out
}

/// Adds layer `12` below layer `01` (both full matrices), returning the
/// reflectance seen from below and the downward transmittance:
///
/// ```text
/// T02 = T12 (E - R10 ⋆ R12)⁻¹ ⋆ T01
/// R20 = T12 (E - R10 ⋆ R12)⁻¹ ⋆ R10 ⋆ T21 + R21
/// ```
#[allow(clippy::too_many_arguments)]
pub fn add_layers_basic(
    quad: &Quadrature,
    r10: &DMatrix<f64>,
    t01: &DMatrix<f64>,
    r12: &DMatrix<f64>,
    r21: &DMatrix<f64>,
    t12: &DMatrix<f64>,
    t21: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let n = quad.len();
    let tw = &quad.twonuw;

    // A = E - R10 C R12
    let r10c = scale_cols(r10, tw);
    let mut a = -(&r10c * r12);
    for i in 0..n {
        a[(i, i)] += 1.0 / tw[i];
    }
    let b = right_solve(t12, &a, "layer addition")?;

    let bc = scale_cols(&(&b * r10), tw);
    let r20 = &bc * t21 + r21;
    let t02 = &b * t01;
    Ok((r20, t02))
}

/// Doubles a symmetric layer from thickness `b_start` up to `b_end`.
///
/// Semi-infinite slabs double until the diffuse transmission stops changing;
/// a transmission that has collapsed below 1e-12 is frozen to zero early
/// since further doubling only accumulates round-off.
pub fn double_until(
    quad: &Quadrature,
    n_slab: f64,
    r_start: DMatrix<f64>,
    t_start: DMatrix<f64>,
    b_start: f64,
    b_end: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let mut r = r_start;
    let mut t = t_start;
    if b_end == 0.0 || b_end <= b_start {
        return Ok((r, t));
    }

    if !b_end.is_finite() {
        let mut old_utu = f64::MAX;
        let mut utu = diffuse_transmission(quad, n_slab, &t);
        while (utu - old_utu).abs() > 1e-6 {
            old_utu = utu;
            let (rr, tt) = add_layers_basic(quad, &r, &t, &r, &r, &t, &t)?;
            r = rr;
            t = tt;
            utu = diffuse_transmission(quad, n_slab, &t);
        }
        t.fill(0.0);
        return Ok((r, t));
    }

    let mut b = b_start;
    while (b_end - b).abs() > 1e-5 && b_end > b {
        let (rr, tt) = add_layers_basic(quad, &r, &t, &r, &r, &t, &t)?;
        r = rr;
        t = tt;
        b *= 2.0;
        if diffuse_transmission(quad, n_slab, &t) < 1e-12 {
            t.fill(0.0);
            break;
        }
    }
    Ok((r, t))
}

/// Diffuse-incidence total transmission of a layer matrix, used as the
/// doubling termination metric.
pub(crate) fn diffuse_transmission(quad: &Quadrature, n_slab: f64, t: &DMatrix<f64>) -> f64 {
    let k = quad.first_above(turbid_base::fresnel::cos_critical(n_slab, 1.0));
    let n = quad.len();
    let mut total = 0.0;
    for j in k..n {
        let mut flux = 0.0;
        for i in k..n {
            flux += quad.twonuw[i] * t[(i, j)];
        }
        total += quad.twonuw[j] * flux;
    }
    total * n_slab * n_slab
}

/// Adds a diagonal boundary (stored as arrays) on top of a slab,
/// producing `R20` and `T02`.
fn boundary_config_a(
    r12: &DMatrix<f64>,
    r21: &DMatrix<f64>,
    t12: &DMatrix<f64>,
    t21: &DMatrix<f64>,
    r10: &[f64],
    t01: &[f64],
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let n = r12.nrows();
    // X = I - diag(r10) R12 (row scaling; the boundary arrays already carry
    // their 2νw factor)
    let mut x = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let delta = if i == j { 1.0 } else { 0.0 };
            x[(i, j)] = delta - r10[i] * r12[(i, j)];
        }
    }
    let temp = right_solve(t12, &x, "slide addition")?;
    let t02 = scale_cols(&temp, t01);
    let r20 = scale_cols(&temp, r10) * t21 + r21;
    Ok((r20, t02))
}

/// Companion of [`boundary_config_a`]: produces `R02` and `T20`.
fn boundary_config_b(
    quad: &Quadrature,
    r12: &DMatrix<f64>,
    t21: &DMatrix<f64>,
    r01: &[f64],
    r10: &[f64],
    t01: &[f64],
    t10: &[f64],
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let n = r12.nrows();
    // X = I - R12 diag(r10) (column scaling)
    let mut x = scale_cols(r12, r10);
    for v in x.iter_mut() {
        *v = -*v;
    }
    for i in 0..n {
        x[(i, i)] += 1.0;
    }
    let diag_t10 = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(t10));
    let temp = right_solve(&diag_t10, &x, "slide addition")?;
    let t20 = &temp * t21;
    let mut r02 = scale_cols(&(&temp * r12), t01);
    for i in 0..n {
        r02[(i, i)] += r01[i] / (quad.twonuw[i] * quad.twonuw[i]);
    }
    Ok((r02, t20))
}

/// Boundary arrays for one slide, as produced by [`crate::boundary`].
pub struct SlideArrays<'a> {
    /// Reflection entering the sample (carries the 2νw factor).
    pub r01: &'a [f64],
    /// Reflection leaving the sample.
    pub r10: &'a [f64],
    /// Transmission entering the sample.
    pub t01: &'a [f64],
    /// Transmission leaving the sample.
    pub t10: &'a [f64],
}

/// Adds a slide above a (possibly asymmetric) slab.
pub fn add_slide_above(
    quad: &Quadrature,
    slide: &SlideArrays,
    r12: &DMatrix<f64>,
    r21: &DMatrix<f64>,
    t12: &DMatrix<f64>,
    t21: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DMatrix<f64>)> {
    let (r20, t02) = boundary_config_a(r12, r21, t12, t21, slide.r10, slide.t01)?;
    let (r02, t20) = boundary_config_b(quad, r12, t21, slide.r01, slide.r10, slide.t01, slide.t10)?;
    Ok((r02, r20, t02, t20))
}

/// Adds a slide below a slab whose matrices already include the top slide.
pub fn add_slide_below(
    quad: &Quadrature,
    slide: &SlideArrays,
    r01: &DMatrix<f64>,
    r10: &DMatrix<f64>,
    t01: &DMatrix<f64>,
    t10: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>, DMatrix<f64>)> {
    // Adding below is adding above with the slab flipped upside down.
    let (r02, t20) = boundary_config_a(r10, r01, t10, t01, slide.r01, slide.t10)?;
    let (r20, t02) = boundary_config_b(quad, r10, t01, slide.r10, slide.r01, slide.t10, slide.t01)?;
    Ok((r02, r20, t02, t20))
}

/// Sandwiches a symmetric slab between two identical slides.
///
/// Symmetry lets a single direction stand in for both, at the cost of one
/// extra solve instead of a full second pass.
pub fn add_same_slides(
    quad: &Quadrature,
    slide: &SlideArrays,
    r: &DMatrix<f64>,
    t: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let n = quad.len();
    // AXX = T (I - diag(r10) R)⁻¹
    let mut x = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let delta = if i == j { 1.0 } else { 0.0 };
            x[(i, j)] = delta - slide.r10[i] * r[(i, j)];
        }
    }
    let axx = right_solve(t, &x, "slide sandwich")?;
    let r20 = scale_cols(&axx, slide.r10) * t + r;

    // BXX = diag(t10) (I - R20 diag(r10))⁻¹
    let mut x2 = scale_cols(&r20, slide.r10);
    for v in x2.iter_mut() {
        *v = -*v;
    }
    for i in 0..n {
        x2[(i, i)] += 1.0;
    }
    let diag_t10 = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(slide.t10));
    let bxx = right_solve(&diag_t10, &x2, "slide sandwich")?;

    let t03 = scale_cols(&(&bxx * &axx), slide.t01);
    let mut r30 = scale_cols(&(&bxx * &r20), slide.t01);
    for i in 0..n {
        r30[(i, i)] += slide.r01[i] / (quad.twonuw[i] * quad.twonuw[i]);
    }
    Ok((r30, t03))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{redistribution, PhaseFunction};
    use crate::sample::Sample;
    use crate::start;
    use approx::assert_abs_diff_eq;

    #[test]
    fn adding_two_halves_equals_doubling() {
        let s = Sample {
            a: 0.9,
            b: 1.0,
            g: 0.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let (hp, hm) = redistribution(0.0, &q, PhaseFunction::Legendre);
        let (r, t, d) = start::thinnest_layer(&s, &q, &hp, &hm, start::Starter::Auto).unwrap();
        let (r2a, t2a) = add_layers_basic(&q, &r, &t, &r, &r, &t, &t).unwrap();
        let (r2b, t2b) = double_until(&q, 1.0, r, t, d, 2.0 * d).unwrap();
        assert_abs_diff_eq!(r2a, r2b, epsilon = 1e-13);
        assert_abs_diff_eq!(t2a, t2b, epsilon = 1e-13);
    }

    #[test]
    fn zero_layer_is_identity_of_the_star_product() {
        let s = Sample {
            a: 0.6,
            b: 1.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let (hp, hm) = redistribution(0.0, &q, PhaseFunction::Legendre);
        let (r, t, _) = start::thinnest_layer(&s, &q, &hp, &hm, start::Starter::Diamond).unwrap();
        let (zr, zt) = start::zero_layer(&q);
        let (r2, t2) = add_layers_basic(&q, &zr, &zt, &r, &r, &t, &t).unwrap();
        assert_abs_diff_eq!(r2, r, epsilon = 1e-12);
        assert_abs_diff_eq!(t2, t, epsilon = 1e-12);
    }

    #[test]
    fn doubling_conserves_energy_without_absorption() {
        let s = Sample {
            a: 1.0,
            b: 4.0,
            g: 0.0,
            quad_pts: 8,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let (hp, hm) = redistribution(0.0, &q, PhaseFunction::Legendre);
        let (r, t, d) = start::thinnest_layer(&s, &q, &hp, &hm, start::Starter::Auto).unwrap();
        let (r, t) = double_until(&q, 1.0, r, t, d, s.b_star()).unwrap();
        // reflected plus transmitted flux must equal unity for every
        // incident cone when nothing absorbs
        for j in 0..q.len() {
            let mut total = 0.0;
            for i in 0..q.len() {
                total += q.twonuw[i] * (r[(i, j)] + t[(i, j)]);
            }
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-8);
        }
    }
}
