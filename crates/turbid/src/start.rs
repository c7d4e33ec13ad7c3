//! Starting layer for the doubling process.
//!
//! Doubling needs a seed layer thin enough that single scattering dominates.
//! The seed thickness is the δ-M reduced thickness halved until it drops
//! below the smallest quadrature cosine; the number of halvings is exactly
//! the number of doublings needed to reach the full slab.
//!
//! Two initializers build the seed `(R, T)` pair. The infinitesimal
//! generator (IGI) is the first-order expansion of the transport operator
//! and is O(d) accurate; the diamond initializer closes the midpoint scheme
//! with two small linear solves and is O(d²). IGI wins only when the seed is
//! so thin that the diamond solve would operate near round-off.

use nalgebra::DMatrix;
use turbid_base::error::Result;

use crate::combine::right_solve;
use crate::sample::{Quadrature, Sample};

/// Which starting-layer initializer to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Starter {
    /// Pick automatically from the seed thickness.
    #[default]
    Auto,
    /// Infinitesimal generator, O(d).
    Igi,
    /// Diamond (midpoint) initialization, O(d²).
    Diamond,
}

/// Seed thickness below which diamond operates near round-off and IGI is
/// preferred.
const DIAMOND_MIN_B: f64 = 1e-4;

/// Thickness of the thinnest starting layer for a reduced thickness
/// `b_star`, given the smallest quadrature cosine.
///
/// Semi-infinite slabs start from half the smallest cosine; the doubling
/// loop then runs until the diffuse transmission is extinguished.
pub fn starting_thickness(b_star: f64, nu_min: f64) -> f64 {
    if b_star <= 0.0 {
        return 0.0;
    }
    if !b_star.is_finite() {
        return 0.5 * nu_min;
    }
    let mut d = b_star;
    while d > nu_min {
        d *= 0.5;
    }
    d
}

/// `R` and `T` for a layer of zero thickness: nothing reflected, everything
/// transmitted. The identity of the star product is `diag(1 / 2νw)`.
pub fn zero_layer(quad: &Quadrature) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = quad.len();
    let r = DMatrix::zeros(n, n);
    let t = DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
        n,
        quad.twonuw.iter().map(|&w| 1.0 / w),
    ));
    (r, t)
}

/// Infinitesimal-generator initialization for a layer of thickness `d`.
///
/// `R[i,j] = a* d h⁺⁻[i,j] / (4 ν_i ν_j)`, and `T` adds the attenuated
/// identity `(1 - d/ν_i) / 2ν_i w_i` on the diagonal.
pub fn igi(
    a_star: f64,
    d: f64,
    quad: &Quadrature,
    hp: &DMatrix<f64>,
    hm: &DMatrix<f64>,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = quad.len();
    let mut r = DMatrix::zeros(n, n);
    let mut t = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let c = a_star * d / (4.0 * quad.nu[i] * quad.nu[j]);
            r[(i, j)] = c * hm[(i, j)];
            t[(i, j)] = c * hp[(i, j)];
        }
        t[(i, i)] += (1.0 - d / quad.nu[i]) / quad.twonuw[i];
    }
    (r, t)
}

/// Diamond (midpoint) initialization for a layer of thickness `d`.
///
/// With `A = (d/2) diag(1/ν)(I - S⁺)` and `B = (d/2) diag(1/ν) S⁻`, where
/// `S±[i,j] = (a*/2) h±[i,j] w_j`, the midpoint closure of the transport
/// equations gives
///
/// ```text
/// [(I+A) - B(I+A)⁻¹B] T = (I-A) + B(I+A)⁻¹B
/// (I+A) R = B (I + T)
/// ```
///
/// in the physical basis; columns are then rescaled into the star-product
/// normalization.
pub fn diamond(
    a_star: f64,
    d: f64,
    quad: &Quadrature,
    hp: &DMatrix<f64>,
    hm: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let n = quad.len();
    let identity = DMatrix::<f64>::identity(n, n);
    let mut a_mat = DMatrix::zeros(n, n);
    let mut b_mat = DMatrix::zeros(n, n);
    for i in 0..n {
        let c = 0.5 * d / quad.nu[i];
        for j in 0..n {
            let delta = if i == j { 1.0 } else { 0.0 };
            let sp = 0.5 * a_star * hp[(i, j)] * quad.weight[j];
            let sm = 0.5 * a_star * hm[(i, j)] * quad.weight[j];
            a_mat[(i, j)] = c * (delta - sp);
            b_mat[(i, j)] = c * sm;
        }
    }
    let ipa = &identity + &a_mat;
    let g = right_solve(&b_mat, &ipa, "diamond initialization")?;
    let gb = &g * &b_mat;
    let lhs = &ipa - &gb;
    let rhs = &identity - &a_mat + &gb;
    let t_hat = crate::combine::left_solve(&lhs, &rhs, "diamond initialization")?;
    let r_hat = crate::combine::left_solve(&ipa, &(&b_mat * (&identity + &t_hat)), "diamond initialization")?;

    let mut r = r_hat;
    let mut t = t_hat;
    for j in 0..n {
        let s = 1.0 / quad.twonuw[j];
        r.column_mut(j).scale_mut(s);
        t.column_mut(j).scale_mut(s);
    }
    Ok((r, t))
}

/// Builds the thinnest starting layer for a sample and reports its
/// thickness.
pub fn thinnest_layer(
    sample: &Sample,
    quad: &Quadrature,
    hp: &DMatrix<f64>,
    hm: &DMatrix<f64>,
    starter: Starter,
) -> Result<(DMatrix<f64>, DMatrix<f64>, f64)> {
    let d = starting_thickness(sample.b_star(), quad.nu[0]);
    if d == 0.0 {
        let (r, t) = zero_layer(quad);
        return Ok((r, t, 0.0));
    }
    let a_star = sample.a_star();
    let (r, t) = match starter {
        Starter::Igi => igi(a_star, d, quad, hp, hm),
        Starter::Diamond => diamond(a_star, d, quad, hp, hm)?,
        Starter::Auto => {
            if d < DIAMOND_MIN_B {
                igi(a_star, d, quad, hp, hm)
            } else {
                diamond(a_star, d, quad, hp, hm)?
            }
        }
    };
    Ok((r, t, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{redistribution, PhaseFunction};
    use approx::assert_abs_diff_eq;

    fn setup(a: f64, b: f64, g: f64) -> (Sample, Quadrature, DMatrix<f64>, DMatrix<f64>) {
        let s = Sample {
            a,
            b,
            g,
            quad_pts: 4,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let (hp, hm) = redistribution(g, &q, PhaseFunction::Legendre);
        (s, q, hp, hm)
    }

    #[test]
    fn seed_thickness_halving() {
        let (s, q, _, _) = setup(1.0, 1.0, 0.0);
        assert_abs_diff_eq!(starting_thickness(s.b_star(), q.nu[0]), 0.0625);
        let (s, q, _, _) = setup(1.0, 100.0, 0.0);
        assert_abs_diff_eq!(starting_thickness(s.b_star(), q.nu[0]), 0.048828125);
        let (s, q, _, _) = setup(1.0, 100.0, 0.9);
        assert_abs_diff_eq!(
            starting_thickness(s.b_star(), q.nu[0]),
            0.06716797,
            epsilon = 1e-8
        );
        let (s, q, _, _) = setup(1.0, turbid_base::INFINITE_B, 0.9);
        assert_abs_diff_eq!(
            starting_thickness(s.b_star(), q.nu[0]),
            0.04429397,
            epsilon = 1e-8
        );
        assert_abs_diff_eq!(starting_thickness(0.0, q.nu[0]), 0.0);
    }

    #[test]
    fn igi_isotropic_matrices() {
        let (s, q, hp, hm) = setup(1.0, 100.0, 0.0);
        let d = starting_thickness(s.b_star(), q.nu[0]);
        let (r, t) = igi(s.a_star(), d, &q, &hp, &hm);
        let r_want = [
            [1.55547, 0.33652, 0.17494, 0.13780],
            [0.33652, 0.07281, 0.03785, 0.02981],
            [0.17494, 0.03785, 0.01968, 0.01550],
            [0.13780, 0.02981, 0.01550, 0.01221],
        ];
        let t_want = [
            [13.04576, 0.33652, 0.17494, 0.13780],
            [0.33652, 2.84330, 0.03785, 0.02981],
            [0.17494, 0.03785, 1.83038, 0.01550],
            [0.13780, 0.02981, 0.01550, 7.62158],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(r[(i, j)], r_want[i][j], epsilon = 1e-5);
                assert_abs_diff_eq!(t[(i, j)], t_want[i][j], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn igi_anisotropic_matrices() {
        let (s, q, hp, hm) = setup(1.0, 100.0, 0.9);
        let d = starting_thickness(s.b_star(), q.nu[0]);
        let (r, t) = igi(s.a_star(), d, &q, &hp, &hm);
        let r_want = [
            [3.19060, 0.51300, 0.09360, -0.01636],
            [0.51300, 0.04916, 0.00524, 0.00941],
            [0.09360, 0.00524, 0.00250, 0.00486],
            [-0.01636, 0.00941, 0.00486, -0.00628],
        ];
        let t_want = [
            [9.56148, 0.66419, 0.16129, -0.01868],
            [0.66419, 2.80843, 0.07395, 0.02700],
            [0.16129, 0.07395, 1.83985, 0.07886],
            [-0.01868, 0.02700, 0.07886, 7.57767],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(r[(i, j)], r_want[i][j], epsilon = 1e-5);
                assert_abs_diff_eq!(t[(i, j)], t_want[i][j], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn diamond_isotropic_matrices() {
        let (s, q, hp, hm) = setup(1.0, 100.0, 0.0);
        let d = starting_thickness(s.b_star(), q.nu[0]);
        let (r, t) = diamond(s.a_star(), d, &q, &hp, &hm).unwrap();
        let r_want = [
            [1.04004, 0.27087, 0.14472, 0.11473],
            [0.27087, 0.07055, 0.03769, 0.02988],
            [0.14472, 0.03769, 0.02014, 0.01596],
            [0.11473, 0.02988, 0.01596, 0.01266],
        ];
        let t_want = [
            [15.57900, 0.27087, 0.14472, 0.11473],
            [0.27087, 2.86214, 0.03769, 0.02988],
            [0.14472, 0.03769, 1.83444, 0.01596],
            [0.11473, 0.02988, 0.01596, 7.63134],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(r[(i, j)], r_want[i][j], epsilon = 1e-5);
                assert_abs_diff_eq!(t[(i, j)], t_want[i][j], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn diamond_anisotropic_matrices() {
        let (s, q, hp, hm) = setup(1.0, 100.0, 0.9);
        let d = starting_thickness(s.b_star(), q.nu[0]);
        let (r, t) = diamond(s.a_star(), d, &q, &hp, &hm).unwrap();
        let r_want = [
            [1.92637, 0.40140, 0.08092, -0.00869],
            [0.40140, 0.05438, 0.00773, 0.00888],
            [0.08092, 0.00773, 0.00306, 0.00473],
            [-0.00869, 0.00888, 0.00473, -0.00569],
        ];
        let t_want = [
            [13.55020, 0.50578, 0.13009, -0.00913],
            [0.50578, 2.83738, 0.07117, 0.02622],
            [0.13009, 0.07117, 1.84366, 0.07534],
            [-0.00913, 0.02622, 0.07534, 7.59016],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(r[(i, j)], r_want[i][j], epsilon = 1e-5);
                assert_abs_diff_eq!(t[(i, j)], t_want[i][j], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn diamond_with_mismatched_index() {
        let s = Sample {
            a: 1.0,
            b: 100.0,
            g: 0.0,
            n: 1.5,
            quad_pts: 4,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let (hp, hm) = redistribution(0.0, &q, PhaseFunction::Legendre);
        let d = starting_thickness(s.b_star(), q.nu[0]);
        let (r, t) = diamond(s.a_star(), d, &q, &hp, &hm).unwrap();
        assert_abs_diff_eq!(r[(0, 0)], 0.65936, epsilon = 1e-5);
        assert_abs_diff_eq!(t[(0, 0)], 5.14582, epsilon = 1e-5);
        assert_abs_diff_eq!(t[(3, 3)], 7.14833, epsilon = 1e-5);
    }
}
