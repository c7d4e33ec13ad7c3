//! Description of a plane-parallel turbid sample.

use std::fmt::{Display, Formatter};

use turbid_base::error::{Result, TurbidError};
use turbid_base::{fresnel, quadrature, INFINITE_B};

/// Direction-cosine quadrature over one hemisphere.
///
/// Nodes are the cosines of the polar angle inside the sample, ascending,
/// with the last node pinned at the most normal direction the rule carries
/// (1 for normal incidence). `twonuw[i] = 2 ν_i w_i` is the flux weight used
/// whenever a radiance-like quantity is integrated into a flux.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature {
    /// Direction cosines inside the sample, ascending.
    pub nu: Vec<f64>,
    /// Quadrature weights matching `nu`.
    pub weight: Vec<f64>,
    /// Flux weights `2 ν w`.
    pub twonuw: Vec<f64>,
}

impl Quadrature {
    /// Number of directions in the hemisphere.
    pub fn len(&self) -> usize {
        self.nu.len()
    }

    /// True when the rule is empty (never the case for a built rule).
    pub fn is_empty(&self) -> bool {
        self.nu.is_empty()
    }

    fn from_parts(parts: Vec<(Vec<f64>, Vec<f64>)>) -> Self {
        let mut nu = Vec::new();
        let mut weight = Vec::new();
        for (x, w) in parts {
            nu.extend(x);
            weight.extend(w);
        }
        let twonuw = nu
            .iter()
            .zip(weight.iter())
            .map(|(&n, &w)| 2.0 * n * w)
            .collect();
        Quadrature { nu, weight, twonuw }
    }

    /// Index of the first node above the critical cosine `nu_c`.
    ///
    /// Directions at or below the critical cosine are trapped by total
    /// internal reflection and never couple to the outside.
    pub fn first_above(&self, nu_c: f64) -> usize {
        self.nu.partition_point(|&v| v <= nu_c)
    }
}

/// Intrinsic optical description of a sample between optional slides.
///
/// The incident direction is stored as a cosine; normal incidence is
/// `nu_0 = 1`. Optical thicknesses at or above [`INFINITE_B`] are treated as
/// semi-infinite.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Single-scattering albedo, `μs / (μa + μs)`.
    pub a: f64,
    /// Optical thickness, `(μa + μs) d`.
    pub b: f64,
    /// Scattering anisotropy (mean cosine of the phase function).
    pub g: f64,
    /// Physical thickness in mm.
    pub d: f64,
    /// Refractive index of the sample.
    pub n: f64,
    /// Refractive index of the slide above (1 for none).
    pub n_above: f64,
    /// Refractive index of the slide below (1 for none).
    pub n_below: f64,
    /// Optical thickness of the slide above (absorbing slides).
    pub b_above: f64,
    /// Optical thickness of the slide below.
    pub b_below: f64,
    /// Cosine of the incident polar angle, in air.
    pub nu_0: f64,
    /// Number of quadrature directions per hemisphere.
    pub quad_pts: usize,
}

impl Default for Sample {
    fn default() -> Self {
        Sample {
            a: 0.0,
            b: 1.0,
            g: 0.0,
            d: 1.0,
            n: 1.0,
            n_above: 1.0,
            n_below: 1.0,
            b_above: 0.0,
            b_below: 0.0,
            nu_0: 1.0,
            quad_pts: 8,
        }
    }
}

impl Sample {
    /// Checks every parameter against its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.a) {
            return Err(TurbidError::ParamOutOfRange {
                name: "a",
                value: self.a,
                expected: "0 <= a <= 1",
            });
        }
        if self.b < 0.0 || self.b.is_nan() {
            return Err(TurbidError::ParamOutOfRange {
                name: "b",
                value: self.b,
                expected: "b >= 0",
            });
        }
        if self.g.abs() >= 1.0 {
            return Err(TurbidError::ParamOutOfRange {
                name: "g",
                value: self.g,
                expected: "-1 < g < 1",
            });
        }
        if self.d <= 0.0 {
            return Err(TurbidError::ParamOutOfRange {
                name: "d",
                value: self.d,
                expected: "d > 0",
            });
        }
        for (name, value) in [
            ("n", self.n),
            ("n_above", self.n_above),
            ("n_below", self.n_below),
        ] {
            if value < 1.0 {
                return Err(TurbidError::ParamOutOfRange {
                    name,
                    value,
                    expected: "refractive index >= 1",
                });
            }
        }
        if !(self.nu_0 > 0.0 && self.nu_0 <= 1.0) {
            return Err(TurbidError::ParamOutOfRange {
                name: "nu_0",
                value: self.nu_0,
                expected: "0 < nu_0 <= 1",
            });
        }
        if self.quad_pts < 2 || self.quad_pts % 2 != 0 {
            return Err(TurbidError::ParamOutOfRange {
                name: "quad_pts",
                value: self.quad_pts as f64,
                expected: "even and >= 2",
            });
        }
        Ok(())
    }

    /// True when the optical thickness is the semi-infinite sentinel.
    pub fn is_semi_infinite(&self) -> bool {
        self.b >= INFINITE_B
    }

    /// Absorption coefficient in 1/mm (per unit thickness when
    /// semi-infinite).
    pub fn mu_a(&self) -> f64 {
        if self.is_semi_infinite() {
            1.0 - self.a
        } else {
            (1.0 - self.a) * self.b / self.d
        }
    }

    /// Scattering coefficient in 1/mm.
    pub fn mu_s(&self) -> f64 {
        if self.is_semi_infinite() {
            self.a
        } else {
            self.a * self.b / self.d
        }
    }

    /// Reduced scattering coefficient `μs (1 - g)`.
    pub fn mu_sp(&self) -> f64 {
        self.mu_s() * (1.0 - self.g)
    }

    /// Cosine of the critical angle inside the sample against air.
    pub fn nu_c(&self) -> f64 {
        fresnel::cos_critical(self.n, 1.0)
    }

    /// The truncated fraction `a gᴹ` of the δ-M transform (M = quad_pts).
    fn a_trunc(&self) -> f64 {
        self.a * self.g.powi(self.quad_pts as i32)
    }

    /// δ-M reduced albedo `a* = (a - a gᴹ) / (1 - a gᴹ)`.
    pub fn a_star(&self) -> f64 {
        let af = self.a_trunc();
        (self.a - af) / (1.0 - af)
    }

    /// δ-M reduced optical thickness `b* = (1 - a gᴹ) b`.
    ///
    /// Infinite for semi-infinite samples.
    pub fn b_star(&self) -> f64 {
        if self.is_semi_infinite() {
            return f64::INFINITY;
        }
        (1.0 - self.a_trunc()) * self.b
    }

    /// True when no refractive-index boundaries are present.
    pub fn is_matched(&self) -> bool {
        self.n == 1.0
            && self.n_above == 1.0
            && self.n_below == 1.0
            && self.b_above == 0.0
            && self.b_below == 0.0
    }

    /// Cosine of the incident direction refracted into the sample.
    pub fn nu_0_inside(&self) -> f64 {
        fresnel::cos_snell(1.0, self.nu_0, self.n)
    }

    /// Builds the direction-cosine quadrature for this sample.
    ///
    /// Radau rules pin the topmost direction of each sub-interval, so the
    /// normal direction (and, for oblique incidence, the refracted incident
    /// cone) are exact nodes. With a refractive mismatch the rule splits at
    /// the critical cosine: a Gauss rule covers the trapped directions and a
    /// Radau rule the escaping ones.
    pub fn quadrature(&self) -> Result<Quadrature> {
        self.validate()?;
        let half = self.quad_pts / 2;
        let parts = if self.nu_0 == 1.0 {
            if self.n == 1.0 {
                vec![quadrature::radau(self.quad_pts, 0.0, 1.0)?]
            } else {
                let nu_c = self.nu_c();
                vec![
                    quadrature::gauss(half, 0.0, nu_c)?,
                    quadrature::radau(half, nu_c, 1.0)?,
                ]
            }
        } else if self.n == 1.0 {
            vec![
                quadrature::radau(half, 0.0, self.nu_0)?,
                quadrature::radau(half, self.nu_0, 1.0)?,
            ]
        } else {
            // Oblique incidence with a mismatch: the critical cosine and the
            // refracted incident cone both become interval boundaries.
            let third = (self.quad_pts / 3).max(1);
            let rest = self.quad_pts - 2 * third;
            let nu_c = self.nu_c();
            let nu_00 = self.nu_0_inside();
            vec![
                quadrature::gauss(third, 0.0, nu_c)?,
                quadrature::radau(third, nu_c, nu_00)?,
                quadrature::radau(rest, nu_00, 1.0)?,
            ]
        };
        Ok(Quadrature::from_parts(parts))
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Intrinsic properties")?;
        writeln!(f, "   albedo              = {:.3}", self.a)?;
        writeln!(f, "   optical thickness   = {:.3}", self.b)?;
        writeln!(f, "   anisotropy          = {:.3}", self.g)?;
        writeln!(f, "   thickness           = {:.3} mm", self.d)?;
        writeln!(f, "   sample index        = {:.3}", self.n)?;
        writeln!(f, "   top slide index     = {:.3}", self.n_above)?;
        writeln!(f, "   bottom slide index  = {:.3}", self.n_below)?;
        writeln!(f, "   cos(incident angle) = {:.3}", self.nu_0)?;
        writeln!(f, "   quadrature points   = {}", self.quad_pts)?;
        writeln!(f, "Derived quantities")?;
        writeln!(f, "   mu_a                = {:.3} 1/mm", self.mu_a())?;
        writeln!(f, "   mu_s                = {:.3} 1/mm", self.mu_s())?;
        writeln!(f, "   mu_s*(1-g)          = {:.3} 1/mm", self.mu_sp())?;
        write!(f, "   cos(critical angle) = {:.4}", self.nu_c())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn derived_coefficients() {
        let s = Sample {
            a: 0.8,
            b: 2.0,
            g: 0.5,
            d: 4.0,
            ..Sample::default()
        };
        assert_abs_diff_eq!(s.mu_a(), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(s.mu_s(), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(s.mu_sp(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn delta_m_transform() {
        let s = Sample {
            a: 1.0,
            b: 100.0,
            g: 0.9,
            quad_pts: 4,
            ..Sample::default()
        };
        // a g^4 = 0.6561
        assert_abs_diff_eq!(s.a_star(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.b_star(), 34.39, epsilon = 1e-10);
    }

    #[test]
    fn matched_quadrature_sums() {
        let s = Sample {
            quad_pts: 8,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        assert_eq!(q.len(), 8);
        assert_abs_diff_eq!(q.twonuw.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.nu[7], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn mismatched_quadrature_splits_at_critical_angle() {
        let s = Sample {
            n: 1.5,
            quad_pts: 8,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        let nu_c = s.nu_c();
        assert_eq!(q.first_above(nu_c), 4);
        assert!(q.nu[3] < nu_c && q.nu[4] > nu_c);
        assert_abs_diff_eq!(q.nu[7], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(q.twonuw.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn oblique_quadrature_contains_incident_cone() {
        let s = Sample {
            nu_0: 0.5,
            quad_pts: 8,
            ..Sample::default()
        };
        let q = s.quadrature().unwrap();
        assert!(q.nu.iter().any(|&v| (v - 0.5).abs() < 1e-12));
        assert_abs_diff_eq!(q.twonuw.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut s = Sample::default();
        s.a = 1.5;
        assert!(s.validate().is_err());
        s.a = 0.5;
        s.quad_pts = 7;
        assert!(s.validate().is_err());
        s.quad_pts = 8;
        s.nu_0 = 0.0;
        assert!(s.validate().is_err());
    }
}
