//! Coupled reflection and transmission spheres.
//!
//! With a sample bridging two spheres, light transmitted by the sample
//! keeps migrating between them; the steady-state detector powers satisfy a
//! 2×2 linear system in the two single-sphere gains.

use super::{PortId, Sphere};
use crate::ad::RtTotals;

/// A reflection sphere and a transmission sphere sharing one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleSphere {
    /// Sphere on the illuminated side.
    pub r_sphere: Sphere,
    /// Sphere on the transmission side.
    pub t_sphere: Sphere,
}

impl DoubleSphere {
    /// Pairs two spheres.
    pub fn new(r_sphere: Sphere, t_sphere: Sphere) -> Self {
        DoubleSphere { r_sphere, t_sphere }
    }

    /// Total wall powers `(P_r, P_t)` in the two spheres per unit incident
    /// power, from the coupled system
    ///
    /// ```text
    /// P_r = G_r UR1 + G_r UTU a_s P_t
    /// P_t = G_t UT1 + G_t UTU a_s P_r
    /// ```
    ///
    /// where `a_s` is the sample-port fraction through which the spheres
    /// exchange light.
    pub fn coupled_powers(&self, rt: &RtTotals) -> (f64, f64) {
        let g_r = self.r_sphere.gain(Some(rt.uru), None);
        let g_t = self.t_sphere.gain(Some(rt.uru), None);
        let a_s = self.r_sphere.port(PortId::Sample).a();
        let x = g_r * rt.utu * a_s;
        let y = g_t * rt.utu * a_s;
        let det = 1.0 - x * y;
        let p_r = (g_r * rt.ur1 + x * g_t * rt.ut1) / det;
        let p_t = (g_t * rt.ut1 + y * g_r * rt.ur1) / det;
        (p_r, p_t)
    }

    /// Measured `(M_R, M_T)` for the coupled pair, normalized against the
    /// same substitution sequence as the single-sphere operators.
    pub fn mr_mt(&self, rt: &RtTotals, r_u: f64, t_u: f64, f_ru: f64, f_tu: f64) -> (f64, f64) {
        let diffuse = RtTotals {
            ur1: rt.ur1 - (1.0 - f_ru) * r_u,
            ut1: rt.ut1 - (1.0 - f_tu) * t_u,
            ..*rt
        };
        let (p_r, p_t) = self.coupled_powers(&diffuse);

        let r_std = self.r_sphere.r_std;
        let p_r_cal = self.r_sphere.gain(Some(r_std), None) * r_std;
        let m_r = r_std * p_r / p_r_cal;

        let t_std = self.t_sphere.r_std;
        let p_t_cal = self.t_sphere.gain(Some(0.0), None) * t_std;
        let m_t = t_std * p_t / p_t_cal;
        (m_r, m_t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spheres() -> DoubleSphere {
        let mut r = Sphere::new(200.0, 25.0);
        r.set_port_diameter(PortId::Third, 5.0);
        r.set_port_diameter(PortId::Detector, 10.0);
        r.set_port_uru(PortId::Detector, 0.05);
        r.r_wall = 0.96;
        r.r_std = 0.98;
        let mut t = Sphere::new(200.0, 25.0);
        t.set_port_diameter(PortId::Third, 10.0);
        t.set_port_diameter(PortId::Detector, 10.0);
        t.set_port_uru(PortId::Detector, 0.05);
        t.r_wall = 0.96;
        t.r_std = 0.98;
        DoubleSphere::new(r, t)
    }

    #[test]
    fn coupled_powers_reference_values() {
        let ds = spheres();
        let rt = RtTotals {
            ur1: 0.30167,
            ut1: 0.62261,
            uru: 0.39638,
            utu: 0.51100,
        };
        let (p_r, p_t) = ds.coupled_powers(&rt);
        assert_abs_diff_eq!(p_r, 7.701360, epsilon = 1e-5);
        assert_abs_diff_eq!(p_t, 14.710053, epsilon = 1e-5);
    }

    #[test]
    fn opaque_sample_decouples_the_spheres() {
        let ds = spheres();
        let rt = RtTotals {
            ur1: 0.5,
            ut1: 0.0,
            uru: 0.5,
            utu: 0.0,
        };
        let (p_r, p_t) = ds.coupled_powers(&rt);
        let g_r = ds.r_sphere.gain(Some(0.5), None);
        assert_abs_diff_eq!(p_r, g_r * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p_t, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn coupling_amplifies_both_detectors() {
        let ds = spheres();
        let coupled = RtTotals {
            ur1: 0.3,
            ut1: 0.4,
            uru: 0.35,
            utu: 0.45,
        };
        let uncoupled = RtTotals {
            utu: 0.0,
            ..coupled
        };
        let (pr_c, pt_c) = ds.coupled_powers(&coupled);
        let (pr_u, pt_u) = ds.coupled_powers(&uncoupled);
        assert!(pr_c > pr_u);
        assert!(pt_c > pt_u);
    }
}
