//! Integrating-sphere model: analytic gains and measurement operators.
//!
//! A sphere is a wall plus four ports held in a flat array indexed by
//! [`PortId`]; a port never points back at its sphere, which keeps the
//! geometry acyclic. Port areas are the usual small-cap approximation
//! `a = d² / 4D²` relative to the sphere surface.

mod double;
mod monte_carlo;

pub use double::DoubleSphere;
pub use monte_carlo::GainEstimate;

/// The four openings of a sphere, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortId {
    /// Port holding the sample (or the calibration standard).
    Sample,
    /// Entrance port of a reflection sphere; the port that passes the
    /// unscattered beam in a transmission sphere.
    Third,
    /// Port holding the detector.
    Detector,
    /// An additional open port, absent unless given a diameter.
    Empty,
}

impl PortId {
    /// All ports, in storage order.
    pub const ALL: [PortId; 4] = [
        PortId::Sample,
        PortId::Third,
        PortId::Detector,
        PortId::Empty,
    ];

    fn index(self) -> usize {
        match self {
            PortId::Sample => 0,
            PortId::Third => 1,
            PortId::Detector => 2,
            PortId::Empty => 3,
        }
    }
}

/// One port of an integrating sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Port {
    /// Port diameter in mm.
    pub d: f64,
    /// Diffuse reflectance of whatever fills the port.
    pub uru: f64,
    /// Center of the port cap on the sphere surface.
    pub center: [f64; 3],
    a: f64,
    chord2: f64,
}

impl Port {
    fn new(d_sphere: f64, d: f64, uru: f64, center: [f64; 3]) -> Self {
        let mut port = Port {
            d,
            uru,
            center,
            a: 0.0,
            chord2: 0.0,
        };
        port.update_geometry(d_sphere);
        port
    }

    fn update_geometry(&mut self, d_sphere: f64) {
        let big_r = d_sphere / 2.0;
        let r = self.d / 2.0;
        self.a = (r * r) / (4.0 * big_r * big_r);
        // A chord radius of exactly r makes the probability that a uniform
        // point lands in the cap equal the relative area above, so the
        // Monte Carlo and analytic gains share one geometry.
        self.chord2 = r * r;
    }

    /// Relative area of the port cap.
    pub fn a(&self) -> f64 {
        self.a
    }

    /// True if a point on the sphere surface lands inside the cap.
    pub(crate) fn hit(&self, p: [f64; 3]) -> bool {
        let dx = p[0] - self.center[0];
        let dy = p[1] - self.center[1];
        let dz = p[2] - self.center[2];
        dx * dx + dy * dy + dz * dz < self.chord2
    }
}

/// A single integrating sphere.
#[derive(Debug, Clone, PartialEq)]
pub struct Sphere {
    d: f64,
    ports: [Port; 4],
    /// Diffuse reflectance of the sphere wall.
    pub r_wall: f64,
    /// Reflectance of the calibration standard used with this sphere.
    pub r_std: f64,
    /// Whether a baffle blocks direct port-to-detector paths.
    pub baffle: bool,
}

impl Sphere {
    /// A sphere of diameter `d_sphere` with a sample port of diameter
    /// `d_sample`; remaining ports start closed.
    pub fn new(d_sphere: f64, d_sample: f64) -> Self {
        let r = d_sphere / 2.0;
        Sphere {
            d: d_sphere,
            ports: [
                Port::new(d_sphere, d_sample, 0.0, [0.0, 0.0, -r]),
                Port::new(d_sphere, 0.0, 0.0, [0.0, 0.0, r]),
                Port::new(d_sphere, 0.0, 0.0, [r, 0.0, 0.0]),
                Port::new(d_sphere, 0.0, 0.0, [-r, 0.0, 0.0]),
            ],
            r_wall: 0.99,
            r_std: 0.99,
            baffle: false,
        }
    }

    /// Sphere diameter in mm.
    pub fn diameter(&self) -> f64 {
        self.d
    }

    /// Read access to one port.
    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.index()]
    }

    /// Sets a port diameter, refreshing the cap geometry.
    pub fn set_port_diameter(&mut self, id: PortId, d: f64) {
        let port = &mut self.ports[id.index()];
        port.d = d;
        port.update_geometry(self.d);
    }

    /// Sets the diffuse reflectance seen at a port.
    pub fn set_port_uru(&mut self, id: PortId, uru: f64) {
        self.ports[id.index()].uru = uru;
    }

    /// Wall fraction of the sphere surface.
    pub fn a_wall(&self) -> f64 {
        1.0 - self.ports.iter().map(|p| p.a).sum::<f64>()
    }

    /// Detector gain relative to an isotropic source in a black sphere.
    ///
    /// `sample_uru` / `third_uru` override the reflectances currently
    /// mounted at those ports (the calibration sequence swaps them
    /// repeatedly). Without a baffle the gain is a single geometric series
    /// over the average wall bounce; a baffle forces the first bounce off
    /// the wall, so port reflectances couple only through the wall term.
    pub fn gain(&self, sample_uru: Option<f64>, third_uru: Option<f64>) -> f64 {
        let sample_uru = sample_uru.unwrap_or(self.port(PortId::Sample).uru);
        let third_uru = third_uru.unwrap_or(self.port(PortId::Third).uru);
        let a_wall = self.a_wall();
        let detector = self.port(PortId::Detector);
        let empty = self.port(PortId::Empty);
        let a_sample = self.port(PortId::Sample).a;
        let a_third = self.port(PortId::Third).a;

        let denom = if self.baffle {
            let ports = detector.a * detector.uru + a_sample * sample_uru + empty.a * empty.uru;
            let r = self.r_wall + (a_third / a_wall) * third_uru;
            1.0 - r * (a_wall + (1.0 - a_third) * ports)
        } else {
            1.0 - a_wall * self.r_wall
                - detector.a * detector.uru
                - a_sample * sample_uru
                - a_third * third_uru
                - empty.a * empty.uru
        };
        if denom <= 0.0 {
            f64::INFINITY
        } else {
            1.0 / denom
        }
    }

    /// Measured reflectance `M_R` for a sample with collimated response
    /// `ur1` and diffuse response `uru`.
    ///
    /// The measurement is normalized by the substitution sequence: sample,
    /// calibration standard, and dark (empty sample port) readings.
    ///
    /// # Arguments
    ///
    /// * `ur1` - total reflectance of the sample, collimated incidence.
    /// * `uru` - total reflectance for diffuse incidence.
    /// * `r_u` - unscattered (specular) reflectance of the sample.
    /// * `f_u` - fraction of the unscattered reflection collected.
    /// * `f_w` - fraction of the beam that hits the wall first.
    pub fn mr(&self, ur1: f64, uru: f64, r_u: f64, f_u: f64, f_w: f64) -> f64 {
        let r_diffuse = ur1 - r_u;
        let r_first = if self.baffle {
            self.r_wall * (1.0 - self.port(PortId::Third).a)
        } else {
            1.0
        };

        let gain_dark = self.gain(Some(0.0), Some(0.0));
        let gain_sample = self.gain(Some(uru), Some(0.0));
        let gain_cal = self.gain(Some(self.r_std), Some(0.0));

        let p_cal = gain_cal * (self.r_std * (1.0 - f_w) + f_w * self.r_wall);
        let p_dark = gain_dark * f_w * self.r_wall;
        let p_ss = r_first * (r_diffuse * (1.0 - f_w) + f_w * self.r_wall);
        let p_su = self.r_wall * (1.0 - f_w) * f_u * r_u;
        let p = gain_sample * (p_ss + p_su);

        self.r_std * (p - p_dark) / (p_cal - p_dark)
    }

    /// Measured transmittance `M_T`.
    ///
    /// # Arguments
    ///
    /// * `ut1` - total transmittance of the sample, collimated incidence.
    /// * `uru` - diffuse reflectance of the sample (it faces the sphere).
    /// * `t_u` - unscattered transmittance of the sample.
    /// * `f_u` - fraction of the unscattered beam collected by the sphere.
    pub fn mt(&self, ut1: f64, uru: f64, t_u: f64, f_u: f64) -> f64 {
        let a_third = self.port(PortId::Third).a;
        let (r_cal, r_third) = if a_third == 0.0 {
            (self.r_wall, self.r_wall)
        } else if f_u == 0.0 {
            (self.r_std, 0.0)
        } else {
            (self.r_std, self.r_std)
        };

        let r_first = if self.baffle {
            self.r_wall * (1.0 - a_third) + r_third * a_third
        } else {
            1.0
        };

        let gain_sample = self.gain(Some(uru), Some(r_third));
        let gain_cal = self.gain(Some(0.0), Some(r_cal));

        let p_ss = r_first * (ut1 - t_u);
        let p_su = r_third * t_u * f_u;
        let p = (p_ss + p_su) * gain_sample;
        let p_cal = r_cal * gain_cal;

        r_cal * p / p_cal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Published four-port geometry used across the gain tests.
    fn reference_sphere() -> Sphere {
        let mut s = Sphere::new(60.0, 20.0);
        s.set_port_diameter(PortId::Third, 15.0);
        s.set_port_diameter(PortId::Detector, 10.0);
        s.set_port_uru(PortId::Sample, 0.5);
        s.set_port_uru(PortId::Third, 0.95);
        s.set_port_uru(PortId::Detector, 0.5);
        s.r_wall = 0.75;
        s.r_std = 0.8;
        s
    }

    #[test]
    fn port_areas() {
        let s = reference_sphere();
        assert_abs_diff_eq!(s.port(PortId::Sample).a(), 400.0 / 14400.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.port(PortId::Third).a(), 225.0 / 14400.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            s.port(PortId::Detector).a(),
            100.0 / 14400.0,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            s.a_wall(),
            1.0 - (400.0 + 225.0 + 100.0) / 14400.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn open_geometry_gain() {
        let s = reference_sphere();
        assert_abs_diff_eq!(s.gain(None, None), 3.91304, epsilon = 2e-5);
    }

    #[test]
    fn baffled_gain() {
        let mut s = reference_sphere();
        s.baffle = true;
        assert_abs_diff_eq!(s.gain(None, None), 3.848638, epsilon = 1e-5);
    }

    #[test]
    fn black_sphere_has_unit_gain() {
        let mut s = Sphere::new(200.0, 20.0);
        s.r_wall = 0.0;
        assert_abs_diff_eq!(s.gain(Some(0.0), Some(0.0)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn measured_reflectance_reference_value() {
        let mut s = Sphere::new(200.0, 25.0);
        s.set_port_diameter(PortId::Third, 5.0);
        s.set_port_diameter(PortId::Detector, 10.0);
        s.set_port_uru(PortId::Detector, 0.05);
        s.r_wall = 0.96;
        s.r_std = 0.98;
        // sample totals for a = 0.95, b = 1, N = 4
        let mr = s.mr(0.30167, 0.39638, 0.0, 1.0, 0.0);
        assert_abs_diff_eq!(mr, 0.285648, epsilon = 1e-5);
    }

    #[test]
    fn measured_transmittance_reference_value() {
        let mut s = Sphere::new(200.0, 25.0);
        s.set_port_diameter(PortId::Third, 10.0);
        s.set_port_diameter(PortId::Detector, 10.0);
        s.set_port_uru(PortId::Detector, 0.05);
        s.r_wall = 0.96;
        s.r_std = 0.98;
        let mt = s.mt(0.62261, 0.39638, 0.0, 1.0);
        assert_abs_diff_eq!(mt, 0.645154, epsilon = 1e-5);
    }

    #[test]
    fn huge_sphere_reads_the_sample_directly() {
        // In the limit of a huge sphere the substitution measurement
        // reduces to the raw sample response.
        let mut s = Sphere::new(5000.0, 10.0);
        s.set_port_diameter(PortId::Third, 1.0);
        s.r_wall = 0.9;
        s.r_std = 0.99;
        let mr = s.mr(0.4, 0.45, 0.0, 1.0, 0.0);
        assert_abs_diff_eq!(mr, 0.4, epsilon = 1e-3);
    }
}
