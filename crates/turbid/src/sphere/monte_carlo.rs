//! Photon-bounce Monte Carlo validation of the analytic sphere gains.
//!
//! Photons are launched from the sample port and bounce between wall and
//! ports until absorbed or detected. Landing points are uniform on the
//! sphere; a port is hit when the point falls inside its cap. The RNG is
//! seeded explicitly so every estimate is reproducible.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{DoubleSphere, PortId, Sphere};
use crate::ad::RtTotals;

/// Monte Carlo gain estimate with its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainEstimate {
    /// Mean gain over the trials.
    pub gain: f64,
    /// Standard error of the mean.
    pub stderr: f64,
}

/// Where the photon last landed; the baffle suppresses direct
/// sample-detector exchanges in either direction.
#[derive(Clone, Copy, PartialEq)]
enum Location {
    Wall,
    Port(PortId),
}

/// Weight below which photons play Russian roulette instead of bouncing
/// forever.
const ROULETTE_WEIGHT: f64 = 1e-4;

fn uniform_on_sphere(rng: &mut impl Rng, radius: f64) -> [f64; 3] {
    loop {
        let x: f64 = rng.gen_range(-1.0..1.0);
        let y: f64 = rng.gen_range(-1.0..1.0);
        let z: f64 = rng.gen_range(-1.0..1.0);
        let r2 = x * x + y * y + z * z;
        if r2 > 1e-12 && r2 <= 1.0 {
            let s = radius / r2.sqrt();
            return [x * s, y * s, z * s];
        }
    }
}

impl Sphere {
    /// Bounces one photon until it dies; returns the detected weight, the
    /// weight passed through the sample (double-sphere mode only), and the
    /// bounce count.
    fn trace_photon(
        &self,
        rng: &mut ChaCha8Rng,
        mut weight: f64,
        double: bool,
    ) -> (f64, f64, usize) {
        let mut detected = 0.0;
        let mut transmitted = 0.0;
        let mut bounces = 0;
        let mut last = Location::Port(PortId::Sample);
        let radius = self.diameter() / 2.0;

        while weight > 0.0 {
            let p = uniform_on_sphere(rng, radius);

            if self.port(PortId::Detector).hit(p) {
                if last == Location::Port(PortId::Sample) && self.baffle {
                    continue;
                }
                let absorbed = weight * (1.0 - self.port(PortId::Detector).uru);
                detected += absorbed;
                weight -= absorbed;
                last = Location::Port(PortId::Detector);
            } else if self.port(PortId::Sample).hit(p) {
                if last == Location::Port(PortId::Detector) && self.baffle {
                    continue;
                }
                last = Location::Port(PortId::Sample);
                let uru = self.port(PortId::Sample).uru;
                if double {
                    // the photon either reflects back into this sphere or
                    // leaves through the sample with its full weight
                    if rng.gen::<f64>() > uru {
                        transmitted = weight;
                        weight = 0.0;
                    }
                } else {
                    weight *= uru;
                }
            } else if self.port(PortId::Third).hit(p) {
                weight *= self.port(PortId::Third).uru;
                last = Location::Port(PortId::Third);
            } else if self.port(PortId::Empty).hit(p) {
                weight *= self.port(PortId::Empty).uru;
                last = Location::Port(PortId::Empty);
            } else {
                weight *= self.r_wall;
                last = Location::Wall;
            }

            if weight > 0.0 && weight < ROULETTE_WEIGHT {
                if rng.gen::<f64>() < 0.1 {
                    weight *= 10.0;
                } else {
                    weight = 0.0;
                }
            }
            bounces += 1;
        }
        (detected, transmitted, bounces)
    }

    /// Converts a mean detected weight into a gain, undoing the detector
    /// acceptance and (with a baffle) the forced first wall bounce.
    fn detected_to_gain(&self, detected: f64) -> f64 {
        let detector = self.port(PortId::Detector);
        let mut scale = detector.a() * (1.0 - detector.uru);
        if self.baffle {
            let third = self.port(PortId::Third);
            scale *= (1.0 - third.a()) * self.r_wall + third.a() * third.uru;
        }
        detected / scale
    }

    /// Monte Carlo estimate of the sphere gain.
    ///
    /// Runs `trials` independent batches of `photons / trials` photons and
    /// reports the batch mean and its standard error.
    pub fn mc_gain(&self, photons: usize, trials: usize, seed: u64) -> GainEstimate {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let per_trial = (photons / trials).max(1);
        let mut gains = Vec::with_capacity(trials);
        for _ in 0..trials {
            let mut detected = 0.0;
            for _ in 0..per_trial {
                detected += self.trace_photon(&mut rng, 1.0, false).0;
            }
            gains.push(self.detected_to_gain(detected / per_trial as f64));
        }
        let mean = gains.iter().sum::<f64>() / trials as f64;
        let var = gains.iter().map(|&g| (g - mean) * (g - mean)).sum::<f64>() / trials as f64;
        GainEstimate {
            gain: mean,
            stderr: (var / trials as f64).sqrt(),
        }
    }
}

impl DoubleSphere {
    /// Monte Carlo estimate of the detected powers in the two spheres,
    /// companion to [`DoubleSphere::coupled_powers`].
    pub fn mc_detected(
        &self,
        rt: &RtTotals,
        photons: usize,
        seed: u64,
    ) -> (f64, f64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut r_detected = 0.0;
        let mut t_detected = 0.0;
        for _ in 0..photons {
            let (r, t) = self.trace_one(&mut rng, rt);
            r_detected += r;
            t_detected += t;
        }
        (
            r_detected / photons as f64,
            t_detected / photons as f64,
        )
    }

    /// One photon through the double-sphere assembly.
    fn trace_one(&self, rng: &mut ChaCha8Rng, rt: &RtTotals) -> (f64, f64) {
        let mut r_detected = 0.0;
        let mut t_detected = 0.0;

        // first interaction with the sample decides the starting sphere
        let x: f64 = rng.gen();
        let (mut in_r_sphere, mut weight) = if x < rt.ur1 {
            (true, 1.0)
        } else if x < rt.ur1 + rt.ut1 {
            (false, 1.0)
        } else {
            (true, 0.0)
        };

        while weight > 0.0 {
            let sphere = if in_r_sphere {
                &self.r_sphere
            } else {
                &self.t_sphere
            };
            let (detected, transmitted, _) = sphere.trace_photon(rng, weight, true);
            if transmitted > 0.0 {
                // the photon reached the sample port; it crosses with
                // probability UTU, otherwise it is absorbed
                if rng.gen::<f64>() < rt.utu {
                    in_r_sphere = !in_r_sphere;
                    weight = transmitted;
                } else {
                    weight = 0.0;
                }
            } else {
                weight = 0.0;
                if in_r_sphere {
                    r_detected += detected;
                } else {
                    t_detected += detected;
                }
            }
        }
        (r_detected, t_detected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

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
    fn analytic_gain_within_monte_carlo_interval() {
        let s = reference_sphere();
        let analytic = s.gain(None, None);
        let est = s.mc_gain(40_000, 20, 0xACE1);
        assert!(est.stderr > 0.0);
        assert!(
            (analytic - est.gain).abs() < 4.0 * est.stderr + 0.02,
            "analytic {analytic} vs MC {} ± {}",
            est.gain,
            est.stderr
        );
    }

    #[test]
    fn estimates_are_reproducible() {
        let s = reference_sphere();
        let a = s.mc_gain(5_000, 10, 42);
        let b = s.mc_gain(5_000, 10, 42);
        assert_abs_diff_eq!(a.gain, b.gain);
        assert_abs_diff_eq!(a.stderr, b.stderr);
    }

    #[test]
    fn baffled_trace_stays_finite() {
        let mut s = reference_sphere();
        s.baffle = true;
        let est = s.mc_gain(10_000, 10, 7);
        assert!(est.gain.is_finite() && est.gain > 0.0);
    }

    #[test]
    fn double_sphere_splits_light_sensibly() {
        let mut r = Sphere::new(200.0, 25.0);
        r.set_port_diameter(PortId::Detector, 10.0);
        r.r_wall = 0.95;
        let t = r.clone();
        let ds = DoubleSphere::new(r, t);
        // a nearly opaque reflector: reflection detector dominates
        let rt = RtTotals {
            ur1: 0.8,
            ut1: 0.05,
            uru: 0.8,
            utu: 0.05,
        };
        let (rd, td) = ds.mc_detected(&rt, 20_000, 99);
        assert!(rd > td);
        assert!(rd > 0.0 && td > 0.0);
    }
}
