//! Top-level adding-doubling driver.
//!
//! A [`Solver`] owns the caches that survive between forward calls: the
//! direction-cosine quadrature (rebuilt when `N`, the refractive index, or
//! the incident cosine changes) and the redistribution matrices (rebuilt
//! when the anisotropy or the quadrature changes). Sweeping the albedo or
//! the optical thickness therefore reuses everything but the doubling loop.

use nalgebra::DMatrix;
use turbid_base::error::{Result, TurbidError};
use turbid_base::fresnel;

use crate::boundary;
use crate::combine::{self, SlideArrays};
use crate::phase::{self, PhaseFunction};
use crate::sample::{Quadrature, Sample};
use crate::start::{self, Starter};

/// Total reflectance and transmittance of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RtTotals {
    /// Total reflectance for collimated incidence along `ν0`.
    pub ur1: f64,
    /// Total transmittance for collimated incidence.
    pub ut1: f64,
    /// Total reflectance for isotropic diffuse incidence.
    pub uru: f64,
    /// Total transmittance for diffuse incidence.
    pub utu: f64,
}

/// Full angle-resolved reflection/transmission matrices of the stack.
///
/// For a symmetric stack `r01 == r10` and `t01 == t10`.
#[derive(Debug, Clone, PartialEq)]
pub struct RtMatrices {
    /// Reflection for light incident from above.
    pub r01: DMatrix<f64>,
    /// Reflection for light incident from below.
    pub r10: DMatrix<f64>,
    /// Transmission downward.
    pub t01: DMatrix<f64>,
    /// Transmission upward.
    pub t10: DMatrix<f64>,
}

/// Tunable pieces of the forward path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverOptions {
    /// Redistribution construction.
    pub phase: PhaseFunction,
    /// Starting-layer initializer.
    pub starter: Starter,
}

#[derive(Clone, PartialEq)]
struct QuadKey {
    quad_pts: usize,
    n: u64,
    nu_0: u64,
}

impl QuadKey {
    fn of(s: &Sample) -> Self {
        QuadKey {
            quad_pts: s.quad_pts,
            n: s.n.to_bits(),
            nu_0: s.nu_0.to_bits(),
        }
    }
}

#[derive(Clone, PartialEq)]
struct PhaseKey {
    quad: QuadKey,
    g: u64,
    method: PhaseFunction,
}

/// Forward adding-doubling solver with quadrature and redistribution
/// caches.
pub struct Solver {
    /// Options for the forward path.
    pub options: SolverOptions,
    quad: Option<(QuadKey, Quadrature)>,
    redist: Option<(PhaseKey, DMatrix<f64>, DMatrix<f64>)>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    /// Creates a solver with default options.
    pub fn new() -> Self {
        Solver {
            options: SolverOptions::default(),
            quad: None,
            redist: None,
        }
    }

    fn ensure_quadrature(&mut self, s: &Sample) -> Result<()> {
        let key = QuadKey::of(s);
        if !matches!(&self.quad, Some((k, _)) if *k == key) {
            log::debug!(
                "rebuilding quadrature: N = {}, n = {}, nu_0 = {}",
                s.quad_pts,
                s.n,
                s.nu_0
            );
            self.quad = Some((key, s.quadrature()?));
            self.redist = None;
        }
        Ok(())
    }

    fn ensure_redistribution(&mut self, s: &Sample) -> Result<()> {
        self.ensure_quadrature(s)?;
        let key = PhaseKey {
            quad: QuadKey::of(s),
            g: s.g.to_bits(),
            method: self.options.phase,
        };
        if !matches!(&self.redist, Some((k, _, _)) if *k == key) {
            let quad = &self.quad.as_ref().unwrap().1;
            let (hp, hm) = phase::redistribution(s.g, quad, self.options.phase);
            self.redist = Some((key, hp, hm));
        }
        Ok(())
    }

    /// The quadrature currently cached for `s`.
    pub fn quadrature(&mut self, s: &Sample) -> Result<&Quadrature> {
        self.ensure_quadrature(s)?;
        Ok(&self.quad.as_ref().unwrap().1)
    }

    /// Angle-resolved reflection/transmission matrices of the slab plus
    /// slides.
    pub fn rt_matrices(&mut self, s: &Sample) -> Result<RtMatrices> {
        s.validate()?;
        self.ensure_redistribution(s)?;
        let quad = &self.quad.as_ref().unwrap().1;
        let (_, hp, hm) = self.redist.as_ref().unwrap();

        let (r12, t12) = slab_matrices(s, quad, hp, hm, self.options.starter)?;

        if s.is_matched() {
            return Ok(RtMatrices {
                r01: r12.clone(),
                r10: r12,
                t01: t12.clone(),
                t10: t12,
            });
        }

        let top = boundary::boundary(s, quad, true);
        let top_arrays = SlideArrays {
            r01: &top.r01,
            r10: &top.r10,
            t01: &top.t01,
            t10: &top.t10,
        };

        if s.n_above == s.n_below && s.b_above == s.b_below {
            let (r, t) = combine::add_same_slides(quad, &top_arrays, &r12, &t12)?;
            return Ok(RtMatrices {
                r01: r.clone(),
                r10: r,
                t01: t.clone(),
                t10: t,
            });
        }

        let bot = boundary::boundary(s, quad, false);
        let bot_arrays = SlideArrays {
            r01: &bot.r01,
            r10: &bot.r10,
            t01: &bot.t01,
            t10: &bot.t10,
        };
        let (r02, r20, t02, t20) =
            combine::add_slide_above(quad, &top_arrays, &r12, &r12, &t12, &t12)?;
        let (r03, r30, t03, t30) =
            combine::add_slide_below(quad, &bot_arrays, &r02, &r20, &t02, &t20)?;
        Ok(RtMatrices {
            r01: r03,
            r10: r30,
            t01: t03,
            t10: t30,
        })
    }

    /// Total reflectance and transmittance for the sample.
    pub fn rt(&mut self, s: &Sample) -> Result<RtTotals> {
        let m = self.rt_matrices(s)?;
        let quad = &self.quad.as_ref().unwrap().1;
        Ok(contract(s, quad, &m.r01, &m.t01))
    }

    /// As [`Solver::rt`], but for light incident on the bottom of the
    /// stack.
    pub fn rt_from_below(&mut self, s: &Sample) -> Result<RtTotals> {
        let m = self.rt_matrices(s)?;
        let quad = &self.quad.as_ref().unwrap().1;
        Ok(contract(s, quad, &m.r10, &m.t10))
    }

    /// Unscattered (specular) reflectance and transmittance of the stack
    /// for the incident direction.
    pub fn unscattered_rt(&self, s: &Sample) -> (f64, f64) {
        fresnel::specular_rt(
            s.n_above, s.n, s.n_below, s.b, s.nu_0, s.b_above, s.b_below,
        )
    }

    /// Runs the forward calculation for every `(a, b, g)` triple of a
    /// sweep, reusing caches wherever the varied parameters allow.
    pub fn rt_sweep(&mut self, base: &Sample, sweep: &Sweep) -> Result<Vec<RtTotals>> {
        let len = sweep.len()?;
        let mut out = Vec::with_capacity(len);
        let mut s = base.clone();
        for i in 0..len {
            sweep.assign(i, &mut s);
            out.push(self.rt(&s)?);
        }
        Ok(out)
    }
}

/// Symmetric slab matrices without boundaries: seed layer plus doubling.
fn slab_matrices(
    s: &Sample,
    quad: &Quadrature,
    hp: &DMatrix<f64>,
    hm: &DMatrix<f64>,
    starter: Starter,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    // A strictly empty slab makes the starting solve singular; nudge it.
    let mut s = s.clone();
    if s.b <= 0.0 {
        s.b = 1e-9;
    }
    let (r, t, d) = start::thinnest_layer(&s, quad, hp, hm, starter)?;
    combine::double_until(quad, s.n, r, t, d, s.b_star())
}

/// Contracts layer matrices onto the incident direction and the diffuse
/// hemisphere.
///
/// Only cones that couple to the outside (above the critical angle)
/// participate; the diffuse sums pick up the n² radiance factor.
fn contract(s: &Sample, quad: &Quadrature, r: &DMatrix<f64>, t: &DMatrix<f64>) -> RtTotals {
    let n = quad.len();
    let k = quad.first_above(s.nu_c());

    let mut urx = vec![0.0; n - k];
    let mut utx = vec![0.0; n - k];
    for (jj, j) in (k..n).enumerate() {
        let mut ur = 0.0;
        let mut ut = 0.0;
        for i in k..n {
            ur += quad.twonuw[i] * r[(i, j)];
            ut += quad.twonuw[i] * t[(i, j)];
        }
        urx[jj] = ur;
        utx[jj] = ut;
    }

    let n2 = s.n * s.n;
    let uru = urx
        .iter()
        .zip(&quad.twonuw[k..])
        .map(|(&u, &w)| u * w)
        .sum::<f64>()
        * n2;
    let utu = utx
        .iter()
        .zip(&quad.twonuw[k..])
        .map(|(&u, &w)| u * w)
        .sum::<f64>()
        * n2;

    // The incident cone: the last node for normal incidence, the refracted
    // node for oblique incidence (pinned by the Radau split).
    let j0 = if s.nu_0 == 1.0 {
        n - 1
    } else {
        let nu_00 = s.nu_0_inside();
        quad.nu
            .iter()
            .enumerate()
            .min_by(|x, y| {
                (x.1 - nu_00)
                    .abs()
                    .partial_cmp(&(y.1 - nu_00).abs())
                    .unwrap()
            })
            .map(|(i, _)| i)
            .unwrap()
    };
    let j0 = j0.max(k) - k;

    RtTotals {
        ur1: urx[j0],
        ut1: utx[j0],
        uru,
        utu,
    }
}

/// Scalar-or-array view of the intrinsic optical properties.
///
/// The forward path accepts any mix of fixed scalars (taken from the base
/// sample) and per-index arrays; all arrays present must share one length.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sweep<'a> {
    /// Per-index albedo values, or `None` to keep the base value.
    pub a: Option<&'a [f64]>,
    /// Per-index optical thicknesses.
    pub b: Option<&'a [f64]>,
    /// Per-index anisotropies.
    pub g: Option<&'a [f64]>,
}

impl<'a> Sweep<'a> {
    /// Common length of the arrays present.
    pub fn len(&self) -> Result<usize> {
        let lengths: Vec<usize> = [self.a, self.b, self.g]
            .iter()
            .flatten()
            .map(|v| v.len())
            .collect();
        let len = lengths.iter().copied().max().unwrap_or(0);
        if lengths.iter().any(|&l| l != len) {
            return Err(TurbidError::ParamOutOfRange {
                name: "sweep",
                value: len as f64,
                expected: "all swept arrays must share one length",
            });
        }
        Ok(len)
    }

    /// True when nothing is swept.
    pub fn is_empty(&self) -> bool {
        self.a.is_none() && self.b.is_none() && self.g.is_none()
    }

    fn assign(&self, i: usize, s: &mut Sample) {
        if let Some(a) = self.a {
            s.a = a[i];
        }
        if let Some(b) = self.b {
            s.b = b[i];
        }
        if let Some(g) = self.g {
            s.g = g[i];
        }
    }
}

/// One-shot forward calculation with a fresh solver.
pub fn rt(sample: &Sample) -> Result<RtTotals> {
    Solver::new().rt(sample)
}
