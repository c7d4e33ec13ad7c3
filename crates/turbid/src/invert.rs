//! Inverse adding-doubling: recover `(a, b, g)` from measurements.
//!
//! An [`Experiment`] couples a sample description with measured values and
//! the sphere(s) they were taken in. The search dimensionality follows from
//! which measurements and which fixed defaults are present: one measurement
//! pins one parameter, reflection plus transmission pin two, and an
//! unscattered-transmission reading recovers the optical thickness in
//! closed form so the remaining search runs over `(a, g)`.
//!
//! One-parameter searches use bracketed Brent minimization; two-parameter
//! searches are seeded from a forward-computed grid and refined with
//! Levenberg-Marquardt on a finite-difference Jacobian.

mod grid;
mod optim;

pub use grid::Grid;

use std::cell::RefCell;
use std::time::{Duration, Instant};

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{Matrix2, Owned, Vector2, U1, U2};
use rayon::prelude::*;
use turbid_base::error::{Result, TurbidError};
use turbid_base::{fresnel, INFINITE_B};

use crate::ad::Solver;
use crate::sample::Sample;
use crate::sphere::{DoubleSphere, Sphere};

/// Which parameters a search varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Albedo only.
    A,
    /// Optical thickness only.
    B,
    /// Anisotropy only.
    G,
    /// Albedo and optical thickness.
    Ab,
    /// Albedo and anisotropy.
    Ag,
    /// Optical thickness and anisotropy.
    Bg,
}

/// How an inversion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Converged below tolerance.
    Success,
    /// The measurements lie outside the physically reachable region; the
    /// returned point is the closest boundary estimate.
    Impossible,
    /// Ran out of iterations; best estimate so far.
    Unconverged,
    /// Ran out of wall-clock budget; best estimate so far.
    Timeout,
}

impl SearchStatus {
    /// One-character flag used in result tables.
    pub fn flag(self) -> char {
        match self {
            SearchStatus::Success => '*',
            SearchStatus::Unconverged | SearchStatus::Timeout => '?',
            SearchStatus::Impossible => '!',
        }
    }
}

/// Knobs of the inverse search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Convergence tolerance on `max |M_pred - M_obs|`.
    pub tolerance: f64,
    /// Forward-evaluation budget per inversion.
    pub max_iter: usize,
    /// Optional wall-clock budget per inversion.
    pub timeout: Option<Duration>,
    /// Seed two-parameter searches from a forward-computed grid.
    pub warm_start: bool,
    /// Grid dimensions (first axis, second axis).
    pub grid_dims: (usize, usize),
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            tolerance: 1e-4,
            max_iter: 100,
            timeout: None,
            warm_start: true,
            grid_dims: (21, 32),
        }
    }
}

/// One row of measured data.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    /// Measured reflectance.
    pub m_r: Option<f64>,
    /// Measured transmittance.
    pub m_t: Option<f64>,
    /// Measured unscattered transmittance.
    pub m_u: Option<f64>,
}

/// Result of one inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inversion {
    /// Recovered albedo.
    pub a: f64,
    /// Recovered optical thickness.
    pub b: f64,
    /// Recovered anisotropy.
    pub g: f64,
    /// How the search ended.
    pub status: SearchStatus,
    /// Forward evaluations spent.
    pub evals: usize,
    /// Final `max |M_pred - M_obs|`.
    pub distance: f64,
}

/// A measurement setup plus measured values, ready for inversion.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Sample description; `a`, `b`, `g` act as scratch during a search.
    pub sample: Sample,
    /// Measured reflectance.
    pub m_r: Option<f64>,
    /// Measured transmittance.
    pub m_t: Option<f64>,
    /// Measured unscattered transmittance.
    pub m_u: Option<f64>,
    /// Reflection sphere, when one was used.
    pub r_sphere: Option<Sphere>,
    /// Transmission sphere.
    pub t_sphere: Option<Sphere>,
    /// Number of spheres in the measurement (0, 1 or 2).
    pub num_spheres: usize,
    /// Fraction of the unscattered reflection included in `m_r`.
    pub f_unscattered_in_mr: f64,
    /// Fraction of the unscattered transmission included in `m_t`.
    pub f_unscattered_in_mt: f64,
    /// Sample was flipped between measurements.
    pub flip_sample: bool,
    /// Hold the albedo at this value.
    pub default_a: Option<f64>,
    /// Hold the optical thickness at this value.
    pub default_b: Option<f64>,
    /// Hold the anisotropy at this value.
    pub default_g: Option<f64>,
    /// Search configuration.
    pub options: SearchOptions,
}

impl Default for Experiment {
    fn default() -> Self {
        Experiment {
            sample: Sample::default(),
            m_r: None,
            m_t: None,
            m_u: None,
            r_sphere: None,
            t_sphere: None,
            num_spheres: 0,
            f_unscattered_in_mr: 1.0,
            f_unscattered_in_mt: 1.0,
            flip_sample: false,
            default_a: None,
            default_b: None,
            default_g: None,
            options: SearchOptions::default(),
        }
    }
}

impl Experiment {
    /// An experiment with just measured values on the default sample.
    pub fn with_measurements(m: Measurement) -> Self {
        Experiment {
            m_r: m.m_r,
            m_t: m.m_t,
            m_u: m.m_u,
            ..Experiment::default()
        }
    }

    /// Predicted `(M_R, M_T, M_U)` for the current sample parameters,
    /// through whatever spheres the experiment carries.
    pub fn measured_rt(&self, solver: &mut Solver, sample: &Sample) -> Result<(f64, f64, f64)> {
        let rt = solver.rt(sample)?;
        let (r_u, t_u) = fresnel::specular_rt_flipped(
            self.flip_sample,
            sample.n_above,
            sample.n,
            sample.n_below,
            sample.b,
            sample.nu_0,
            sample.b_above,
            sample.b_below,
        );
        let f_ru = self.f_unscattered_in_mr;
        let f_tu = self.f_unscattered_in_mt;

        let (m_r, m_t) = match self.num_spheres {
            0 => (
                rt.ur1 - (1.0 - f_ru) * r_u,
                rt.ut1 - (1.0 - f_tu) * t_u,
            ),
            1 => {
                let m_r = match &self.r_sphere {
                    Some(sphere) => sphere.mr(rt.ur1, rt.uru, r_u, f_ru, 0.0),
                    None => rt.ur1 - (1.0 - f_ru) * r_u,
                };
                let m_t = match &self.t_sphere {
                    Some(sphere) => sphere.mt(rt.ut1, rt.uru, t_u, f_tu),
                    None => rt.ut1 - (1.0 - f_tu) * t_u,
                };
                (m_r, m_t)
            }
            _ => {
                let (r_sphere, t_sphere) = match (&self.r_sphere, &self.t_sphere) {
                    (Some(r), Some(t)) => (r.clone(), t.clone()),
                    _ => {
                        return Err(TurbidError::ParamOutOfRange {
                            name: "num_spheres",
                            value: self.num_spheres as f64,
                            expected: "two spheres require both sphere descriptions",
                        })
                    }
                };
                let pair = DoubleSphere::new(r_sphere, t_sphere);
                pair.mr_mt(&rt, r_u, t_u, f_ru, f_tu)
            }
        };
        Ok((m_r, m_t, t_u))
    }

    /// Recovers the optical thickness from the unscattered transmission in
    /// closed form, inverting the specular sandwich.
    pub fn thickness_from_unscattered(&self) -> f64 {
        let s = &self.sample;
        let t_u = self.m_u.unwrap_or(0.0);
        if t_u <= 0.0 {
            return INFINITE_B;
        }
        let (r1, t1) = fresnel::absorbing_glass_rt(1.0, s.n_above, s.n, s.nu_0, s.b_above);
        let nu_inside = s.nu_0_inside();
        let (r2, t2) = fresnel::absorbing_glass_rt(s.n, s.n_below, 1.0, nu_inside, s.b_below);
        let tt = t1 * t2;
        if t_u >= tt / (1.0 - r1 * r2) {
            // brighter than a clear sandwich can be: essentially empty
            return 0.001;
        }
        let ratio = if r1 == 0.0 || r2 == 0.0 {
            tt / t_u
        } else {
            (tt + (tt * tt + 4.0 * t_u * t_u * r1 * r2).sqrt()) / (2.0 * t_u)
        };
        nu_inside * ratio.ln()
    }

    fn count_measurements(&self) -> usize {
        [self.m_r, self.m_t, self.m_u]
            .iter()
            .filter(|m| m.is_some())
            .count()
    }

    /// Which search the present measurements and defaults imply.
    pub fn search_kind(&self) -> SearchKind {
        if self.count_measurements() <= 1 {
            match (self.default_a, self.default_b) {
                (Some(_), None) => SearchKind::B,
                (Some(_), Some(_)) => SearchKind::G,
                _ => SearchKind::A,
            }
        } else if self.default_a.is_some() {
            SearchKind::Bg
        } else if self.default_b.is_some() {
            SearchKind::Ag
        } else if self.default_g.is_some() {
            SearchKind::Ab
        } else if self.m_u.map_or(false, |u| u > 0.0) {
            SearchKind::Ag
        } else {
            SearchKind::Ab
        }
    }

    fn check_measurements(&self) -> Result<Option<SearchStatus>> {
        for (name, m) in [("m_r", self.m_r), ("m_t", self.m_t), ("m_u", self.m_u)] {
            if let Some(v) = m {
                if !(0.0..=1.0).contains(&v) {
                    return Err(TurbidError::ParamOutOfRange {
                        name,
                        value: v,
                        expected: "measurements lie in [0, 1]",
                    });
                }
            }
        }
        let total = self.m_r.unwrap_or(0.0) + self.m_t.unwrap_or(0.0);
        if total > 1.0 {
            log::warn!("m_r + m_t = {total} exceeds unity; target is unreachable");
            return Ok(Some(SearchStatus::Impossible));
        }
        Ok(None)
    }

    /// Inverts the stored measurements.
    pub fn invert(&self) -> Result<Inversion> {
        let measurement = Measurement {
            m_r: self.m_r,
            m_t: self.m_t,
            m_u: self.m_u,
        };
        let grid = self.warm_grid(&measurement)?;
        self.invert_one(&measurement, grid.as_ref())
    }

    /// Inverts many measurement rows in parallel, preserving input order.
    ///
    /// The warm-start grid is built once up front and shared read-only by
    /// the workers.
    pub fn invert_batch(&self, rows: &[Measurement]) -> Vec<Result<Inversion>> {
        let grid = match rows.first().map(|first| self.warm_grid(first)) {
            Some(Ok(grid)) => grid,
            Some(Err(e)) => return rows.iter().map(|_| Err(e.clone())).collect(),
            None => None,
        };
        let grid = grid.as_ref();
        rows.par_iter()
            .map(|row| self.invert_one(row, grid))
            .collect()
    }

    /// Builds the warm-start grid this measurement's search would use, if
    /// any.
    fn warm_grid(&self, measurement: &Measurement) -> Result<Option<Grid>> {
        if !self.options.warm_start {
            return Ok(None);
        }
        let mut probe = self.clone();
        probe.m_r = measurement.m_r;
        probe.m_t = measurement.m_t;
        probe.m_u = measurement.m_u;
        let kind = probe.search_kind();
        let fixed = match kind {
            SearchKind::Ab => self.default_g.unwrap_or(0.0),
            SearchKind::Ag => self
                .default_b
                .unwrap_or_else(|| probe.thickness_from_unscattered()),
            SearchKind::Bg => self.default_a.unwrap_or(0.0),
            _ => return Ok(None),
        };
        Grid::build(&self.sample, kind, fixed, self.options.grid_dims).map(Some)
    }

    fn invert_one(&self, measurement: &Measurement, grid: Option<&Grid>) -> Result<Inversion> {
        let mut exp = self.clone();
        exp.m_r = measurement.m_r;
        exp.m_t = measurement.m_t;
        exp.m_u = measurement.m_u;

        if exp.count_measurements() == 0 {
            return Err(TurbidError::ParamOutOfRange {
                name: "measurements",
                value: 0.0,
                expected: "at least one of m_r, m_t, m_u",
            });
        }
        let impossible = exp.check_measurements()?;
        let kind = exp.search_kind();

        let mut sample = exp.sample.clone();
        sample.a = exp.default_a.unwrap_or(0.0);
        sample.b = exp
            .default_b
            .unwrap_or_else(|| exp.thickness_from_unscattered());
        sample.g = exp.default_g.unwrap_or(0.0);

        let mut model = ForwardModel::new(&exp, sample);
        let mut result = match kind {
            SearchKind::A => model.search_scalar(kind, 0.0, 1.0),
            SearchKind::B => model.search_scalar(kind, LOG_B_MIN, LOG_B_MAX),
            SearchKind::G => model.search_scalar(kind, -G_BOUND, G_BOUND),
            SearchKind::Ab | SearchKind::Ag | SearchKind::Bg => model.search_pair(kind, grid),
        }?;
        if let Some(status) = impossible {
            result.status = status;
        }
        log::debug!(
            "inverse search {:?}: a = {:.5}, b = {:.5}, g = {:.5}, {:?} after {} evals",
            kind,
            result.a,
            result.b,
            result.g,
            result.status,
            result.evals
        );
        Ok(result)
    }
}

const LOG_B_MIN: f64 = -11.5; // ln(1e-5)
const LOG_B_MAX: f64 = 13.9; // ln(1e6)
const G_BOUND: f64 = 0.999;

/// Forward model with an evaluation and wall-clock budget.
struct ForwardModel<'e> {
    exp: &'e Experiment,
    sample: Sample,
    solver: Solver,
    evals: usize,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl<'e> ForwardModel<'e> {
    fn new(exp: &'e Experiment, sample: Sample) -> Self {
        ForwardModel {
            exp,
            sample,
            solver: Solver::new(),
            evals: 0,
            deadline: exp.options.timeout.map(|t| Instant::now() + t),
            timed_out: false,
        }
    }

    fn out_of_budget(&mut self) -> bool {
        if self.evals >= self.exp.options.max_iter {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.timed_out = true;
                return true;
            }
        }
        false
    }

    /// Max-norm distance between prediction and measurement at the given
    /// parameters.
    fn distance(&mut self, a: f64, b: f64, g: f64) -> f64 {
        self.evals += 1;
        self.sample.a = a.clamp(0.0, 1.0);
        self.sample.b = b.clamp(0.0, INFINITE_B);
        self.sample.g = g.clamp(-G_BOUND, G_BOUND);
        match self.exp.measured_rt(&mut self.solver, &self.sample) {
            Ok((m_r, m_t, _)) => {
                let mut d = 0.0_f64;
                if let Some(obs) = self.exp.m_r {
                    d = d.max((m_r - obs).abs());
                }
                if let Some(obs) = self.exp.m_t {
                    d = d.max((m_t - obs).abs());
                }
                d
            }
            Err(e) => {
                log::warn!("forward model failed during search: {e}");
                f64::MAX
            }
        }
    }

    fn apply(&self, kind: SearchKind, x: f64) -> (f64, f64, f64) {
        let s = &self.sample;
        match kind {
            SearchKind::A => (x, s.b, s.g),
            SearchKind::B => (s.a, x.exp(), s.g),
            SearchKind::G => (s.a, s.b, x),
            _ => (s.a, s.b, s.g),
        }
    }

    fn search_scalar(&mut self, kind: SearchKind, lo: f64, hi: f64) -> Result<Inversion> {
        let tol = self.exp.options.tolerance;
        let max_iter = self.exp.options.max_iter;
        let cell = RefCell::new(self);
        let (x, fx, _) = optim::brent_min(
            |t| {
                let mut m = cell.borrow_mut();
                if m.out_of_budget() {
                    return f64::MAX;
                }
                let (a, b, g) = m.apply(kind, t);
                m.distance(a, b, g)
            },
            lo,
            hi,
            1e-8,
            tol,
            max_iter,
        );
        let model = cell.into_inner();
        let (a, b, g) = model.apply(kind, x);
        // leave the final clamped values, not the raw search coordinates
        let b = b.clamp(0.0, INFINITE_B);
        Ok(Inversion {
            a: a.clamp(0.0, 1.0),
            b: if b > 0.999 * INFINITE_B { INFINITE_B } else { b },
            g: g.clamp(-G_BOUND, G_BOUND),
            status: finish_status(model, fx, tol),
            evals: model.evals,
            distance: fx,
        })
    }

    fn search_pair(&mut self, kind: SearchKind, grid: Option<&Grid>) -> Result<Inversion> {
        let tol = self.exp.options.tolerance;
        let target_r = self.exp.m_r.unwrap_or(0.0);
        let target_t = self.exp.m_t.unwrap_or(0.0);

        // warm start
        let start = match grid {
            Some(g) if g.kind() == kind => {
                let (u, v) = g.lookup(target_r, target_t);
                match kind {
                    SearchKind::Ab => Vector2::new(u, v.max(1e-5).ln()),
                    SearchKind::Ag => Vector2::new(u, v),
                    _ => Vector2::new(u.max(1e-5).ln(), v),
                }
            }
            _ => match kind {
                SearchKind::Ab => Vector2::new(0.5, self.sample.b.max(1e-5).ln()),
                SearchKind::Ag => Vector2::new(0.5, self.sample.g),
                _ => Vector2::new(self.sample.b.max(1e-5).ln(), self.sample.g),
            },
        };

        let problem = PairProblem {
            model: RefCell::new(self),
            kind,
            params: start,
        };
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(50)
            .minimize(problem);
        let params = problem.params;
        let model = problem.model.into_inner();

        let (a, b, g) = pair_values(kind, &params, &model.sample);
        let distance = model.distance(a, b, g);
        let converged = matches!(
            report.termination,
            TerminationReason::Converged { .. } | TerminationReason::LostPatience
        );
        let status = if model.timed_out {
            SearchStatus::Timeout
        } else if !converged && distance > tol {
            SearchStatus::Unconverged
        } else {
            finish_status(model, distance, tol)
        };
        Ok(Inversion {
            a,
            b,
            g,
            status,
            evals: model.evals,
            distance,
        })
    }
}

fn finish_status(model: &ForwardModel, distance: f64, tol: f64) -> SearchStatus {
    if model.timed_out {
        SearchStatus::Timeout
    } else if distance <= tol {
        SearchStatus::Success
    } else if model.evals >= model.exp.options.max_iter {
        SearchStatus::Unconverged
    } else if distance > 0.25 {
        // nowhere near the target anywhere in the parameter box
        SearchStatus::Impossible
    } else {
        SearchStatus::Unconverged
    }
}

fn pair_values(kind: SearchKind, params: &Vector2<f64>, sample: &Sample) -> (f64, f64, f64) {
    match kind {
        SearchKind::Ab => (params[0].clamp(0.0, 1.0), params[1].exp(), sample.g),
        SearchKind::Ag => (
            params[0].clamp(0.0, 1.0),
            sample.b,
            params[1].clamp(-G_BOUND, G_BOUND),
        ),
        _ => (
            sample.a,
            params[0].exp(),
            params[1].clamp(-G_BOUND, G_BOUND),
        ),
    }
}

/// Two-parameter least-squares problem over the residuals
/// `(M_R_pred - M_R, M_T_pred - M_T)`.
struct PairProblem<'m, 'e> {
    model: RefCell<&'m mut ForwardModel<'e>>,
    kind: SearchKind,
    params: Vector2<f64>,
}

impl<'m, 'e> PairProblem<'m, 'e> {
    fn residuals_at(&self, params: &Vector2<f64>) -> Option<Vector2<f64>> {
        let mut model = self.model.borrow_mut();
        if model.out_of_budget() {
            return None;
        }
        model.evals += 1;
        let (a, b, g) = pair_values(self.kind, params, &model.sample);
        let sample = {
            let mut s = model.sample.clone();
            s.a = a;
            s.b = b.clamp(0.0, INFINITE_B);
            s.g = g;
            s
        };
        let exp = model.exp;
        let solver = &mut model.solver;
        match exp.measured_rt(solver, &sample) {
            Ok((m_r, m_t, _)) => Some(Vector2::new(
                m_r - exp.m_r.unwrap_or(m_r),
                m_t - exp.m_t.unwrap_or(m_t),
            )),
            Err(e) => {
                log::warn!("forward model failed during refinement: {e}");
                None
            }
        }
    }
}

impl<'m, 'e> LeastSquaresProblem<f64, U2, U2> for PairProblem<'m, 'e> {
    type ResidualStorage = Owned<f64, U2, U1>;
    type JacobianStorage = Owned<f64, U2, U2>;
    type ParameterStorage = Owned<f64, U2, U1>;

    fn set_params(&mut self, x: &Vector2<f64>) {
        self.params = *x;
    }

    fn params(&self) -> Vector2<f64> {
        self.params
    }

    fn residuals(&self) -> Option<Vector2<f64>> {
        self.residuals_at(&self.params)
    }

    fn jacobian(&self) -> Option<Matrix2<f64>> {
        let h = 1e-5;
        let base = self.residuals_at(&self.params)?;
        let mut jac = Matrix2::zeros();
        for col in 0..2 {
            let mut shifted = self.params;
            shifted[col] += h;
            let r = self.residuals_at(&shifted)?;
            jac.set_column(col, &((r - base) / h));
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad;
    use approx::assert_abs_diff_eq;

    fn quick_options() -> SearchOptions {
        SearchOptions {
            grid_dims: (11, 11),
            max_iter: 200,
            ..SearchOptions::default()
        }
    }

    #[test]
    fn albedo_from_reflection_of_thick_slab() {
        // semi-infinite matched slab: only the albedo matters
        let mut s = Sample {
            a: 0.95,
            b: INFINITE_B,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            m_r: Some(truth.ur1),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_eq!(inv.status, SearchStatus::Success);
        assert_abs_diff_eq!(inv.a, 0.95, epsilon = 1e-3);
        assert_eq!(inv.b, INFINITE_B);
        // and a different albedo for good measure
        s.a = 0.3;
        let truth = ad::rt(&s).unwrap();
        exp.m_r = Some(truth.ur1);
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.a, 0.3, epsilon = 1e-3);
    }

    #[test]
    fn albedo_with_fixed_thickness() {
        let s = Sample {
            a: 0.95,
            b: 1.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            m_r: Some(truth.ur1),
            default_b: Some(1.0),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.a, 0.95, epsilon = 1e-3);
        assert_abs_diff_eq!(inv.b, 1.0);
    }

    #[test]
    fn thickness_from_reflection() {
        let s = Sample {
            a: 0.5,
            b: 2.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            m_r: Some(truth.ur1),
            default_a: Some(0.5),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.a, 0.5);
        assert_abs_diff_eq!(inv.b, 2.0, epsilon = 2e-3);
    }

    #[test]
    fn roundtrip_ab_search() {
        let s = Sample {
            a: 0.95,
            b: 2.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            m_r: Some(truth.ur1),
            m_t: Some(truth.ut1),
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_eq!(inv.status, SearchStatus::Success);
        assert_abs_diff_eq!(inv.a, 0.95, epsilon = 1e-3);
        assert_abs_diff_eq!(inv.b, 2.0, epsilon = 1e-2);
        assert_abs_diff_eq!(inv.g, 0.0);
    }

    #[test]
    fn roundtrip_ab_with_slides() {
        let s = Sample {
            a: 0.9,
            b: 1.0,
            g: 0.0,
            n: 1.4,
            n_above: 1.5,
            n_below: 1.5,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            sample: s.clone(),
            m_r: Some(truth.ur1),
            m_t: Some(truth.ut1),
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.a = 0.0;
        exp.sample.b = 1.0;
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.a, 0.9, epsilon = 2e-3);
        assert_abs_diff_eq!(inv.b, 1.0, epsilon = 2e-2);
    }

    #[test]
    fn roundtrip_ag_search_with_unscattered() {
        let s = Sample {
            a: 0.9,
            b: 1.0,
            g: 0.9,
            n: 1.4,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        // the unscattered transmission fixes b exactly
        let (_, t_u) = fresnel::specular_rt(1.0, 1.4, 1.0, 1.0, 1.0, 0.0, 0.0);
        let mut exp = Experiment {
            sample: s.clone(),
            m_r: Some(truth.ur1),
            m_t: Some(truth.ut1),
            m_u: Some(t_u),
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.a = 0.0;
        exp.sample.g = 0.0;
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.b, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(inv.a, 0.9, epsilon = 5e-3);
        assert_abs_diff_eq!(inv.g, 0.9, epsilon = 2e-2);
    }

    #[test]
    fn roundtrip_through_one_sphere() {
        use crate::sphere::PortId;
        let s = Sample {
            a: 0.95,
            b: 1.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let mut sphere = Sphere::new(200.0, 25.0);
        sphere.set_port_diameter(PortId::Third, 5.0);
        sphere.set_port_diameter(PortId::Detector, 10.0);
        sphere.set_port_uru(PortId::Detector, 0.05);
        sphere.r_wall = 0.96;
        sphere.r_std = 0.98;
        let mut tsphere = sphere.clone();
        tsphere.set_port_diameter(PortId::Third, 10.0);

        // forward-simulate the sphere readings
        let truth = ad::rt(&s).unwrap();
        let (r_u, t_u) = fresnel::specular_rt(1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0);
        let m_r = sphere.mr(truth.ur1, truth.uru, r_u, 1.0, 0.0);
        let m_t = tsphere.mt(truth.ut1, truth.uru, t_u, 1.0);

        let mut exp = Experiment {
            m_r: Some(m_r),
            m_t: Some(m_t),
            r_sphere: Some(sphere),
            t_sphere: Some(tsphere),
            num_spheres: 1,
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_abs_diff_eq!(inv.a, 0.95, epsilon = 5e-3);
        assert_abs_diff_eq!(inv.b, 1.0, epsilon = 5e-2);
    }

    #[test]
    fn impossible_measurements_are_flagged() {
        let mut exp = Experiment {
            m_r: Some(0.7),
            m_t: Some(0.7),
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_eq!(inv.status, SearchStatus::Impossible);
        assert_eq!(inv.status.flag(), '!');
    }

    #[test]
    fn out_of_range_measurements_rejected() {
        let exp = Experiment {
            m_r: Some(1.7),
            ..Experiment::default()
        };
        assert!(exp.invert().is_err());
    }

    #[test]
    fn timeout_returns_best_so_far() {
        let s = Sample {
            a: 0.95,
            b: 2.0,
            quad_pts: 4,
            ..Sample::default()
        };
        let truth = ad::rt(&s).unwrap();
        let mut exp = Experiment {
            m_r: Some(truth.ur1),
            m_t: Some(truth.ut1),
            options: SearchOptions {
                timeout: Some(Duration::from_nanos(1)),
                warm_start: false,
                ..quick_options()
            },
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let inv = exp.invert().unwrap();
        assert_eq!(inv.status, SearchStatus::Timeout);
        assert_eq!(inv.status.flag(), '?');
    }

    #[test]
    fn batch_preserves_order() {
        let mut samples = Vec::new();
        for &a in &[0.3, 0.6, 0.9] {
            let s = Sample {
                a,
                b: 1.0,
                quad_pts: 4,
                ..Sample::default()
            };
            samples.push(ad::rt(&s).unwrap());
        }
        let rows: Vec<Measurement> = samples
            .iter()
            .map(|t| Measurement {
                m_r: Some(t.ur1),
                m_t: None,
                m_u: None,
            })
            .collect();
        let mut exp = Experiment {
            default_b: Some(1.0),
            options: quick_options(),
            ..Experiment::default()
        };
        exp.sample.quad_pts = 4;
        let results = exp.invert_batch(&rows);
        let recovered: Vec<f64> = results.iter().map(|r| r.as_ref().unwrap().a).collect();
        assert_abs_diff_eq!(recovered[0], 0.3, epsilon = 1e-3);
        assert_abs_diff_eq!(recovered[1], 0.6, epsilon = 1e-3);
        assert_abs_diff_eq!(recovered[2], 0.9, epsilon = 1e-3);
    }

    #[test]
    fn unscattered_thickness_recovery() {
        let exp = Experiment {
            m_u: Some((-2.0_f64).exp()),
            ..Experiment::default()
        };
        // matched boundaries: b = -ln(T_u)
        assert_abs_diff_eq!(exp.thickness_from_unscattered(), 2.0, epsilon = 1e-10);
        let dark = Experiment {
            m_u: Some(0.0),
            ..Experiment::default()
        };
        assert_eq!(dark.thickness_from_unscattered(), INFINITE_B);
    }
}
