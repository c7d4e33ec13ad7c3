//! Forward-computed lookup grid used to seed the two-parameter searches.
//!
//! Empirical starting-point formulas for the inverse problem fail in too
//! many corners of the (a, b, g) space; a coarse forward-computed grid is
//! boring and dependable. The grid is immutable once built and is keyed on
//! everything that would change the forward map, so a batch over
//! wavelengths builds it once and shares it read-only.

use turbid_base::error::Result;

use crate::ad::Solver;
use crate::sample::Sample;

use super::SearchKind;

/// Axis layouts, chosen to cover the dynamic range of each parameter:
/// albedo linear on [0, 1], optical thickness logarithmic over six decades,
/// anisotropy linear on (-1, 1).
const B_MIN: f64 = 0.01;
const B_MAX: f64 = 1000.0;
const G_LIMIT: f64 = 0.99;

/// Precomputed `(UR1, UT1)` over a 2-D slice of the parameter space.
#[derive(Debug, Clone)]
pub struct Grid {
    kind: SearchKind,
    fixed: f64,
    a_axis: Vec<f64>,
    x_axis: Vec<f64>,
    ur1: Vec<f64>,
    ut1: Vec<f64>,
    key: GridKey,
}

/// Everything that invalidates a grid when it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct GridKey {
    kind: SearchKind,
    fixed: u64,
    quad_pts: usize,
    n: u64,
    n_above: u64,
    n_below: u64,
}

impl GridKey {
    fn new(sample: &Sample, kind: SearchKind, fixed: f64) -> Self {
        GridKey {
            kind,
            fixed: fixed.to_bits(),
            quad_pts: sample.quad_pts,
            n: sample.n.to_bits(),
            n_above: sample.n_above.to_bits(),
            n_below: sample.n_below.to_bits(),
        }
    }
}

fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect()
}

fn logspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    let (l0, l1) = (lo.ln(), hi.ln());
    (0..n)
        .map(|i| (l0 + (l1 - l0) * i as f64 / (n - 1) as f64).exp())
        .collect()
}

impl Grid {
    /// Builds the grid for one two-parameter search, holding the third
    /// parameter at `fixed`.
    pub fn build(
        sample: &Sample,
        kind: SearchKind,
        fixed: f64,
        dims: (usize, usize),
    ) -> Result<Grid> {
        let (na, nx) = (dims.0.max(2), dims.1.max(2));
        let a_axis = linspace(0.0, 1.0, na);
        let x_axis = match kind {
            SearchKind::Ab => logspace(B_MIN, B_MAX, nx),
            SearchKind::Ag | SearchKind::Bg => linspace(-G_LIMIT, G_LIMIT, nx),
            _ => linspace(0.0, 1.0, nx),
        };
        // For Bg the first axis is b, not a.
        let a_axis = if kind == SearchKind::Bg {
            logspace(B_MIN, B_MAX, na)
        } else {
            a_axis
        };

        let mut solver = Solver::new();
        let mut s = sample.clone();
        let mut ur1 = Vec::with_capacity(na * nx);
        let mut ut1 = Vec::with_capacity(na * nx);
        for &ai in &a_axis {
            for &xi in &x_axis {
                match kind {
                    SearchKind::Ab => {
                        s.a = ai;
                        s.b = xi;
                        s.g = fixed;
                    }
                    SearchKind::Ag => {
                        s.a = ai;
                        s.g = xi;
                        s.b = fixed;
                    }
                    SearchKind::Bg => {
                        s.b = ai;
                        s.g = xi;
                        s.a = fixed;
                    }
                    _ => {}
                }
                let totals = solver.rt(&s)?;
                ur1.push(totals.ur1);
                ut1.push(totals.ut1);
            }
        }
        log::debug!(
            "warm-start grid built: {:?} with fixed = {fixed}, {na}x{nx} cells",
            kind
        );
        Ok(Grid {
            kind,
            fixed,
            a_axis,
            x_axis,
            ur1,
            ut1,
            key: GridKey::new(sample, kind, fixed),
        })
    }

    /// True when this grid no longer matches the sample or search setup.
    pub fn is_stale(&self, sample: &Sample, kind: SearchKind, fixed: f64) -> bool {
        self.key != GridKey::new(sample, kind, fixed)
    }

    /// The grid search kind.
    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    /// The held-constant parameter value.
    pub fn fixed(&self) -> f64 {
        self.fixed
    }

    fn at(&self, i: usize, j: usize) -> (f64, f64) {
        let idx = i * self.x_axis.len() + j;
        (self.ur1[idx], self.ut1[idx])
    }

    /// Starting point `(first, second)` whose forward values are closest to
    /// the measurements, refined by a local two-point linearization inside
    /// the winning cell.
    pub fn lookup(&self, m_r: f64, m_t: f64) -> (f64, f64) {
        let (na, nx) = (self.a_axis.len(), self.x_axis.len());
        let mut best = (0, 0);
        let mut best_d = f64::MAX;
        for i in 0..na {
            for j in 0..nx {
                let (r, t) = self.at(i, j);
                let d = (m_r - r).abs() + (m_t - t).abs();
                if d < best_d {
                    best_d = d;
                    best = (i, j);
                }
            }
        }
        let (i, j) = best;

        // Local linear model from forward differences; solve for the offset
        // that would land exactly on the measurement, clamped to one cell.
        let i1 = (i + 1).min(na - 1).max(1);
        let j1 = (j + 1).min(nx - 1).max(1);
        let (r00, t00) = self.at(i, j);
        let (r10, t10) = self.at(i1, j);
        let (r01, t01) = self.at(i, j1);
        let da = self.a_axis[i1] - self.a_axis[i1 - 1];
        let dx = self.x_axis[j1] - self.x_axis[j1 - 1];
        let jac = [
            [(r10 - r00) / da, (r01 - r00) / dx],
            [(t10 - t00) / da, (t01 - t00) / dx],
        ];
        let det = jac[0][0] * jac[1][1] - jac[0][1] * jac[1][0];
        let (mut u, mut v) = (self.a_axis[i], self.x_axis[j]);
        if det.abs() > 1e-12 {
            let rr = m_r - r00;
            let tt = m_t - t00;
            let du = (rr * jac[1][1] - jac[0][1] * tt) / det;
            let dv = (jac[0][0] * tt - rr * jac[1][0]) / det;
            u += du.clamp(-da, da);
            v += dv.clamp(-dx, dx);
        }
        let u = u.clamp(self.a_axis[0], self.a_axis[na - 1]);
        let v = v.clamp(
            self.x_axis[0].min(self.x_axis[nx - 1]),
            self.x_axis[0].max(self.x_axis[nx - 1]),
        );
        (u, v)
    }
}
