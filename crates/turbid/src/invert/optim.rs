//! Scalar minimization for the one-parameter searches.
//!
//! Brent's method: golden-section steps with parabolic interpolation where
//! the local quadratic model is trustworthy. Bounded, derivative-free, and
//! superlinear near the minimum.

const CGOLD: f64 = 0.381_966_011_250_105;

/// Minimizes `f` on `[lo, hi]`.
///
/// Stops when the bracket shrinks to `xtol`, when `f` drops below `ftol`,
/// or after `max_iter` evaluations. Returns the best abscissa, its value
/// and the number of evaluations spent.
pub(crate) fn brent_min(
    mut f: impl FnMut(f64) -> f64,
    lo: f64,
    hi: f64,
    xtol: f64,
    ftol: f64,
    max_iter: usize,
) -> (f64, f64, usize) {
    let (mut a, mut b) = (lo, hi);
    let mut x = a + CGOLD * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;
    let mut evals = 1;

    while evals < max_iter {
        let m = 0.5 * (a + b);
        let tol1 = xtol * x.abs() + 1e-12;
        let tol2 = 2.0 * tol1;
        if (x - m).abs() <= tol2 - 0.5 * (b - a) || fx <= ftol {
            break;
        }

        let mut use_golden = true;
        if e.abs() > tol1 {
            // fit a parabola through (x, w, v)
            let r = (x - w) * (fx - fv);
            let q_ = (x - v) * (fx - fw);
            let mut p = (x - v) * q_ - (x - w) * r;
            let mut q2 = 2.0 * (q_ - r);
            if q2 > 0.0 {
                p = -p;
            }
            q2 = q2.abs();
            let e_old = e;
            e = d;
            if p.abs() < (0.5 * q2 * e_old).abs() && p > q2 * (a - x) && p < q2 * (b - x) {
                d = p / q2;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = if m > x { tol1 } else { -tol1 };
                }
                use_golden = false;
            }
        }
        if use_golden {
            e = if x < m { b - x } else { a - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + if d > 0.0 { tol1 } else { -tol1 }
        };
        let fu = f(u);
        evals += 1;

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            (v, fv) = (w, fw);
            (w, fw) = (x, fx);
            (x, fx) = (u, fu);
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                (v, fv) = (w, fw);
                (w, fw) = (u, fu);
            } else if fu <= fv || v == x || v == w {
                (v, fv) = (u, fu);
            }
        }
    }
    (x, fx, evals)
}
