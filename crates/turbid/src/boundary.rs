//! Boundary reflection and transmission at the slide interfaces.
//!
//! Every quadrature angle lives inside the sample, so angles past the
//! critical angle are legal and simply reflect totally. The boundary of a
//! sample against air (through an optional slide) is diagonal on the
//! quadrature: each cone reflects and refracts without mixing into other
//! cones. The arrays produced here fold the slide's internal reflections in
//! closed form; reflection arrays carry the flux factor `2νw` expected by
//! the diagonal-boundary fast paths in [`crate::combine`].

use turbid_base::fresnel;

use crate::sample::{Quadrature, Sample};

/// Diagonal boundary arrays for one interface of the sample.
#[derive(Debug, Clone)]
pub struct Boundary {
    /// Reflection for light arriving from outside, times `2νw`.
    pub r01: Vec<f64>,
    /// Reflection for light arriving from inside, times `2νw`.
    pub r10: Vec<f64>,
    /// Transmission into the sample.
    pub t01: Vec<f64>,
    /// Transmission out of the sample.
    pub t10: Vec<f64>,
}

/// One direction of an air-slide-sample interface evaluated at every
/// quadrature node.
///
/// When light arrives from the air side the quadrature node (an in-sample
/// cosine) is first mapped to the matching air-side cosine via Snell; nodes
/// past the critical angle map to grazing incidence and reflect totally.
fn interface_rt(
    n_i: f64,
    n_g: f64,
    n_t: f64,
    b_slide: f64,
    quad: &Quadrature,
) -> (Vec<f64>, Vec<f64>) {
    let n = quad.len();
    let mut r = Vec::with_capacity(n);
    let mut t = Vec::with_capacity(n);
    for i in 0..n {
        let nu = if n_i == 1.0 {
            fresnel::cos_snell(n_t, quad.nu[i], 1.0)
        } else {
            quad.nu[i]
        };
        let (ri, ti) = fresnel::absorbing_glass_rt(n_i, n_g, n_t, nu, b_slide);
        r.push(ri * quad.twonuw[i]);
        t.push(ti);
    }
    (r, t)
}

/// Boundary arrays for the top (`top = true`) or bottom slide of a sample.
///
/// For the bottom boundary the labels are mirrored so that `r01`/`t01`
/// always describe light leaving the sample side first.
pub fn boundary(sample: &Sample, quad: &Quadrature, top: bool) -> Boundary {
    let (n_slide, b_slide) = if top {
        (sample.n_above, sample.b_above)
    } else {
        (sample.n_below, sample.b_below)
    };
    if top {
        let (r01, t01) = interface_rt(1.0, n_slide, sample.n, b_slide, quad);
        let (r10, t10) = interface_rt(sample.n, n_slide, 1.0, b_slide, quad);
        Boundary { r01, r10, t01, t10 }
    } else {
        let (r10, t10) = interface_rt(1.0, n_slide, sample.n, b_slide, quad);
        let (r01, t01) = interface_rt(sample.n, n_slide, 1.0, b_slide, quad);
        Boundary { r01, r10, t01, t10 }
    }
}
