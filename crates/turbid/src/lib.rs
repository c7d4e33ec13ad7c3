//! Forward and inverse adding-doubling radiative transport.
//!
//! The forward path computes total reflectance and transmittance of a
//! plane-parallel turbid slab, optionally sandwiched between glass slides:
//! a thin starting layer is built from the single-scattering operators,
//! doubled up to the full optical thickness, and wrapped in Fresnel
//! boundaries. The inverse path recovers the intrinsic optical properties
//! `(a, b, g)` from measured reflectance and transmittance, folding in the
//! response of zero, one or two integrating spheres.
//!
//! ```no_run
//! use turbid::{Sample, Solver};
//!
//! let sample = Sample {
//!     a: 0.95,
//!     b: 1.0,
//!     g: 0.9,
//!     n: 1.4,
//!     n_above: 1.5,
//!     n_below: 1.5,
//!     ..Sample::default()
//! };
//! let totals = Solver::new().rt(&sample).unwrap();
//! println!("UR1 = {:.5}, UT1 = {:.5}", totals.ur1, totals.ut1);
//! ```

mod ad;
mod boundary;
mod combine;
pub mod invert;
mod phase;
mod sample;
pub mod sphere;
mod start;

pub use ad::{rt, RtMatrices, RtTotals, Solver, SolverOptions, Sweep};
pub use invert::{
    Experiment, Grid, Inversion, Measurement, SearchKind, SearchOptions, SearchStatus,
};
pub use phase::PhaseFunction;
pub use sample::{Quadrature, Sample};
pub use sphere::{DoubleSphere, Port, PortId, Sphere};
pub use start::Starter;

pub use turbid_base::{Result, TurbidError, INFINITE_B};
