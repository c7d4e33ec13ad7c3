//! Numeric substrate shared by the turbid workspace.
//!
//! This crate carries the pieces that do not know anything about layered
//! samples or integrating spheres: Legendre polynomials and the quadrature
//! rules built on them, unpolarized Fresnel optics for slide/slab stacks,
//! complete elliptic integrals, and the error taxonomy surfaced by the
//! engine.

pub mod error;
pub mod fresnel;
pub mod math;
pub mod quadrature;

pub use error::{Result, TurbidError};

/// Optical thicknesses at or above this value are treated as semi-infinite.
///
/// A large finite sentinel keeps the doubling loop deterministic where a true
/// infinity would not; exp(-1e6) underflows to zero long before this bound is
/// reached.
pub const INFINITE_B: f64 = 1e6;
