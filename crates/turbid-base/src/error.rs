//! Error taxonomy for the core computations.
//!
//! Parameter errors surface immediately; numerical conditions that a batch
//! can survive (an unconverged search, a timeout) are reported as status
//! flags on the affected result instead of through this type.

use std::fmt::{Display, Formatter};

/// Errors raised by the forward and inverse radiative-transport core.
#[derive(Debug, Clone, PartialEq)]
pub enum TurbidError {
    /// A physical or numerical parameter is outside its admissible range.
    ParamOutOfRange {
        /// Name of the offending parameter.
        name: &'static str,
        /// The value that was supplied.
        value: f64,
        /// Human-readable description of the admissible range.
        expected: &'static str,
    },
    /// Newton iteration for a quadrature rule failed to converge.
    QuadratureConvergence {
        /// Which rule was being constructed.
        rule: &'static str,
        /// Number of points requested.
        points: usize,
    },
    /// A linear solve met a singular matrix, even after regularization.
    Singular {
        /// Where the solve happened.
        context: &'static str,
    },
}

impl Display for TurbidError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TurbidError::ParamOutOfRange {
                name,
                value,
                expected,
            } => {
                write!(f, "parameter {name} = {value} out of range ({expected})")
            }
            TurbidError::QuadratureConvergence { rule, points } => {
                write!(f, "{rule} quadrature with {points} points did not converge")
            }
            TurbidError::Singular { context } => {
                write!(f, "singular linear system in {context}")
            }
        }
    }
}

impl std::error::Error for TurbidError {}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TurbidError>;
