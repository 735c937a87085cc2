//! Core traits (vector capability, matrix-vector product) and their
//! implementations for slices and faer matrices.

pub mod traits;
pub mod wrappers;

pub use traits::{MatVec, NVector};

/// Unit roundoff of `f64`.
pub const UNIT_ROUNDOFF: f64 = f64::EPSILON;
