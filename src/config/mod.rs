//! Typed configuration for the solver variants.

pub mod options;

pub use options::{DirectOptions, KrylovOptions, SparseOptions};
