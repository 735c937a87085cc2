//! Sparse LU kernel used by the sparse direct solver.
//!
//! [`SymbolicLu`] depends only on the sparsity pattern; [`NumericLu`]
//! holds the factor values and can be refreshed cheaply by
//! [`NumericLu::refactor`] while the pattern stays fixed.

pub mod numeric;
pub mod symbolic;

pub use numeric::NumericLu;
pub use symbolic::{Ordering, SymbolicLu};

/// Relative threshold for keeping the diagonal as pivot.
pub const DEFAULT_PIVOT_TOL: f64 = 1e-3;
