//! Linear solver interfaces and engines.
//!
//! [`LinearSolver`] is the contract every engine (and the integrator-facing
//! handle) shares: initialization, introspection and release. Direct
//! engines add [`DirectSolver`] for a concrete matrix type; the Krylov
//! engine [`Spgmr`] is driven through a [`KrylovOperator`].

use crate::error::LsError;

/// Direct or iterative solution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverType {
    Direct,
    Iterative,
}

/// Concrete solver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    SparseDirect,
    DenseDirect,
    BandDirect,
    Krylov,
}

impl SolverKind {
    pub fn solver_type(self) -> SolverType {
        match self {
            SolverKind::Krylov => SolverType::Iterative,
            _ => SolverType::Direct,
        }
    }
}

/// Real and integer workspace held by a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Workspace {
    pub real: usize,
    pub int: usize,
}

/// Common interface for any direct or iterative solver.
pub trait LinearSolver {
    fn kind(&self) -> SolverKind;

    fn solver_type(&self) -> SolverType {
        self.kind().solver_type()
    }

    /// Force the next setup to rebuild everything from scratch.
    fn initialize(&mut self) -> Result<(), LsError>;

    /// Flag of the last setup or solve (0 on success).
    fn last_flag(&self) -> i32;

    fn workspace(&self) -> Workspace;

    /// Linear iterations performed by the last solve.
    fn num_iters(&self) -> usize {
        0
    }

    /// Final residual norm of the last solve.
    fn res_norm(&self) -> f64 {
        0.0
    }

    /// Preconditioner solves performed by the last solve.
    fn num_psolves(&self) -> usize {
        0
    }

    /// Release factorization and work storage. Idempotent.
    fn free(&mut self);
}

/// A direct solver for systems stored as `M`.
pub trait DirectSolver<M>: LinearSolver {
    /// Factor `a` (or refresh an existing factorization).
    fn setup(&mut self, a: &M) -> Result<(), LsError>;
    /// Solve `a x = b` with the factors from the last setup.
    fn solve(&mut self, a: &M, x: &mut [f64], b: &[f64]) -> Result<(), LsError>;
}

pub mod band_lu;
pub mod direct_lu;
pub mod gmres;
pub mod sparse_lu;

pub use band_lu::BandLuSolver;
pub use direct_lu::DenseLuSolver;
pub use gmres::{GsType, KrylovOperator, Spgmr, SpgmrOutcome};
pub use sparse_lu::{ReinitKind, SparseLuSolver, SparseLuStats};
