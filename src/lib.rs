//! linsol: linear solver layer for implicit ODE, DAE and nonlinear solvers
//!
//! This crate provides the linear solvers a Newton-type integrator calls on
//! every step: dense, band and sparse direct factorizations with Jacobian
//! reuse, and a scaled preconditioned GMRES with preconditioner reuse and a
//! band-block-diagonal preconditioner. Jacobians and Jacobian-vector
//! products may come from user callbacks or difference quotients.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod factor;
pub mod jacobian;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::{DirectOptions, KrylovOptions, SparseOptions};
pub use context::{
    ConvFail, DirectContext, JacSource, KrylovContext, LinSol, LinSolStats, SetupInput, SolveInput,
};
pub use core::{MatVec, NVector};
pub use error::{CallbackError, LsError, Status};
pub use factor::Ordering;
pub use jacobian::{
    DqJacTimes, DqPoint, JacInput, JacTimesVec, JacobianFn, JvInput, ResidualFn, SystemForm,
    band_dq_jac, dense_dq_jac,
};
pub use matrix::{BandMatrix, SparseMatrix, SparseType, SystemMatrix};
pub use preconditioner::{
    BandBlockDiagonal, BlockBands, PrecInput, PrecSide, PrecType, Preconditioner, ReuseGuard,
};
pub use solver::{
    BandLuSolver, DenseLuSolver, DirectSolver, GsType, KrylovOperator, LinearSolver, ReinitKind,
    SolverKind, SolverType, SparseLuSolver, Spgmr, SpgmrOutcome, Workspace,
};
