//! Integrator-facing linear solver handle.
//!
//! A Newton-type integrator drives every variant through the same two calls:
//! `setup`, which decides whether Jacobian or preconditioner data must be
//! refreshed and prepares the Newton matrix, and `solve`, which overwrites
//! the right-hand side with the correction. [`LinSol`] is the closed set of
//! variants; [`DirectContext`] and [`KrylovContext`] carry the reuse
//! policies.
//!
//! # Example
//! ```rust,ignore
//! use linsol::context::{ConvFail, LinSol, SetupInput, SolveInput, SystemForm};
//! let mut ls = LinSol::band_dq(n, 1, 1, SystemForm::Ode, Box::new(rhs));
//! let jcur = ls.setup(&SetupInput { .. })?;
//! ls.solve(&mut SolveInput { b: &mut rhs_vec, .. })?;
//! ```

use crate::config::{DirectOptions, SparseOptions};
use crate::error::LsError;
use crate::jacobian::{JacobianFn, ResidualFn};
use crate::matrix::{BandMatrix, SparseMatrix};
use crate::solver::{
    BandLuSolver, DenseLuSolver, LinearSolver, SolverKind, SparseLuSolver, Workspace,
};
use faer::Mat;

pub mod direct;
pub mod krylov;

pub use crate::jacobian::SystemForm;
pub use direct::{DirectContext, JacSource};
pub use krylov::KrylovContext;

/// Why the integrator is calling setup again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ConvFail {
    /// First call for this step, or the previous step succeeded.
    #[default]
    None,
    /// The Newton iteration failed to converge with current Jacobian data.
    BadJacobian,
    /// The Newton iteration failed for another reason (e.g. a failed solve).
    Other,
}

/// State passed to `setup`.
#[derive(Debug, Clone, Copy)]
pub struct SetupInput<'a> {
    pub t: f64,
    pub y: &'a [f64],
    /// DAE systems only.
    pub yp: Option<&'a [f64]>,
    /// `f(t, y)` (ODE) or `F(t, y, y')` (DAE, algebraic).
    pub fy: &'a [f64],
    /// Error weights.
    pub weight: &'a [f64],
    /// `gamma` (ODE) or `cj` (DAE).
    pub coef: f64,
    /// Steps taken so far.
    pub nst: u64,
    pub conv_fail: ConvFail,
}

/// State passed to `solve`; `b` is overwritten with the solution.
#[derive(Debug)]
pub struct SolveInput<'a> {
    pub b: &'a mut [f64],
    pub weight: &'a [f64],
    pub t: f64,
    pub y: &'a [f64],
    pub yp: Option<&'a [f64]>,
    pub fy: &'a [f64],
    pub coef: f64,
    /// Nonlinear iteration tolerance; the Krylov tolerance is `delt` times this.
    pub tol: f64,
    /// Index of the current Newton iteration (0 for the first).
    pub newton_iter: usize,
}

/// Cumulative counters of a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinSolStats {
    /// Jacobian evaluations (user or difference quotient).
    pub nje: usize,
    /// System function evaluations spent on difference quotients.
    pub nfe_ls: usize,
    /// Preconditioner setup calls.
    pub npe: usize,
    /// Preconditioner solves.
    pub nps: usize,
    /// Linear (Krylov) iterations.
    pub nli: usize,
    /// Linear convergence failures.
    pub ncfl: usize,
    /// Jacobian-vector products.
    pub njtimes: usize,
    /// Setup calls.
    pub nsetups: usize,
    pub last_flag: i32,
}

/// Linear solver handle: one variant, fixed at construction.
pub enum LinSol {
    Dense(DirectContext<Mat<f64>, DenseLuSolver>),
    Band(DirectContext<BandMatrix<f64>, BandLuSolver>),
    Sparse(DirectContext<SparseMatrix, SparseLuSolver>),
    Krylov(KrylovContext),
}

impl LinSol {
    /// Dense direct variant with a difference-quotient Jacobian.
    pub fn dense_dq(n: usize, form: SystemForm, f: Box<dyn ResidualFn>) -> Self {
        LinSol::Dense(DirectContext::with_dq(Mat::zeros(n, n), DenseLuSolver::new(n), form, f))
    }

    /// Dense direct variant with a user Jacobian.
    pub fn dense(n: usize, form: SystemForm, jac: Box<dyn JacobianFn<Mat<f64>>>) -> Self {
        LinSol::Dense(DirectContext::with_jacobian(Mat::zeros(n, n), DenseLuSolver::new(n), form, jac))
    }

    /// Band direct variant with a difference-quotient Jacobian.
    pub fn band_dq(n: usize, mu: usize, ml: usize, form: SystemForm, f: Box<dyn ResidualFn>) -> Self {
        LinSol::Band(DirectContext::with_dq(
            BandMatrix::new(n, mu, ml),
            BandLuSolver::new(n),
            form,
            f,
        ))
    }

    /// Band direct variant with a user Jacobian.
    pub fn band(n: usize, mu: usize, ml: usize, form: SystemForm, jac: Box<dyn JacobianFn<BandMatrix<f64>>>) -> Self {
        LinSol::Band(DirectContext::with_jacobian(
            BandMatrix::new(n, mu, ml),
            BandLuSolver::new(n),
            form,
            jac,
        ))
    }

    /// Sparse direct variant. `template` fixes the shape, layout and
    /// starting capacity of the Jacobian; a user Jacobian is required.
    pub fn sparse(
        template: SparseMatrix,
        form: SystemForm,
        jac: Option<Box<dyn JacobianFn<SparseMatrix>>>,
        opts: &SparseOptions,
    ) -> Result<Self, LsError> {
        let Some(jac) = jac else {
            return Err(LsError::IllInput("the sparse variant needs a user Jacobian".into()));
        };
        if template.rows() != template.cols() {
            return Err(LsError::IllInput("the sparse Jacobian must be square".into()));
        }
        let solver = SparseLuSolver::with_options(template.rows(), opts)?;
        Ok(LinSol::Sparse(DirectContext::with_jacobian(template, solver, form, jac)))
    }

    /// Apply direct-variant options; other variants reject them.
    pub fn with_direct_options(self, opts: DirectOptions) -> Result<Self, LsError> {
        match self {
            LinSol::Dense(c) => Ok(LinSol::Dense(c.with_options(opts)?)),
            LinSol::Band(c) => Ok(LinSol::Band(c.with_options(opts)?)),
            LinSol::Sparse(c) => Ok(LinSol::Sparse(c.with_options(opts)?)),
            LinSol::Krylov(_) => Err(LsError::IllInput("direct options given to the Krylov variant".into())),
        }
    }

    /// Decide whether to refresh Jacobian or preconditioner data and prepare
    /// the Newton matrix. Returns `jcur`: whether Jacobian data is current.
    pub fn setup(&mut self, input: &SetupInput<'_>) -> Result<bool, LsError> {
        match self {
            LinSol::Dense(c) => c.setup(input),
            LinSol::Band(c) => c.setup(input),
            LinSol::Sparse(c) => c.setup(input),
            LinSol::Krylov(c) => c.setup(input),
        }
    }

    /// Solve `M z = b`, overwriting `input.b` with `z`.
    pub fn solve(&mut self, input: &mut SolveInput<'_>) -> Result<(), LsError> {
        match self {
            LinSol::Dense(c) => c.solve(input),
            LinSol::Band(c) => c.solve(input),
            LinSol::Sparse(c) => c.solve(input),
            LinSol::Krylov(c) => c.solve(input),
        }
    }

    pub fn stats(&self) -> LinSolStats {
        match self {
            LinSol::Dense(c) => c.stats(),
            LinSol::Band(c) => c.stats(),
            LinSol::Sparse(c) => c.stats(),
            LinSol::Krylov(c) => c.stats(),
        }
    }

    fn as_solver(&self) -> &dyn LinearSolver {
        match self {
            LinSol::Dense(c) => c,
            LinSol::Band(c) => c,
            LinSol::Sparse(c) => c,
            LinSol::Krylov(c) => c,
        }
    }

    fn as_solver_mut(&mut self) -> &mut dyn LinearSolver {
        match self {
            LinSol::Dense(c) => c,
            LinSol::Band(c) => c,
            LinSol::Sparse(c) => c,
            LinSol::Krylov(c) => c,
        }
    }
}

impl LinearSolver for LinSol {
    fn kind(&self) -> SolverKind {
        self.as_solver().kind()
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        self.as_solver_mut().initialize()
    }

    fn last_flag(&self) -> i32 {
        self.as_solver().last_flag()
    }

    fn workspace(&self) -> Workspace {
        self.as_solver().workspace()
    }

    fn num_iters(&self) -> usize {
        self.as_solver().num_iters()
    }

    fn res_norm(&self) -> f64 {
        self.as_solver().res_norm()
    }

    fn num_psolves(&self) -> usize {
        self.as_solver().num_psolves()
    }

    fn free(&mut self) {
        self.as_solver_mut().free()
    }
}

impl From<KrylovContext> for LinSol {
    fn from(ctx: KrylovContext) -> Self {
        LinSol::Krylov(ctx)
    }
}
