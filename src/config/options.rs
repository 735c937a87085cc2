//! Options exposed to the integrator for the direct and Krylov variants.
//!
//! Every struct starts from the documented defaults and is adjusted with
//! `with_*` builder methods. A zero passed for `maxl`, `delt`, `msbpre` or
//! `msbj` restores the default; negative or otherwise meaningless values are
//! caught by `validate`.

use crate::error::LsError;
use crate::factor::{DEFAULT_PIVOT_TOL, Ordering};
use crate::preconditioner::PrecType;
use crate::solver::GsType;

/// Default maximum Krylov subspace dimension.
pub const MAXL: usize = 5;
/// Default ratio between linear and nonlinear tolerances.
pub const DELT: f64 = 0.05;
/// Default maximum steps between preconditioner evaluations.
pub const MSBPRE: u64 = 50;
/// Default maximum steps between Jacobian evaluations (direct variants).
pub const MSBJ: u64 = 50;
/// Default relative change in gamma that forces a Jacobian update.
pub const DGMAX: f64 = 0.2;

/// Krylov (scaled preconditioned GMRES) options.
#[derive(Debug, Clone, PartialEq)]
pub struct KrylovOptions {
    /// Preconditioning side(s); empty means unpreconditioned.
    pub prec_type: PrecType,
    /// Gram-Schmidt variant used in the Arnoldi process.
    pub gs_type: GsType,
    /// Maximum Krylov subspace dimension.
    pub maxl: usize,
    /// Maximum number of GMRES restarts.
    pub max_restarts: usize,
    /// Linear tolerance as a fraction of the nonlinear tolerance.
    pub delt: f64,
    /// Maximum steps between preconditioner evaluations.
    pub msbpre: u64,
    /// Maximum relative gamma change tolerated before a forced update.
    pub dgmax: f64,
    /// Increment factor for the difference-quotient J·v.
    pub dq_incfac: f64,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        Self {
            prec_type: PrecType::empty(),
            gs_type: GsType::Modified,
            maxl: MAXL,
            max_restarts: 0,
            delt: DELT,
            msbpre: MSBPRE,
            dgmax: DGMAX,
            dq_incfac: 1.0,
        }
    }
}

impl KrylovOptions {
    pub fn with_prec_type(mut self, prec_type: PrecType) -> Self {
        self.prec_type = prec_type;
        self
    }

    pub fn with_gs_type(mut self, gs_type: GsType) -> Self {
        self.gs_type = gs_type;
        self
    }

    pub fn with_maxl(mut self, maxl: usize) -> Self {
        self.maxl = if maxl == 0 { MAXL } else { maxl };
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_delt(mut self, delt: f64) -> Self {
        self.delt = if delt == 0.0 { DELT } else { delt };
        self
    }

    pub fn with_msbpre(mut self, msbpre: u64) -> Self {
        self.msbpre = if msbpre == 0 { MSBPRE } else { msbpre };
        self
    }

    pub fn with_dgmax(mut self, dgmax: f64) -> Self {
        self.dgmax = dgmax;
        self
    }

    pub fn with_dq_incfac(mut self, dq_incfac: f64) -> Self {
        self.dq_incfac = dq_incfac;
        self
    }

    pub fn validate(&self) -> Result<(), LsError> {
        if !(self.delt > 0.0) {
            return Err(LsError::IllInput(format!("delt = {} must be positive", self.delt)));
        }
        if !(self.dgmax > 0.0) {
            return Err(LsError::IllInput(format!("dgmax = {} must be positive", self.dgmax)));
        }
        if !(self.dq_incfac > 0.0) {
            return Err(LsError::IllInput(format!("dq_incfac = {} must be positive", self.dq_incfac)));
        }
        if self.maxl == 0 {
            return Err(LsError::IllInput("maxl must be at least 1".into()));
        }
        Ok(())
    }
}

/// Jacobian reuse policy for the direct variants.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectOptions {
    pub msbj: u64,
    pub dgmax: f64,
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self { msbj: MSBJ, dgmax: DGMAX }
    }
}

impl DirectOptions {
    pub fn with_msbj(mut self, msbj: u64) -> Self {
        self.msbj = if msbj == 0 { MSBJ } else { msbj };
        self
    }

    pub fn with_dgmax(mut self, dgmax: f64) -> Self {
        self.dgmax = dgmax;
        self
    }

    pub fn validate(&self) -> Result<(), LsError> {
        if !(self.dgmax > 0.0) {
            return Err(LsError::IllInput(format!("dgmax = {} must be positive", self.dgmax)));
        }
        Ok(())
    }
}

/// Sparse direct factorization options.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseOptions {
    pub ordering: Ordering,
    /// Relative threshold for keeping the diagonal as pivot, in `(0, 1]`.
    pub pivot_tol: f64,
}

impl Default for SparseOptions {
    fn default() -> Self {
        Self {
            ordering: Ordering::default(),
            pivot_tol: DEFAULT_PIVOT_TOL,
        }
    }
}

impl SparseOptions {
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_pivot_tol(mut self, pivot_tol: f64) -> Self {
        self.pivot_tol = pivot_tol;
        self
    }

    pub fn validate(&self) -> Result<(), LsError> {
        if !(self.pivot_tol > 0.0 && self.pivot_tol <= 1.0) {
            return Err(LsError::IllInput(format!("pivot_tol = {} outside (0, 1]", self.pivot_tol)));
        }
        Ok(())
    }
}
