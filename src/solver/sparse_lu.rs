//! Sparse direct solver with adaptive refactorization.
//!
//! The first `setup` (and any setup after [`SparseLuSolver::reinit`] or a
//! pattern change) runs symbolic analysis followed by a full numeric
//! factorization; a failure of either is unrecoverable. Later setups only
//! recompute the factor values along the stored pivot sequence, then check
//! the cheap `rcond` estimate. When it falls below `eps^(2/3)` the 1-norm
//! condition estimate decides whether the refactored values can be trusted;
//! if not, the numeric factorization is redone with fresh pivoting.
//!
//! A CSR matrix is factored through its CSC view (the transpose) and solved
//! with the transposed triangular solves.
//!
//! # References
//! - Davis & Palamadai Natarajan (2010), Algorithm 907: KLU

use crate::config::SparseOptions;
use crate::core::UNIT_ROUNDOFF;
use crate::error::{LsError, flag_of};
use crate::factor::{NumericLu, Ordering, SymbolicLu};
use crate::matrix::{CscView, SparseMatrix};
use crate::solver::{DirectSolver, LinearSolver, SolverKind, Workspace};

/// How [`SparseLuSolver::reinit`] treats the matrix storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitKind {
    /// Reallocate the matrix to hold exactly this many entries.
    NewNonzeros(usize),
    /// Keep the matrix storage as is.
    PatternPreserving,
}

/// Work counters of a [`SparseLuSolver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SparseLuStats {
    pub symbolic: usize,
    pub full_factor: usize,
    pub refactor: usize,
    pub condest: usize,
    /// Failed refactorizations hidden by a successful full factorization.
    pub recoveries: usize,
}

/// Sparse LU solver with symbolic reuse and condition-driven refactorization.
#[derive(Debug)]
pub struct SparseLuSolver {
    n: usize,
    ordering: Ordering,
    pivot_tol: f64,
    symbolic: Option<SymbolicLu>,
    numeric: Option<NumericLu>,
    first_factorize: bool,
    transposed: bool,
    rcond: f64,
    last_flag: i32,
    freed: bool,
    stats: SparseLuStats,
}

fn rcond_threshold() -> f64 {
    UNIT_ROUNDOFF.powf(2.0 / 3.0)
}

impl SparseLuSolver {
    /// Solver for `n x n` systems with the default options.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            ordering: Ordering::default(),
            pivot_tol: crate::factor::DEFAULT_PIVOT_TOL,
            symbolic: None,
            numeric: None,
            first_factorize: true,
            transposed: false,
            rcond: 0.0,
            last_flag: 0,
            freed: false,
            stats: SparseLuStats::default(),
        }
    }

    pub fn with_options(n: usize, opts: &SparseOptions) -> Result<Self, LsError> {
        opts.validate()?;
        let mut s = Self::new(n);
        s.ordering = opts.ordering;
        s.pivot_tol = opts.pivot_tol;
        Ok(s)
    }

    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Change the ordering; the next setup redoes the symbolic analysis.
    pub fn set_ordering(&mut self, ordering: Ordering) {
        self.ordering = ordering;
        self.first_factorize = true;
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    /// Discard symbolic and numeric data ahead of a structural change.
    pub fn reinit(&mut self, a: &mut SparseMatrix, kind: ReinitKind) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if let ReinitKind::NewNonzeros(nnz) = kind {
            a.clear();
            a.resize_capacity(nnz)?;
        }
        self.symbolic = None;
        self.numeric = None;
        self.first_factorize = true;
        log::debug!("sparse solver reinitialized ({kind:?})");
        Ok(())
    }

    pub fn stats(&self) -> SparseLuStats {
        self.stats
    }

    /// `rcond` of the current factors.
    pub fn rcond(&self) -> f64 {
        self.rcond
    }

    fn first_factor(&mut self, view: &CscView<'_>) -> Result<(), LsError> {
        self.numeric = None;
        let sym = SymbolicLu::analyze(view, self.ordering)?;
        self.stats.symbolic += 1;
        let num = NumericLu::factor(view, &sym, self.pivot_tol)
            .map_err(|e| LsError::PackageFailUnrec(format!("first factorization failed: {e}")))?;
        self.stats.full_factor += 1;
        self.rcond = num.rcond();
        self.symbolic = Some(sym);
        self.numeric = Some(num);
        self.first_factorize = false;
        Ok(())
    }

    /// Numeric factorization from scratch with the stored symbolic data.
    fn factor_from_scratch(&mut self, view: &CscView<'_>, unrecoverable: bool) -> Result<(), LsError> {
        self.numeric = None;
        let Some(sym) = self.symbolic.as_ref() else {
            return self.first_factor(view);
        };
        match NumericLu::factor(view, sym, self.pivot_tol) {
            Ok(num) => {
                self.stats.full_factor += 1;
                self.rcond = num.rcond();
                self.numeric = Some(num);
                Ok(())
            }
            Err(e) => {
                self.first_factorize = true;
                let msg = format!("numeric factorization failed: {e}");
                Err(if unrecoverable {
                    LsError::PackageFailUnrec(msg)
                } else {
                    LsError::PackageFailRec(msg)
                })
            }
        }
    }

    fn setup_inner(&mut self, a: &SparseMatrix) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        let view = a.csc_view();
        if view.nrows != self.n || view.ncols != self.n {
            return Err(LsError::IllInput(format!(
                "matrix is {}x{}, solver expects {}x{}",
                a.rows(),
                a.cols(),
                self.n,
                self.n
            )));
        }
        self.transposed = view.transposed;
        if self.symbolic.as_ref().is_some_and(|s| !s.matches(&view)) {
            log::debug!("sparsity pattern changed, redoing symbolic analysis");
            self.first_factorize = true;
        }
        if self.first_factorize || self.numeric.is_none() {
            return self.first_factor(&view);
        }

        let refactored = match self.numeric.as_mut() {
            Some(num) => num.refactor(&view),
            None => Err(LsError::MemNull),
        };
        if let Err(e) = refactored {
            log::debug!("refactorization failed ({e}), trying a full factorization");
            self.factor_from_scratch(&view, false)?;
            self.stats.recoveries += 1;
            return Ok(());
        }
        self.stats.refactor += 1;

        let Some(num) = self.numeric.as_mut() else {
            return Err(LsError::MemNull);
        };
        self.rcond = num.rcond();
        let threshold = rcond_threshold();
        if self.rcond < threshold {
            let condest = num.condest(&view);
            self.stats.condest += 1;
            if condest > 1.0 / threshold {
                log::debug!(
                    "rcond = {:.3e}, condest = {condest:.3e}: refactored values rejected",
                    self.rcond
                );
                return self.factor_from_scratch(&view, true);
            }
        }
        Ok(())
    }

    fn solve_inner(&mut self, a: &SparseMatrix, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if x.len() != self.n || b.len() != self.n || a.rows() != self.n {
            return Err(LsError::IllInput("vector or matrix size does not match the solver".into()));
        }
        let Some(num) = self.numeric.as_mut() else {
            return Err(LsError::IllInput("solve called before a successful setup".into()));
        };
        x.copy_from_slice(b);
        if self.transposed {
            num.solve_transpose(x);
        } else {
            num.solve(x);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LsError::PackageFailRec("triangular solve produced non-finite values".into()));
        }
        Ok(())
    }
}

impl LinearSolver for SparseLuSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::SparseDirect
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        self.first_factorize = true;
        self.last_flag = 0;
        Ok(())
    }

    fn last_flag(&self) -> i32 {
        self.last_flag
    }

    fn workspace(&self) -> Workspace {
        let (fr, fi) = self.numeric.as_ref().map_or((0, 0), |n| n.workspace());
        let si = self.symbolic.as_ref().map_or(0, |s| s.int_workspace());
        Workspace { real: fr, int: fi + si }
    }

    fn free(&mut self) {
        self.symbolic = None;
        self.numeric = None;
        self.freed = true;
    }
}

impl DirectSolver<SparseMatrix> for SparseLuSolver {
    fn setup(&mut self, a: &SparseMatrix) -> Result<(), LsError> {
        let res = self.setup_inner(a);
        self.last_flag = flag_of(&res);
        res
    }

    fn solve(&mut self, a: &SparseMatrix, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
        let res = self.solve_inner(a, x, b);
        self.last_flag = flag_of(&res);
        res
    }
}
