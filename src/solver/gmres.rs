//! Scaled, preconditioned GMRES with restarts (SPGMR).
//!
//! Solves `A x = b` through the scaled system
//!
//! ```text
//!   (S1 P1⁻¹ A P2⁻¹ S2⁻¹) (S2 P2 x) = S1 P1⁻¹ b
//! ```
//!
//! where `P1`/`P2` are the left/right preconditioners and `S1`/`S2` are
//! diagonal scalings (passed as vectors of positive entries). Convergence is
//! declared when the 2-norm of the scaled, left-preconditioned residual is
//! at most `delta`. The operator and preconditioner are reached through a
//! [`KrylovOperator`], so callback failures surface with their own
//! recoverable or unrecoverable flags.
//!
//! Each cycle runs at most `maxl` Arnoldi steps. When a cycle ends without
//! convergence and restarts remain, the iterate is updated and the residual
//! is recomputed explicitly before the next cycle.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4
//! - Brown & Hindmarsh (1989), Reduced storage matrix methods in stiff ODE systems

use crate::core::NVector;
use crate::error::LsError;
use crate::preconditioner::{PrecSide, PrecType};
use crate::solver::{LinearSolver, SolverKind, Workspace};

/// Reorthogonalize when the new vector lost this factor of its norm.
const REORTH_FACTOR: f64 = 1000.0;

/// Gram-Schmidt variant used in the Arnoldi process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum GsType {
    #[default]
    Modified,
    Classical,
}

/// Operator callbacks driven by [`Spgmr::solve`].
pub trait KrylovOperator {
    /// `z = A v`.
    fn atimes(&mut self, v: &[f64], z: &mut [f64]) -> Result<(), LsError>;
    /// Solve `P z = r` with the left or right preconditioner.
    fn psolve(&mut self, r: &[f64], z: &mut [f64], delta: f64, side: PrecSide) -> Result<(), LsError>;
}

/// Non-failing outcome of a solve.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpgmrOutcome {
    /// Residual norm at most `delta`.
    Converged,
    /// Residual decreased below its initial value but not below `delta`.
    ResidualReduced,
}

/// GMRES engine with preallocated Krylov basis and Hessenberg storage.
#[derive(Debug, Clone)]
pub struct Spgmr {
    n: usize,
    maxl: usize,
    max_restarts: usize,
    gs_type: GsType,
    v: Vec<Vec<f64>>,
    // (maxl+1) x maxl, column l in hes[l]
    hes: Vec<Vec<f64>>,
    givens: Vec<f64>,
    yg: Vec<f64>,
    xcor: Vec<f64>,
    vtemp: Vec<f64>,
    nli: usize,
    nps: usize,
    res_norm: f64,
    last_flag: i32,
    freed: bool,
}

impl Spgmr {
    pub fn new(n: usize, maxl: usize) -> Self {
        let maxl = maxl.max(1);
        Self {
            n,
            maxl,
            max_restarts: 0,
            gs_type: GsType::Modified,
            v: vec![vec![0.0; n]; maxl + 1],
            hes: vec![vec![0.0; maxl + 1]; maxl],
            givens: vec![0.0; 2 * maxl],
            yg: vec![0.0; maxl + 1],
            xcor: vec![0.0; n],
            vtemp: vec![0.0; n],
            nli: 0,
            nps: 0,
            res_norm: 0.0,
            last_flag: 0,
            freed: false,
        }
    }

    pub fn with_gs_type(mut self, gs_type: GsType) -> Self {
        self.gs_type = gs_type;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn set_gs_type(&mut self, gs_type: GsType) {
        self.gs_type = gs_type;
    }

    pub fn set_max_restarts(&mut self, max_restarts: usize) {
        self.max_restarts = max_restarts;
    }

    /// Change the maximum subspace dimension, reallocating the basis.
    pub fn set_maxl(&mut self, maxl: usize) {
        let maxl = maxl.max(1);
        if maxl != self.maxl {
            *self = Self::new(self.n, maxl)
                .with_gs_type(self.gs_type)
                .with_max_restarts(self.max_restarts);
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn maxl(&self) -> usize {
        self.maxl
    }

    /// Solve `A x = b`; `x` holds the initial guess on entry.
    ///
    /// `s1` and `s2` are the left and right scaling vectors; `None` means no
    /// scaling. Counters for the last call are available through
    /// [`LinearSolver::num_iters`], [`LinearSolver::num_psolves`] and
    /// [`LinearSolver::res_norm`].
    #[allow(clippy::too_many_arguments)]
    pub fn solve<O: KrylovOperator + ?Sized>(
        &mut self,
        op: &mut O,
        x: &mut [f64],
        b: &[f64],
        prec_type: PrecType,
        delta: f64,
        s1: Option<&[f64]>,
        s2: Option<&[f64]>,
    ) -> Result<SpgmrOutcome, LsError> {
        let res = self.solve_inner(op, x, b, prec_type, delta, s1, s2);
        self.last_flag = match &res {
            Ok(SpgmrOutcome::Converged) => 0,
            Ok(SpgmrOutcome::ResidualReduced) => LsError::ResidualReduced.flag(),
            Err(e) => e.flag(),
        };
        res
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_inner<O: KrylovOperator + ?Sized>(
        &mut self,
        op: &mut O,
        x: &mut [f64],
        b: &[f64],
        prec_type: PrecType,
        delta: f64,
        s1: Option<&[f64]>,
        s2: Option<&[f64]>,
    ) -> Result<SpgmrOutcome, LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        let n = self.n;
        if x.len() != n || b.len() != n || s1.is_some_and(|s| s.len() != n) || s2.is_some_and(|s| s.len() != n) {
            return Err(LsError::IllInput("vector length does not match the solver".into()));
        }
        self.nli = 0;
        self.nps = 0;
        self.res_norm = 0.0;
        let left = prec_type.contains(PrecType::LEFT);
        let right = prec_type.contains(PrecType::RIGHT);

        let mut r_norm = self.initial_residual(op, x, b, left, delta, s1)?;
        self.res_norm = r_norm;
        if r_norm <= delta {
            return Ok(SpgmrOutcome::Converged);
        }
        let beta = r_norm;
        self.v[0].scale_by(1.0 / r_norm);

        let mut cycle = 0;
        loop {
            for col in self.hes.iter_mut() {
                col.iter_mut().for_each(|h| *h = 0.0);
            }
            let mut rotation_product = 1.0;
            let mut rho = r_norm;
            let mut krydim = 0;
            let mut converged = false;

            for l in 0..self.maxl {
                self.nli += 1;
                krydim = l + 1;
                self.apply_operator(op, l, left, right, delta, s1, s2)?;

                let new_norm = self.orthogonalize(l)?;
                self.hes[l][l + 1] = new_norm;
                self.qr_update(l)?;

                rotation_product *= self.givens[2 * l + 1];
                rho = (rotation_product * r_norm).abs();
                if rho <= delta {
                    converged = true;
                    break;
                }
                self.v[l + 1].scale_by(1.0 / new_norm);
            }

            self.yg[0] = r_norm;
            self.yg[1..=krydim].iter_mut().for_each(|y| *y = 0.0);
            self.qr_solve(krydim)?;
            self.res_norm = rho;

            let last_cycle = cycle >= self.max_restarts;
            if converged || last_cycle {
                if !converged && rho >= beta {
                    log::debug!("spgmr: no reduction after {} iterations (rho = {rho:.3e})", self.nli);
                    return Err(LsError::ConvFailed(self.nli));
                }
                self.apply_correction(op, x, krydim, right, delta, s2)?;
                return Ok(if converged {
                    SpgmrOutcome::Converged
                } else {
                    SpgmrOutcome::ResidualReduced
                });
            }

            self.apply_correction(op, x, krydim, right, delta, s2)?;
            cycle += 1;
            r_norm = self.initial_residual(op, x, b, left, delta, s1)?;
            log::trace!("spgmr: restart {cycle}, residual {r_norm:.3e}");
            self.res_norm = r_norm;
            if r_norm <= delta {
                return Ok(SpgmrOutcome::Converged);
            }
            self.v[0].scale_by(1.0 / r_norm);
        }
    }

    /// `v[0] = S1 P1⁻¹ (b - A x)`; returns its norm.
    fn initial_residual<O: KrylovOperator + ?Sized>(
        &mut self,
        op: &mut O,
        x: &[f64],
        b: &[f64],
        left: bool,
        delta: f64,
        s1: Option<&[f64]>,
    ) -> Result<f64, LsError> {
        if x.iter().all(|&xi| xi == 0.0) {
            self.vtemp.copy_from_slice(b);
        } else {
            op.atimes(x, &mut self.vtemp)?;
            for (r, bi) in self.vtemp.iter_mut().zip(b) {
                *r = bi - *r;
            }
        }
        if left {
            op.psolve(&self.vtemp, &mut self.v[0], delta, PrecSide::Left)?;
            self.nps += 1;
        } else {
            self.v[0].copy_from_slice(&self.vtemp);
        }
        if let Some(s1) = s1 {
            self.v[0].iter_mut().zip(s1).for_each(|(r, s)| *r *= s);
        }
        Ok(self.v[0].l2_norm())
    }

    /// `v[l+1] = S1 P1⁻¹ A P2⁻¹ S2⁻¹ v[l]`.
    #[allow(clippy::too_many_arguments)]
    fn apply_operator<O: KrylovOperator + ?Sized>(
        &mut self,
        op: &mut O,
        l: usize,
        left: bool,
        right: bool,
        delta: f64,
        s1: Option<&[f64]>,
        s2: Option<&[f64]>,
    ) -> Result<(), LsError> {
        let (head, tail) = self.v.split_at_mut(l + 1);
        let (vl, vnext) = (&head[l], &mut tail[0]);
        match s2 {
            Some(s2) => self.vtemp.div(vl, s2),
            None => self.vtemp.copy_from_slice(vl),
        }
        if right {
            op.psolve(&self.vtemp, vnext, delta, PrecSide::Right)?;
            self.nps += 1;
        } else {
            vnext.copy_from_slice(&self.vtemp);
        }
        op.atimes(vnext, &mut self.vtemp)?;
        if left {
            op.psolve(&self.vtemp, vnext, delta, PrecSide::Left)?;
            self.nps += 1;
        } else {
            vnext.copy_from_slice(&self.vtemp);
        }
        if let Some(s1) = s1 {
            vnext.iter_mut().zip(s1).for_each(|(v, s)| *v *= s);
        }
        Ok(())
    }

    /// Orthogonalize `v[l+1]` against `v[0..=l]`, filling column `l` of the
    /// Hessenberg matrix. Returns the norm of the orthogonalized vector.
    fn orthogonalize(&mut self, l: usize) -> Result<f64, LsError> {
        let (basis, tail) = self.v.split_at_mut(l + 1);
        let w = &mut tail[0];
        let h = &mut self.hes[l];
        let vk_norm = w.l2_norm();
        match self.gs_type {
            GsType::Modified => {
                for (i, vi) in basis.iter().enumerate() {
                    h[i] = w.dot(vi);
                    w.axpy(-h[i], vi);
                }
            }
            GsType::Classical => {
                for (i, vi) in basis.iter().enumerate() {
                    h[i] = w.dot(vi);
                }
                for (i, vi) in basis.iter().enumerate() {
                    w.axpy(-h[i], vi);
                }
            }
        }
        let mut new_norm = w.l2_norm();
        if vk_norm + REORTH_FACTOR * new_norm == vk_norm {
            for (i, vi) in basis.iter().enumerate() {
                let t = w.dot(vi);
                h[i] += t;
                w.axpy(-t, vi);
            }
            new_norm = w.l2_norm();
        }
        if !new_norm.is_finite() {
            return Err(LsError::GsFailed);
        }
        Ok(new_norm)
    }

    /// Apply previous Givens rotations to column `l` and build a new one.
    fn qr_update(&mut self, l: usize) -> Result<(), LsError> {
        let h = &mut self.hes[l];
        for k in 0..l {
            let (c, s) = (self.givens[2 * k], self.givens[2 * k + 1]);
            let (t1, t2) = (h[k], h[k + 1]);
            h[k] = c * t1 - s * t2;
            h[k + 1] = s * t1 + c * t2;
        }
        let (t1, t2) = (h[l], h[l + 1]);
        let (c, s) = if t2 == 0.0 {
            (1.0, 0.0)
        } else if t2.abs() >= t1.abs() {
            let t = t1 / t2;
            let s = -1.0 / (1.0 + t * t).sqrt();
            (-s * t, s)
        } else {
            let t = t2 / t1;
            let c = 1.0 / (1.0 + t * t).sqrt();
            (c, -c * t)
        };
        self.givens[2 * l] = c;
        self.givens[2 * l + 1] = s;
        h[l] = c * t1 - s * t2;
        h[l + 1] = 0.0;
        if h[l] == 0.0 {
            return Err(LsError::QrFactFailed(l));
        }
        Ok(())
    }

    /// Rotate `yg` and back-substitute against the triangular factor.
    fn qr_solve(&mut self, k: usize) -> Result<(), LsError> {
        for j in 0..k {
            let (c, s) = (self.givens[2 * j], self.givens[2 * j + 1]);
            let (t1, t2) = (self.yg[j], self.yg[j + 1]);
            self.yg[j] = c * t1 - s * t2;
            self.yg[j + 1] = s * t1 + c * t2;
        }
        for i in (0..k).rev() {
            let d = self.hes[i][i];
            if d == 0.0 {
                return Err(LsError::QrSolFailed);
            }
            self.yg[i] /= d;
            let yi = self.yg[i];
            for j in 0..i {
                self.yg[j] -= yi * self.hes[i][j];
            }
        }
        Ok(())
    }

    /// `x += P2⁻¹ S2⁻¹ Σ yg[k] v[k]`.
    fn apply_correction<O: KrylovOperator + ?Sized>(
        &mut self,
        op: &mut O,
        x: &mut [f64],
        krydim: usize,
        right: bool,
        delta: f64,
        s2: Option<&[f64]>,
    ) -> Result<(), LsError> {
        self.xcor.set_const(0.0);
        for k in 0..krydim {
            self.xcor.axpy(self.yg[k], &self.v[k]);
        }
        if let Some(s2) = s2 {
            self.xcor.iter_mut().zip(s2).for_each(|(v, s)| *v /= s);
        }
        if right {
            op.psolve(&self.xcor, &mut self.vtemp, delta, PrecSide::Right)?;
            self.nps += 1;
            x.axpy(1.0, &self.vtemp);
        } else {
            x.axpy(1.0, &self.xcor);
        }
        Ok(())
    }
}

impl LinearSolver for Spgmr {
    fn kind(&self) -> SolverKind {
        SolverKind::Krylov
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        self.nli = 0;
        self.nps = 0;
        self.res_norm = 0.0;
        self.last_flag = 0;
        Ok(())
    }

    fn last_flag(&self) -> i32 {
        self.last_flag
    }

    fn workspace(&self) -> Workspace {
        if self.freed {
            return Workspace::default();
        }
        let m = self.maxl;
        Workspace {
            real: (m + 3) * self.n + (m + 1) * m + 2 * m + m + 1,
            int: 0,
        }
    }

    fn num_iters(&self) -> usize {
        self.nli
    }

    fn res_norm(&self) -> f64 {
        self.res_norm
    }

    fn num_psolves(&self) -> usize {
        self.nps
    }

    fn free(&mut self) {
        self.v = Vec::new();
        self.hes = Vec::new();
        self.givens = Vec::new();
        self.yg = Vec::new();
        self.xcor = Vec::new();
        self.vtemp = Vec::new();
        self.freed = true;
    }
}
