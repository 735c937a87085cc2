//! Preconditioner reuse policy and SPGMR driver for the Krylov variant.
//!
//! Setup decides whether the preconditioner may reuse saved Jacobian data
//! (`jok`) from the step count since the last recomputation, the reported
//! convergence failure and the change in `gamma`. Solve builds the operator
//! `A v` (`v - gamma J v` for ODEs, `J v` otherwise) from a user product or
//! a difference quotient, scales the system by the error weights and runs
//! SPGMR to a tolerance of `delt` times the nonlinear tolerance.

use super::{ConvFail, LinSolStats, SetupInput, SolveInput, SystemForm};
use crate::config::KrylovOptions;
use crate::core::NVector;
use crate::error::{CallbackError, LsError, flag_of};
use crate::jacobian::{DqJacTimes, JacTimesVec, JvInput, ResidualFn};
use crate::preconditioner::{PrecInput, PrecSide, PrecType, Preconditioner, ReuseGuard};
use crate::solver::{LinearSolver, SolverKind, Spgmr, SpgmrOutcome, Workspace};

/// Krylov linear solver context.
pub struct KrylovContext {
    n: usize,
    form: SystemForm,
    opts: KrylovOptions,
    spgmr: Spgmr,
    pset: Option<ReuseGuard<Box<dyn Preconditioner>>>,
    jtimes: Option<Box<dyn JacTimesVec>>,
    residual: Option<Box<dyn ResidualFn>>,
    dq: DqJacTimes,
    x: Vec<f64>,
    coef_prev: f64,
    nst_last_pre: u64,
    stats: LinSolStats,
    last_flag: i32,
    freed: bool,
}

impl KrylovContext {
    pub fn new(n: usize, form: SystemForm, opts: KrylovOptions) -> Result<Self, LsError> {
        opts.validate()?;
        let spgmr = Spgmr::new(n, opts.maxl)
            .with_gs_type(opts.gs_type)
            .with_max_restarts(opts.max_restarts);
        Ok(Self {
            n,
            form,
            dq: DqJacTimes::new(n, opts.dq_incfac),
            opts,
            spgmr,
            pset: None,
            jtimes: None,
            residual: None,
            x: vec![0.0; n],
            coef_prev: 0.0,
            nst_last_pre: 0,
            stats: LinSolStats::default(),
            last_flag: 0,
            freed: false,
        })
    }

    /// Attach a preconditioner, applied on the sides given by `prec_type`.
    pub fn with_preconditioner(mut self, pc: Box<dyn Preconditioner>) -> Self {
        self.pset = Some(ReuseGuard::new(pc));
        self
    }

    /// Use a user Jacobian-vector product instead of difference quotients.
    pub fn with_jtimes(mut self, jtimes: Box<dyn JacTimesVec>) -> Self {
        self.jtimes = Some(jtimes);
        self
    }

    /// System function used by the difference-quotient `J v`.
    pub fn with_residual(mut self, f: Box<dyn ResidualFn>) -> Self {
        self.residual = Some(f);
        self
    }

    pub fn options(&self) -> &KrylovOptions {
        &self.opts
    }

    /// Replace the options; `maxl` changes resize the Krylov basis.
    pub fn set_options(&mut self, opts: KrylovOptions) -> Result<(), LsError> {
        opts.validate()?;
        self.spgmr.set_maxl(opts.maxl);
        self.spgmr.set_gs_type(opts.gs_type);
        self.spgmr.set_max_restarts(opts.max_restarts);
        self.dq.set_incfac(opts.dq_incfac);
        self.opts = opts;
        Ok(())
    }

    pub fn form(&self) -> SystemForm {
        self.form
    }

    pub fn stats(&self) -> LinSolStats {
        LinSolStats {
            nfe_ls: self.dq.nfe(),
            last_flag: self.last_flag,
            ..self.stats
        }
    }

    pub fn preconditioner(&self) -> Option<&dyn Preconditioner> {
        self.pset.as_ref().map(|g| g.inner().as_ref())
    }

    /// Sides the preconditioner is actually applied on.
    fn prec_type(&self) -> PrecType {
        if self.pset.is_some() {
            self.opts.prec_type
        } else {
            PrecType::empty()
        }
    }

    fn setup_inner(&mut self, input: &SetupInput<'_>) -> Result<bool, LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if input.y.len() != self.n || input.fy.len() != self.n {
            return Err(LsError::IllInput("setup vectors do not match the system size".into()));
        }
        self.stats.nsetups += 1;
        if self.prec_type().is_empty() {
            return Ok(false);
        }
        let Some(guard) = self.pset.as_mut() else {
            return Ok(false);
        };

        let jbad = match self.form {
            SystemForm::Ode => {
                let dgamma = if self.coef_prev == 0.0 {
                    f64::INFINITY
                } else {
                    (input.coef / self.coef_prev - 1.0).abs()
                };
                input.nst == 0
                    || input.nst > self.nst_last_pre + self.opts.msbpre
                    || (input.conv_fail == ConvFail::BadJacobian && dgamma < self.opts.dgmax)
                    || input.conv_fail == ConvFail::Other
                    || !guard.is_ready()
            }
            SystemForm::Dae | SystemForm::Algebraic => true,
        };
        let pin = PrecInput { t: input.t, y: input.y, yp: input.yp, fy: input.fy, coef: input.coef };
        self.stats.npe += 1;
        let jcur = guard.setup(&pin, !jbad)?;
        self.coef_prev = input.coef;
        if jcur {
            self.stats.nje += 1;
            self.nst_last_pre = input.nst;
        }
        Ok(jcur)
    }

    /// Decide `jok`, call the preconditioner setup and return `jcur`.
    pub fn setup(&mut self, input: &SetupInput<'_>) -> Result<bool, LsError> {
        let res = self.setup_inner(input);
        self.last_flag = flag_of(&res);
        res
    }

    fn solve_inner(&mut self, input: &mut SolveInput<'_>) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        let n = self.n;
        if input.b.len() != n || input.weight.len() != n || input.y.len() != n || input.fy.len() != n {
            return Err(LsError::IllInput("solve vectors do not match the system size".into()));
        }
        if self.jtimes.is_none() && self.residual.is_none() {
            return Err(LsError::IllInput("no Jacobian-vector product and no system function".into()));
        }

        let bnorm = input.b.wrms_norm(input.weight);
        let deltar = self.opts.delt * input.tol;
        if bnorm <= deltar {
            if input.newton_iter > 0 {
                input.b.set_const(0.0);
            }
            return Ok(());
        }
        let delta = deltar * (n as f64).sqrt();
        self.x.set_const(0.0);

        let prec_type = self.prec_type();
        let mut op = Operator {
            form: self.form,
            jv_input: JvInput {
                t: input.t,
                y: input.y,
                yp: input.yp,
                fy: input.fy,
                weight: input.weight,
                coef: input.coef,
                form: self.form,
            },
            prec_input: PrecInput { t: input.t, y: input.y, yp: input.yp, fy: input.fy, coef: input.coef },
            jtimes: self.jtimes.as_mut(),
            residual: self.residual.as_mut(),
            dq: &mut self.dq,
            pset: self.pset.as_mut(),
            njtimes: 0,
        };
        let res = self.spgmr.solve(
            &mut op,
            &mut self.x,
            input.b,
            prec_type,
            delta,
            Some(input.weight),
            Some(input.weight),
        );
        self.stats.njtimes += op.njtimes;
        self.stats.nli += self.spgmr.num_iters();
        self.stats.nps += self.spgmr.num_psolves();
        input.b.copy_from_slice(&self.x);

        match res {
            Ok(SpgmrOutcome::Converged) => Ok(()),
            Ok(SpgmrOutcome::ResidualReduced) => {
                self.stats.ncfl += 1;
                if input.newton_iter == 0 {
                    Ok(())
                } else {
                    Err(LsError::ResidualReduced)
                }
            }
            Err(e) => {
                self.stats.ncfl += 1;
                log::debug!("SPGMR failed: {e}");
                Err(e)
            }
        }
    }

    /// Solve `A x = b` approximately, overwriting `input.b` with `x`.
    pub fn solve(&mut self, input: &mut SolveInput<'_>) -> Result<(), LsError> {
        let res = self.solve_inner(input);
        self.last_flag = flag_of(&res);
        res
    }
}

/// `A v` and preconditioner solves for one SPGMR call.
struct Operator<'a> {
    form: SystemForm,
    jv_input: JvInput<'a>,
    prec_input: PrecInput<'a>,
    jtimes: Option<&'a mut Box<dyn JacTimesVec>>,
    residual: Option<&'a mut Box<dyn ResidualFn>>,
    dq: &'a mut DqJacTimes,
    pset: Option<&'a mut ReuseGuard<Box<dyn Preconditioner>>>,
    njtimes: usize,
}

impl Operator<'_> {
    fn jv(&mut self, v: &[f64], jv: &mut [f64]) -> Result<(), CallbackError> {
        match (self.jtimes.as_mut(), self.residual.as_mut()) {
            (Some(jt), _) => jt.jtimes(v, jv, &self.jv_input),
            (None, Some(f)) => self.dq.apply(f.as_mut(), v, jv, &self.jv_input),
            (None, None) => Err(CallbackError::Unrecoverable("no Jacobian-vector product".into())),
        }
    }
}

impl crate::solver::KrylovOperator for Operator<'_> {
    fn atimes(&mut self, v: &[f64], z: &mut [f64]) -> Result<(), LsError> {
        self.jv(v, z).map_err(|e| {
            if e.is_recoverable() {
                LsError::AtimesFailRec
            } else {
                LsError::AtimesFailUnrec
            }
        })?;
        self.njtimes += 1;
        if self.form == SystemForm::Ode {
            let gamma = self.jv_input.coef;
            for (zi, vi) in z.iter_mut().zip(v) {
                *zi = vi - gamma * *zi;
            }
        }
        Ok(())
    }

    fn psolve(&mut self, r: &[f64], z: &mut [f64], delta: f64, side: PrecSide) -> Result<(), LsError> {
        match self.pset.as_mut() {
            Some(guard) => guard.solve(&self.prec_input, r, z, delta, side),
            None => {
                z.copy_from_slice(r);
                Ok(())
            }
        }
    }
}

impl LinearSolver for KrylovContext {
    fn kind(&self) -> SolverKind {
        SolverKind::Krylov
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if let Some(g) = self.pset.as_mut() {
            g.reset();
        }
        self.coef_prev = 0.0;
        self.nst_last_pre = 0;
        self.last_flag = 0;
        self.spgmr.initialize()
    }

    fn last_flag(&self) -> i32 {
        self.last_flag
    }

    fn workspace(&self) -> Workspace {
        if self.freed {
            return Workspace::default();
        }
        let w = self.spgmr.workspace();
        let p = self.pset.as_ref().map(|g| g.inner().workspace()).unwrap_or_default();
        Workspace {
            real: w.real + p.real + 3 * self.n,
            int: w.int + p.int,
        }
    }

    fn num_iters(&self) -> usize {
        self.spgmr.num_iters()
    }

    fn res_norm(&self) -> f64 {
        self.spgmr.res_norm()
    }

    fn num_psolves(&self) -> usize {
        self.spgmr.num_psolves()
    }

    fn free(&mut self) {
        self.spgmr.free();
        self.x = Vec::new();
        self.dq = DqJacTimes::new(0, self.opts.dq_incfac);
        self.freed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    /// f = -k_i y_i
    fn decay(k: Vec<f64>) -> Box<dyn ResidualFn> {
        Box::new(move |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
            for ((o, yi), ki) in out.iter_mut().zip(y).zip(&k) {
                *o = -ki * yi;
            }
            Ok(())
        })
    }

    struct DiagPc {
        k: Vec<f64>,
        d: Vec<f64>,
        recomputed: Rc<Cell<usize>>,
    }

    impl Preconditioner for DiagPc {
        fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, CallbackError> {
            if !jok {
                self.recomputed.set(self.recomputed.get() + 1);
            }
            self.d = self.k.iter().map(|ki| 1.0 + input.coef * ki).collect();
            Ok(!jok)
        }

        fn solve(
            &mut self,
            _input: &PrecInput<'_>,
            r: &[f64],
            z: &mut [f64],
            _delta: f64,
            _side: PrecSide,
        ) -> Result<(), CallbackError> {
            for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.d) {
                *zi = ri / di;
            }
            Ok(())
        }
    }

    fn setup_input<'a>(y: &'a [f64], fy: &'a [f64], nst: u64, coef: f64, conv_fail: ConvFail) -> SetupInput<'a> {
        SetupInput { t: 0.0, y, yp: None, fy, weight: y, coef, nst, conv_fail }
    }

    #[test]
    fn preconditioned_solve_is_exact_for_diagonal_systems() {
        let k = vec![1.0, 10.0, 100.0, 1000.0];
        let recomputed = Rc::new(Cell::new(0));
        let pc = DiagPc { k: k.clone(), d: vec![], recomputed: recomputed.clone() };
        let mut ctx = KrylovContext::new(4, SystemForm::Ode, KrylovOptions::default().with_prec_type(PrecType::LEFT))
            .unwrap()
            .with_residual(decay(k.clone()))
            .with_preconditioner(Box::new(pc));
        let y = [1.0; 4];
        let fy: Vec<f64> = k.iter().map(|ki| -ki).collect();
        assert!(ctx.setup(&setup_input(&y, &fy, 0, 0.1, ConvFail::None)).unwrap());
        assert!(!ctx.setup(&setup_input(&y, &fy, 3, 0.1, ConvFail::None)).unwrap());
        assert_eq!(recomputed.get(), 1);

        let mut b = [2.0, 4.0, 11.0, 101.0];
        let w = [1.0; 4];
        let mut sin = SolveInput { b: &mut b, weight: &w, t: 0.0, y: &y, yp: None, fy: &fy, coef: 0.1, tol: 1e-6, newton_iter: 0 };
        ctx.solve(&mut sin).unwrap();
        for (bi, ei) in b.iter().zip([2.0 / 1.1, 2.0, 1.0, 1.0]) {
            assert_abs_diff_eq!(*bi, ei, epsilon = 1e-4);
        }
        let st = ctx.stats();
        assert_eq!(st.npe, 2);
        assert_eq!(st.nje, 1);
        assert!(st.nli >= 1);
        assert!(st.nfe_ls >= 1);
        assert_eq!(st.ncfl, 0);
    }

    #[test]
    fn small_rhs_short_circuits() {
        let mut ctx = KrylovContext::new(2, SystemForm::Algebraic, KrylovOptions::default())
            .unwrap()
            .with_residual(decay(vec![1.0, 1.0]));
        let y = [1.0, 1.0];
        let w = [1.0, 1.0];
        let mut b = [1e-12, -1e-12];
        let mut sin = SolveInput { b: &mut b, weight: &w, t: 0.0, y: &y, yp: None, fy: &y, coef: 0.0, tol: 1.0, newton_iter: 0 };
        ctx.solve(&mut sin).unwrap();
        assert_eq!(b, [1e-12, -1e-12]);

        let mut sin = SolveInput { b: &mut b, weight: &w, t: 0.0, y: &y, yp: None, fy: &y, coef: 0.0, tol: 1.0, newton_iter: 2 };
        ctx.solve(&mut sin).unwrap();
        assert_eq!(b, [0.0, 0.0]);
        assert_eq!(ctx.stats().nli, 0);
    }

    #[test]
    fn missing_operator_is_illegal() {
        let mut ctx = KrylovContext::new(2, SystemForm::Ode, KrylovOptions::default()).unwrap();
        let y = [1.0, 1.0];
        let mut b = [1.0, 1.0];
        let mut sin = SolveInput { b: &mut b, weight: &y, t: 0.0, y: &y, yp: None, fy: &y, coef: 0.1, tol: 1e-3, newton_iter: 0 };
        assert!(matches!(ctx.solve(&mut sin), Err(LsError::IllInput(_))));
        assert_eq!(ctx.last_flag(), -2);
    }

    #[test]
    fn jtimes_failure_is_reported_as_atimes_flag() {
        fn jt(_v: &[f64], _jv: &mut [f64], _inp: &JvInput<'_>) -> Result<(), CallbackError> {
            Err(CallbackError::Recoverable("later".into()))
        }
        let mut ctx = KrylovContext::new(2, SystemForm::Ode, KrylovOptions::default())
            .unwrap()
            .with_jtimes(Box::new(jt));
        let y = [1.0, 1.0];
        let mut b = [1.0, 1.0];
        let mut sin = SolveInput { b: &mut b, weight: &y, t: 0.0, y: &y, yp: None, fy: &y, coef: 0.1, tol: 1e-3, newton_iter: 0 };
        assert_eq!(ctx.solve(&mut sin), Err(LsError::AtimesFailRec));
        assert_eq!(ctx.stats().ncfl, 1);
        assert_eq!(ctx.last_flag(), 3);
    }

    #[test]
    fn reuse_policy_for_stale_preconditioner() {
        let recomputed = Rc::new(Cell::new(0));
        let pc = DiagPc { k: vec![1.0, 1.0], d: vec![], recomputed: recomputed.clone() };
        let mut ctx = KrylovContext::new(2, SystemForm::Ode, KrylovOptions::default().with_prec_type(PrecType::RIGHT).with_msbpre(10))
            .unwrap()
            .with_residual(decay(vec![1.0, 1.0]))
            .with_preconditioner(Box::new(pc));
        let y = [1.0, 1.0];
        let fy = [-1.0, -1.0];
        assert!(ctx.setup(&setup_input(&y, &fy, 0, 0.1, ConvFail::None)).unwrap());
        assert!(!ctx.setup(&setup_input(&y, &fy, 5, 0.1, ConvFail::None)).unwrap());
        assert!(ctx.setup(&setup_input(&y, &fy, 11, 0.1, ConvFail::None)).unwrap());
        assert!(ctx.setup(&setup_input(&y, &fy, 12, 0.11, ConvFail::BadJacobian)).unwrap());
        assert!(!ctx.setup(&setup_input(&y, &fy, 13, 0.5, ConvFail::BadJacobian)).unwrap());
        assert!(ctx.setup(&setup_input(&y, &fy, 14, 0.5, ConvFail::Other)).unwrap());
        assert_eq!(recomputed.get(), 4);

        // a reset forces a full rebuild on the next setup
        ctx.initialize().unwrap();
        assert_eq!(ctx.setup(&setup_input(&y, &fy, 1, 0.5, ConvFail::None)), Ok(true));
        assert_eq!(recomputed.get(), 5);
        assert_eq!(ctx.last_flag(), 0);
    }

    #[test]
    fn failed_setup_is_retried_with_a_rebuild() {
        let recomputed = Rc::new(Cell::new(0));
        let pc = DiagPc { k: vec![1.0, 1.0], d: vec![], recomputed: recomputed.clone() };
        let mut ctx = KrylovContext::new(2, SystemForm::Ode, KrylovOptions::default().with_prec_type(PrecType::LEFT))
            .unwrap()
            .with_residual(decay(vec![1.0, 1.0]))
            .with_preconditioner(Box::new(pc));
        let y = [1.0, 1.0];
        let fy = [-1.0, -1.0];
        assert!(ctx.setup(&setup_input(&y, &fy, 0, 0.1, ConvFail::None)).unwrap());
        ctx.pset.as_mut().unwrap().reset();
        // BadJacobian with a large gamma change would otherwise ask for reuse
        assert_eq!(ctx.setup(&setup_input(&y, &fy, 2, 0.5, ConvFail::BadJacobian)), Ok(true));
        assert_eq!(recomputed.get(), 2);
    }
}
