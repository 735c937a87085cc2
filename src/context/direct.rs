//! Jacobian reuse policy for the direct variants.
//!
//! For ODEs the Jacobian `J` is saved and reused across steps until it is
//! too old (`msbj` steps), the integrator reports a convergence failure, or
//! `gamma` has moved too far since the last setup. The Newton matrix
//! `M = I - gamma J` is rebuilt from the saved `J` on every setup. DAE and
//! algebraic systems evaluate the Jacobian on every setup and use it as `M`.

use super::{ConvFail, LinSolStats, SetupInput, SolveInput, SystemForm};
use crate::config::DirectOptions;
use crate::error::{CallbackError, LsError, flag_of};
use crate::jacobian::{DqJacobian, DqPoint, JacInput, JacobianFn, ResidualFn, default_dq_rel};
use crate::matrix::SystemMatrix;
use crate::solver::{DirectSolver, LinearSolver, SolverKind, Workspace};

/// Where Jacobian values come from.
pub enum JacSource<M> {
    /// User callback.
    User(Box<dyn JacobianFn<M>>),
    /// Difference quotients of the system function.
    Dq {
        f: Box<dyn ResidualFn>,
        fill: fn(&mut M, &mut dyn ResidualFn, &DqPoint<'_>) -> Result<usize, CallbackError>,
    },
}

fn fill_dq<M: DqJacobian>(m: &mut M, f: &mut dyn ResidualFn, p: &DqPoint<'_>) -> Result<usize, CallbackError> {
    m.fill_dq(f, p)
}

/// Direct linear solver context: Newton matrix, saved Jacobian and engine.
pub struct DirectContext<M, S> {
    form: SystemForm,
    solver: S,
    a: M,
    saved_j: M,
    has_saved: bool,
    jac: JacSource<M>,
    opts: DirectOptions,
    coef_prev: f64,
    nst_last_jac: u64,
    x: Vec<f64>,
    scale: Vec<f64>,
    stats: LinSolStats,
    last_flag: i32,
    freed: bool,
}

impl<M: SystemMatrix, S: DirectSolver<M>> DirectContext<M, S> {
    fn build(a: M, solver: S, form: SystemForm, jac: JacSource<M>) -> Self {
        let n = a.dim();
        Self {
            form,
            solver,
            saved_j: a.clone(),
            a,
            has_saved: false,
            jac,
            opts: DirectOptions::default(),
            coef_prev: 0.0,
            nst_last_jac: 0,
            x: vec![0.0; n],
            scale: vec![1.0; n],
            stats: LinSolStats::default(),
            last_flag: 0,
            freed: false,
        }
    }

    /// Context with a user Jacobian. `a` is the matrix template (shape and,
    /// for sparse matrices, layout and capacity).
    pub fn with_jacobian(a: M, solver: S, form: SystemForm, jac: Box<dyn JacobianFn<M>>) -> Self {
        Self::build(a, solver, form, JacSource::User(jac))
    }

    /// Context with a difference-quotient Jacobian of `f`.
    pub fn with_dq(a: M, solver: S, form: SystemForm, f: Box<dyn ResidualFn>) -> Self
    where
        M: DqJacobian,
    {
        Self::build(a, solver, form, JacSource::Dq { f, fill: fill_dq::<M> })
    }

    pub fn with_options(mut self, opts: DirectOptions) -> Result<Self, LsError> {
        opts.validate()?;
        self.opts = opts;
        Ok(self)
    }

    pub fn form(&self) -> SystemForm {
        self.form
    }

    pub fn stats(&self) -> LinSolStats {
        LinSolStats { last_flag: self.last_flag, ..self.stats }
    }

    /// The direct engine.
    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    /// The Newton matrix assembled by the last setup.
    pub fn matrix(&self) -> &M {
        &self.a
    }

    fn eval_jacobian(&mut self, input: &SetupInput<'_>, into_saved: bool) -> Result<(), LsError> {
        let target = if into_saved { &mut self.saved_j } else { &mut self.a };
        target.zero_entries();
        let jin = JacInput { t: input.t, y: input.y, yp: input.yp, fy: input.fy, coef: input.coef };
        let res = match &mut self.jac {
            JacSource::User(jac) => jac.jac(&jin, target),
            JacSource::Dq { f, fill } => {
                for (s, w) in self.scale.iter_mut().zip(input.weight) {
                    *s = if *w > 0.0 { 1.0 / w } else { 1.0 };
                }
                let yp = match self.form {
                    SystemForm::Dae => input.yp,
                    _ => None,
                };
                let p = DqPoint {
                    t: input.t,
                    y: input.y,
                    yp,
                    fy: input.fy,
                    cj: input.coef,
                    scale: &self.scale,
                    rel: default_dq_rel(),
                };
                fill(target, f.as_mut(), &p).map(|nevals| {
                    self.stats.nfe_ls += nevals;
                })
            }
        };
        self.stats.nje += 1;
        res.map_err(|e| {
            log::debug!("Jacobian evaluation failed: {e}");
            e.into_package()
        })
    }

    fn setup_inner(&mut self, input: &SetupInput<'_>) -> Result<bool, LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        let n = self.a.dim();
        if input.y.len() != n || input.fy.len() != n || input.weight.len() != n {
            return Err(LsError::IllInput("setup vectors do not match the system size".into()));
        }
        if self.form == SystemForm::Dae && input.yp.is_none() {
            return Err(LsError::IllInput("DAE setup needs y'".into()));
        }
        self.stats.nsetups += 1;

        let jcur = match self.form {
            SystemForm::Ode => {
                let dgamma = if self.coef_prev == 0.0 {
                    f64::INFINITY
                } else {
                    (input.coef / self.coef_prev - 1.0).abs()
                };
                let jbad = input.nst == 0
                    || input.nst > self.nst_last_jac + self.opts.msbj
                    || (input.conv_fail == ConvFail::BadJacobian && dgamma < self.opts.dgmax)
                    || input.conv_fail == ConvFail::Other
                    || !self.has_saved;
                self.coef_prev = input.coef;
                if jbad {
                    self.has_saved = false;
                    self.eval_jacobian(input, true)?;
                    self.has_saved = true;
                    self.nst_last_jac = input.nst;
                } else {
                    log::debug!("reusing saved Jacobian (nst = {})", input.nst);
                }
                self.a.copy_entries_from(&self.saved_j);
                self.a.scale_add_identity(-input.coef);
                jbad
            }
            SystemForm::Dae | SystemForm::Algebraic => {
                self.eval_jacobian(input, false)?;
                true
            }
        };
        self.solver.setup(&self.a)?;
        Ok(jcur)
    }

    pub fn setup(&mut self, input: &SetupInput<'_>) -> Result<bool, LsError> {
        let res = self.setup_inner(input);
        self.last_flag = flag_of(&res);
        res
    }

    fn solve_inner(&mut self, input: &mut SolveInput<'_>) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if input.b.len() != self.x.len() {
            return Err(LsError::IllInput("right-hand side does not match the system size".into()));
        }
        self.solver.solve(&self.a, &mut self.x, input.b)?;
        input.b.copy_from_slice(&self.x);
        Ok(())
    }

    pub fn solve(&mut self, input: &mut SolveInput<'_>) -> Result<(), LsError> {
        let res = self.solve_inner(input);
        self.last_flag = flag_of(&res);
        res
    }
}

impl<M: SystemMatrix, S: DirectSolver<M>> LinearSolver for DirectContext<M, S> {
    fn kind(&self) -> SolverKind {
        self.solver.kind()
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        self.has_saved = false;
        self.last_flag = 0;
        self.solver.initialize()
    }

    fn last_flag(&self) -> i32 {
        self.last_flag
    }

    fn workspace(&self) -> Workspace {
        if self.freed {
            return Workspace::default();
        }
        let w = self.solver.workspace();
        Workspace {
            real: w.real + 2 * self.x.len(),
            int: w.int,
        }
    }

    fn free(&mut self) {
        self.solver.free();
        self.x = Vec::new();
        self.scale = Vec::new();
        self.has_saved = false;
        self.freed = true;
    }
}
