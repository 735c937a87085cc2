//! Integration tests for the direct variants of the linear solver handle.
//!
//! These tests drive `LinSol` the way an integrator does: repeated setups
//! with growing step counts, Newton-matrix assembly for ODE and DAE forms,
//! and error flags surfacing from user callbacks.

use approx::assert_abs_diff_eq;
use faer::Mat;
use linsol::context::{ConvFail, LinSol, SetupInput, SolveInput};
use linsol::jacobian::{JacInput, JacobianFn, SystemForm};
use linsol::matrix::{SparseMatrix, SparseType};
use linsol::solver::{LinearSolver, SolverKind, Workspace};
use linsol::{CallbackError, DirectOptions, KrylovContext, KrylovOptions, LsError, SparseOptions};

/// Constant Jacobian copied into the handle's matrix.
struct Fixed(SparseMatrix);

impl JacobianFn<SparseMatrix> for Fixed {
    fn jac(&mut self, _input: &JacInput<'_>, j: &mut SparseMatrix) -> Result<(), CallbackError> {
        j.copy_from(&self.0);
        Ok(())
    }
}

/// Dense Jacobian callback that always fails.
struct Broken;

impl JacobianFn<Mat<f64>> for Broken {
    fn jac(&mut self, _input: &JacInput<'_>, _j: &mut Mat<f64>) -> Result<(), CallbackError> {
        Err(CallbackError::Unrecoverable("Jacobian unavailable".into()))
    }
}

fn tridiag(n: usize) -> SparseMatrix {
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, -2.0));
        if i > 0 {
            t.push((i, i - 1, 1.0));
        }
        if i + 1 < n {
            t.push((i, i + 1, 0.5));
        }
    }
    SparseMatrix::from_triplets(n, n, &t, SparseType::Csc).unwrap()
}

fn setup_input<'a>(y: &'a [f64], fy: &'a [f64], coef: f64, nst: u64) -> SetupInput<'a> {
    SetupInput { t: 0.0, y, yp: None, fy, weight: y, coef, nst, conv_fail: ConvFail::None }
}

fn solve_input<'a>(b: &'a mut [f64], y: &'a [f64], coef: f64) -> SolveInput<'a> {
    SolveInput { b, weight: y, t: 0.0, y, yp: None, fy: y, coef, tol: 1e-6, newton_iter: 0 }
}

#[test]
fn sparse_ode_reuses_jacobian_and_symbolic_analysis() {
    let n = 10;
    let jac = tridiag(n);
    let template = SparseMatrix::new(n, n, 3 * n, SparseType::Csc);
    let mut ls = LinSol::sparse(template, SystemForm::Ode, Some(Box::new(Fixed(jac.clone()))), &SparseOptions::default())
        .unwrap();
    assert_eq!(ls.kind(), SolverKind::SparseDirect);

    let y = vec![1.0; n];
    let gamma = 0.25;
    assert!(ls.setup(&setup_input(&y, &y, gamma, 0)).unwrap());
    assert!(!ls.setup(&setup_input(&y, &y, gamma * 1.05, 4)).unwrap());

    // reference: (I - gamma' J) x = b with dense LU
    let gamma2 = gamma * 1.05;
    let jd = jac.to_dense();
    let m = Mat::from_fn(n, n, |i, k| (if i == k { 1.0 } else { 0.0 }) - gamma2 * jd[(i, k)]);
    let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
    let mut x = b.clone();
    ls.solve(&mut solve_input(&mut x, &y, gamma2)).unwrap();
    let mut r = vec![0.0; n];
    for i in 0..n {
        r[i] = (0..n).map(|k| m[(i, k)] * x[k]).sum::<f64>() - b[i];
    }
    assert!(r.iter().all(|v| v.abs() < 1e-12));

    let st = ls.stats();
    assert_eq!(st.nje, 1);
    assert_eq!(st.nsetups, 2);
    let LinSol::Sparse(ctx) = &ls else {
        panic!("expected the sparse variant");
    };
    let lu = ctx.solver().stats();
    assert_eq!(lu.symbolic, 1);
    assert_eq!(lu.refactor, 1);
}

#[test]
fn dense_dae_matrix_combines_both_partials() {
    // F(y, y') = y' + K y
    let k = [[2.0, 1.0, 0.0], [0.0, 3.0, -1.0], [1.0, 0.0, 4.0]];
    let f = move |_t: f64, y: &[f64], yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
        let yp = yp.ok_or_else(|| CallbackError::Unrecoverable("missing y'".into()))?;
        for i in 0..3 {
            out[i] = yp[i] + (0..3).map(|j| k[i][j] * y[j]).sum::<f64>();
        }
        Ok(())
    };
    let mut ls = LinSol::dense_dq(3, SystemForm::Dae, Box::new(f));
    let y = [1.0, -1.0, 0.5];
    let yp = [0.0, 0.0, 0.0];
    let mut fy = [0.0; 3];
    for i in 0..3 {
        fy[i] = (0..3).map(|j| k[i][j] * y[j]).sum::<f64>();
    }
    let w = [1.0; 3];
    let cj = 10.0;
    let input = SetupInput { t: 0.0, y: &y, yp: Some(&yp), fy: &fy, weight: &w, coef: cj, nst: 7, conv_fail: ConvFail::None };
    assert!(ls.setup(&input).unwrap());
    assert!(ls.setup(&input).unwrap());
    assert_eq!(ls.stats().nje, 2);

    let LinSol::Dense(ctx) = &ls else {
        panic!("expected the dense variant");
    };
    let m = ctx.matrix();
    for i in 0..3 {
        for j in 0..3 {
            let expected = k[i][j] + if i == j { cj } else { 0.0 };
            assert_abs_diff_eq!(m[(i, j)], expected, epsilon = 1e-5);
        }
    }
}

#[test]
fn dae_setup_without_derivative_is_illegal() {
    let f = |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
        out.copy_from_slice(y);
        Ok(())
    };
    let mut ls = LinSol::dense_dq(2, SystemForm::Dae, Box::new(f));
    let y = [1.0, 1.0];
    let err = ls.setup(&setup_input(&y, &y, 1.0, 0)).unwrap_err();
    assert!(matches!(err, LsError::IllInput(_)));
    assert_eq!(ls.last_flag(), -2);
}

#[test]
fn failing_user_jacobian_is_unrecoverable() {
    let mut ls = LinSol::dense(2, SystemForm::Ode, Box::new(Broken));
    let y = [1.0, 1.0];
    let err = ls.setup(&setup_input(&y, &y, 0.1, 0)).unwrap_err();
    assert!(!err.is_recoverable());
    assert_eq!(ls.last_flag(), -7);
}

#[test]
fn direct_options_shorten_reuse() {
    let f = |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
        for (o, yi) in out.iter_mut().zip(y) {
            *o = -yi;
        }
        Ok(())
    };
    let mut ls = LinSol::band_dq(5, 0, 0, SystemForm::Ode, Box::new(f))
        .with_direct_options(DirectOptions::default().with_msbj(2))
        .unwrap();
    let y = [1.0; 5];
    let fy = [-1.0; 5];
    assert!(ls.setup(&setup_input(&y, &fy, 0.1, 0)).unwrap());
    assert!(!ls.setup(&setup_input(&y, &fy, 0.1, 2)).unwrap());
    assert!(ls.setup(&setup_input(&y, &fy, 0.1, 3)).unwrap());

    let ks = LinSol::from(KrylovContext::new(5, SystemForm::Ode, KrylovOptions::default()).unwrap());
    assert!(ks.with_direct_options(DirectOptions::default()).is_err());
    assert!(
        LinSol::band_dq(5, 0, 0, SystemForm::Ode, Box::new(f))
            .with_direct_options(DirectOptions::default().with_dgmax(-1.0))
            .is_err()
    );
}

#[test]
fn freed_handle_reports_missing_memory() {
    let f = |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
        out.copy_from_slice(y);
        Ok(())
    };
    let mut ls = LinSol::band_dq(6, 1, 1, SystemForm::Algebraic, Box::new(f));
    assert!(ls.workspace().real > 0);
    ls.free();
    assert_eq!(ls.workspace(), Workspace::default());
    let y = [1.0; 6];
    assert_eq!(ls.setup(&setup_input(&y, &y, 0.0, 0)), Err(LsError::MemNull));
    let mut b = [1.0; 6];
    assert_eq!(ls.solve(&mut solve_input(&mut b, &y, 0.0)), Err(LsError::MemNull));
    assert_eq!(ls.last_flag(), -1);
}
