//! Dense direct solver on faer's full-pivoting LU.
//!
//! The factorization is cached by `setup` and reused by every `solve`
//! until the next setup. A numerically singular matrix (a diagonal entry of
//! `U` that is zero relative to the largest one) is reported as a
//! recoverable zero pivot.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use crate::core::UNIT_ROUNDOFF;
use crate::error::{LsError, flag_of};
use crate::solver::{DirectSolver, LinearSolver, SolverKind, Workspace};
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

/// LU solver using full pivoting from faer.
pub struct DenseLuSolver {
    n: usize,
    factor: Option<FullPivLu<f64>>,
    last_flag: i32,
    freed: bool,
}

impl DenseLuSolver {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            factor: None,
            last_flag: 0,
            freed: false,
        }
    }

    fn setup_inner(&mut self, a: &Mat<f64>) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if a.nrows() != self.n || a.ncols() != self.n {
            return Err(LsError::IllInput(format!(
                "matrix is {}x{}, solver expects {}x{}",
                a.nrows(),
                a.ncols(),
                self.n,
                self.n
            )));
        }
        self.factor = None;
        let lu = FullPivLu::new(a.as_ref());
        let u = lu.U();
        let umax = (0..self.n).map(|i| u[(i, i)].abs()).fold(0.0, f64::max);
        let tiny = umax * UNIT_ROUNDOFF * self.n as f64;
        if let Some(k) = (0..self.n).find(|&i| {
            let d = u[(i, i)].abs();
            d <= tiny || !d.is_finite()
        }) {
            return Err(LsError::ZeroPivot(k));
        }
        self.factor = Some(lu);
        Ok(())
    }

    fn solve_inner(&mut self, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if x.len() != self.n || b.len() != self.n {
            return Err(LsError::IllInput("vector length does not match the solver".into()));
        }
        let Some(factor) = self.factor.as_ref() else {
            return Err(LsError::IllInput("solve called before a successful setup".into()));
        };
        x.copy_from_slice(b);
        let x_mat = MatMut::from_column_major_slice_mut(x, self.n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LsError::PackageFailRec("dense solve produced non-finite values".into()));
        }
        Ok(())
    }
}

impl LinearSolver for DenseLuSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::DenseDirect
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        self.factor = None;
        self.last_flag = 0;
        Ok(())
    }

    fn last_flag(&self) -> i32 {
        self.last_flag
    }

    fn workspace(&self) -> Workspace {
        match &self.factor {
            Some(_) => Workspace { real: self.n * self.n, int: 2 * self.n },
            None => Workspace::default(),
        }
    }

    fn free(&mut self) {
        self.factor = None;
        self.freed = true;
    }
}

impl DirectSolver<Mat<f64>> for DenseLuSolver {
    fn setup(&mut self, a: &Mat<f64>) -> Result<(), LsError> {
        let res = self.setup_inner(a);
        self.last_flag = flag_of(&res);
        res
    }

    fn solve(&mut self, _a: &Mat<f64>, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
        let res = self.solve_inner(x, b);
        self.last_flag = flag_of(&res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn lu_solver_solves_dense_system() {
        // [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6] has solution [6,15,-23]
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0,
            (0, 1) => 1.0,
            (0, 2) => 1.0,
            (1, 0) => 1.0,
            (1, 1) => 3.0,
            (1, 2) => 2.0,
            (2, 0) => 1.0,
            _ => 0.0,
        });
        let b = [4.0, 5.0, 6.0];
        let mut x = vec![0.0; 3];
        let mut solver = DenseLuSolver::new(3);
        solver.setup(&a).unwrap();
        solver.solve(&a, &mut x, &b).unwrap();
        for (xi, ei) in x.iter().zip([6.0, 15.0, -23.0]) {
            assert_abs_diff_eq!(*xi, ei, epsilon = 1e-10);
        }
        assert_eq!(solver.last_flag(), 0);
    }

    #[test]
    fn singular_matrix_is_recoverable() {
        let a = Mat::from_fn(2, 2, |i, j| ((i + 1) * (j + 1)) as f64);
        let mut solver = DenseLuSolver::new(2);
        let err = solver.setup(&a).unwrap_err();
        assert!(matches!(err, LsError::ZeroPivot(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn shape_mismatch_is_illegal_input() {
        let a = Mat::<f64>::zeros(3, 2);
        let mut solver = DenseLuSolver::new(3);
        assert!(matches!(solver.setup(&a), Err(LsError::IllInput(_))));
        assert_eq!(solver.last_flag(), -2);
    }
}
