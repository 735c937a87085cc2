//! Band direct solver: partial-pivoting LU in band storage.
//!
//! The matrix handed to `setup` is copied into a private factor matrix of
//! the same shape, so the caller's Newton matrix is left intact.

use crate::error::{LsError, flag_of};
use crate::matrix::BandMatrix;
use crate::solver::{DirectSolver, LinearSolver, SolverKind, Workspace};

#[derive(Debug, Clone)]
pub struct BandLuSolver {
    n: usize,
    lu: Option<BandMatrix<f64>>,
    pivots: Vec<usize>,
    factored: bool,
    last_flag: i32,
    freed: bool,
}

impl BandLuSolver {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            lu: None,
            pivots: vec![0; n],
            factored: false,
            last_flag: 0,
            freed: false,
        }
    }

    fn setup_inner(&mut self, a: &BandMatrix<f64>) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if a.n() != self.n {
            return Err(LsError::IllInput(format!(
                "band matrix has order {}, solver expects {}",
                a.n(),
                self.n
            )));
        }
        self.factored = false;
        let same_shape = self
            .lu
            .as_ref()
            .is_some_and(|lu| (lu.mu(), lu.ml()) == (a.mu(), a.ml()));
        if !same_shape {
            self.lu = Some(a.clone());
        } else if let Some(lu) = self.lu.as_mut() {
            lu.copy_from(a);
        }
        let Some(lu) = self.lu.as_mut() else {
            return Err(LsError::MemNull);
        };
        lu.factor(&mut self.pivots)?;
        self.factored = true;
        Ok(())
    }

    fn solve_inner(&mut self, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        if x.len() != self.n || b.len() != self.n {
            return Err(LsError::IllInput("vector length does not match the solver".into()));
        }
        let Some(lu) = self.lu.as_ref().filter(|_| self.factored) else {
            return Err(LsError::IllInput("solve called before a successful setup".into()));
        };
        x.copy_from_slice(b);
        lu.backsolve(&self.pivots, x);
        Ok(())
    }
}

impl LinearSolver for BandLuSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::BandDirect
    }

    fn initialize(&mut self) -> Result<(), LsError> {
        if self.freed {
            return Err(LsError::MemNull);
        }
        self.factored = false;
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
        Workspace {
            real: self.lu.as_ref().map_or(0, |lu| lu.storage_len()),
            int: self.pivots.len(),
        }
    }

    fn free(&mut self) {
        self.lu = None;
        self.pivots = Vec::new();
        self.factored = false;
        self.freed = true;
    }
}

impl DirectSolver<BandMatrix<f64>> for BandLuSolver {
    fn setup(&mut self, a: &BandMatrix<f64>) -> Result<(), LsError> {
        let res = self.setup_inner(a);
        self.last_flag = flag_of(&res);
        res
    }

    fn solve(&mut self, _a: &BandMatrix<f64>, x: &mut [f64], b: &[f64]) -> Result<(), LsError> {
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
    fn tridiagonal_system() {
        let n = 5;
        let mut a = BandMatrix::new(n, 1, 1);
        for i in 0..n {
            a.set(i, i, 2.0);
            if i + 1 < n {
                a.set(i, i + 1, -1.0);
                a.set(i + 1, i, -1.0);
            }
        }
        let b = [1.0, 0.0, 0.0, 0.0, 1.0];
        let mut x = vec![0.0; n];
        let mut s = BandLuSolver::new(n);
        s.setup(&a).unwrap();
        s.solve(&a, &mut x, &b).unwrap();
        for xi in &x {
            assert_abs_diff_eq!(*xi, 1.0, epsilon = 1e-12);
        }
        // the caller's matrix is not overwritten by the factorization
        assert_eq!(a.get(0, 0), 2.0);
    }

    #[test]
    fn zero_column_is_recoverable() {
        let a = BandMatrix::<f64>::new(3, 1, 1);
        let mut s = BandLuSolver::new(3);
        let err = s.setup(&a).unwrap_err();
        assert_eq!(err, LsError::ZeroPivot(0));
        assert!(err.is_recoverable());
        assert_eq!(s.last_flag(), 8);
        let mut x = vec![0.0; 3];
        assert!(s.solve(&a, &mut x, &[1.0; 3]).is_err());
    }

    #[test]
    fn workspace_counts_fill_band() {
        let a = BandMatrix::<f64>::new(10, 2, 1);
        let mut s = BandLuSolver::new(10);
        let _ = s.setup(&a);
        assert_eq!(s.workspace(), Workspace { real: 10 * (3 + 1 + 1), int: 10 });
        s.free();
        assert_eq!(s.setup(&a), Err(LsError::MemNull));
    }
}
