//! Column-oriented band storage with in-place LU factorization.
//!
//! Column `j` stores rows `j - smu ..= j + ml` where `smu = min(n-1, mu+ml)`
//! is the storage upper bandwidth. The extra `smu - mu` super-diagonals hold
//! the fill-in produced by row interchanges during factorization.
//!
//! # References
//! - Golub & Van Loan, Matrix Computations, §4.3 (banded Gaussian elimination)
//! - LINPACK `dgbfa`/`dgbsl`

use crate::core::traits::MatVec;
use crate::error::LsError;
use crate::matrix::SystemMatrix;
use faer::Mat;
use num_traits::Float;

/// Square band matrix with lower/upper half-bandwidths `ml`/`mu`.
#[derive(Clone, Debug, PartialEq)]
pub struct BandMatrix<T> {
    n: usize,
    mu: usize,
    ml: usize,
    smu: usize,
    ldim: usize,
    data: Vec<T>,
}

impl<T: Float> BandMatrix<T> {
    /// Zero band matrix of order `n`. Half-bandwidths are clamped to `[0, n-1]`.
    pub fn new(n: usize, mu: usize, ml: usize) -> Self {
        let cap = n.saturating_sub(1);
        let mu = mu.min(cap);
        let ml = ml.min(cap);
        let smu = (mu + ml).min(cap);
        let ldim = smu + ml + 1;
        Self {
            n,
            mu,
            ml,
            smu,
            ldim,
            data: vec![T::zero(); n * ldim],
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn mu(&self) -> usize {
        self.mu
    }

    pub fn ml(&self) -> usize {
        self.ml
    }

    /// Storage upper bandwidth.
    pub fn smu(&self) -> usize {
        self.smu
    }

    /// Length of each stored column.
    pub fn ldim(&self) -> usize {
        self.ldim
    }

    /// Number of stored reals.
    pub fn storage_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn idx(&self, i: usize, j: usize) -> usize {
        j * self.ldim + (i + self.smu - j)
    }

    /// True when `(i, j)` lies inside the logical band `j-mu <= i <= j+ml`.
    pub fn in_band(&self, i: usize, j: usize) -> bool {
        i < self.n && j < self.n && i + self.mu >= j && i <= j + self.ml
    }

    /// Entry `(i, j)`; zero outside the band.
    pub fn get(&self, i: usize, j: usize) -> T {
        if self.in_band(i, j) {
            self.data[self.idx(i, j)]
        } else {
            T::zero()
        }
    }

    /// Set entry `(i, j)`.
    ///
    /// # Panics
    /// Panics if `(i, j)` is outside the band.
    pub fn set(&mut self, i: usize, j: usize, v: T) {
        assert!(self.in_band(i, j), "entry ({i}, {j}) outside band");
        let k = self.idx(i, j);
        self.data[k] = v;
    }

    /// Stored column `j`; entry `(i, j)` sits at offset `i - j + smu`.
    pub fn column(&self, j: usize) -> &[T] {
        &self.data[j * self.ldim..(j + 1) * self.ldim]
    }

    pub fn column_mut(&mut self, j: usize) -> &mut [T] {
        let ld = self.ldim;
        &mut self.data[j * ld..(j + 1) * ld]
    }

    pub fn set_zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = T::zero());
    }

    pub fn scale(&mut self, c: T) {
        self.data.iter_mut().for_each(|v| *v = *v * c);
    }

    pub fn add_identity(&mut self) {
        for j in 0..self.n {
            let k = j * self.ldim + self.smu;
            self.data[k] = self.data[k] + T::one();
        }
    }

    /// Copy all stored entries from a matrix of identical shape.
    ///
    /// # Panics
    /// Panics if the shapes differ.
    pub fn copy_from(&mut self, other: &Self) {
        assert_eq!(
            (self.n, self.mu, self.ml, self.smu),
            (other.n, other.mu, other.ml, other.smu),
            "band shapes differ"
        );
        self.data.copy_from_slice(&other.data);
    }

    pub fn to_dense(&self) -> Mat<T> {
        Mat::from_fn(self.n, self.n, |i, j| self.get(i, j))
    }

    /// LU factorization with partial pivoting, in place.
    ///
    /// On success `pivots[k]` is the row swapped with row `k` at step `k`.
    /// A zero pivot at step `k` yields [`LsError::ZeroPivot`]`(k)`.
    pub fn factor(&mut self, pivots: &mut [usize]) -> Result<(), LsError> {
        let n = self.n;
        let (ml, smu, ld) = (self.ml, self.smu, self.ldim);
        assert_eq!(pivots.len(), n, "pivot array has incorrect length");
        if n == 0 {
            return Ok(());
        }
        // clear the fill-in rows
        let fill = smu - self.mu;
        if fill > 0 {
            for c in 0..n {
                for r in 0..fill {
                    self.data[c * ld + r] = T::zero();
                }
            }
        }
        for k in 0..n - 1 {
            let diag = k * ld + smu;
            let last_row = (k + ml).min(n - 1);

            let mut l = k;
            let mut max = self.data[diag].abs();
            for i in k + 1..=last_row {
                let v = self.data[diag + (i - k)].abs();
                if v > max {
                    l = i;
                    max = v;
                }
            }
            pivots[k] = l;
            let lpos = diag + (l - k);
            if self.data[lpos] == T::zero() {
                return Err(LsError::ZeroPivot(k));
            }
            let swap = l != k;
            if swap {
                self.data.swap(lpos, diag);
            }

            // multipliers -a(i,k)/a(k,k) overwrite the sub-diagonal of column k
            let mult = -T::one() / self.data[diag];
            for i in k + 1..=last_row {
                self.data[diag + (i - k)] = self.data[diag + (i - k)] * mult;
            }

            let last_col = (k + smu).min(n - 1);
            for j in k + 1..=last_col {
                let sl = j * ld + (l + smu - j);
                let sk = j * ld + (k + smu - j);
                let a_kj = self.data[sl];
                if swap {
                    self.data[sl] = self.data[sk];
                    self.data[sk] = a_kj;
                }
                if a_kj != T::zero() {
                    for i in k + 1..=last_row {
                        let m = self.data[diag + (i - k)];
                        let pos = j * ld + (i + smu - j);
                        self.data[pos] = self.data[pos] + a_kj * m;
                    }
                }
            }
        }
        pivots[n - 1] = n - 1;
        if self.data[(n - 1) * ld + smu] == T::zero() {
            return Err(LsError::ZeroPivot(n - 1));
        }
        Ok(())
    }

    /// Solve `A x = b` in place using factors produced by [`factor`](Self::factor).
    pub fn backsolve(&self, pivots: &[usize], b: &mut [T]) {
        let n = self.n;
        let (ml, smu, ld) = (self.ml, self.smu, self.ldim);
        assert_eq!(b.len(), n, "right-hand side has incorrect length");
        if n == 0 {
            return;
        }
        // L y = P b
        for k in 0..n - 1 {
            let l = pivots[k];
            let mult = b[l];
            if l != k {
                b[l] = b[k];
                b[k] = mult;
            }
            let diag = k * ld + smu;
            let last_row = (k + ml).min(n - 1);
            for i in k + 1..=last_row {
                b[i] = b[i] + mult * self.data[diag + (i - k)];
            }
        }
        // U x = y
        for k in (0..n).rev() {
            let diag = k * ld + smu;
            let first_row = k.saturating_sub(smu);
            b[k] = b[k] / self.data[diag];
            let mult = -b[k];
            for i in first_row..k {
                b[i] = b[i] + mult * self.data[diag - (k - i)];
            }
        }
    }
}

impl<T: Float> MatVec<T> for BandMatrix<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.n);
        assert_eq!(y.len(), self.n);
        y.iter_mut().for_each(|v| *v = T::zero());
        for (j, &xj) in x.iter().enumerate() {
            let lo = j.saturating_sub(self.mu);
            let hi = (j + self.ml).min(self.n - 1);
            for i in lo..=hi {
                y[i] = y[i] + self.data[self.idx(i, j)] * xj;
            }
        }
    }
}

impl SystemMatrix for BandMatrix<f64> {
    fn dim(&self) -> usize {
        self.n
    }
    fn zero_entries(&mut self) {
        self.set_zero();
    }
    fn copy_entries_from(&mut self, other: &Self) {
        self.copy_from(other);
    }
    fn scale_add_identity(&mut self, c: f64) {
        self.scale(c);
        self.add_identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tridiag(n: usize) -> BandMatrix<f64> {
        let mut a = BandMatrix::new(n, 1, 1);
        for i in 0..n {
            a.set(i, i, 2.0);
            if i + 1 < n {
                a.set(i, i + 1, -1.0);
                a.set(i + 1, i, -1.0);
            }
        }
        a
    }

    #[test]
    fn storage_bandwidth_is_capped() {
        let a = BandMatrix::<f64>::new(3, 2, 2);
        assert_eq!(a.smu(), 2);
        assert_eq!(a.ldim(), 5);
        let b = BandMatrix::<f64>::new(10, 1, 2);
        assert_eq!(b.smu(), 3);
    }

    #[test]
    fn tridiagonal_solve_recovers_ones() {
        let mut a = tridiag(5);
        let mut piv = vec![0; 5];
        a.factor(&mut piv).unwrap();
        let mut b = vec![1.0, 0.0, 0.0, 0.0, 1.0];
        a.backsolve(&piv, &mut b);
        for v in b {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn pivoting_handles_zero_diagonal() {
        // [[0, 1], [1, 1]] needs a row swap
        let mut a = BandMatrix::new(2, 1, 1);
        a.set(0, 1, 1.0);
        a.set(1, 0, 1.0);
        a.set(1, 1, 1.0);
        let mut piv = vec![0; 2];
        a.factor(&mut piv).unwrap();
        assert_eq!(piv[0], 1);
        let mut b = vec![2.0, 5.0];
        a.backsolve(&piv, &mut b);
        assert_abs_diff_eq!(b[0], 3.0, epsilon = 1e-14);
        assert_abs_diff_eq!(b[1], 2.0, epsilon = 1e-14);
    }

    #[test]
    fn singular_band_reports_zero_pivot() {
        let mut a = BandMatrix::<f64>::new(3, 0, 0);
        a.set(0, 0, 1.0);
        a.set(2, 2, 1.0);
        let mut piv = vec![0; 3];
        assert_eq!(a.factor(&mut piv), Err(LsError::ZeroPivot(1)));
    }

    #[test]
    fn matvec_matches_dense() {
        let a = tridiag(4);
        let d = a.to_dense();
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut y1 = [0.0; 4];
        let mut y2 = [0.0; 4];
        a.matvec(&x, &mut y1);
        d.matvec(&x, &mut y2);
        assert_eq!(y1, y2);
    }
}
