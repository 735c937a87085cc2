//! Dense Newton matrices on top of faer.

use crate::matrix::SystemMatrix;
use faer::Mat;

impl SystemMatrix for Mat<f64> {
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn zero_entries(&mut self) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] = 0.0;
            }
        }
    }

    fn copy_entries_from(&mut self, other: &Self) {
        assert_eq!(
            (self.nrows(), self.ncols()),
            (other.nrows(), other.ncols()),
            "dense shapes differ"
        );
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] = other[(i, j)];
            }
        }
    }

    fn scale_add_identity(&mut self, c: f64) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] *= c;
            }
        }
        for i in 0..self.nrows().min(self.ncols()) {
            self[(i, i)] += 1.0;
        }
    }
}

/// Construct a dense matrix from column-major storage.
pub fn from_column_major(nrows: usize, ncols: usize, data: &[f64]) -> Mat<f64> {
    assert_eq!(data.len(), nrows * ncols, "storage has incorrect length");
    Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i])
}
