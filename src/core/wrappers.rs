//! Implementations of the core traits for slices and faer dense matrices.
//!
//! Reductions (`dot` and the norms) run on rayon's pool when the `rayon`
//! feature is enabled; element-wise updates stay sequential.
//!
//! # References
//! - [faer crate documentation](https://docs.rs/faer)

use crate::core::traits::{MatVec, NVector};
use faer::{Mat, MatRef};
use num_traits::Float;

impl<T: Float> MatVec<T> for Mat<T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        self.as_ref().matvec(x, y)
    }
}

impl<'a, T: Float> MatVec<T> for MatRef<'a, T> {
    fn matvec(&self, x: &[T], y: &mut [T]) {
        assert_eq!(self.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.ncols(), x.len(), "Input vector x has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            let mut acc = T::zero();
            for (j, &xj) in x.iter().enumerate() {
                acc = acc + self[(i, j)] * xj;
            }
            *yi = acc;
        }
    }
}

fn sum_sq_weighted(x: &[f64], w: &[f64]) -> f64 {
    assert_eq!(x.len(), w.len(), "Vectors must have the same length");
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.par_iter()
            .zip(w.par_iter())
            .map(|(xi, wi)| (xi * wi) * (xi * wi))
            .sum()
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.iter().zip(w).map(|(xi, wi)| (xi * wi) * (xi * wi)).sum()
    }
}

impl NVector for [f64] {
    fn dot(&self, y: &Self) -> f64 {
        assert_eq!(self.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.par_iter().zip(y.par_iter()).map(|(a, b)| a * b).sum()
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.iter().zip(y).map(|(a, b)| a * b).sum()
        }
    }

    fn l2_norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    fn wl2_norm(&self, w: &Self) -> f64 {
        sum_sq_weighted(self, w).sqrt()
    }

    fn wrms_norm(&self, w: &Self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (sum_sq_weighted(self, w) / self.len() as f64).sqrt()
    }

    fn max_norm(&self) -> f64 {
        self.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    fn scale_from(&mut self, c: f64, x: &Self) {
        for (zi, xi) in self.iter_mut().zip(x) {
            *zi = c * xi;
        }
    }

    fn scale_by(&mut self, c: f64) {
        self.iter_mut().for_each(|v| *v *= c);
    }

    fn prod(&mut self, x: &Self, y: &Self) {
        for ((zi, xi), yi) in self.iter_mut().zip(x).zip(y) {
            *zi = xi * yi;
        }
    }

    fn div(&mut self, x: &Self, y: &Self) {
        for ((zi, xi), yi) in self.iter_mut().zip(x).zip(y) {
            *zi = xi / yi;
        }
    }

    fn linear_sum(&mut self, a: f64, x: &Self, b: f64, y: &Self) {
        for ((zi, xi), yi) in self.iter_mut().zip(x).zip(y) {
            *zi = a * xi + b * yi;
        }
    }

    fn axpy(&mut self, a: f64, x: &Self) {
        for (zi, xi) in self.iter_mut().zip(x) {
            *zi += a * xi;
        }
    }

    fn set_const(&mut self, c: f64) {
        self.iter_mut().for_each(|v| *v = c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weighted_norms() {
        let x = [3.0, 4.0];
        let w = [1.0, 1.0];
        assert_abs_diff_eq!(x.wl2_norm(&w), 5.0, epsilon = 1e-14);
        assert_abs_diff_eq!(x.wrms_norm(&w), 5.0 / 2f64.sqrt(), epsilon = 1e-14);
        assert_abs_diff_eq!(x.max_norm(), 4.0);
    }

    #[test]
    fn in_place_updates() {
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 2.0, 2.0];
        let mut z = [0.0; 3];
        z.linear_sum(2.0, &x, -1.0, &y);
        assert_eq!(z, [0.0, 2.0, 4.0]);
        z.prod(&x, &y);
        assert_eq!(z, [2.0, 4.0, 6.0]);
        z.axpy(0.5, &y);
        assert_eq!(z, [3.0, 5.0, 7.0]);
    }
}
