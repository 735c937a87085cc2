//! Core linear-algebra traits for linsol.

/// Matrix–vector product: y ← A x.
pub trait MatVec<T = f64> {
    /// Compute y = A · x.
    fn matvec(&self, x: &[T], y: &mut [T]);
}

/// Vector capability consumed by the solvers.
///
/// All binary operations require equal lengths; the in-place forms write
/// into `self`.
pub trait NVector {
    /// Dot product `xᵀ y`.
    fn dot(&self, y: &Self) -> f64;
    /// Euclidean norm.
    fn l2_norm(&self) -> f64;
    /// Weighted L2 norm `sqrt(Σ (x_i w_i)²)`.
    fn wl2_norm(&self, w: &Self) -> f64;
    /// Weighted root-mean-square norm `wl2_norm / sqrt(n)`.
    fn wrms_norm(&self, w: &Self) -> f64;
    /// Max norm.
    fn max_norm(&self) -> f64;
    /// self ← c · x
    fn scale_from(&mut self, c: f64, x: &Self);
    /// self ← c · self
    fn scale_by(&mut self, c: f64);
    /// self ← x ⊙ y
    fn prod(&mut self, x: &Self, y: &Self);
    /// self ← x ⊘ y
    fn div(&mut self, x: &Self, y: &Self);
    /// self ← a · x + b · y
    fn linear_sum(&mut self, a: f64, x: &Self, b: f64, y: &Self);
    /// self ← self + a · x
    fn axpy(&mut self, a: f64, x: &Self);
    /// self ← c
    fn set_const(&mut self, c: f64);
}
