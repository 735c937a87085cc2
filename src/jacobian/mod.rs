//! Jacobian sources: user callbacks and difference-quotient approximations.
//!
//! The system function is reached through [`ResidualFn`]. For ODEs it is the
//! right-hand side `f(t, y)`; for DAEs the residual `F(t, y, y')`; for
//! algebraic systems `F(y)`. Which reading applies is given by
//! [`SystemForm`].

use crate::error::CallbackError;

pub mod band_dq;
pub mod dense_dq;
pub mod jtimes;

pub use band_dq::band_dq_jac;
pub use dense_dq::dense_dq_jac;
pub use jtimes::{DqJacTimes, JacTimesVec, JvInput};

/// How the Newton matrix is built from the Jacobian.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SystemForm {
    /// `M = I - gamma J` with `J = df/dy`.
    #[default]
    Ode,
    /// `M = dF/dy + cj dF/dy'`.
    Dae,
    /// `M = dF/dy`.
    Algebraic,
}

/// System function evaluated by the difference quotients.
pub trait ResidualFn {
    fn eval(&mut self, t: f64, y: &[f64], yp: Option<&[f64]>, out: &mut [f64]) -> Result<(), CallbackError>;
}

impl<F> ResidualFn for F
where
    F: FnMut(f64, &[f64], Option<&[f64]>, &mut [f64]) -> Result<(), CallbackError>,
{
    fn eval(&mut self, t: f64, y: &[f64], yp: Option<&[f64]>, out: &mut [f64]) -> Result<(), CallbackError> {
        self(t, y, yp, out)
    }
}

/// State at which a Jacobian is requested.
#[derive(Debug, Clone, Copy)]
pub struct JacInput<'a> {
    pub t: f64,
    pub y: &'a [f64],
    pub yp: Option<&'a [f64]>,
    /// `f(t, y)` (ODE) or `F(t, y, y')` (DAE, algebraic).
    pub fy: &'a [f64],
    /// `cj` for DAEs; unused otherwise.
    pub coef: f64,
}

/// User-supplied Jacobian for matrix type `M`.
///
/// For [`SystemForm::Dae`] the callback returns `dF/dy + cj dF/dy'`.
pub trait JacobianFn<M> {
    fn jac(&mut self, input: &JacInput<'_>, j: &mut M) -> Result<(), CallbackError>;
}

impl<M, F> JacobianFn<M> for F
where
    F: FnMut(&JacInput<'_>, &mut M) -> Result<(), CallbackError>,
{
    fn jac(&mut self, input: &JacInput<'_>, j: &mut M) -> Result<(), CallbackError> {
        self(input, j)
    }
}

/// Point at which a difference-quotient Jacobian is taken.
#[derive(Debug, Clone, Copy)]
pub struct DqPoint<'a> {
    pub t: f64,
    pub y: &'a [f64],
    /// Present for DAEs: `y'` is perturbed by `cj * inc` alongside `y`.
    pub yp: Option<&'a [f64]>,
    pub fy: &'a [f64],
    pub cj: f64,
    /// Typical magnitude of each component.
    pub scale: &'a [f64],
    /// Relative increment; `sqrt(eps)` unless overridden.
    pub rel: f64,
}

impl DqPoint<'_> {
    /// `rel * max(|y_j|, |scale_j|)`, or `rel` when that is zero.
    #[inline]
    pub fn increment(&self, j: usize) -> f64 {
        let inc = self.rel * self.y[j].abs().max(self.scale[j].abs());
        if inc == 0.0 { self.rel } else { inc }
    }
}

/// Default relative increment for difference quotients.
pub fn default_dq_rel() -> f64 {
    crate::core::UNIT_ROUNDOFF.sqrt()
}

/// Matrix types that can be filled by a difference-quotient Jacobian.
pub trait DqJacobian {
    /// Fill `self` at `p`; returns the number of evaluations.
    fn fill_dq(&mut self, f: &mut dyn ResidualFn, p: &DqPoint<'_>) -> Result<usize, CallbackError>;
}

impl DqJacobian for faer::Mat<f64> {
    fn fill_dq(&mut self, f: &mut dyn ResidualFn, p: &DqPoint<'_>) -> Result<usize, CallbackError> {
        dense_dq_jac(f, p, self)
    }
}

impl DqJacobian for crate::matrix::BandMatrix<f64> {
    fn fill_dq(&mut self, f: &mut dyn ResidualFn, p: &DqPoint<'_>) -> Result<usize, CallbackError> {
        let (mu, ml) = (self.mu(), self.ml());
        band_dq_jac(f, p, mu, ml, self)
    }
}
