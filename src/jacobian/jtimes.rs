//! Jacobian-vector products for the Krylov variant.

use super::{ResidualFn, SystemForm};
use crate::core::NVector;
use crate::error::CallbackError;

/// State at which `J v` is requested.
#[derive(Debug, Clone, Copy)]
pub struct JvInput<'a> {
    pub t: f64,
    pub y: &'a [f64],
    pub yp: Option<&'a [f64]>,
    /// `f(t, y)` or the residual `F(t, y, y')`.
    pub fy: &'a [f64],
    /// Error weights used to size the difference increment.
    pub weight: &'a [f64],
    /// `cj` for DAEs.
    pub coef: f64,
    pub form: SystemForm,
}

/// User-supplied `J v`. For DAEs `J = dF/dy + cj dF/dy'`.
pub trait JacTimesVec {
    fn jtimes(&mut self, v: &[f64], jv: &mut [f64], input: &JvInput<'_>) -> Result<(), CallbackError>;
}

impl<F> JacTimesVec for F
where
    F: FnMut(&[f64], &mut [f64], &JvInput<'_>) -> Result<(), CallbackError>,
{
    fn jtimes(&mut self, v: &[f64], jv: &mut [f64], input: &JvInput<'_>) -> Result<(), CallbackError> {
        self(v, jv, input)
    }
}

/// Difference-quotient `J v` fallback.
///
/// With `sig = incfac / wrms(v, weight)`:
/// ODE and algebraic systems use `(F(y + sig v) - F(y)) / sig`; DAEs
/// `(F(y + sig v, y' + cj sig v) - F(y, y')) / sig`. Each product costs one
/// evaluation.
#[derive(Debug, Clone)]
pub struct DqJacTimes {
    incfac: f64,
    ytemp: Vec<f64>,
    yptemp: Vec<f64>,
    nfe: usize,
}

impl DqJacTimes {
    pub fn new(n: usize, incfac: f64) -> Self {
        Self {
            incfac,
            ytemp: vec![0.0; n],
            yptemp: vec![0.0; n],
            nfe: 0,
        }
    }

    pub fn set_incfac(&mut self, incfac: f64) {
        self.incfac = incfac;
    }

    /// Evaluations spent so far.
    pub fn nfe(&self) -> usize {
        self.nfe
    }

    pub fn reset_counters(&mut self) {
        self.nfe = 0;
    }

    pub fn apply<F: ResidualFn + ?Sized>(
        &mut self,
        f: &mut F,
        v: &[f64],
        jv: &mut [f64],
        input: &JvInput<'_>,
    ) -> Result<(), CallbackError> {
        let vnrm = v.wrms_norm(input.weight);
        if vnrm == 0.0 {
            jv.set_const(0.0);
            return Ok(());
        }
        let sig = self.incfac / vnrm;
        self.ytemp.linear_sum(1.0, input.y, sig, v);
        let yp = match (input.form, input.yp) {
            (SystemForm::Dae, Some(yp)) => {
                self.yptemp.linear_sum(1.0, yp, input.coef * sig, v);
                Some(self.yptemp.as_slice())
            }
            (_, yp) => yp,
        };
        self.nfe += 1;
        f.eval(input.t, &self.ytemp, yp, jv)?;
        let siginv = 1.0 / sig;
        for (z, fi) in jv.iter_mut().zip(input.fy) {
            *z = (*z - fi) * siginv;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linear_system_product_is_exact() {
        // f = A y with A = [[1, 2], [0, 3]]
        let mut f = |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
            out[0] = y[0] + 2.0 * y[1];
            out[1] = 3.0 * y[1];
            Ok(())
        };
        let y = [1.0, 1.0];
        let fy = [3.0, 3.0];
        let w = [1.0, 1.0];
        let input = JvInput { t: 0.0, y: &y, yp: None, fy: &fy, weight: &w, coef: 0.0, form: SystemForm::Ode };
        let mut dq = DqJacTimes::new(2, 1.0);
        let mut jv = [0.0; 2];
        dq.apply(&mut f, &[1.0, -1.0], &mut jv, &input).unwrap();
        assert_abs_diff_eq!(jv[0], -1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(jv[1], -3.0, epsilon = 1e-10);
        assert_eq!(dq.nfe(), 1);

        dq.apply(&mut f, &[0.0, 0.0], &mut jv, &input).unwrap();
        assert_eq!(jv, [0.0, 0.0]);
        assert_eq!(dq.nfe(), 1);
    }

    #[test]
    fn dae_product_includes_cj() {
        // F = y' - 2 y, J = -2 + cj
        let mut f = |_t: f64, y: &[f64], yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
            let yp = yp.ok_or_else(|| CallbackError::Unrecoverable("missing y'".into()))?;
            out[0] = yp[0] - 2.0 * y[0];
            Ok(())
        };
        let (y, yp, fy, w) = ([1.0], [2.0], [0.0], [1.0]);
        let input = JvInput { t: 0.0, y: &y, yp: Some(&yp), fy: &fy, weight: &w, coef: 5.0, form: SystemForm::Dae };
        let mut dq = DqJacTimes::new(1, 1.0);
        let mut jv = [0.0];
        dq.apply(&mut f, &[0.5], &mut jv, &input).unwrap();
        assert_abs_diff_eq!(jv[0], 1.5, epsilon = 1e-10);
    }
}
