//! Column-by-column dense difference-quotient Jacobian.

use super::{DqPoint, ResidualFn};
use crate::error::CallbackError;
use faer::Mat;

/// Fill `jac` column by column; costs `n` evaluations, which are returned.
pub fn dense_dq_jac<F: ResidualFn + ?Sized>(
    f: &mut F,
    p: &DqPoint<'_>,
    jac: &mut Mat<f64>,
) -> Result<usize, CallbackError> {
    let n = p.y.len();
    let mut ytemp = p.y.to_vec();
    let mut yptemp = p.yp.map(<[f64]>::to_vec);
    let mut ftemp = vec![0.0; n];
    for j in 0..n {
        let inc = p.increment(j);
        ytemp[j] += inc;
        if let Some(ypt) = yptemp.as_mut() {
            ypt[j] += p.cj * inc;
        }
        let res = f.eval(p.t, &ytemp, yptemp.as_deref(), &mut ftemp);
        ytemp[j] = p.y[j];
        if let (Some(ypt), Some(yp)) = (yptemp.as_mut(), p.yp) {
            ypt[j] = yp[j];
        }
        res?;
        let inv = 1.0 / inc;
        for i in 0..n {
            jac[(i, j)] = inv * (ftemp[i] - p.fy[i]);
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian::default_dq_rel;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rotation_field() {
        // f = (-y1 + y0², y0 * y1)
        let mut f = |_t: f64, y: &[f64], _yp: Option<&[f64]>, out: &mut [f64]| -> Result<(), CallbackError> {
            out[0] = -y[1] + y[0] * y[0];
            out[1] = y[0] * y[1];
            Ok(())
        };
        let y = [2.0, 3.0];
        let mut fy = [0.0; 2];
        f(0.0, &y, None, &mut fy).unwrap();
        let p = DqPoint { t: 0.0, y: &y, yp: None, fy: &fy, cj: 0.0, scale: &[1.0, 1.0], rel: default_dq_rel() };
        let mut jac = Mat::zeros(2, 2);
        assert_eq!(dense_dq_jac(&mut f, &p, &mut jac).unwrap(), 2);
        assert_abs_diff_eq!(jac[(0, 0)], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(0, 1)], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(1, 0)], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jac[(1, 1)], 2.0, epsilon = 1e-6);
    }
}
