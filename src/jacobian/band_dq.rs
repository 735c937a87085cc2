//! Banded difference-quotient Jacobian with column grouping.
//!
//! Columns `j` and `j + width` (with `width = mldq + mudq + 1`) touch
//! disjoint rows of a band matrix, so every column of a group can be
//! perturbed at once and recovered from a single evaluation. The whole
//! Jacobian costs `min(width, n)` evaluations.
//!
//! # References
//! - Curtis, Powell & Reid (1974), On the estimation of sparse Jacobian matrices

use super::{DqPoint, ResidualFn};
use crate::error::CallbackError;
use crate::matrix::BandMatrix;

/// Fill `jac` with a difference-quotient approximation of the Jacobian at `p`.
///
/// `mudq`/`mldq` give the band used for grouping; only rows inside the
/// matrix's own band (clamped to the grouping band) are stored, the rest of
/// `jac` is zeroed. Returns the number of function evaluations.
pub fn band_dq_jac<F: ResidualFn + ?Sized>(
    f: &mut F,
    p: &DqPoint<'_>,
    mudq: usize,
    mldq: usize,
    jac: &mut BandMatrix<f64>,
) -> Result<usize, CallbackError> {
    let n = p.y.len();
    jac.set_zero();
    if n == 0 {
        return Ok(0);
    }
    let mudq = mudq.min(n - 1);
    let mldq = mldq.min(n - 1);
    let mukeep = jac.mu().min(mudq);
    let mlkeep = jac.ml().min(mldq);
    let width = mldq + mudq + 1;
    let ngroups = width.min(n);

    let mut ytemp = p.y.to_vec();
    let mut yptemp = p.yp.map(<[f64]>::to_vec);
    let mut ftemp = vec![0.0; n];
    let inc: Vec<f64> = (0..n).map(|j| p.increment(j)).collect();

    for group in 0..ngroups {
        for j in (group..n).step_by(width) {
            ytemp[j] += inc[j];
            if let Some(ypt) = yptemp.as_mut() {
                ypt[j] += p.cj * inc[j];
            }
        }
        f.eval(p.t, &ytemp, yptemp.as_deref(), &mut ftemp)?;
        for j in (group..n).step_by(width) {
            ytemp[j] = p.y[j];
            if let (Some(ypt), Some(yp)) = (yptemp.as_mut(), p.yp) {
                ypt[j] = yp[j];
            }
            let inv = 1.0 / inc[j];
            let i1 = j.saturating_sub(mukeep);
            let i2 = (j + mlkeep).min(n - 1);
            for i in i1..=i2 {
                jac.set(i, j, inv * (ftemp[i] - p.fy[i]));
            }
        }
    }
    log::trace!("band DQ Jacobian: n = {n}, {ngroups} evaluations");
    Ok(ngroups)
}
