//! Band-block-diagonal preconditioner.
//!
//! The state vector is split into contiguous blocks. On each block a local
//! approximation `g` of the system function is differenced with a banded
//! difference quotient, and the resulting band matrix is factored with
//! partial pivoting. Coupling between blocks is ignored, so setup and solve
//! work on every block independently (in parallel with the `rayon`
//! feature).
//!
//! Per block the preconditioner is
//! - `I - gamma J` for ODEs, reusing the saved `J` when `jok` is set,
//! - `dG/dy + cj dG/dy'` for DAEs,
//! - `dG/dy` for algebraic systems.
//!
//! # References
//! - Brown & Hindmarsh (1989), Reduced storage matrix methods in stiff ODE systems
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, §10.2 (block Jacobi)

use crate::error::{CallbackError, LsError};
use crate::jacobian::{DqPoint, SystemForm, band_dq_jac, default_dq_rel};
use crate::matrix::BandMatrix;
use crate::preconditioner::{PrecInput, PrecSide, Preconditioner};
use crate::solver::Workspace;

/// Local approximation of the system function on one block.
///
/// `block` is the index of the block, `y` and `yp` its slices of the state.
pub trait LocalFn: Sync {
    fn eval(
        &self,
        block: usize,
        t: f64,
        y: &[f64],
        yp: Option<&[f64]>,
        out: &mut [f64],
    ) -> Result<(), CallbackError>;
}

impl<F> LocalFn for F
where
    F: Fn(usize, f64, &[f64], Option<&[f64]>, &mut [f64]) -> Result<(), CallbackError> + Sync,
{
    fn eval(
        &self,
        block: usize,
        t: f64,
        y: &[f64],
        yp: Option<&[f64]>,
        out: &mut [f64],
    ) -> Result<(), CallbackError> {
        self(block, t, y, yp, out)
    }
}

/// Communication step run once per recomputing setup, before any local
/// function evaluation.
pub type CommFn = Box<dyn FnMut(f64, &[f64], Option<&[f64]>) -> Result<(), CallbackError> + Send>;

/// Half-bandwidths of a block: `mudq/mldq` for differencing, `mukeep/mlkeep`
/// for the retained preconditioner band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBands {
    pub mudq: usize,
    pub mldq: usize,
    pub mukeep: usize,
    pub mlkeep: usize,
}

impl BlockBands {
    pub fn new(mudq: usize, mldq: usize, mukeep: usize, mlkeep: usize) -> Self {
        Self { mudq, mldq, mukeep, mlkeep }
    }

    fn clamped(self, len: usize) -> Self {
        let cap = len.saturating_sub(1);
        Self {
            mudq: self.mudq.min(cap),
            mldq: self.mldq.min(cap),
            mukeep: self.mukeep.min(cap),
            mlkeep: self.mlkeep.min(cap),
        }
    }
}

/// Storage for one block.
#[derive(Debug, Clone)]
pub struct BbdBlock {
    start: usize,
    len: usize,
    bands: BlockBands,
    saved_j: BandMatrix<f64>,
    lu: BandMatrix<f64>,
    pivots: Vec<usize>,
    has_jac: bool,
}

impl BbdBlock {
    fn new(start: usize, len: usize, bands: BlockBands) -> Self {
        let bands = bands.clamped(len);
        Self {
            start,
            len,
            bands,
            saved_j: BandMatrix::new(len, bands.mukeep, bands.mlkeep),
            lu: BandMatrix::new(len, bands.mukeep, bands.mlkeep),
            pivots: vec![0; len],
            has_jac: false,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bands(&self) -> BlockBands {
        self.bands
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }

    /// Difference the local function into `saved_j`; returns evaluations.
    #[allow(clippy::too_many_arguments)]
    fn refresh<G: LocalFn + ?Sized>(
        &mut self,
        g: &G,
        k: usize,
        t: f64,
        y: &[f64],
        yp: Option<&[f64]>,
        cj: f64,
        rel: f64,
    ) -> Result<usize, CallbackError> {
        let y = &y[self.range()];
        let yp = yp.map(|v| &v[self.range()]);
        let mut gy = vec![0.0; self.len];
        g.eval(k, t, y, yp, &mut gy)?;
        let scale = vec![1.0; self.len];
        let p = DqPoint { t, y, yp, fy: &gy, cj, scale: &scale, rel };
        let mut local = |t: f64, y: &[f64], yp: Option<&[f64]>, out: &mut [f64]| g.eval(k, t, y, yp, out);
        let nevals = band_dq_jac(&mut local, &p, self.bands.mudq, self.bands.mldq, &mut self.saved_j)?;
        self.has_jac = true;
        Ok(nevals + 1)
    }

    /// Build the block matrix from `saved_j` and factor it.
    fn factor(&mut self, k: usize, form: SystemForm, gamma: f64) -> Result<(), CallbackError> {
        self.lu.copy_from(&self.saved_j);
        if form == SystemForm::Ode {
            self.lu.scale(-gamma);
            self.lu.add_identity();
        }
        self.lu.factor(&mut self.pivots).map_err(|e| match e {
            LsError::ZeroPivot(col) => {
                CallbackError::Recoverable(format!("zero pivot at column {col} of block {k}"))
            }
            other => CallbackError::Unrecoverable(other.to_string()),
        })
    }

    fn backsolve(&self, z: &mut [f64]) {
        self.lu.backsolve(&self.pivots, z);
    }
}

/// Band-block-diagonal preconditioner over a local function `G`.
pub struct BandBlockDiagonal<G> {
    n: usize,
    form: SystemForm,
    blocks: Vec<BbdBlock>,
    local: G,
    comm: Option<CommFn>,
    dq_rel: f64,
    nge: usize,
}

impl<G: LocalFn> BandBlockDiagonal<G> {
    /// Blocks of the given sizes, laid out contiguously.
    pub fn new(block_sizes: &[usize], bands: BlockBands, form: SystemForm, local: G) -> Result<Self, LsError> {
        if block_sizes.is_empty() || block_sizes.contains(&0) {
            return Err(LsError::IllInput("every block needs at least one component".into()));
        }
        let mut blocks = Vec::with_capacity(block_sizes.len());
        let mut start = 0;
        for &len in block_sizes {
            blocks.push(BbdBlock::new(start, len, bands));
            start += len;
        }
        Ok(Self {
            n: start,
            form,
            blocks,
            local,
            comm: None,
            dq_rel: default_dq_rel(),
            nge: 0,
        })
    }

    /// `nblocks` blocks of (almost) equal size covering `n` components.
    pub fn uniform(n: usize, nblocks: usize, bands: BlockBands, form: SystemForm, local: G) -> Result<Self, LsError> {
        if nblocks == 0 || nblocks > n {
            return Err(LsError::IllInput(format!("cannot split {n} components into {nblocks} blocks")));
        }
        let (q, r) = (n / nblocks, n % nblocks);
        let sizes: Vec<usize> = (0..nblocks).map(|k| q + usize::from(k < r)).collect();
        Self::new(&sizes, bands, form, local)
    }

    pub fn with_comm(mut self, comm: CommFn) -> Self {
        self.comm = Some(comm);
        self
    }

    /// Relative increment for the difference quotients; `0` restores `sqrt(eps)`.
    pub fn with_dq_rel(mut self, dq_rel: f64) -> Self {
        self.dq_rel = if dq_rel > 0.0 { dq_rel } else { default_dq_rel() };
        self
    }

    /// Change the differencing bands and increment without reallocating.
    /// Saved Jacobian data is dropped and the evaluation counter reset.
    pub fn reinit(&mut self, mudq: usize, mldq: usize, dq_rel: f64) {
        for b in self.blocks.iter_mut() {
            let bands = BlockBands { mudq, mldq, ..b.bands }.clamped(b.len);
            b.bands = bands;
            b.has_jac = false;
        }
        self.dq_rel = if dq_rel > 0.0 { dq_rel } else { default_dq_rel() };
        self.nge = 0;
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn blocks(&self) -> &[BbdBlock] {
        &self.blocks
    }

    /// Local function evaluations spent by setups.
    pub fn nge(&self) -> usize {
        self.nge
    }

    fn recompute(&mut self, input: &PrecInput<'_>) -> Result<(), CallbackError> {
        if self.form == SystemForm::Dae && input.yp.is_none() {
            return Err(CallbackError::Unrecoverable("DAE preconditioner needs y'".into()));
        }
        if let Some(comm) = self.comm.as_mut() {
            comm(input.t, input.y, input.yp)?;
        }
        let (t, y, rel) = (input.t, input.y, self.dq_rel);
        let (yp, cj) = match self.form {
            SystemForm::Dae => (input.yp, input.coef),
            _ => (None, 0.0),
        };
        let local = &self.local;
        #[cfg(feature = "rayon")]
        let counts: Result<Vec<usize>, CallbackError> = {
            use rayon::prelude::*;
            self.blocks
                .par_iter_mut()
                .enumerate()
                .map(|(k, b)| b.refresh(local, k, t, y, yp, cj, rel))
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let counts: Result<Vec<usize>, CallbackError> = self
            .blocks
            .iter_mut()
            .enumerate()
            .map(|(k, b)| b.refresh(local, k, t, y, yp, cj, rel))
            .collect();
        match counts {
            Ok(counts) => {
                self.nge += counts.iter().sum::<usize>();
                Ok(())
            }
            Err(e) => {
                // blocks refreshed before the failure hold data for a different y
                for b in self.blocks.iter_mut() {
                    b.has_jac = false;
                }
                Err(e)
            }
        }
    }

    fn factor_all(&mut self, gamma: f64) -> Result<(), CallbackError> {
        let form = self.form;
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.blocks
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(k, b)| b.factor(k, form, gamma))
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.blocks
                .iter_mut()
                .enumerate()
                .try_for_each(|(k, b)| b.factor(k, form, gamma))
        }
    }
}

impl<G: LocalFn> Preconditioner for BandBlockDiagonal<G> {
    fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, CallbackError> {
        if input.y.len() != self.n {
            return Err(CallbackError::Unrecoverable(format!(
                "state has {} components, preconditioner covers {}",
                input.y.len(),
                self.n
            )));
        }
        let reuse = jok && self.form == SystemForm::Ode && self.blocks.iter().all(|b| b.has_jac);
        if reuse {
            log::debug!("bbd: reusing saved block Jacobians");
        } else {
            self.recompute(input)?;
        }
        self.factor_all(input.coef)?;
        Ok(!reuse)
    }

    fn solve(
        &mut self,
        _input: &PrecInput<'_>,
        r: &[f64],
        z: &mut [f64],
        _delta: f64,
        _side: PrecSide,
    ) -> Result<(), CallbackError> {
        if r.len() != self.n || z.len() != self.n {
            return Err(CallbackError::Unrecoverable("vector length does not match the preconditioner".into()));
        }
        z.copy_from_slice(r);
        let mut parts: Vec<&mut [f64]> = Vec::with_capacity(self.blocks.len());
        let mut rest = z;
        for b in &self.blocks {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(b.len);
            parts.push(head);
            rest = tail;
        }
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.blocks
                .par_iter()
                .zip(parts.into_par_iter())
                .for_each(|(b, zb)| b.backsolve(zb));
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (b, zb) in self.blocks.iter().zip(parts) {
                b.backsolve(zb);
            }
        }
        Ok(())
    }

    fn workspace(&self) -> Workspace {
        self.blocks.iter().fold(Workspace::default(), |w, b| Workspace {
            real: w.real + b.saved_j.storage_len() + b.lu.storage_len() + 2 * b.len,
            int: w.int + b.pivots.len(),
        })
    }
}
