//! Symbolic analysis: structural checks and fill-reducing column order.

use crate::error::LsError;
use crate::matrix::CscView;
use crate::utils::ordering::{amd_order, colamd_order, maximum_matching};

/// Column ordering used by the symbolic analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ordering {
    /// Approximate minimum degree on the pattern of A + Aᵀ.
    Amd,
    /// Column approximate minimum degree, targeting the pattern of AᵀA.
    #[default]
    Colamd,
    /// Identity.
    Natural,
}

impl Ordering {
    /// Map the integer codes `0 = AMD`, `1 = COLAMD`, `2 = natural`.
    pub fn from_code(code: i32) -> Result<Self, LsError> {
        match code {
            0 => Ok(Ordering::Amd),
            1 => Ok(Ordering::Colamd),
            2 => Ok(Ordering::Natural),
            _ => Err(LsError::IllInput(format!("unknown ordering code {code}"))),
        }
    }
}

/// Result of the symbolic analysis; valid while the pattern is unchanged.
#[derive(Debug, Clone)]
pub struct SymbolicLu {
    n: usize,
    ordering: Ordering,
    q: Vec<usize>,
    colptr: Vec<usize>,
    rowind: Vec<usize>,
}

impl SymbolicLu {
    /// Analyse the pattern of a square CSC matrix.
    ///
    /// A structurally singular pattern is an unrecoverable failure.
    pub fn analyze(a: &CscView<'_>, ordering: Ordering) -> Result<Self, LsError> {
        if a.nrows != a.ncols {
            return Err(LsError::IllInput(format!(
                "matrix is {}x{}, expected square",
                a.nrows, a.ncols
            )));
        }
        let n = a.ncols;
        let (rank, _) = maximum_matching(n, n, a.colptr, a.rowind);
        if rank < n {
            return Err(LsError::PackageFailUnrec(format!(
                "structurally singular matrix (structural rank {rank} of {n})"
            )));
        }
        let q = match ordering {
            Ordering::Natural => (0..n).collect(),
            Ordering::Amd => amd_order(n, a.colptr, a.rowind)?,
            Ordering::Colamd => colamd_order(n, n, a.colptr, a.rowind)?,
        };
        log::debug!("symbolic analysis: n = {n}, nnz = {}, ordering = {ordering:?}", a.rowind.len());
        Ok(Self {
            n,
            ordering,
            q,
            colptr: a.colptr.to_vec(),
            rowind: a.rowind.to_vec(),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    /// `q[k]` is the original column eliminated at step `k`.
    pub fn column_order(&self) -> &[usize] {
        &self.q
    }

    /// True when `a` has the pattern this analysis was computed for.
    pub fn matches(&self, a: &CscView<'_>) -> bool {
        a.ncols == self.n && a.colptr == self.colptr.as_slice() && a.rowind == self.rowind.as_slice()
    }

    /// Number of integers held by the analysis.
    pub fn int_workspace(&self) -> usize {
        self.q.len() + self.colptr.len() + self.rowind.len()
    }
}
