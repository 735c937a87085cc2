//! Compressed sparse row / column storage.
//!
//! One struct covers both layouts; [`SparseType`] says whether `indptr`
//! runs over rows (CSR) or columns (CSC). Allocated capacity may exceed the
//! number of stored entries (`nnz = indptr[last]`), so the structure can be
//! refilled in place between Jacobian evaluations.

use crate::core::traits::MatVec;
use crate::error::LsError;
use crate::matrix::SystemMatrix;
use faer::Mat;
use faer::sparse::{CreationError, SparseColMat, SparseRowMat, Triplet};

/// Compression direction of a [`SparseMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseType {
    /// Compressed sparse column.
    Csc,
    /// Compressed sparse row.
    Csr,
}

/// Sparse matrix in CSC or CSR layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    sparse_type: SparseType,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

/// Borrowed CSC arrays of a sparse matrix.
///
/// For a CSR matrix these arrays describe the transpose, which is flagged
/// by `transposed`.
#[derive(Debug, Clone, Copy)]
pub struct CscView<'a> {
    pub nrows: usize,
    pub ncols: usize,
    pub colptr: &'a [usize],
    pub rowind: &'a [usize],
    pub values: &'a [f64],
    pub transposed: bool,
}

impl CscView<'_> {
    /// Largest absolute column sum.
    pub fn norm1(&self) -> f64 {
        (0..self.ncols)
            .map(|j| {
                self.values[self.colptr[j]..self.colptr[j + 1]]
                    .iter()
                    .map(|v| v.abs())
                    .sum::<f64>()
            })
            .fold(0.0, f64::max)
    }
}

impl SparseMatrix {
    /// Empty matrix with room for `capacity` entries.
    pub fn new(rows: usize, cols: usize, capacity: usize, sparse_type: SparseType) -> Self {
        let np = match sparse_type {
            SparseType::Csc => cols,
            SparseType::Csr => rows,
        };
        Self {
            rows,
            cols,
            sparse_type,
            indptr: vec![0; np + 1],
            indices: vec![0; capacity],
            data: vec![0.0; capacity],
        }
    }

    /// Build from raw compressed arrays, validating the structure.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        sparse_type: SparseType,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, LsError> {
        let m = Self {
            rows,
            cols,
            sparse_type,
            indptr,
            indices,
            data,
        };
        m.validate()?;
        Ok(m)
    }

    /// Build from `(row, col, value)` triplets; duplicates are summed and
    /// each compressed slice is sorted.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: &[(usize, usize, f64)],
        sparse_type: SparseType,
    ) -> Result<Self, LsError> {
        if let Some(&(i, j, _)) = triplets.iter().find(|&&(i, j, _)| i >= rows || j >= cols) {
            return Err(LsError::IllInput(format!("triplet index ({i}, {j}) out of range")));
        }
        let entries: Vec<Triplet<usize, usize, f64>> =
            triplets.iter().map(|&(i, j, v)| Triplet::new(i, j, v)).collect();
        let assembly = |e: CreationError| LsError::IllInput(format!("triplet assembly failed: {e}"));
        // duplicates are summed; indices come out sorted within each column/row
        let (indptr, indices, data) = match sparse_type {
            SparseType::Csc => {
                let (symbolic, data) = SparseColMat::<usize, f64>::try_new_from_triplets(rows, cols, &entries)
                    .map_err(assembly)?
                    .into_parts();
                let (_, _, colptr, _, rowind) = symbolic.into_parts();
                (colptr, rowind, data)
            }
            SparseType::Csr => {
                let (symbolic, data) = SparseRowMat::<usize, f64>::try_new_from_triplets(rows, cols, &entries)
                    .map_err(assembly)?
                    .into_parts();
                let (_, _, rowptr, _, colind) = symbolic.into_parts();
                (rowptr, colind, data)
            }
        };
        Self::from_parts(rows, cols, sparse_type, indptr, indices, data)
    }

    /// Convert a dense matrix, dropping entries with `|a_ij| <= drop_tol`.
    pub fn from_dense(a: &Mat<f64>, drop_tol: f64, sparse_type: SparseType) -> Self {
        let (rows, cols) = (a.nrows(), a.ncols());
        let (np, nc) = match sparse_type {
            SparseType::Csc => (cols, rows),
            SparseType::Csr => (rows, cols),
        };
        let mut indptr = Vec::with_capacity(np + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for major in 0..np {
            for minor in 0..nc {
                let v = match sparse_type {
                    SparseType::Csc => a[(minor, major)],
                    SparseType::Csr => a[(major, minor)],
                };
                if v.abs() > drop_tol {
                    indices.push(minor);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            rows,
            cols,
            sparse_type,
            indptr,
            indices,
            data,
        }
    }

    fn validate(&self) -> Result<(), LsError> {
        let (np, nc) = self.major_minor();
        if self.indptr.len() != np + 1 {
            return Err(LsError::IllInput(format!(
                "index pointer has length {}, expected {}",
                self.indptr.len(),
                np + 1
            )));
        }
        if self.indices.len() != self.data.len() {
            return Err(LsError::IllInput("index and value arrays differ in length".into()));
        }
        if self.indptr[0] != 0 || self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(LsError::IllInput("index pointer is not non-decreasing from 0".into()));
        }
        if self.nnz() > self.capacity() {
            return Err(LsError::IllInput(format!(
                "{} entries exceed capacity {}",
                self.nnz(),
                self.capacity()
            )));
        }
        if self.indices[..self.nnz()].iter().any(|&i| i >= nc) {
            return Err(LsError::IllInput("index value out of range".into()));
        }
        Ok(())
    }

    fn major_minor(&self) -> (usize, usize) {
        match self.sparse_type {
            SparseType::Csc => (self.cols, self.rows),
            SparseType::Csr => (self.rows, self.cols),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn sparse_type(&self) -> SparseType {
        self.sparse_type
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indptr.last().copied().unwrap_or(0)
    }

    /// Allocated entry capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices[..self.nnz()]
    }

    pub fn data(&self) -> &[f64] {
        &self.data[..self.nnz()]
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        let nnz = self.nnz();
        &mut self.data[..nnz]
    }

    /// Mutable access to all three arrays, for callers that refill the
    /// structure in place. Capacity is the length of the last two slices.
    pub fn parts_mut(&mut self) -> (&mut [usize], &mut [usize], &mut [f64]) {
        (&mut self.indptr, &mut self.indices, &mut self.data)
    }

    /// Entry `(i, j)`, zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (major, minor) = match self.sparse_type {
            SparseType::Csc => (j, i),
            SparseType::Csr => (i, j),
        };
        (self.indptr[major]..self.indptr[major + 1])
            .filter(|&p| self.indices[p] == minor)
            .map(|p| self.data[p])
            .sum()
    }

    /// Shrink capacity to the number of stored entries.
    pub fn realloc(&mut self) {
        let nnz = self.nnz();
        self.indices.truncate(nnz);
        self.data.truncate(nnz);
        self.indices.shrink_to_fit();
        self.data.shrink_to_fit();
    }

    /// Grow capacity to at least `capacity` entries.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.capacity() {
            self.indices.resize(capacity, 0);
            self.data.resize(capacity, 0.0);
        }
    }

    /// Set the entry capacity to exactly `capacity`.
    pub fn resize_capacity(&mut self, capacity: usize) -> Result<(), LsError> {
        if capacity < self.nnz() {
            return Err(LsError::IllInput(format!(
                "capacity {capacity} is below the {} stored entries",
                self.nnz()
            )));
        }
        self.indices.resize(capacity, 0);
        self.data.resize(capacity, 0.0);
        Ok(())
    }

    /// Drop all entries (pattern included); capacity is kept.
    pub fn clear(&mut self) {
        self.indptr.iter_mut().for_each(|p| *p = 0);
    }

    pub fn set_zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn scale(&mut self, c: f64) {
        self.data_mut().iter_mut().for_each(|v| *v *= c);
    }

    /// Copy pattern and values of `other`, growing capacity as needed.
    pub fn copy_from(&mut self, other: &SparseMatrix) {
        self.rows = other.rows;
        self.cols = other.cols;
        self.sparse_type = other.sparse_type;
        self.indptr.clear();
        self.indptr.extend_from_slice(&other.indptr);
        let nnz = other.nnz();
        self.reserve(nnz);
        self.indices[..nnz].copy_from_slice(other.indices());
        self.data[..nnz].copy_from_slice(other.data());
    }

    /// A ← A + I, inserting structurally missing diagonal entries.
    pub fn add_identity(&mut self) {
        let (np, _) = self.major_minor();
        let ndiag = self.rows.min(self.cols);
        let diag_pos: Vec<Option<usize>> = (0..np)
            .map(|k| {
                if k >= ndiag {
                    return None;
                }
                (self.indptr[k]..self.indptr[k + 1]).find(|&p| self.indices[p] == k)
            })
            .collect();
        let missing = (0..ndiag).filter(|&k| diag_pos[k].is_none()).count();
        if missing == 0 {
            for p in diag_pos.into_iter().flatten() {
                self.data[p] += 1.0;
            }
            return;
        }
        log::trace!("add_identity inserting {missing} diagonal entries");
        let nnz = self.nnz();
        let mut indptr = Vec::with_capacity(np + 1);
        let mut indices = Vec::with_capacity(nnz + missing);
        let mut data = Vec::with_capacity(nnz + missing);
        indptr.push(0);
        for k in 0..np {
            let (start, end) = (self.indptr[k], self.indptr[k + 1]);
            let mut inserted = k >= ndiag;
            for p in start..end {
                let i = self.indices[p];
                if !inserted && diag_pos[k].is_none() && i > k {
                    indices.push(k);
                    data.push(1.0);
                    inserted = true;
                }
                indices.push(i);
                data.push(if diag_pos[k] == Some(p) { self.data[p] + 1.0 } else { self.data[p] });
            }
            if !inserted && diag_pos[k].is_none() {
                indices.push(k);
                data.push(1.0);
            }
            indptr.push(indices.len());
        }
        self.indptr = indptr;
        self.indices = indices;
        self.data = data;
    }

    /// CSC arrays of the stored matrix (of its transpose when CSR).
    pub fn csc_view(&self) -> CscView<'_> {
        let (nrows, ncols) = match self.sparse_type {
            SparseType::Csc => (self.rows, self.cols),
            SparseType::Csr => (self.cols, self.rows),
        };
        CscView {
            nrows,
            ncols,
            colptr: &self.indptr,
            rowind: self.indices(),
            values: self.data(),
            transposed: self.sparse_type == SparseType::Csr,
        }
    }

    /// True when `other` stores exactly the same pattern.
    pub fn same_pattern(&self, other: &SparseMatrix) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.sparse_type == other.sparse_type
            && self.indptr == other.indptr
            && self.indices() == other.indices()
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut m = Mat::<f64>::zeros(self.rows, self.cols);
        let (np, _) = self.major_minor();
        for major in 0..np {
            for p in self.indptr[major]..self.indptr[major + 1] {
                let (i, j) = match self.sparse_type {
                    SparseType::Csc => (self.indices[p], major),
                    SparseType::Csr => (major, self.indices[p]),
                };
                m[(i, j)] += self.data[p];
            }
        }
        m
    }
}

impl MatVec for SparseMatrix {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.cols, "Input vector x has incorrect length");
        assert_eq!(y.len(), self.rows, "Output vector y has incorrect length");
        match self.sparse_type {
            SparseType::Csc => {
                y.iter_mut().for_each(|v| *v = 0.0);
                for (j, &xj) in x.iter().enumerate() {
                    for p in self.indptr[j]..self.indptr[j + 1] {
                        y[self.indices[p]] += self.data[p] * xj;
                    }
                }
            }
            SparseType::Csr => {
                for (i, yi) in y.iter_mut().enumerate() {
                    *yi = (self.indptr[i]..self.indptr[i + 1])
                        .map(|p| self.data[p] * x[self.indices[p]])
                        .sum();
                }
            }
        }
    }
}

impl SystemMatrix for SparseMatrix {
    fn dim(&self) -> usize {
        self.rows
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

    #[test]
    fn identity_spmv() {
        let m = SparseMatrix::from_parts(
            3,
            3,
            SparseType::Csr,
            vec![0, 1, 2, 3],
            vec![0, 1, 2],
            vec![1.0, 1.0, 1.0],
        )
        .unwrap();
        let x = vec![2.0, 3.0, 5.0];
        let mut y = vec![0.0; 3];
        m.matvec(&x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn simple_pattern_both_layouts() {
        // [[1,2,0],[0,3,4]]
        let t = [(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0), (1, 2, 4.0)];
        for ty in [SparseType::Csr, SparseType::Csc] {
            let m = SparseMatrix::from_triplets(2, 3, &t, ty).unwrap();
            let mut y = vec![0.0; 2];
            m.matvec(&[1.0, 1.0, 1.0], &mut y);
            assert_eq!(y, vec![3.0, 7.0]);
            assert_eq!(m.get(1, 2), 4.0);
            assert_eq!(m.get(1, 0), 0.0);
        }
    }

    #[test]
    fn rejects_out_of_range_index() {
        let r = SparseMatrix::from_parts(2, 2, SparseType::Csc, vec![0, 1, 2], vec![0, 5], vec![1.0, 1.0]);
        assert!(matches!(r, Err(LsError::IllInput(_))));
    }

    #[test]
    fn add_identity_inserts_missing_diagonal() {
        // [[0,1],[2,0]] in CSC
        let mut m = SparseMatrix::from_triplets(2, 2, &[(1, 0, 2.0), (0, 1, 1.0)], SparseType::Csc).unwrap();
        m.add_identity();
        assert_eq!(m.nnz(), 4);
        let d = m.to_dense();
        assert_eq!(d[(0, 0)], 1.0);
        assert_eq!(d[(1, 1)], 1.0);
        assert_eq!(d[(1, 0)], 2.0);
        assert_eq!(m.indices(), &[0, 1, 0, 1]);
    }

    #[test]
    fn capacity_and_realloc() {
        let mut m = SparseMatrix::new(3, 3, 10, SparseType::Csc);
        assert_eq!(m.capacity(), 10);
        assert_eq!(m.nnz(), 0);
        m.realloc();
        assert_eq!(m.capacity(), 0);
        m.reserve(4);
        assert_eq!(m.capacity(), 4);
    }

    #[test]
    fn dense_round_trip_drops_small_entries() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 1e-20 });
        let s = SparseMatrix::from_dense(&a, 1e-12, SparseType::Csr);
        assert_eq!(s.nnz(), 2);
        assert_eq!(s.to_dense()[(1, 1)], 1.0);
    }
}
