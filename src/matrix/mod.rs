//! Matrix module: dense, band and compressed sparse storage.

pub mod band;
pub mod dense;
pub mod sparse;

pub use band::BandMatrix;
pub use sparse::{CscView, SparseMatrix, SparseType};

/// Operations the direct contexts perform on the Newton matrix.
pub trait SystemMatrix: Clone {
    /// Order of the (square) matrix.
    fn dim(&self) -> usize;
    /// Zero every stored value; the sparsity structure is kept.
    fn zero_entries(&mut self);
    /// Overwrite with the entries of `other`.
    fn copy_entries_from(&mut self, other: &Self);
    /// self ← c·self + I
    fn scale_add_identity(&mut self, c: f64);
}
