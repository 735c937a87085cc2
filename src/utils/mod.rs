//! Graph utilities for the sparse factorization.

pub mod ordering;
