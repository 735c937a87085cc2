//! Fill-reducing column orderings and structural matching for sparse LU.
//!
//! The orderings delegate to faer's approximate minimum degree routines;
//! the matching is a breadth-first augmenting-path search.
//!
//! # References
//! - Amestoy, Davis & Duff (1996), An approximate minimum degree ordering algorithm
//! - Davis, Gilbert, Larimore & Ng (2004), A column approximate minimum degree ordering algorithm
//! - Duff (1981), On algorithms for obtaining a maximum transversal

use crate::error::LsError;
use faer::dyn_stack::{MemBuffer, MemStack};
use faer::sparse::linalg::{amd, colamd};
use faer::sparse::{FaerError, SymbolicSparseColMatRef};
use std::collections::VecDeque;

fn ordering_failure(e: FaerError) -> LsError {
    LsError::PackageFailUnrec(format!("fill-reducing ordering failed: {e:?}"))
}

/// Approximate minimum degree order of a square CSC pattern, taken on the
/// pattern of A + Aᵀ. Entry `k` is the column eliminated at step `k`.
pub fn amd_order(n: usize, colptr: &[usize], rowind: &[usize]) -> Result<Vec<usize>, LsError> {
    let mut perm = vec![0usize; n];
    let mut perm_inv = vec![0usize; n];
    let a = SymbolicSparseColMatRef::new_unsorted_checked(n, n, colptr, None, rowind);
    let mut mem = MemBuffer::try_new(amd::order_maybe_unsorted_scratch::<usize>(n, rowind.len()))
        .map_err(|_| ordering_failure(FaerError::OutOfMemory))?;
    amd::order_maybe_unsorted(&mut perm, &mut perm_inv, a, amd::Control::default(), MemStack::new(&mut mem))
        .map_err(ordering_failure)?;
    Ok(perm)
}

/// Column approximate minimum degree order of a CSC pattern, i.e. a
/// fill-reducing order for the pattern of AᵀA without forming it.
pub fn colamd_order(nrows: usize, ncols: usize, colptr: &[usize], rowind: &[usize]) -> Result<Vec<usize>, LsError> {
    if ncols == 0 {
        return Ok(Vec::new());
    }
    let mut perm = vec![0usize; ncols];
    let mut perm_inv = vec![0usize; ncols];
    let a = SymbolicSparseColMatRef::new_unsorted_checked(nrows, ncols, colptr, None, rowind);
    let mut mem = MemBuffer::try_new(colamd::order_scratch::<usize>(nrows, ncols, rowind.len()))
        .map_err(|_| ordering_failure(FaerError::OutOfMemory))?;
    colamd::order(&mut perm, &mut perm_inv, a, colamd::Control::default(), MemStack::new(&mut mem))
        .map_err(ordering_failure)?;
    Ok(perm)
}

/// Maximum bipartite matching between columns and rows.
///
/// Returns the structural rank and, for every column, its matched row.
pub fn maximum_matching(
    nrows: usize,
    ncols: usize,
    colptr: &[usize],
    rowind: &[usize],
) -> (usize, Vec<Option<usize>>) {
    let mut match_row: Vec<Option<usize>> = vec![None; nrows];
    let mut match_col: Vec<Option<usize>> = vec![None; ncols];
    let mut stamp = vec![usize::MAX; nrows];
    let mut row_parent = vec![0usize; nrows];
    let mut queue = VecDeque::new();
    let mut rank = 0;

    for c in 0..ncols {
        // cheap assignment
        if let Some(&i) = rowind[colptr[c]..colptr[c + 1]].iter().find(|&&i| match_row[i].is_none()) {
            match_row[i] = Some(c);
            match_col[c] = Some(i);
            rank += 1;
            continue;
        }
        // breadth-first search for an augmenting path
        queue.clear();
        queue.push_back(c);
        let mut free_row = None;
        'bfs: while let Some(j) = queue.pop_front() {
            for &i in &rowind[colptr[j]..colptr[j + 1]] {
                if stamp[i] == c {
                    continue;
                }
                stamp[i] = c;
                row_parent[i] = j;
                match match_row[i] {
                    None => {
                        free_row = Some(i);
                        break 'bfs;
                    }
                    Some(j2) => queue.push_back(j2),
                }
            }
        }
        if let Some(mut i) = free_row {
            loop {
                let j = row_parent[i];
                let prev = match_col[j];
                match_col[j] = Some(i);
                match_row[i] = Some(j);
                match prev {
                    Some(i2) => i = i2,
                    None => break,
                }
            }
            rank += 1;
        }
    }
    (rank, match_col)
}
