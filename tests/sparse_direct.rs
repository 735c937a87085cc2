//! Integration tests for the sparse direct solver.
//!
//! These tests exercise the symbolic/numeric split of the sparse LU solver
//! on small and randomly generated matrices: symbolic reuse across setups,
//! the condition-driven refactorization path, CSR input through the
//! transpose solve, and reinitialization after a structural change.

use approx::assert_abs_diff_eq;
use faer::Mat;
use linsol::core::MatVec;
use linsol::matrix::{SparseMatrix, SparseType};
use linsol::solver::{DirectSolver, LinearSolver, ReinitKind, SparseLuSolver};
use linsol::{Ordering, SparseOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `diag(4) - 0.1` everywhere off the diagonal.
fn shifted_ones(n: usize) -> Mat<f64> {
    Mat::from_fn(n, n, |i, j| if i == j { 4.0 } else { -0.1 })
}

/// Random diagonally dominant matrix with about `density * n` entries per column.
fn random_dominant(n: usize, density: f64, seed: u64, sparse_type: SparseType) -> SparseMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    for j in 0..n {
        let mut offsum = 0.0;
        for i in 0..n {
            if i != j && rng.gen_bool(density) {
                let v: f64 = rng.gen_range(-1.0..1.0);
                offsum += v.abs();
                triplets.push((i, j, v));
            }
        }
        triplets.push((j, j, offsum + 1.0 + rng.gen_range(0.0..1.0)));
    }
    SparseMatrix::from_triplets(n, n, &triplets, sparse_type).unwrap()
}

fn residual_norm(a: &SparseMatrix, x: &[f64], b: &[f64]) -> f64 {
    let mut r = vec![0.0; b.len()];
    a.matvec(x, &mut r);
    r.iter().zip(b).map(|(ri, bi)| (ri - bi).abs()).fold(0.0, f64::max)
}

#[test]
fn small_dominant_system_and_symbolic_reuse() {
    let a = SparseMatrix::from_dense(&shifted_ones(4), 0.0, SparseType::Csc);
    let b = [1.0; 4];
    let mut solver = SparseLuSolver::new(4);
    let mut x = [0.0; 4];
    solver.setup(&a).unwrap();
    solver.solve(&a, &mut x, &b).unwrap();
    for xi in x {
        assert_abs_diff_eq!(xi, 1.0 / 3.7, epsilon = 1e-6);
    }

    let mut x2 = [0.0; 4];
    solver.setup(&a).unwrap();
    solver.solve(&a, &mut x2, &b).unwrap();
    assert_eq!(x, x2);
    let st = solver.stats();
    assert_eq!(st.symbolic, 1);
    assert_eq!(st.full_factor, 1);
    assert_eq!(st.refactor, 1);
    assert_eq!(solver.last_flag(), 0);
}

#[test]
fn random_systems_in_both_layouts() {
    for (seed, sparse_type) in [(7, SparseType::Csc), (11, SparseType::Csr)] {
        let n = 60;
        let a = random_dominant(n, 0.08, seed, sparse_type);
        let x_true: Vec<f64> = (0..n).map(|i| 1.0 + (i % 5) as f64).collect();
        let mut b = vec![0.0; n];
        a.matvec(&x_true, &mut b);
        for ordering in [Ordering::Amd, Ordering::Colamd, Ordering::Natural] {
            let mut solver = SparseLuSolver::new(n).with_ordering(ordering);
            let mut x = vec![0.0; n];
            solver.setup(&a).unwrap();
            solver.solve(&a, &mut x, &b).unwrap();
            assert!(residual_norm(&a, &x, &b) < 1e-10, "{sparse_type:?} {ordering:?}");
            for (xi, ti) in x.iter().zip(&x_true) {
                assert_abs_diff_eq!(*xi, *ti, epsilon = 1e-8);
            }
        }
    }
}

#[test]
fn refactor_tracks_new_values() {
    let n = 40;
    let mut a = random_dominant(n, 0.1, 3, SparseType::Csc);
    let mut solver = SparseLuSolver::with_options(n, &SparseOptions::default()).unwrap();
    solver.setup(&a).unwrap();
    for step in 1..=5 {
        let shift = step as f64 * 0.5;
        for v in a.data_mut() {
            *v *= 1.0 + 0.01 * shift;
        }
        let b: Vec<f64> = (0..n).map(|i| (i as f64 * shift).sin()).collect();
        let mut x = vec![0.0; n];
        solver.setup(&a).unwrap();
        solver.solve(&a, &mut x, &b).unwrap();
        assert!(residual_norm(&a, &x, &b) < 1e-10);
    }
    let st = solver.stats();
    assert_eq!(st.symbolic, 1);
    assert_eq!(st.refactor, 5);
}

#[test]
fn tiny_pivot_forces_fresh_factorization() {
    let well = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)], SparseType::Csc).unwrap();
    let mut solver = SparseLuSolver::new(2);
    solver.setup(&well).unwrap();

    // rcond above the threshold: no condition estimate
    let mild = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1e-9)], SparseType::Csc).unwrap();
    solver.setup(&mild).unwrap();
    assert_eq!(solver.stats().condest, 0);

    let ill = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1e-12)], SparseType::Csc).unwrap();
    solver.setup(&ill).unwrap();
    let st = solver.stats();
    assert_eq!(st.condest, 1);
    assert_eq!(st.refactor, 2);
    assert_eq!(st.full_factor, 2);
    assert_eq!(st.symbolic, 1);

    let mut x = [0.0; 2];
    solver.solve(&ill, &mut x, &[1.0, 1.0]).unwrap();
    assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(x[1] / 1e12, 1.0, epsilon = 1e-9);
}

#[test]
fn pattern_change_redoes_symbolic_analysis() {
    let n = 30;
    let a = random_dominant(n, 0.1, 5, SparseType::Csc);
    let b = vec![1.0; n];
    let mut solver = SparseLuSolver::new(n);
    solver.setup(&a).unwrap();

    let mut a2 = random_dominant(n, 0.15, 6, SparseType::Csc);
    solver.reinit(&mut a2, ReinitKind::PatternPreserving).unwrap();
    let mut x = vec![0.0; n];
    solver.setup(&a2).unwrap();
    solver.solve(&a2, &mut x, &b).unwrap();
    assert!(residual_norm(&a2, &x, &b) < 1e-10);
    assert_eq!(solver.stats().symbolic, 2);

    // a new pattern without an explicit reinit is detected as well
    let a3 = random_dominant(n, 0.05, 8, SparseType::Csc);
    solver.setup(&a3).unwrap();
    solver.solve(&a3, &mut x, &b).unwrap();
    assert!(residual_norm(&a3, &x, &b) < 1e-10);
    assert_eq!(solver.stats().symbolic, 3);
}

#[test]
fn reinit_with_new_capacity_clears_the_matrix() {
    let mut a = random_dominant(10, 0.2, 9, SparseType::Csr);
    let mut solver = SparseLuSolver::new(10);
    solver.setup(&a).unwrap();
    solver.reinit(&mut a, ReinitKind::NewNonzeros(64)).unwrap();
    assert_eq!(a.capacity(), 64);
    assert_eq!(a.nnz(), 0);
}
