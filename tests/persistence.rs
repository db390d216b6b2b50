//! Save/restore of tuned matrices.

use csx::{matvec_kernel, CsxConfig, Indexing, Input, Matrix, Vector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn config(threads: usize) -> CsxConfig {
    CsxConfig {
        nr_threads: threads,
        ..CsxConfig::default()
    }
}

fn random_input(n: usize, seed: u64) -> Input<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rowptr = vec![0u64];
    let mut colind = Vec::new();
    let mut values = Vec::new();
    for i in 0..n as u64 {
        // A diagonal plus random fill, so tuning finds real patterns.
        colind.push(i);
        values.push(1.0 + i as f64);
        for c in (i + 1)..n as u64 {
            if rng.gen_bool(0.05) {
                colind.push(c);
                values.push(rng.gen_range(-1.0..1.0));
            }
        }
        rowptr.push(colind.len() as u64);
    }
    Input::from_csr(&rowptr, &colind, &values, n, n, Indexing::ZeroBased).unwrap()
}

/// Round-trip: the restored representation is elementwise identical and
/// SpMV results repeat bit for bit.
#[test]
fn test_save_restore_spmv_identical() {
    let n = 80;
    let matrix = Matrix::tune(random_input(n, 1), &config(2)).unwrap();

    let x = Vector::random(n, -1.0, 1.0);
    let mut y_before = Vector::new(n);
    matvec_kernel(1.0, &matrix, &x, 0.0, &mut y_before).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("matrix.csx");
    matrix.save(Some(&path)).unwrap();

    let restored = Matrix::<f64>::restore_with_config(&path, &config(2)).unwrap();
    assert_eq!(restored.inner(), matrix.inner());
    assert_eq!(restored.nrows(), matrix.nrows());
    assert_eq!(restored.nnz(), matrix.nnz());

    let mut y_after = Vector::new(n);
    matvec_kernel(1.0, &restored, &x, 0.0, &mut y_after).unwrap();
    // Same partition layout, same traversal order: bitwise equality.
    assert_eq!(y_before.as_slice(), y_after.as_slice());
}

/// The permutation survives the round trip and keeps translating accessor
/// coordinates.
#[test]
fn test_save_restore_with_permutation() {
    let n = 24usize;
    let rowptr: Vec<u64> = (0..=n as u64).collect();
    let colind: Vec<u64> = (0..n as u64).collect();
    let values: Vec<f64> = (0..n).map(|i| i as f64 + 1.0).collect();
    let input =
        Input::<f64>::from_csr(&rowptr, &colind, &values, n, n, Indexing::ZeroBased).unwrap();

    let perm: Vec<u64> = (0..n as u64).rev().collect();
    let matrix = Matrix::tune_with_permutation(input, &config(1), perm.clone()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perm.csx");
    matrix.save(Some(&path)).unwrap();

    let restored = Matrix::<f64>::restore_with_config(&path, &config(1)).unwrap();
    assert_eq!(restored.permutation(), Some(&perm[..]));
    for i in 0..n as u64 {
        assert_eq!(restored.get_entry(i, i).unwrap(), i as f64 + 1.0);
    }
}

/// A symmetric matrix restores with its symmetric kernel path intact.
#[test]
fn test_save_restore_symmetric() {
    let mut cfg = config(2);
    cfg.symmetric = true;
    let input = Input::<f64>::from_csr(
        &[0u64, 1, 3, 4],
        &[0, 0, 1, 2],
        &[2.0, 1.0, 3.0, 5.0],
        3,
        3,
        Indexing::ZeroBased,
    )
    .unwrap();
    let matrix = Matrix::tune(input, &cfg).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sym.csx");
    matrix.save(Some(&path)).unwrap();

    let restored = Matrix::<f64>::restore_with_config(&path, &config(2)).unwrap();
    assert!(restored.symmetric());

    let x = Vector::from_buff(&[1.0, 1.0, 1.0]);
    let mut y = Vector::new(3);
    matvec_kernel(1.0, &restored, &x, 0.0, &mut y).unwrap();
    assert_eq!(y.as_slice(), &[3.0, 4.0, 5.0]);
}

/// Restoring with a different thread-count config keeps the file's
/// partitioning; placement is re-mapped.
#[test]
fn test_restore_keeps_file_partitioning() {
    let n = 60;
    let matrix = Matrix::tune(random_input(n, 9), &config(3)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.csx");
    matrix.save(Some(&path)).unwrap();

    let restored = Matrix::<f64>::restore_with_config(&path, &config(8)).unwrap();
    assert_eq!(restored.inner().nr_threads(), 3);

    let x = Vector::random(n, -1.0, 1.0);
    let mut y_a = Vector::new(n);
    let mut y_b = Vector::new(n);
    matvec_kernel(1.0, &matrix, &x, 0.0, &mut y_a).unwrap();
    matvec_kernel(1.0, &restored, &x, 0.0, &mut y_b).unwrap();
    assert_eq!(y_a.as_slice(), y_b.as_slice());
}
