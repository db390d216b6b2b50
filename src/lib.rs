//! # CSX: Compressed Sparse eXtended
//!
//! CSX tunes a sparse matrix into a compact, pattern-aware representation
//! and runs the sparse matrix-vector product `y <- alpha*A*x + beta*y` on a
//! pool of pinned worker threads.
//!
//! ## Overview
//!
//! Tuning proceeds in three stages:
//!
//! 1. **Substructure detection**: the non-zero pattern is scanned in several
//!    geometric traversals (row, diagonal, anti-diagonal, block orders) and
//!    delta run-length statistics pick the unit types that compress best.
//!
//! 2. **CSX encoding**: the element sequence becomes a bit-packed control
//!    stream of delta, diagonal and block units with variable-width column
//!    deltas, paired with a flat values array.
//!
//! 3. **Partitioning**: rows are split so each worker receives a near-equal
//!    share of non-zeros, and each partition's buffers are placed on its
//!    worker's NUMA node.
//!
//! ## Usage
//!
//! ```
//! use csx::{CsxConfig, Indexing, Input, Matrix, Vector};
//!
//! let config = CsxConfig {
//!     nr_threads: 2,
//!     ..CsxConfig::default()
//! };
//!
//! // A 2x2 identity in CSR form.
//! let input = Input::<f64>::from_csr(
//!     &[0u64, 1, 2],
//!     &[0u64, 1],
//!     &[1.0, 1.0],
//!     2,
//!     2,
//!     Indexing::ZeroBased,
//! )
//! .unwrap();
//!
//! let matrix = Matrix::tune(input, &config).unwrap();
//!
//! let x = Vector::from_buff(&[3.0, 4.0]);
//! let mut y = Vector::new(2);
//! csx::matvec_kernel(1.0, &matrix, &x, 0.0, &mut y).unwrap();
//! assert_eq!(y.as_slice(), &[3.0, 4.0]);
//! ```

pub mod config;
pub mod csx;
pub mod drle;
pub mod error;
pub mod matrix;
pub mod runtime;
pub mod spmv;
pub mod vector;

use std::path::{Path, PathBuf};

// Re-export primary components
pub use config::CsxConfig;
pub use csx::matrix::SpmMt;
pub use error::{CsxError, Result};
pub use matrix::{CsrInput, CsxIndex, CsxValue, ElementStore, Indexing, Order};
pub use runtime::partition::Partition;
pub use runtime::{init, shutdown};
pub use vector::Vector;

/// An untuned input matrix: the element sequence plus dimensions, produced
/// by the CSR or MMF loaders.
#[derive(Debug)]
pub struct Input<T> {
    store: ElementStore<T>,
    symmetric: bool,
}

impl<T: CsxValue> Input<T> {
    /// Wraps caller-supplied CSR arrays. `indexing` selects 0- or 1-based
    /// interpretation of `rowptr` and `colind`.
    pub fn from_csr<I: CsxIndex>(
        rowptr: &[I],
        colind: &[I],
        values: &[T],
        nrows: usize,
        ncols: usize,
        indexing: Indexing,
    ) -> Result<Self> {
        let csr = CsrInput::new(rowptr, colind, values, nrows, ncols, indexing)?;
        Ok(Self {
            store: csr.to_elements(),
            symmetric: false,
        })
    }

    /// Loads a MatrixMarket coordinate file. A `symmetric` banner enables
    /// the symmetric build path automatically.
    pub fn from_mmf(path: impl AsRef<Path>) -> Result<Self> {
        let mmf = matrix::mmf::read_mmf(path.as_ref())?;
        Ok(Self {
            store: mmf.store,
            symmetric: mmf.symmetric,
        })
    }

    pub fn nrows(&self) -> u64 {
        self.store.nrows
    }

    pub fn ncols(&self) -> u64 {
        self.store.ncols
    }

    pub fn nnz(&self) -> u64 {
        self.store.nnz() as u64
    }
}

/// A tuned matrix, ready for SpMV, random access and persistence.
#[derive(Debug)]
pub struct Matrix<T> {
    mt: SpmMt<T>,
    permutation: Option<Vec<u64>>,
    default_save: Option<PathBuf>,
}

impl<T: CsxValue> Matrix<T> {
    /// Tunes an input into the CSX representation and readies the worker
    /// pool.
    pub fn tune(input: Input<T>, config: &CsxConfig) -> Result<Self> {
        Self::tune_inner(input, config, None)
    }

    /// Like [`Matrix::tune`], but first applies an externally produced
    /// permutation to rows and columns. Kernels then operate in the permuted
    /// space; reorder vectors with [`Vector::reorder`].
    pub fn tune_with_permutation(
        input: Input<T>,
        config: &CsxConfig,
        permutation: Vec<u64>,
    ) -> Result<Self> {
        if input.store.nrows != input.store.ncols {
            return Err(CsxError::ArgInvalid(
                "reordering requires a square matrix".into(),
            ));
        }
        if permutation.len() != input.store.nrows as usize {
            return Err(CsxError::ArgInvalid(
                "permutation length does not match the row count".into(),
            ));
        }
        Self::tune_inner(input, config, Some(permutation))
    }

    fn tune_inner(
        input: Input<T>,
        config: &CsxConfig,
        permutation: Option<Vec<u64>>,
    ) -> Result<Self> {
        let mut store = input.store;
        let symmetric = config.symmetric || input.symmetric;
        if symmetric {
            if store.nrows != store.ncols {
                return Err(CsxError::ArgInvalid(
                    "symmetric storage requires a square matrix".into(),
                ));
            }
            store.keep_lower_triangle();
        }

        if let Some(p) = &permutation {
            for e in &mut store.elems {
                e.row = p[e.row as usize];
                e.col = p[e.col as usize];
            }
            if symmetric {
                // Keep the permuted matrix in lower-triangle form.
                for e in &mut store.elems {
                    if e.col > e.row {
                        std::mem::swap(&mut e.row, &mut e.col);
                    }
                }
            }
        }

        store.transform(Order::Row);
        let nnz = store.nnz() as u64;
        let report = drle::tune_elements(&mut store, config);
        for (order, pattern, stats) in &report.rounds {
            log::debug!(
                "selected {:?} in {} order covering {} nnz",
                pattern,
                order,
                stats.total_nnz
            );
        }

        let parts = csx::build_partitions(&mut store, config)?;
        let mt = SpmMt::new(
            store.nrows,
            store.ncols,
            nnz,
            symmetric,
            config.aligned_deltas,
            parts,
        );

        runtime::init(config);
        Ok(Self {
            mt,
            permutation,
            default_save: config.csx_file.clone(),
        })
    }

    pub fn nrows(&self) -> u64 {
        self.mt.nrows
    }

    pub fn ncols(&self) -> u64 {
        self.mt.ncols
    }

    pub fn nnz(&self) -> u64 {
        self.mt.nnz
    }

    pub fn symmetric(&self) -> bool {
        self.mt.symmetric
    }

    /// Compressed footprint in bytes (values plus ctl streams).
    pub fn csx_size(&self) -> usize {
        self.mt.size_bytes()
    }

    /// The permutation applied at tune time, if any.
    pub fn permutation(&self) -> Option<&[u64]> {
        self.permutation.as_deref()
    }

    /// Direct access to the tuned representation.
    pub fn inner(&self) -> &SpmMt<T> {
        &self.mt
    }

    /// Translates user coordinates into the tuned matrix's space.
    fn map_coords(&self, row: u64, col: u64) -> Result<(u64, u64)> {
        if row >= self.mt.nrows || col >= self.mt.ncols {
            return Err(CsxError::OutOfBounds);
        }
        let (mut row, mut col) = match &self.permutation {
            Some(p) => (p[row as usize], p[col as usize]),
            None => (row, col),
        };
        if self.mt.symmetric && col > row {
            std::mem::swap(&mut row, &mut col);
        }
        Ok((row, col))
    }

    /// Reads the explicit entry at `(row, col)`.
    pub fn get_entry(&self, row: u64, col: u64) -> Result<T> {
        let (row, col) = self.map_coords(row, col)?;
        csx::getset::get_entry(&self.mt, row, col)
    }

    /// Overwrites the explicit entry at `(row, col)`. Inserting new
    /// non-zeros is not supported.
    pub fn set_entry(&mut self, row: u64, col: u64, value: T) -> Result<()> {
        let (row, col) = match self.map_coords(row, col) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("entry ({}, {}) not set: out of bounds", row, col);
                return Err(e);
            }
        };
        csx::getset::set_entry(&mut self.mt, row, col, value)
    }

    /// Saves the tuned matrix. With no path, falls back to the path the
    /// config supplied at tune time, then to `matrix.csx`.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let fallback;
        let path = match path {
            Some(p) => p,
            None => {
                fallback = self
                    .default_save
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("matrix.csx"));
                log::warn!(
                    "no save path given, falling back to {}",
                    fallback.display()
                );
                &fallback
            }
        };
        csx::persist::save(&self.mt, self.permutation.as_deref(), path)
    }

    /// Restores a tuned matrix, re-mapping placement from `CSX_*`
    /// environment keys.
    pub fn restore(path: impl AsRef<Path>) -> Result<Self> {
        Self::restore_with_config(path, &CsxConfig::from_env())
    }

    /// Restores a tuned matrix, re-mapping CPU and node placement from
    /// `config`.
    pub fn restore_with_config(path: impl AsRef<Path>, config: &CsxConfig) -> Result<Self> {
        let (mt, permutation) = csx::persist::restore(path.as_ref(), config)?;
        let affinity = match &config.affinity {
            Some(a) if a.len() >= mt.nr_threads() => Some(a[..mt.nr_threads()].to_vec()),
            _ => None,
        };
        runtime::init(&CsxConfig {
            nr_threads: mt.nr_threads(),
            affinity,
            ..config.clone()
        });
        Ok(Self {
            mt,
            permutation,
            default_save: config.csx_file.clone(),
        })
    }

    /// Partition introspection: per-thread row ranges, nodes and pinning.
    pub fn partition(&self) -> Partition {
        let threads = &self.mt.threads;
        Partition {
            row_start: threads.iter().map(|t| t.row_start).collect(),
            row_end: threads.iter().map(|t| t.row_start + t.nr_rows).collect(),
            nodes: threads.iter().map(|t| t.node).collect(),
            affinity: threads.iter().map(|t| t.cpu).collect(),
            parts: threads
                .iter()
                .map(|t| t.nr_rows as usize * T::BYTES)
                .collect(),
        }
    }
}

/// Computes `y <- alpha * A * x + beta * y`.
pub fn matvec_kernel<T: CsxValue>(
    alpha: T,
    a: &Matrix<T>,
    x: &Vector<T>,
    beta: T,
    y: &mut Vector<T>,
) -> Result<()> {
    spmv::matvec_kernel(alpha, &a.mt, x.as_slice(), beta, y.as_mut_slice())
}

/// Computes `y <- alpha * A * x`.
pub fn matvec_mult<T: CsxValue>(
    alpha: T,
    a: &Matrix<T>,
    x: &Vector<T>,
    y: &mut Vector<T>,
) -> Result<()> {
    spmv::matvec_mult(alpha, &a.mt, x.as_slice(), y.as_mut_slice())
}

/// Version information for the CSX library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
