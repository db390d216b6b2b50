//! Compressed Sparse Row (CSR) input wrapper.
//!
//! This is the untuned input-side representation: it validates the caller's
//! arrays once and hands the tuner a flat element sequence. The tuned
//! representation never goes back through CSR.

use std::fmt;

use crate::error::{CsxError, Result};
use crate::matrix::{CsxIndex, CsxValue, Element, ElementStore};

/// Index base of caller-supplied CSR arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    ZeroBased,
    OneBased,
}

impl Indexing {
    fn base(self) -> u64 {
        match self {
            Indexing::ZeroBased => 0,
            Indexing::OneBased => 1,
        }
    }
}

/// A validated sparse matrix in CSR form, zero-based internally.
///
/// The CSR format stores a sparse matrix using three arrays:
/// - `rowptr`: size `nrows + 1`, indices into `colind`/`values`
/// - `colind`: size `nnz`, column index of each non-zero
/// - `values`: size `nnz`, the non-zero values
#[derive(Clone)]
pub struct CsrInput<T> {
    pub nrows: usize,
    pub ncols: usize,
    pub rowptr: Vec<usize>,
    pub colind: Vec<usize>,
    pub values: Vec<T>,
}

impl<T: CsxValue> CsrInput<T> {
    /// Validates and adopts caller-supplied CSR arrays.
    ///
    /// Rejects inconsistent array lengths, non-monotonic row pointers,
    /// out-of-bounds columns and columns that are not strictly increasing
    /// within a row.
    pub fn new<I: CsxIndex>(
        rowptr: &[I],
        colind: &[I],
        values: &[T],
        nrows: usize,
        ncols: usize,
        indexing: Indexing,
    ) -> Result<Self> {
        if nrows == 0 || ncols == 0 {
            return Err(CsxError::ArgInvalid("invalid matrix dimensions".into()));
        }
        if rowptr.len() != nrows + 1 {
            return Err(CsxError::InputMat(format!(
                "rowptr has {} entries, expected {}",
                rowptr.len(),
                nrows + 1
            )));
        }
        if colind.len() != values.len() {
            return Err(CsxError::InputMat(
                "colind and values lengths differ".into(),
            ));
        }

        let base = indexing.base();
        let ptr: Vec<u64> = rowptr.iter().map(|&p| p.as_u64()).collect();
        if ptr[0] != base {
            return Err(CsxError::InputMat("rowptr does not start at base".into()));
        }
        if ptr[nrows] - base != colind.len() as u64 {
            return Err(CsxError::InputMat(format!(
                "rowptr announces {} non-zeros but {} were supplied",
                ptr[nrows] - base,
                colind.len()
            )));
        }

        let mut out_ptr = Vec::with_capacity(nrows + 1);
        let mut out_col = Vec::with_capacity(colind.len());
        for i in 0..=nrows {
            if i > 0 && ptr[i] < ptr[i - 1] {
                return Err(CsxError::InputMat(format!(
                    "rowptr decreases at row {}",
                    i
                )));
            }
            out_ptr.push((ptr[i] - base) as usize);
        }
        for i in 0..nrows {
            let mut prev: Option<u64> = None;
            for k in out_ptr[i]..out_ptr[i + 1] {
                let col = colind[k].as_u64();
                if col < base || col - base >= ncols as u64 {
                    return Err(CsxError::InputMat(format!(
                        "column {} out of bounds in row {}",
                        col, i
                    )));
                }
                let col = col - base;
                if let Some(p) = prev {
                    if col <= p {
                        return Err(CsxError::InputMat(format!(
                            "columns not sorted in row {}",
                            i
                        )));
                    }
                }
                prev = Some(col);
                out_col.push(col as usize);
            }
        }

        Ok(Self {
            nrows,
            ncols,
            rowptr: out_ptr,
            colind: out_col,
            values: values.to_vec(),
        })
    }

    /// Number of non-zero elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterator over the non-zeros of row `i` as `(col, value)` pairs.
    pub fn row_iter(&self, i: usize) -> impl Iterator<Item = (usize, &T)> {
        let start = self.rowptr[i];
        let end = self.rowptr[i + 1];
        self.colind[start..end]
            .iter()
            .zip(&self.values[start..end])
            .map(|(&col, val)| (col, val))
    }

    /// Flattens into the element sequence the tuner operates on.
    pub fn to_elements(&self) -> ElementStore<T> {
        let mut elems = Vec::with_capacity(self.nnz());
        for i in 0..self.nrows {
            for (col, &val) in self.row_iter(i) {
                elems.push(Element::new(i as u64, col as u64, val));
            }
        }
        ElementStore::new(self.nrows as u64, self.ncols as u64, elems)
    }

    /// Single-threaded reference SpMV, `y = A * x`. Used as the correctness
    /// oracle by tests and the check driver.
    pub fn spmv(&self, x: &[T], y: &mut [T]) {
        for i in 0..self.nrows {
            let mut acc = T::zero();
            for (col, &val) in self.row_iter(i) {
                acc += val * x[col];
            }
            y[i] = acc;
        }
    }
}

impl<T: CsxValue> fmt::Debug for CsrInput<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CsrInput {{ {} x {}, nnz: {} }}",
            self.nrows,
            self.ncols,
            self.nnz()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_valid() {
        let m = CsrInput::new(
            &[0usize, 2, 3, 5],
            &[0, 1, 1, 0, 2],
            &[1.0f64, 2.0, 3.0, 4.0, 5.0],
            3,
            3,
            Indexing::ZeroBased,
        )
        .unwrap();
        assert_eq!(m.nnz(), 5);
        let row2: Vec<_> = m.row_iter(2).map(|(c, &v)| (c, v)).collect();
        assert_eq!(row2, vec![(0, 4.0), (2, 5.0)]);
    }

    #[test]
    fn test_one_based_input() {
        let m = CsrInput::new(
            &[1u32, 2, 3],
            &[1, 2],
            &[1.0f64, 2.0],
            2,
            2,
            Indexing::OneBased,
        )
        .unwrap();
        assert_eq!(m.rowptr, vec![0, 1, 2]);
        assert_eq!(m.colind, vec![0, 1]);
    }

    #[test]
    fn test_rejects_bad_rowptr() {
        let err = CsrInput::new(
            &[0usize, 3, 2],
            &[0, 1, 0],
            &[1.0f64, 2.0, 3.0],
            2,
            2,
            Indexing::ZeroBased,
        )
        .unwrap_err();
        assert!(matches!(err, CsxError::InputMat(_)));
    }

    #[test]
    fn test_rejects_unsorted_columns() {
        let err = CsrInput::new(
            &[0usize, 2],
            &[1, 0],
            &[1.0f64, 2.0],
            1,
            2,
            Indexing::ZeroBased,
        )
        .unwrap_err();
        assert!(matches!(err, CsxError::InputMat(_)));
    }

    #[test]
    fn test_reference_spmv() {
        let m = CsrInput::new(
            &[0usize, 2, 3, 5],
            &[0, 1, 1, 0, 2],
            &[1.0f64, 2.0, 3.0, 4.0, 5.0],
            3,
            3,
            Indexing::ZeroBased,
        )
        .unwrap();
        let x = [1.0, 2.0, 3.0];
        let mut y = [0.0; 3];
        m.spmv(&x, &mut y);
        assert_eq!(y, [5.0, 6.0, 19.0]);
    }
}
