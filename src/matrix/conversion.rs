//! Conversions between the CSR input wrapper and `sprs` matrices.
//!
//! `sprs` serves as the interop surface and as an independent SpMV oracle in
//! the test suite.

use sprs::CsMat;

use crate::error::Result;
use crate::matrix::{CsrInput, CsxValue, Indexing};

/// Converts a validated CSR input to an `sprs` matrix.
pub fn to_sprs<T>(matrix: &CsrInput<T>) -> CsMat<T>
where
    T: CsxValue + Default,
{
    CsMat::new(
        (matrix.nrows, matrix.ncols),
        matrix.rowptr.clone(),
        matrix.colind.clone(),
        matrix.values.clone(),
    )
}

/// Converts an `sprs` matrix (any storage order) into a CSR input.
pub fn from_sprs<T>(matrix: CsMat<T>) -> Result<CsrInput<T>>
where
    T: CsxValue + Default,
{
    let matrix = if matrix.is_csr() {
        matrix
    } else {
        matrix.to_csr()
    };

    let shape = matrix.shape();
    let (indptr, indices, data) = matrix.into_raw_storage();
    CsrInput::new(
        &indptr,
        &indices,
        &data,
        shape.0,
        shape.1,
        Indexing::ZeroBased,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprs_roundtrip() {
        let original = CsrInput::new(
            &[0usize, 2, 3, 5],
            &[0, 1, 1, 0, 2],
            &[1.0f64, 2.0, 3.0, 4.0, 5.0],
            3,
            3,
            Indexing::ZeroBased,
        )
        .unwrap();

        let sprs_mat = to_sprs(&original);
        let roundtrip = from_sprs(sprs_mat).unwrap();

        assert_eq!(roundtrip.nrows, original.nrows);
        assert_eq!(roundtrip.ncols, original.ncols);
        assert_eq!(roundtrip.rowptr, original.rowptr);
        assert_eq!(roundtrip.colind, original.colind);
        assert_eq!(roundtrip.values, original.values);
    }

    #[test]
    fn test_from_sprs_csc_converts() {
        let csr = CsrInput::new(
            &[0usize, 2, 3],
            &[0, 1, 1],
            &[1.0f64, 2.0, 3.0],
            2,
            2,
            Indexing::ZeroBased,
        )
        .unwrap();
        let csc = to_sprs(&csr).to_csc();
        let back = from_sprs(csc).unwrap();
        assert_eq!(back.rowptr, csr.rowptr);
        assert_eq!(back.colind, csr.colind);
        assert_eq!(back.values, csr.values);
    }
}
