//! Random access into the compressed representation.
//!
//! Lookups locate the owning partition by row, then decode only the units
//! that can touch that row, resuming from the per-row cursor the partition
//! memoizes on first access.

use crate::csx::matrix::SpmMt;
use crate::error::{CsxError, Result};
use crate::matrix::CsxValue;

/// Position of an explicit entry inside a tuned matrix.
fn locate<T: CsxValue>(mt: &SpmMt<T>, row: u64, col: u64) -> Result<(usize, usize)> {
    if row >= mt.nrows || col >= mt.ncols {
        return Err(CsxError::OutOfBounds);
    }
    let tid = mt.thread_of_row(row).ok_or(CsxError::EntryNotFound)?;
    let part = &mt.threads[tid];
    let r_rel = row - part.row_start;

    let index = part.row_index(mt.aligned);
    let first = index.first_unit[r_rel as usize];

    let mut found = None;
    for info in &index.units[first..] {
        if info.y > r_rel {
            break;
        }
        part.decode_unit_at(info, mt.aligned, |r, c, vi| {
            if r == row && c == col {
                found = Some(vi);
                return false;
            }
            true
        });
        if found.is_some() {
            break;
        }
    }

    found
        .map(|vi| (tid, vi))
        .ok_or(CsxError::EntryNotFound)
}

/// Reads the explicit entry at `(row, col)`.
pub fn get_entry<T: CsxValue>(mt: &SpmMt<T>, row: u64, col: u64) -> Result<T> {
    let (tid, vi) = locate(mt, row, col)?;
    Ok(mt.threads[tid].values[vi])
}

/// Overwrites the explicit entry at `(row, col)`. Inserting a new non-zero
/// is not supported; that would force a retune.
pub fn set_entry<T: CsxValue>(mt: &mut SpmMt<T>, row: u64, col: u64, value: T) -> Result<()> {
    let (tid, vi) = locate(mt, row, col)?;
    mt.threads[tid].values[vi] = value;
    Ok(())
}
