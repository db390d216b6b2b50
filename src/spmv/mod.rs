//! Parallel SpMV kernels over the CSX representation.
//!
//! The general kernel decodes each partition's ctl stream in lock-step with
//! its values array, dispatching on the pattern id of every unit. The
//! historical JITed kernels are replaced by this single decode-dispatch
//! loop; dead pattern branches cost one predicted-not-taken jump each.

use crate::csx::ctl::{unit_kind, CtlCursor, UnitKind, CTL_NR, CTL_RJMP};
use crate::csx::matrix::{CsxMatrix, SpmMt};
use crate::error::{CsxError, Result};
use crate::matrix::CsxValue;
use crate::runtime;

/// Raw output pointer shared with the workers for the duration of one call.
/// Each worker derives a disjoint sub-slice from its partition's row range.
#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// Computes `y <- alpha * A * x + beta * y` across the worker pool.
pub fn matvec_kernel<T: CsxValue>(
    alpha: T,
    mt: &SpmMt<T>,
    x: &[T],
    beta: T,
    y: &mut [T],
) -> Result<()> {
    if x.len() != mt.ncols as usize || y.len() != mt.nrows as usize {
        return Err(CsxError::DimMismatch);
    }

    let affinity: Vec<usize> = mt.threads.iter().map(|t| t.cpu).collect();
    let yp = SendPtr(y.as_mut_ptr());

    runtime::with_pool(mt.nr_threads(), &affinity, |pool| {
        if mt.symmetric {
            pool.dispatch(&|tid| spmv_sym_thread(mt, x, yp, alpha, beta, tid));
            pool.dispatch(&|tid| reduce_thread(mt, yp, tid));
        } else {
            pool.dispatch(&|tid| spmv_thread(mt, x, yp, alpha, beta, tid));
        }
    });

    Ok(())
}

/// Computes `y <- alpha * A * x`.
pub fn matvec_mult<T: CsxValue>(alpha: T, mt: &SpmMt<T>, x: &[T], y: &mut [T]) -> Result<()> {
    matvec_kernel(alpha, mt, x, T::zero(), y)
}

/// Scales a partition's owned rows by beta before accumulation. Applying it
/// as a pre-pass keeps the decode loop free of per-row first-write tracking.
fn beta_prepass<T: CsxValue>(y: &mut [T], beta: T) {
    if beta == T::zero() {
        y.fill(T::zero());
    } else if beta != T::one() {
        for e in y.iter_mut() {
            *e = beta * *e;
        }
    }
}

fn owned_rows<'a, T: CsxValue>(part: &CsxMatrix<T>, yp: SendPtr<T>) -> &'a mut [T] {
    let rs = part.row_start as usize;
    let nr = part.nr_rows as usize;
    unsafe { std::slice::from_raw_parts_mut(yp.0.add(rs), nr) }
}

fn spmv_thread<T: CsxValue>(
    mt: &SpmMt<T>,
    x: &[T],
    yp: SendPtr<T>,
    alpha: T,
    beta: T,
    tid: usize,
) {
    let part = &mt.threads[tid];
    let y = owned_rows(part, yp);
    beta_prepass(y, beta);
    spmv_partition(part, mt.aligned, x, y, alpha);
}

/// The per-thread decode loop.
fn spmv_partition<T: CsxValue>(
    part: &CsxMatrix<T>,
    aligned: bool,
    x: &[T],
    y: &mut [T],
    alpha: T,
) {
    let values = &part.values;
    let mut cur = CtlCursor::new(&part.ctl);
    let mut v = 0usize;
    let mut y_cursor = 0usize;
    let mut ctx_col = 0u64;
    let mut first = true;

    while !cur.at_end() {
        let flags = cur.u8();
        let size = cur.u8() as usize;
        let new_row = flags & CTL_NR != 0;
        if new_row {
            y_cursor += if flags & CTL_RJMP != 0 {
                cur.uleb() as usize
            } else {
                1
            };
        }
        let col = if new_row || first {
            cur.uleb()
        } else {
            ctx_col + cur.uleb()
        };
        first = false;

        match unit_kind(flags).expect("malformed ctl: unknown pattern id") {
            UnitKind::Delta(w) => {
                let mut myx = col as usize;
                let mut yr = values[v] * x[myx];
                v += 1;
                if aligned && w.bytes() > 1 {
                    cur.align_to(w);
                }
                for _ in 1..size {
                    myx += cur.index(w, aligned) as usize;
                    yr += values[v] * x[myx];
                    v += 1;
                }
                y[y_cursor] += alpha * yr;
                ctx_col = myx as u64;
            }
            UnitKind::Diag(w) => {
                // y_cursor and the x cursor advance together and are both
                // restored at unit end.
                let mut r = y_cursor;
                let mut myx = col as usize;
                y[r] += alpha * values[v] * x[myx];
                v += 1;
                if aligned && w.bytes() > 1 {
                    cur.align_to(w);
                }
                for _ in 1..size {
                    let d = cur.index(w, aligned) as usize;
                    r += d;
                    myx += d;
                    y[r] += alpha * values[v] * x[myx];
                    v += 1;
                }
                ctx_col = col;
            }
            UnitKind::AntiDiag(w) => {
                let mut r = y_cursor;
                let mut myx = col as usize;
                y[r] += alpha * values[v] * x[myx];
                v += 1;
                if aligned && w.bytes() > 1 {
                    cur.align_to(w);
                }
                for _ in 1..size {
                    let d = cur.index(w, aligned) as usize;
                    r += d;
                    myx -= d;
                    y[r] += alpha * values[v] * x[myx];
                    v += 1;
                }
                ctx_col = col;
            }
            UnitKind::Block { rows } => {
                let cols = size / rows as usize;
                let base = col as usize;
                for i in 0..rows as usize {
                    for j in 0..cols {
                        y[y_cursor + i] += alpha * values[v + i * cols + j] * x[base + j];
                    }
                }
                v += size;
                ctx_col = col;
            }
        }
    }
}

/// Symmetric phase one: direct contributions land in the owned row range;
/// mirrored contributions of workers past the first land in their private
/// full-length buffer.
fn spmv_sym_thread<T: CsxValue>(
    mt: &SpmMt<T>,
    x: &[T],
    yp: SendPtr<T>,
    alpha: T,
    beta: T,
    tid: usize,
) {
    let part = &mt.threads[tid];
    let rs = part.row_start as usize;
    let y = owned_rows(part, yp);
    beta_prepass(y, beta);

    if tid == 0 {
        // Worker 0 owns rows [0, nr_rows); the lower triangle keeps its
        // mirrors inside that range, so they go straight into y.
        part.for_each_entry(mt.aligned, |r, c, vi| {
            let val = part.values[vi];
            y[r as usize - rs] += alpha * val * x[c as usize];
            if r != c {
                y[c as usize] += alpha * val * x[r as usize];
            }
            true
        });
    } else {
        let buf = unsafe { &mut *mt.local_buffers[tid].0.get() };
        buf.fill(T::zero());
        part.for_each_entry(mt.aligned, |r, c, vi| {
            let val = part.values[vi];
            y[r as usize - rs] += alpha * val * x[c as usize];
            if r != c {
                buf[c as usize] += alpha * val * x[r as usize];
            }
            true
        });
    }
}

/// Symmetric phase two: every worker folds all private buffers into its own
/// row range.
fn reduce_thread<T: CsxValue>(mt: &SpmMt<T>, yp: SendPtr<T>, tid: usize) {
    let part = &mt.threads[tid];
    let rs = part.row_start as usize;
    let y = owned_rows(part, yp);

    for b in 1..mt.nr_threads() {
        let buf = unsafe { &*mt.local_buffers[b].0.get() };
        for (i, slot) in y.iter_mut().enumerate() {
            *slot += buf[rs + i];
        }
    }
}
