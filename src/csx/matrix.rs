//! Tuned per-thread matrices and the multithreaded container.

use std::sync::OnceLock;

use crate::csx::ctl::{
    unit_kind, CtlCursor, DeltaWidth, UnitKind, CTL_NR, CTL_RJMP,
};
use crate::matrix::CsxValue;

/// One thread's share of a tuned matrix: a values array and the ctl stream
/// describing it, plus placement metadata.
#[derive(Debug)]
pub struct CsxMatrix<T> {
    pub values: Vec<T>,
    pub ctl: Vec<u8>,
    /// First row of the partition's split range.
    pub row_start: u64,
    /// Rows in the split range (the y span this thread owns).
    pub nr_rows: u64,
    pub nr_nzeros: u64,
    /// NUMA node the buffers are bound to.
    pub node: usize,
    /// CPU the owning worker is pinned to.
    pub cpu: usize,

    row_index: OnceLock<RowIndex>,
}

/// Decode state needed to resume the ctl stream at one unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitInfo {
    pub ctl_pos: usize,
    pub val_idx: usize,
    /// Head row, relative to `row_start`.
    pub y: u64,
    /// Rows the unit touches beyond its head row.
    pub row_span: u64,
    /// Column context before the unit's column varint; `None` when the
    /// varint is absolute (new row or first unit).
    pub ctx_col: Option<u64>,
}

/// Lazily built index: for every partition row, the earliest unit that can
/// contribute to it. This is the memoized per-row cursor used by random
/// access.
#[derive(Debug)]
pub struct RowIndex {
    pub units: Vec<UnitInfo>,
    /// Per partition-relative row: index into `units`, or `units.len()` for
    /// rows no unit touches.
    pub first_unit: Vec<usize>,
}

impl<T: CsxValue> CsxMatrix<T> {
    pub fn new(
        values: Vec<T>,
        ctl: Vec<u8>,
        row_start: u64,
        nr_rows: u64,
        node: usize,
        cpu: usize,
    ) -> Self {
        let nr_nzeros = values.len() as u64;
        Self {
            values,
            ctl,
            row_start,
            nr_rows,
            nr_nzeros,
            node,
            cpu,
            row_index: OnceLock::new(),
        }
    }

    /// Compressed footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.ctl.len() + self.values.len() * T::BYTES
    }

    /// Walks every stored entry in ctl order, calling
    /// `f(row, col, value_index)`. `row` is absolute. Returns early when `f`
    /// returns `false`.
    ///
    /// This is the reference decoder: the SpMV kernels follow the same state
    /// machine with arithmetic fused in.
    pub fn for_each_entry(&self, aligned: bool, mut f: impl FnMut(u64, u64, usize) -> bool) {
        let mut cur = CtlCursor::new(&self.ctl);
        let mut v = 0usize;
        let mut y = 0u64;
        let mut ctx_col = 0u64;
        let mut first = true;

        while !cur.at_end() {
            let flags = cur.u8();
            let size = cur.u8() as usize;
            let new_row = flags & CTL_NR != 0;
            if new_row {
                y += if flags & CTL_RJMP != 0 { cur.uleb() } else { 1 };
            }
            let col = if new_row || first {
                cur.uleb()
            } else {
                ctx_col + cur.uleb()
            };
            first = false;

            let kind = unit_kind(flags).expect("malformed ctl: unknown pattern id");
            match kind {
                UnitKind::Delta(w) => {
                    let mut c = col;
                    if !f(self.row_start + y, c, v) {
                        return;
                    }
                    v += 1;
                    maybe_align(&mut cur, w, aligned);
                    for _ in 1..size {
                        c += cur.index(w, aligned);
                        if !f(self.row_start + y, c, v) {
                            return;
                        }
                        v += 1;
                    }
                    ctx_col = c;
                }
                UnitKind::Diag(w) => {
                    let (mut r, mut c) = (y, col);
                    if !f(self.row_start + r, c, v) {
                        return;
                    }
                    v += 1;
                    maybe_align(&mut cur, w, aligned);
                    for _ in 1..size {
                        let d = cur.index(w, aligned);
                        r += d;
                        c += d;
                        if !f(self.row_start + r, c, v) {
                            return;
                        }
                        v += 1;
                    }
                    ctx_col = col;
                }
                UnitKind::AntiDiag(w) => {
                    let (mut r, mut c) = (y, col);
                    if !f(self.row_start + r, c, v) {
                        return;
                    }
                    v += 1;
                    maybe_align(&mut cur, w, aligned);
                    for _ in 1..size {
                        let d = cur.index(w, aligned);
                        r += d;
                        c -= d;
                        if !f(self.row_start + r, c, v) {
                            return;
                        }
                        v += 1;
                    }
                    ctx_col = col;
                }
                UnitKind::Block { rows } => {
                    let cols = (size / rows as usize) as u64;
                    for i in 0..rows as u64 {
                        for j in 0..cols {
                            let idx = (i * cols + j) as usize;
                            if !f(self.row_start + y + i, col + j, v + idx) {
                                return;
                            }
                        }
                    }
                    v += size;
                    ctx_col = col;
                }
            }
        }
    }

    /// The per-row unit index, built on first use.
    pub fn row_index(&self, aligned: bool) -> &RowIndex {
        self.row_index.get_or_init(|| self.build_row_index(aligned))
    }

    fn build_row_index(&self, aligned: bool) -> RowIndex {
        let mut units = Vec::new();
        let mut cur = CtlCursor::new(&self.ctl);
        let mut v = 0usize;
        let mut y = 0u64;
        let mut ctx_col = 0u64;
        let mut first = true;

        while !cur.at_end() {
            let ctl_pos = cur.pos;
            let flags = cur.u8();
            let size = cur.u8() as usize;
            let new_row = flags & CTL_NR != 0;
            if new_row {
                y += if flags & CTL_RJMP != 0 { cur.uleb() } else { 1 };
            }
            let absolute = new_row || first;
            let info_ctx = if absolute { None } else { Some(ctx_col) };
            let col = if absolute {
                cur.uleb()
            } else {
                ctx_col + cur.uleb()
            };
            first = false;

            let kind = unit_kind(flags).expect("malformed ctl: unknown pattern id");
            let (row_span, end_col) = skip_body(&mut cur, kind, size, col, aligned);
            units.push(UnitInfo {
                ctl_pos,
                val_idx: v,
                y,
                row_span,
                ctx_col: info_ctx,
            });
            v += size;
            ctx_col = end_col;
        }

        let nr_rows = self.nr_rows as usize;
        let mut first_unit = vec![units.len(); nr_rows];
        for (i, u) in units.iter().enumerate() {
            let lo = u.y as usize;
            let hi = ((u.y + u.row_span) as usize).min(nr_rows.saturating_sub(1));
            for r in lo..=hi {
                if first_unit[r] > i {
                    first_unit[r] = i;
                }
            }
        }
        // A row's cursor must not start after an earlier row's: units are
        // ordered by head row, so propagate minima forward is not needed,
        // but empty rows keep the sentinel.
        RowIndex { units, first_unit }
    }

    /// Decodes the single unit at `info`, calling `f(row, col, value_index)`
    /// until it returns `false`.
    pub fn decode_unit_at(
        &self,
        info: &UnitInfo,
        aligned: bool,
        mut f: impl FnMut(u64, u64, usize) -> bool,
    ) {
        let mut cur = CtlCursor::new(&self.ctl);
        cur.pos = info.ctl_pos;
        let flags = cur.u8();
        let size = cur.u8() as usize;
        if flags & CTL_NR != 0 && flags & CTL_RJMP != 0 {
            cur.uleb();
        }
        let col = match info.ctx_col {
            None => cur.uleb(),
            Some(ctx) => ctx + cur.uleb(),
        };
        let y = info.y;
        let mut v = info.val_idx;

        match unit_kind(flags).expect("malformed ctl: unknown pattern id") {
            UnitKind::Delta(w) => {
                let mut c = col;
                if !f(self.row_start + y, c, v) {
                    return;
                }
                v += 1;
                maybe_align(&mut cur, w, aligned);
                for _ in 1..size {
                    c += cur.index(w, aligned);
                    if !f(self.row_start + y, c, v) {
                        return;
                    }
                    v += 1;
                }
            }
            UnitKind::Diag(w) => {
                let (mut r, mut c) = (y, col);
                if !f(self.row_start + r, c, v) {
                    return;
                }
                v += 1;
                maybe_align(&mut cur, w, aligned);
                for _ in 1..size {
                    let d = cur.index(w, aligned);
                    r += d;
                    c += d;
                    if !f(self.row_start + r, c, v) {
                        return;
                    }
                    v += 1;
                }
            }
            UnitKind::AntiDiag(w) => {
                let (mut r, mut c) = (y, col);
                if !f(self.row_start + r, c, v) {
                    return;
                }
                v += 1;
                maybe_align(&mut cur, w, aligned);
                for _ in 1..size {
                    let d = cur.index(w, aligned);
                    r += d;
                    c -= d;
                    if !f(self.row_start + r, c, v) {
                        return;
                    }
                    v += 1;
                }
            }
            UnitKind::Block { rows } => {
                let cols = (size / rows as usize) as u64;
                for i in 0..rows as u64 {
                    for j in 0..cols {
                        let idx = (i * cols + j) as usize;
                        if !f(self.row_start + y + i, col + j, v + idx) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl<T: CsxValue> PartialEq for CsxMatrix<T> {
    /// Structural equality; placement metadata is host-specific and ignored.
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
            && self.ctl == other.ctl
            && self.row_start == other.row_start
            && self.nr_rows == other.nr_rows
            && self.nr_nzeros == other.nr_nzeros
    }
}

/// Skips a unit body, returning `(row_span, column context after the unit)`.
fn skip_body(
    cur: &mut CtlCursor<'_>,
    kind: UnitKind,
    size: usize,
    col: u64,
    aligned: bool,
) -> (u64, u64) {
    match kind {
        UnitKind::Delta(w) => {
            let mut c = col;
            maybe_align(cur, w, aligned);
            for _ in 1..size {
                c += cur.index(w, aligned);
            }
            (0, c)
        }
        UnitKind::Diag(w) | UnitKind::AntiDiag(w) => {
            let mut span = 0u64;
            maybe_align(cur, w, aligned);
            for _ in 1..size {
                span += cur.index(w, aligned);
            }
            (span, col)
        }
        UnitKind::Block { rows } => (rows as u64 - 1, col),
    }
}

fn maybe_align(cur: &mut CtlCursor<'_>, w: DeltaWidth, aligned: bool) {
    if aligned && w.bytes() > 1 {
        cur.align_to(w);
    }
}

/// A worker-private full-length `y` buffer used by the symmetric kernel's
/// mirrored writes. Owned exclusively by one worker between the SpMV
/// barriers; read by every worker during the reduction phase.
pub struct LocalBuf<T>(pub std::cell::UnsafeCell<Vec<T>>);

unsafe impl<T: Send> Sync for LocalBuf<T> {}

impl<T> std::fmt::Debug for LocalBuf<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalBuf")
    }
}

/// A fully tuned matrix: per-thread parts plus whole-matrix metadata.
#[derive(Debug)]
pub struct SpmMt<T> {
    pub nrows: u64,
    pub ncols: u64,
    pub nnz: u64,
    pub symmetric: bool,
    /// Packed delta bodies are naturally aligned (selected at tune time and
    /// persisted implicitly by the pad bytes).
    pub aligned: bool,
    pub threads: Vec<CsxMatrix<T>>,
    /// Symmetric-kernel local buffers, one per worker past the first; empty
    /// for general matrices.
    pub local_buffers: Vec<LocalBuf<T>>,
}

impl<T: CsxValue> SpmMt<T> {
    pub fn new(
        nrows: u64,
        ncols: u64,
        nnz: u64,
        symmetric: bool,
        aligned: bool,
        threads: Vec<CsxMatrix<T>>,
    ) -> Self {
        let local_buffers = if symmetric {
            (0..threads.len())
                .map(|_| LocalBuf(std::cell::UnsafeCell::new(vec![T::zero(); nrows as usize])))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            nrows,
            ncols,
            nnz,
            symmetric,
            aligned,
            threads,
            local_buffers,
        }
    }

    pub fn nr_threads(&self) -> usize {
        self.threads.len()
    }

    /// Compressed footprint across all threads, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.threads.iter().map(CsxMatrix::size_bytes).sum()
    }

    /// Partition owning `row`, by split ranges.
    pub fn thread_of_row(&self, row: u64) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| row >= t.row_start && row < t.row_start + t.nr_rows)
    }
}

impl<T: CsxValue> PartialEq for SpmMt<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nrows == other.nrows
            && self.ncols == other.ncols
            && self.nnz == other.nnz
            && self.symmetric == other.symmetric
            && self.aligned == other.aligned
            && self.threads == other.threads
    }
}
