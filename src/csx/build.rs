//! Conversion of a tagged, row-ordered element sequence into per-thread
//! `(values, ctl)` pairs.
//!
//! The builder runs one left-to-right pass per partition. Maximal runs of
//! untagged same-row elements become delta units with the narrowest fitting
//! width; tagged heads emit their pattern's unit. Output is bit-identical
//! for identical input.

use rayon::prelude::*;

use crate::config::CsxConfig;
use crate::csx::ctl::{
    CtlBuilder, DeltaWidth, Pattern, CTL_NR, CTL_RJMP, MAX_UNIT_SIZE,
};
use crate::csx::matrix::CsxMatrix;
use crate::error::{CsxError, Result};
use crate::matrix::elements::expand_instance;
use crate::matrix::{CsxValue, ElementStore, Order};
use crate::runtime::numa;
use crate::runtime::partition::split_rows;

/// Builds the per-thread matrices for a tuned element store. The store must
/// be in row order with pattern instances folded into tagged heads; splits
/// and placement follow `config`.
pub fn build_partitions<T: CsxValue>(
    store: &mut ElementStore<T>,
    config: &CsxConfig,
) -> Result<Vec<CsxMatrix<T>>> {
    let nr_threads = config.nr_threads.max(1);
    let rowptr = store.rowptr();
    let splits = split_rows(&rowptr, nr_threads);

    demote_unbuildable_instances(store, &splits);

    let affinity = config.cpu_affinity();
    if affinity.len() < nr_threads {
        return Err(CsxError::ArgInvalid(format!(
            "affinity lists {} cpus for {} threads",
            affinity.len(),
            nr_threads
        )));
    }

    // Element index range of each partition in the row-sorted sequence.
    let ranges: Vec<(usize, usize)> = splits
        .iter()
        .map(|&(rs, re)| {
            let lo = store.elems.partition_point(|e| e.row < rs);
            let hi = store.elems.partition_point(|e| e.row < re);
            (lo, hi)
        })
        .collect();

    let parts: Vec<CsxMatrix<T>> = splits
        .par_iter()
        .zip(ranges.par_iter())
        .enumerate()
        .map(|(i, (&(rs, re), &(lo, hi)))| {
            let cpu = affinity[i];
            let node = numa::node_of_cpu(cpu).unwrap_or(0);
            let mut part = encode_partition(&store.elems[lo..hi], rs, re, node, cpu, config);
            numa::bind_to_node(&mut part.values, node);
            numa::bind_to_node(&mut part.ctl, node);
            part
        })
        .collect();

    Ok(parts)
}

/// Demotes pattern instances the builder cannot represent back to plain
/// elements: instances whose row span crosses a partition boundary, and
/// instances past the unit size cap. Every surviving unit then stays inside
/// one thread's ctl.
fn demote_unbuildable_instances<T: CsxValue>(
    store: &mut ElementStore<T>,
    splits: &[(u64, u64)],
) {
    let mut restored = Vec::new();
    let mut demoted = 0usize;
    for e in &mut store.elems {
        let Some(tag) = &e.tag else { continue };
        let span_end = e.row + tag.row_span();
        let crosses = splits
            .iter()
            .find(|&&(rs, re)| e.row >= rs && e.row < re)
            .map(|&(_, re)| span_end >= re)
            .unwrap_or(true);
        if crosses || tag.len() > MAX_UNIT_SIZE {
            let tag = e.tag.take().unwrap();
            restored.extend(expand_instance(e.row, e.col, &tag));
            e.value = tag.values[0];
            demoted += 1;
        }
    }
    if demoted > 0 {
        log::warn!(
            "demoted {} pattern instances unrepresentable in ctl to delta units",
            demoted
        );
        store.elems.append(&mut restored);
        store.transform(Order::Row);
    }
}

/// Encoder state threaded through one partition's units.
struct UnitWriter<T> {
    ctl: CtlBuilder,
    values: Vec<T>,
    /// Row of the previous unit's head (starts at the split start).
    prev_row: u64,
    /// Column context after the previous unit; `None` before the first unit.
    ctx_col: Option<u64>,
    aligned: bool,
}

impl<T: CsxValue> UnitWriter<T> {
    fn new(row_start: u64, config: &CsxConfig) -> Self {
        Self {
            ctl: CtlBuilder::new(),
            values: Vec::new(),
            prev_row: row_start,
            ctx_col: None,
            aligned: config.aligned_deltas,
        }
    }

    /// Emits the `(flags, size)` header, the row jump and the column varint
    /// shared by every unit type.
    fn header(&mut self, pattern: Pattern, size: usize, row: u64, col: u64) {
        debug_assert!((1..=MAX_UNIT_SIZE).contains(&size));
        let mut flags = pattern.id();
        let row_delta = row - self.prev_row;
        let new_row = row_delta > 0 || self.ctx_col.is_none();
        if row_delta > 0 {
            flags |= CTL_NR;
            if row_delta > 1 {
                flags |= CTL_RJMP;
            }
        }
        self.ctl.put_u8(flags);
        self.ctl.put_u8(size as u8);
        if row_delta > 1 {
            self.ctl.put_uleb(row_delta);
        }
        match self.ctx_col {
            Some(ctx) if !new_row => self.ctl.put_uleb(col - ctx),
            _ => self.ctl.put_uleb(col),
        }
        self.prev_row = row;
    }

    fn body(&mut self, width: DeltaWidth, deltas: &[u64]) {
        if self.aligned && width.bytes() > 1 {
            self.ctl.align_to(width);
        }
        for &d in deltas {
            self.ctl.put_index(d, width);
        }
    }

    /// Emits a maximal run of plain same-row elements as delta units,
    /// splitting at the size cap without resetting column context.
    fn delta_run(&mut self, row: u64, cols: &[u64], vals: &[T]) {
        let mut start = 0;
        while start < cols.len() {
            let len = (cols.len() - start).min(MAX_UNIT_SIZE);
            let chunk = &cols[start..start + len];
            let deltas: Vec<u64> = chunk.windows(2).map(|w| w[1] - w[0]).collect();
            let width = DeltaWidth::fitting(deltas.iter().copied().max().unwrap_or(0));
            self.header(Pattern::Delta(width), len, row, chunk[0]);
            self.body(width, &deltas);
            self.values.extend_from_slice(&vals[start..start + len]);
            self.ctx_col = Some(chunk[len - 1]);
            start += len;
        }
    }

    /// Emits one tagged pattern instance; a row-local instance past the size
    /// cap falls back to split delta units. Multi-row instances are
    /// guaranteed representable by the pre-build demotion pass.
    fn pattern_unit(&mut self, row: u64, col: u64, tag: &crate::matrix::PatternTag<T>) {
        let size = tag.len();
        if size > MAX_UNIT_SIZE {
            debug_assert!(matches!(tag.pattern, Pattern::Delta(_)));
            log::warn!(
                "demoting unrepresentable {:?} instance of {} elements at row {}",
                tag.pattern,
                size,
                row
            );
            self.demote_row_local(row, col, tag);
            return;
        }
        match tag.pattern {
            Pattern::Delta(w) => {
                self.header(Pattern::Delta(w), size, row, col);
                self.body(w, &tag.deltas);
                self.values.extend_from_slice(&tag.values);
                self.ctx_col = Some(col + tag.deltas.iter().sum::<u64>());
            }
            Pattern::Diag(w) | Pattern::AntiDiag(w) => {
                self.header(tag.pattern, size, row, col);
                self.body(w, &tag.deltas);
                self.values.extend_from_slice(&tag.values);
                self.ctx_col = Some(col);
            }
            Pattern::Block { .. } => {
                self.header(tag.pattern, size, row, col);
                self.values.extend_from_slice(&tag.values);
                self.ctx_col = Some(col);
            }
        }
    }

    /// Re-emits a single-row instance as plain delta units.
    fn demote_row_local(&mut self, row: u64, col: u64, tag: &crate::matrix::PatternTag<T>) {
        let mut members = expand_instance(row, col, tag);
        members.insert(0, crate::matrix::Element::new(row, col, tag.values[0]));
        members.sort_by_key(|e| e.col);
        let cols: Vec<u64> = members.iter().map(|e| e.col).collect();
        let vals: Vec<T> = members.iter().map(|e| e.value).collect();
        self.delta_run(row, &cols, &vals);
    }
}

/// Encodes one partition's element slice. `row_start..row_end` is the split
/// range; elements are row-ordered and tagged.
fn encode_partition<T: CsxValue>(
    elems: &[crate::matrix::Element<T>],
    row_start: u64,
    row_end: u64,
    node: usize,
    cpu: usize,
    config: &CsxConfig,
) -> CsxMatrix<T> {
    let mut w = UnitWriter::new(row_start, config);

    let mut i = 0;
    while i < elems.len() {
        let row = elems[i].row;
        if let Some(tag) = &elems[i].tag {
            w.pattern_unit(row, elems[i].col, tag);
            i += 1;
            continue;
        }
        // Maximal run of plain elements on this row, broken by tagged heads.
        let mut j = i + 1;
        while j < elems.len() && elems[j].row == row && elems[j].tag.is_none() {
            j += 1;
        }
        let cols: Vec<u64> = elems[i..j].iter().map(|e| e.col).collect();
        let vals: Vec<T> = elems[i..j].iter().map(|e| e.value).collect();
        w.delta_run(row, &cols, &vals);
        i = j;
    }

    CsxMatrix::new(
        w.values,
        w.ctl.into_bytes(),
        row_start,
        row_end - row_start,
        node,
        cpu,
    )
}
