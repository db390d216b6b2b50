//! Dense vectors with partition-aware NUMA placement.
//!
//! An interleaved vector is a single contiguous allocation whose pages are
//! bound node by node following the matrix partitioning. Partition byte
//! boundaries are shifted outward to page boundaries and the effective
//! per-partition lengths are reported back through [`Vector::parts`], so
//! kernel indexing stays consistent.

use rand::Rng;

use crate::error::{CsxError, Result};
use crate::matrix::CsxValue;
use crate::runtime::numa;
use crate::runtime::partition::Partition;

/// Relative tolerance used by [`Vector::compare`].
const COMPARE_EPS: f64 = 1e-7;

#[derive(Debug, Clone)]
pub struct Vector<T> {
    elems: Vec<T>,
    /// Effective per-partition element counts after page rounding; `None`
    /// for plain allocations.
    parts: Option<Vec<usize>>,
}

impl<T: CsxValue> Vector<T> {
    /// Plain zero-initialized vector.
    pub fn new(size: usize) -> Self {
        Self {
            elems: vec![T::zero(); size],
            parts: None,
        }
    }

    /// Copies a caller-supplied buffer.
    pub fn from_buff(buff: &[T]) -> Self {
        Self {
            elems: buff.to_vec(),
            parts: None,
        }
    }

    /// Uniform random values in `[min, max)`.
    pub fn random(size: usize, min: T, max: T) -> Self {
        let mut rng = rand::thread_rng();
        let mut v = Self::new(size);
        for e in &mut v.elems {
            let r: f64 = rng.gen();
            *e = T::from_f64(min.to_f64() + r * (max.to_f64() - min.to_f64()));
        }
        v
    }

    /// Contiguous vector with pages bound per partition node. Each
    /// partition's extent is rounded to page boundaries: a partition keeps a
    /// trailing partial page only when it owns at least half of it.
    pub fn interleaved(size: usize, partition: &Partition) -> Self {
        let mut v = Self::new(size);
        let page = numa::page_size();
        let nr_parts = partition.nr_partitions();

        let mut eff_parts = Vec::with_capacity(nr_parts);
        let mut offset = 0usize;
        for i in 0..nr_parts {
            let rows = (partition.row_end[i] - partition.row_start[i]) as usize;
            let mut part_bytes = rows.min(size.saturating_sub(offset)) * T::BYTES;
            if i < nr_parts - 1 {
                let mut rem = part_bytes % page;
                while rem != 0 && rem < page / 2 && part_bytes >= T::BYTES {
                    // Leave the partial page to the next partition.
                    part_bytes -= T::BYTES;
                    rem = part_bytes % page;
                }
            }
            let part_len = part_bytes / T::BYTES;
            let start = offset.min(size);
            let end = (offset + part_len).min(size);
            if end > start {
                numa::bind_to_node(&mut v.elems[start..end], partition.nodes[i]);
            }
            eff_parts.push(end - start);
            offset = end;
        }
        // Whatever page rounding left over belongs to the last partition.
        if offset < size {
            if let Some(last) = eff_parts.last_mut() {
                *last += size - offset;
            }
        }

        v.parts = Some(eff_parts);
        v
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Effective per-partition lengths of an interleaved vector.
    pub fn parts(&self) -> Option<&[usize]> {
        self.parts.as_deref()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.elems
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.elems
    }

    /// Sets every element to `val`.
    pub fn init(&mut self, val: T) {
        self.elems.fill(val);
    }

    /// Sets elements of `[start, end)` to `val`.
    pub fn init_part(&mut self, val: T, start: usize, end: usize) {
        self.elems[start..end].fill(val);
    }

    /// Overwrites one entry, reporting out-of-range indices.
    pub fn set_entry(&mut self, idx: usize, val: T) -> Result<()> {
        if idx >= self.elems.len() {
            log::warn!("vector entry {} not set: index out of bounds", idx);
            return Err(CsxError::OutOfBounds);
        }
        self.elems[idx] = val;
        Ok(())
    }

    /// `self = num * other`, elementwise.
    pub fn scale(&mut self, other: &Vector<T>, num: T) {
        for (a, &b) in self.elems.iter_mut().zip(&other.elems) {
            *a = num * b;
        }
    }

    /// `self = a + num * b`, elementwise.
    pub fn scale_add(&mut self, a: &Vector<T>, b: &Vector<T>, num: T) {
        for ((dst, &x), &y) in self.elems.iter_mut().zip(&a.elems).zip(&b.elems) {
            *dst = x + num * y;
        }
    }

    /// `self = a + b`, elementwise.
    pub fn add(&mut self, a: &Vector<T>, b: &Vector<T>) {
        for ((dst, &x), &y) in self.elems.iter_mut().zip(&a.elems).zip(&b.elems) {
            *dst = x + y;
        }
    }

    /// `self = a - b`, elementwise.
    pub fn sub(&mut self, a: &Vector<T>, b: &Vector<T>) {
        for ((dst, &x), &y) in self.elems.iter_mut().zip(&a.elems).zip(&b.elems) {
            *dst = x - y;
        }
    }

    /// Dot product.
    pub fn dot(&self, other: &Vector<T>) -> T {
        let mut acc = T::zero();
        for (&a, &b) in self.elems.iter().zip(&other.elems) {
            acc += a * b;
        }
        acc
    }

    /// Elementwise comparison within a relative tolerance. Returns the index
    /// of the first mismatch.
    pub fn compare(&self, other: &Vector<T>) -> std::result::Result<(), usize> {
        if self.len() != other.len() {
            return Err(usize::MAX);
        }
        for (i, (&a, &b)) in self.elems.iter().zip(&other.elems).enumerate() {
            let (a, b) = (a.to_f64(), b.to_f64());
            let denom = if a == 0.0 { 1.0 } else { a };
            if ((a - b) / denom).abs() > COMPARE_EPS {
                return Err(i);
            }
        }
        Ok(())
    }

    /// Applies a permutation: `out[p[i]] = self[i]`.
    pub fn reorder(&mut self, p: &[u64]) -> Result<()> {
        if p.len() != self.len() {
            return Err(CsxError::DimMismatch);
        }
        let mut permuted = vec![T::zero(); self.len()];
        for (i, &e) in self.elems.iter().enumerate() {
            permuted[p[i] as usize] = e;
        }
        self.elems = permuted;
        Ok(())
    }

    /// Undoes [`Vector::reorder`]: `out[i] = self[p[i]]`.
    pub fn inv_reorder(&mut self, p: &[u64]) -> Result<()> {
        if p.len() != self.len() {
            return Err(CsxError::DimMismatch);
        }
        let mut permuted = vec![T::zero(); self.len()];
        for (i, slot) in permuted.iter_mut().enumerate() {
            *slot = self.elems[p[i] as usize];
        }
        self.elems = permuted;
        Ok(())
    }
}

impl<T> std::ops::Index<usize> for Vector<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.elems[i]
    }
}

impl<T> std::ops::IndexMut<usize> for Vector<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.elems[i]
    }
}
