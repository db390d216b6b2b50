//! Ordered element store and geometric traversals.
//!
//! Tuning operates on a flat sequence of `(row, col, value)` triples that is
//! repeatedly re-sorted into different geometric traversals. Substructure
//! detection replaces the members of a chosen pattern instance with a single
//! head element carrying a [`PatternTag`], so later passes see the instance
//! as one opaque unit anchored at its first position.

use crate::csx::ctl::Pattern;
use crate::matrix::CsxValue;

/// A geometric traversal of the non-zero pattern.
///
/// Transforming the store into an order is a permutation of the element
/// sequence only; dimensions are invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Row,
    Col,
    Diag,
    AntiDiag,
    /// Bands of `r` consecutive rows, scanned column-major inside a band.
    BlockRow(u8),
    /// Bands of `c` consecutive columns, scanned row-major inside a band.
    BlockCol(u8),
}

impl Order {
    /// Parses the names accepted by `CSX_XFORM_CONF`.
    pub fn parse(s: &str) -> Option<Order> {
        match s {
            "row" => return Some(Order::Row),
            "col" => return Some(Order::Col),
            "diag" => return Some(Order::Diag),
            "antidiag" => return Some(Order::AntiDiag),
            _ => {}
        }
        let dim = |prefix: &str| -> Option<u8> {
            s.strip_prefix(prefix)
                .and_then(|d| d.parse::<u8>().ok())
                .filter(|d| (2..=8).contains(d))
        };
        if let Some(r) = dim("block-row-") {
            return Some(Order::BlockRow(r));
        }
        if let Some(c) = dim("block-col-") {
            return Some(Order::BlockCol(c));
        }
        None
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Row => write!(f, "row"),
            Order::Col => write!(f, "col"),
            Order::Diag => write!(f, "diag"),
            Order::AntiDiag => write!(f, "antidiag"),
            Order::BlockRow(r) => write!(f, "block-row-{}", r),
            Order::BlockCol(c) => write!(f, "block-col-{}", c),
        }
    }
}

/// Pattern annotation on a head element. The member elements of the instance
/// have been removed from the store; their values live here, already in the
/// order the unit body will stream them.
#[derive(Debug, Clone)]
pub struct PatternTag<T> {
    pub pattern: Pattern,
    /// Per-step deltas for delta-style patterns; empty for blocks.
    pub deltas: Vec<u64>,
    /// All values of the instance, head first.
    pub values: Vec<T>,
}

impl<T> PatternTag<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rows the instance spans beyond its head row.
    pub fn row_span(&self) -> u64 {
        match self.pattern {
            Pattern::Delta(_) => 0,
            Pattern::Diag(_) | Pattern::AntiDiag(_) => self.deltas.iter().sum(),
            Pattern::Block { rows, .. } => rows as u64 - 1,
        }
    }
}

/// A single non-zero, optionally standing in for a whole pattern instance.
#[derive(Debug, Clone)]
pub struct Element<T> {
    pub row: u64,
    pub col: u64,
    pub value: T,
    pub tag: Option<PatternTag<T>>,
}

impl<T: Copy> Element<T> {
    pub fn new(row: u64, col: u64, value: T) -> Self {
        Self {
            row,
            col,
            value,
            tag: None,
        }
    }

    /// Non-zeros this element accounts for (instance length for heads).
    pub fn nnz(&self) -> usize {
        self.tag.as_ref().map_or(1, |t| t.len())
    }
}

/// The element sequence of a matrix together with its dimensions.
#[derive(Debug, Clone)]
pub struct ElementStore<T> {
    pub nrows: u64,
    pub ncols: u64,
    pub elems: Vec<Element<T>>,
}

impl<T: CsxValue> ElementStore<T> {
    pub fn new(nrows: u64, ncols: u64, elems: Vec<Element<T>>) -> Self {
        Self {
            nrows,
            ncols,
            elems,
        }
    }

    /// Total non-zeros, counting pattern members folded into their heads.
    pub fn nnz(&self) -> usize {
        self.elems.iter().map(Element::nnz).sum()
    }

    /// Reorders the sequence so a left-to-right scan yields the requested
    /// traversal. The sort is stable, so elements equal under the traversal
    /// key keep their prior relative position.
    pub fn transform(&mut self, order: Order) {
        match order {
            Order::Row => self.elems.sort_by_key(|e| (e.row, e.col)),
            Order::Col => self.elems.sort_by_key(|e| (e.col, e.row)),
            Order::Diag => self
                .elems
                .sort_by_key(|e| (e.row as i64 - e.col as i64, e.row)),
            Order::AntiDiag => self.elems.sort_by_key(|e| (e.row + e.col, e.row)),
            Order::BlockRow(r) => {
                let r = r as u64;
                self.elems.sort_by_key(|e| (e.row / r, e.col, e.row, e.col));
            }
            Order::BlockCol(c) => {
                let c = c as u64;
                self.elems.sort_by_key(|e| (e.col / c, e.row, e.col, e.row));
            }
        }
    }

    /// CSR-style row pointer over the current sequence, attributing a whole
    /// pattern instance to its head row. The store must be in row order.
    pub fn rowptr(&self) -> Vec<usize> {
        let nrows = self.nrows as usize;
        let mut ptr = vec![0usize; nrows + 1];
        for e in &self.elems {
            ptr[e.row as usize + 1] += e.nnz();
        }
        for i in 0..nrows {
            ptr[i + 1] += ptr[i];
        }
        ptr
    }

    /// Applies a symmetric-storage filter, keeping the lower triangle
    /// (including the diagonal). Used when the symmetric build path is
    /// enabled for an input that carries both triangles.
    pub fn keep_lower_triangle(&mut self) {
        self.elems.retain(|e| e.col <= e.row);
    }

    /// Expands every tagged head back into its member elements and clears
    /// the tags. Leaves the sequence unsorted.
    pub fn untag_all(&mut self) {
        let mut restored = Vec::new();
        for e in &mut self.elems {
            if let Some(tag) = e.tag.take() {
                restored.extend(expand_instance(e.row, e.col, &tag));
            }
        }
        self.elems.append(&mut restored);
    }
}

/// Member elements of an instance, excluding the head itself.
pub fn expand_instance<T: CsxValue>(
    head_row: u64,
    head_col: u64,
    tag: &PatternTag<T>,
) -> Vec<Element<T>> {
    let mut out = Vec::with_capacity(tag.len().saturating_sub(1));
    match tag.pattern {
        Pattern::Delta(_) => {
            let mut col = head_col;
            for (k, &d) in tag.deltas.iter().enumerate() {
                col += d;
                out.push(Element::new(head_row, col, tag.values[k + 1]));
            }
        }
        Pattern::Diag(_) => {
            let (mut row, mut col) = (head_row, head_col);
            for (k, &d) in tag.deltas.iter().enumerate() {
                row += d;
                col += d;
                out.push(Element::new(row, col, tag.values[k + 1]));
            }
        }
        Pattern::AntiDiag(_) => {
            let (mut row, mut col) = (head_row, head_col);
            for (k, &d) in tag.deltas.iter().enumerate() {
                row += d;
                col -= d;
                out.push(Element::new(row, col, tag.values[k + 1]));
            }
        }
        Pattern::Block { rows, cols } => {
            for i in 0..rows as u64 {
                for j in 0..cols as u64 {
                    if i == 0 && j == 0 {
                        continue;
                    }
                    let k = (i * cols as u64 + j) as usize;
                    out.push(Element::new(head_row + i, head_col + j, tag.values[k]));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ElementStore<f64> {
        let elems = vec![
            Element::new(0, 0, 1.0),
            Element::new(0, 2, 2.0),
            Element::new(1, 1, 3.0),
            Element::new(2, 0, 4.0),
            Element::new(2, 2, 5.0),
        ];
        ElementStore::new(3, 3, elems)
    }

    #[test]
    fn test_row_order() {
        let mut s = store();
        s.transform(Order::Col);
        s.transform(Order::Row);
        let pos: Vec<_> = s.elems.iter().map(|e| (e.row, e.col)).collect();
        assert_eq!(pos, vec![(0, 0), (0, 2), (1, 1), (2, 0), (2, 2)]);
    }

    #[test]
    fn test_diag_order_groups_lines() {
        let mut s = store();
        s.transform(Order::Diag);
        // Lines keyed by row - col: -2, then 0, then 2.
        let pos: Vec<_> = s.elems.iter().map(|e| (e.row, e.col)).collect();
        assert_eq!(pos, vec![(0, 2), (0, 0), (1, 1), (2, 2), (2, 0)]);
    }

    #[test]
    fn test_antidiag_order_groups_lines() {
        let mut s = store();
        s.transform(Order::AntiDiag);
        // Lines keyed by row + col: 0, 2, 2, 2, 4.
        let keys: Vec<_> = s.elems.iter().map(|e| e.row + e.col).collect();
        assert_eq!(keys, vec![0, 2, 2, 2, 4]);
    }

    #[test]
    fn test_rowptr_counts_tags() {
        let mut s = store();
        s.elems[1].tag = Some(PatternTag {
            pattern: Pattern::Block { rows: 2, cols: 2 },
            deltas: vec![],
            values: vec![2.0, 2.0, 2.0, 2.0],
        });
        s.transform(Order::Row);
        assert_eq!(s.rowptr(), vec![0, 5, 6, 8]);
        assert_eq!(s.nnz(), 8);
    }

    #[test]
    fn test_order_parse() {
        assert_eq!(Order::parse("row"), Some(Order::Row));
        assert_eq!(Order::parse("antidiag"), Some(Order::AntiDiag));
        assert_eq!(Order::parse("block-row-4"), Some(Order::BlockRow(4)));
        assert_eq!(Order::parse("block-col-2"), Some(Order::BlockCol(2)));
        assert_eq!(Order::parse("block-row-9"), None);
        assert_eq!(Order::parse("spiral"), None);
    }

    #[test]
    fn test_expand_block_instance() {
        let tag = PatternTag {
            pattern: Pattern::Block { rows: 2, cols: 2 },
            deltas: vec![],
            values: vec![1.0, 2.0, 3.0, 4.0],
        };
        let members = expand_instance(4, 6, &tag);
        let pos: Vec<_> = members.iter().map(|e| (e.row, e.col, e.value)).collect();
        assert_eq!(pos, vec![(4, 7, 2.0), (5, 6, 3.0), (5, 7, 4.0)]);
    }
}
