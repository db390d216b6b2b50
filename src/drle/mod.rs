//! Delta run-length substructure detection.
//!
//! The analyzer scans the element sequence in each candidate traversal,
//! collects run statistics per unit type, and scores each type by the bytes
//! it would save over the baseline row-order delta encoding. The manager
//! iterates: encode the winning type, rescan what is left, stop when no type
//! clears the configured threshold.

use std::collections::HashMap;

use crate::config::CsxConfig;
use crate::csx::ctl::{DeltaWidth, Pattern, MAX_UNIT_SIZE};
use crate::matrix::{CsxValue, ElementStore, Order, PatternTag};

/// Per-unit-type run statistics for one traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Number of runs encodable by the type.
    pub count: u64,
    /// Non-zeros those runs cover.
    pub total_nnz: u64,
    /// Estimated bytes saved over the baseline encoding.
    pub saved_bytes: f64,
}

/// A candidate instance found while scanning one traversal.
struct CandidateRun {
    pattern: Pattern,
    /// Positions into the store's element sequence, traversal order.
    members: Vec<usize>,
    /// Per-step deltas (empty for blocks).
    deltas: Vec<u64>,
    saved_bytes: f64,
}

/// Outcome of one full tuning pass over an element store.
#[derive(Debug, Default)]
pub struct TuningReport {
    /// `(order, pattern, stats)` per encoding round, in selection order.
    pub rounds: Vec<(Order, Pattern, RunStats)>,
}

/// Runs the iterative detect-and-encode loop. On return the store is in row
/// order with every chosen instance folded into a tagged head element.
pub fn tune_elements<T: CsxValue>(store: &mut ElementStore<T>, config: &CsxConfig) -> TuningReport {
    let mut report = TuningReport::default();

    // Row order is the baseline itself; only geometric traversals are
    // candidates for detection.
    let candidates: Vec<Order> = config
        .xform_conf
        .iter()
        .copied()
        .filter(|o| !matches!(o, Order::Row | Order::Col))
        .collect();

    if candidates.is_empty() {
        store.transform(Order::Row);
        return report;
    }

    loop {
        store.transform(Order::Row);
        let baseline = baseline_costs(store);
        let unencoded: u64 = store
            .elems
            .iter()
            .filter(|e| e.tag.is_none())
            .count() as u64;
        if unencoded == 0 {
            break;
        }
        let threshold = config.min_score_per_nnz * unencoded as f64;

        let mut best: Option<(Order, Pattern, RunStats)> = None;
        for &order in &candidates {
            store.transform(order);
            let stats = analyze(store, order, &baseline, config);
            for (&pattern, &s) in &stats {
                if s.saved_bytes <= threshold {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((_, bp, bs)) => {
                        better_candidate(s, pattern, *bs, *bp)
                    }
                };
                if better {
                    best = Some((order, pattern, s));
                }
            }
        }

        let Some((order, pattern, stats)) = best else {
            break;
        };
        log::debug!(
            "encoding {:?} in {} order: {} runs, {} nnz, {:.0} bytes saved",
            pattern,
            order,
            stats.count,
            stats.total_nnz,
            stats.saved_bytes
        );

        store.transform(order);
        encode(store, order, pattern, &baseline, config);
        report.rounds.push((order, pattern, stats));
    }

    store.transform(Order::Row);
    report
}

/// Selection rule: strictly greater score wins; ties break by higher
/// coverage, then lower delta width, then lexicographic pattern id.
fn better_candidate(s: RunStats, p: Pattern, best_s: RunStats, best_p: Pattern) -> bool {
    if s.saved_bytes != best_s.saved_bytes {
        return s.saved_bytes > best_s.saved_bytes;
    }
    if s.total_nnz != best_s.total_nnz {
        return s.total_nnz > best_s.total_nnz;
    }
    let width = |p: Pattern| match p {
        Pattern::Delta(w) | Pattern::Diag(w) | Pattern::AntiDiag(w) => w.bits(),
        Pattern::Block { .. } => 0,
    };
    if width(p) != width(best_p) {
        return width(p) < width(best_p);
    }
    p.id() < best_p.id()
}

/// Estimated row-order delta-8 cost, in bytes, of every unencoded element.
///
/// Elements inside long same-row runs amortize the unit header and cost
/// about one packed byte; isolated elements pay the full header. The store
/// must be in row order.
fn baseline_costs<T: CsxValue>(store: &ElementStore<T>) -> HashMap<(u64, u64), f64> {
    let mut costs = HashMap::new();
    let mut i = 0;
    let elems = &store.elems;
    while i < elems.len() {
        if elems[i].tag.is_some() {
            i += 1;
            continue;
        }
        let row = elems[i].row;
        let mut j = i + 1;
        while j < elems.len() && elems[j].row == row && elems[j].tag.is_none() {
            j += 1;
        }
        let len = j - i;
        // Header + column varint amortized over the run, one delta byte for
        // each element after the first.
        let run_cost = 3.0 + (len as f64 - 1.0);
        let per_elem = run_cost / len as f64;
        for e in &elems[i..j] {
            costs.insert((e.row, e.col), per_elem);
        }
        i = j;
    }
    costs
}

/// Scans one traversal and aggregates run statistics per unit type.
fn analyze<T: CsxValue>(
    store: &ElementStore<T>,
    order: Order,
    baseline: &HashMap<(u64, u64), f64>,
    config: &CsxConfig,
) -> HashMap<Pattern, RunStats> {
    let windows = sample_windows(store.elems.len(), config);
    let mut stats: HashMap<Pattern, RunStats> = HashMap::new();
    let scale = sample_scale(config);

    for_each_run(store, order, baseline, config, |run| {
        if let Some(windows) = &windows {
            let inside = windows
                .iter()
                .any(|w| w.contains(&run.members[0]));
            if !inside {
                return;
            }
        }
        let s = stats.entry(run.pattern).or_default();
        s.count += 1;
        s.total_nnz += run.members.len() as u64;
        s.saved_bytes += run.saved_bytes * scale;
    });

    stats
}

/// Folds every qualifying run of `pattern` into a tagged head element.
fn encode<T: CsxValue>(
    store: &mut ElementStore<T>,
    order: Order,
    pattern: Pattern,
    baseline: &HashMap<(u64, u64), f64>,
    config: &CsxConfig,
) {
    let mut chosen: Vec<(Vec<usize>, Vec<u64>)> = Vec::new();
    for_each_run(store, order, baseline, config, |run| {
        if run.pattern == pattern && run.saved_bytes > 0.0 {
            chosen.push((run.members.clone(), run.deltas.clone()));
        }
    });

    let mut removed = vec![false; store.elems.len()];
    for (members, deltas) in chosen {
        let mut values = Vec::with_capacity(members.len());
        let mut positions: Vec<(u64, u64, usize)> = members
            .iter()
            .map(|&i| (store.elems[i].row, store.elems[i].col, i))
            .collect();
        // Blocks stream their values row-major inside the rectangle; the
        // delta-style patterns already scan in body order.
        if matches!(pattern, Pattern::Block { .. }) {
            positions.sort_by_key(|&(r, c, _)| (r, c));
        }
        for &(_, _, i) in &positions {
            values.push(store.elems[i].value);
        }

        let head = positions[0].2;
        store.elems[head].tag = Some(PatternTag {
            pattern,
            deltas,
            values,
        });
        for &(_, _, i) in &positions[1..] {
            removed[i] = true;
        }
    }

    let mut keep = removed.iter().map(|r| !r);
    store.elems.retain(|_| keep.next().unwrap());
}

/// Walks the maximal candidate runs of a traversal, invoking `f` for each.
///
/// Runs never include encoded elements (tagged heads break them), are capped
/// at the unit size limit, and must reach the configured minimum length.
fn for_each_run<T: CsxValue>(
    store: &ElementStore<T>,
    order: Order,
    baseline: &HashMap<(u64, u64), f64>,
    config: &CsxConfig,
    mut f: impl FnMut(&CandidateRun),
) {
    match order {
        Order::Diag | Order::AntiDiag => {
            scan_diagonal_runs(store, order, baseline, config, &mut f)
        }
        Order::BlockRow(r) => scan_blocks(store, r, false, baseline, config, &mut f),
        Order::BlockCol(c) => scan_blocks(store, c, true, baseline, config, &mut f),
        Order::Row | Order::Col => {}
    }
}

fn line_key<T>(e: &crate::matrix::Element<T>, order: Order) -> i64 {
    match order {
        Order::Diag => e.row as i64 - e.col as i64,
        Order::AntiDiag => (e.row + e.col) as i64,
        _ => unreachable!(),
    }
}

fn scan_diagonal_runs<T: CsxValue>(
    store: &ElementStore<T>,
    order: Order,
    baseline: &HashMap<(u64, u64), f64>,
    config: &CsxConfig,
    f: &mut impl FnMut(&CandidateRun),
) {
    let elems = &store.elems;
    let mut i = 0;
    while i < elems.len() {
        if elems[i].tag.is_some() {
            i += 1;
            continue;
        }
        let key = line_key(&elems[i], order);
        let mut j = i + 1;
        while j < elems.len()
            && elems[j].tag.is_none()
            && line_key(&elems[j], order) == key
            && j - i < MAX_UNIT_SIZE
        {
            j += 1;
        }

        let len = j - i;
        if len >= config.min_unit_size.max(2) {
            let deltas: Vec<u64> = elems[i + 1..j]
                .iter()
                .zip(&elems[i..j - 1])
                .map(|(b, a)| b.row - a.row)
                .collect();
            let width = DeltaWidth::fitting(deltas.iter().copied().max().unwrap_or(0));
            let pattern = match order {
                Order::Diag => Pattern::Diag(width),
                _ => Pattern::AntiDiag(width),
            };
            let members: Vec<usize> = (i..j).collect();
            let base: f64 = elems[i..j]
                .iter()
                .map(|e| baseline.get(&(e.row, e.col)).copied().unwrap_or(1.0))
                .sum();
            let cost = 3.0 + (deltas.len() * width.bytes()) as f64;
            f(&CandidateRun {
                pattern,
                members,
                deltas,
                saved_bytes: base - cost,
            });
        }
        i = j;
    }
}

/// Detects grid-aligned dense rectangles. With `transposed == false` the
/// grid dimension is the row band height `r`; the rectangle grows along
/// adjacent full columns. With `transposed == true` the roles swap.
fn scan_blocks<T: CsxValue>(
    store: &ElementStore<T>,
    dim: u8,
    transposed: bool,
    baseline: &HashMap<(u64, u64), f64>,
    config: &CsxConfig,
    f: &mut impl FnMut(&CandidateRun),
) {
    let dim = dim as u64;
    let elems = &store.elems;
    let major = |e: &crate::matrix::Element<T>| if transposed { e.col } else { e.row };
    let minor = |e: &crate::matrix::Element<T>| if transposed { e.row } else { e.col };

    let mut i = 0;
    while i < elems.len() {
        let band = major(&elems[i]) / dim;
        let mut j = i + 1;
        while j < elems.len() && major(&elems[j]) / dim == band {
            j += 1;
        }
        // Strips inside the band that are fully populated: exactly `dim`
        // plain elements at consecutive major positions.
        let band_start = band * dim;
        let mut full: Vec<(u64, Vec<usize>)> = Vec::new();
        let mut k = i;
        while k < j {
            let m = minor(&elems[k]);
            let mut l = k + 1;
            while l < j && minor(&elems[l]) == m {
                l += 1;
            }
            let complete = l - k == dim as usize
                && elems[k..l].iter().all(|e| e.tag.is_none())
                && elems[k..l]
                    .iter()
                    .enumerate()
                    .all(|(s, e)| major(e) == band_start + s as u64);
            if complete {
                full.push((m, (k..l).collect()));
            }
            k = l;
        }

        // Merge adjacent full strips into rectangles of up to 8 strips.
        let mut s = 0;
        while s < full.len() {
            let mut t = s + 1;
            while t < full.len() && full[t].0 == full[t - 1].0 + 1 && t - s < 8 {
                t += 1;
            }
            let width = t - s;
            let total = width * dim as usize;
            if width >= 2 && total >= config.min_unit_size.max(2) && total <= MAX_UNIT_SIZE {
                let members: Vec<usize> =
                    full[s..t].iter().flat_map(|(_, idx)| idx.clone()).collect();
                let (rows, cols) = if transposed {
                    (width as u8, dim as u8)
                } else {
                    (dim as u8, width as u8)
                };
                let base: f64 = members
                    .iter()
                    .map(|&m| {
                        let e = &elems[m];
                        baseline.get(&(e.row, e.col)).copied().unwrap_or(1.0)
                    })
                    .sum();
                f(&CandidateRun {
                    pattern: Pattern::Block { rows, cols },
                    members,
                    deltas: Vec::new(),
                    saved_bytes: base - 3.0,
                });
            }
            s = t;
        }

        i = j;
    }
}

fn sample_windows(len: usize, config: &CsxConfig) -> Option<Vec<std::ops::Range<usize>>> {
    let samples = config.samples?;
    if samples == 0 || len == 0 || config.sampling_portion >= 1.0 {
        return None;
    }
    let covered = (len as f64 * config.sampling_portion) as usize;
    let window = (covered / samples).max(1);
    let stride = len / samples;
    Some(
        (0..samples)
            .map(|s| {
                let start = (s * stride).min(len.saturating_sub(1));
                start..(start + window).min(len)
            })
            .collect(),
    )
}

fn sample_scale(config: &CsxConfig) -> f64 {
    match config.samples {
        Some(s) if s > 0 && config.sampling_portion < 1.0 => 1.0 / config.sampling_portion,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Element;

    fn diag_matrix(n: u64) -> ElementStore<f64> {
        let elems = (0..n).map(|i| Element::new(i, i, 1.0)).collect();
        ElementStore::new(n, n, elems)
    }

    fn test_config() -> CsxConfig {
        CsxConfig {
            nr_threads: 1,
            ..CsxConfig::default()
        }
    }

    #[test]
    fn test_diagonal_matrix_selects_diag() {
        let mut store = diag_matrix(64);
        let report = tune_elements(&mut store, &test_config());
        assert_eq!(report.rounds.len(), 1);
        let (order, pattern, stats) = report.rounds[0];
        assert_eq!(order, Order::Diag);
        assert_eq!(pattern, Pattern::Diag(DeltaWidth::U8));
        assert_eq!(stats.total_nnz, 64);
        // One head element left carrying the whole run.
        assert_eq!(store.elems.len(), 1);
        assert_eq!(store.elems[0].nnz(), 64);
    }

    #[test]
    fn test_dense_block_selects_block() {
        let mut elems = Vec::new();
        for i in 0..4u64 {
            for j in 0..4u64 {
                elems.push(Element::new(i, j, 1.0));
            }
        }
        let mut store = ElementStore::new(4, 4, elems);
        let mut config = test_config();
        config.xform_conf = vec![Order::Row, Order::BlockRow(4)];
        let report = tune_elements(&mut store, &config);
        assert_eq!(report.rounds.len(), 1);
        let (_, pattern, stats) = report.rounds[0];
        assert_eq!(pattern, Pattern::Block { rows: 4, cols: 4 });
        assert_eq!(stats.total_nnz, 16);
        assert_eq!(store.elems.len(), 1);
    }

    #[test]
    fn test_sparse_rows_leave_no_patterns() {
        // Scattered elements with nothing to merge.
        let elems = vec![
            Element::new(0, 5, 1.0),
            Element::new(3, 1, 2.0),
            Element::new(7, 6, 3.0),
        ];
        let mut store = ElementStore::new(8, 8, elems);
        let report = tune_elements(&mut store, &test_config());
        assert!(report.rounds.is_empty());
        assert_eq!(store.elems.len(), 3);
        assert!(store.elems.iter().all(|e| e.tag.is_none()));
    }

    #[test]
    fn test_bidiagonal_encodes_both_lines() {
        let mut elems = Vec::new();
        for i in 0..32u64 {
            elems.push(Element::new(i, i, 1.0));
            if i + 1 < 32 {
                elems.push(Element::new(i, i + 1, 1.0));
            }
        }
        let mut store = ElementStore::new(32, 32, elems);
        let report = tune_elements(&mut store, &test_config());
        assert!(!report.rounds.is_empty());
        // Both diagonal lines end up as single tagged heads.
        let tagged: Vec<_> = store.elems.iter().filter(|e| e.tag.is_some()).collect();
        assert_eq!(tagged.len(), 2);
        assert_eq!(store.nnz(), 63);
    }

    #[test]
    fn test_encoded_elements_not_reclaimed() {
        let mut store = diag_matrix(16);
        let config = test_config();
        let _ = tune_elements(&mut store, &config);
        let first_len = store.elems.len();
        // A second pass finds nothing new to encode.
        let report = tune_elements(&mut store, &config);
        assert!(report.rounds.is_empty());
        assert_eq!(store.elems.len(), first_len);
    }
}
