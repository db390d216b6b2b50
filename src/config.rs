//! Runtime configuration for tuning and the parallel runtime.
//!
//! The original runtime kept this state in process-wide singletons; here it
//! is an explicit [`CsxConfig`] passed into [`crate::Matrix::tune`]. A config
//! can be built programmatically or loaded from `CSX_*` environment keys.

use std::env;
use std::path::PathBuf;

use crate::matrix::Order;

/// Default minimum run length for emitting a non-trivial pattern unit.
pub const DEFAULT_MIN_UNIT_SIZE: usize = 4;

/// Default selection threshold: a pattern must save at least 4 bytes per 64
/// non-zeros considered, or the tuning iteration stops.
pub const DEFAULT_MIN_SCORE_PER_NNZ: f64 = 4.0 / 64.0;

/// Configuration for matrix tuning and the SpMV runtime.
#[derive(Debug, Clone)]
pub struct CsxConfig {
    /// Number of worker threads (and partitions).
    pub nr_threads: usize,

    /// CPU ids the workers are pinned to, one per thread. When `None`,
    /// workers are pinned to CPUs `0..nr_threads`.
    pub affinity: Option<Vec<usize>>,

    /// Traversals the substructure detector is allowed to try.
    pub xform_conf: Vec<Order>,

    /// Number of sampling windows for the statistics pass. `None` scans the
    /// full element sequence.
    pub samples: Option<usize>,

    /// Fraction of the element sequence covered by the sampling windows.
    pub sampling_portion: f64,

    /// Build the symmetric variant (lower triangle stored, mirrored SpMV).
    pub symmetric: bool,

    /// Minimum run length for a non-trivial pattern; shorter runs degrade to
    /// delta units.
    pub min_unit_size: usize,

    /// Selection threshold in saved bytes per considered non-zero.
    pub min_score_per_nnz: f64,

    /// Store packed delta bodies naturally aligned (fast readers) instead of
    /// packed back-to-back.
    pub aligned_deltas: bool,

    /// Destination for [`crate::Matrix::save`] when no path is given.
    pub csx_file: Option<PathBuf>,
}

impl Default for CsxConfig {
    fn default() -> Self {
        Self {
            nr_threads: num_cpus::get(),
            affinity: None,
            xform_conf: default_xform_conf(),
            samples: None,
            sampling_portion: 1.0,
            symmetric: false,
            min_unit_size: DEFAULT_MIN_UNIT_SIZE,
            min_score_per_nnz: DEFAULT_MIN_SCORE_PER_NNZ,
            aligned_deltas: true,
            csx_file: None,
        }
    }
}

/// Traversals tried when `CSX_XFORM_CONF` is not set.
pub fn default_xform_conf() -> Vec<Order> {
    let mut orders = vec![Order::Row, Order::Diag, Order::AntiDiag];
    for r in 2..=8 {
        orders.push(Order::BlockRow(r));
    }
    orders
}

impl CsxConfig {
    /// Builds a configuration from the `CSX_*` environment keys, falling
    /// back to defaults for keys that are unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_parse::<usize>("CSX_NR_THREADS") {
            if n > 0 {
                cfg.nr_threads = n;
            }
        }

        if let Ok(list) = env::var("CSX_AFFINITY") {
            let cpus: Vec<usize> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if cpus.len() == cfg.nr_threads {
                cfg.affinity = Some(cpus);
            } else if !cpus.is_empty() {
                log::warn!(
                    "CSX_AFFINITY lists {} cpus for {} threads; ignoring",
                    cpus.len(),
                    cfg.nr_threads
                );
            }
        }

        if let Ok(list) = env::var("CSX_XFORM_CONF") {
            let orders: Vec<Order> = list
                .split(',')
                .filter_map(|s| Order::parse(s.trim()))
                .collect();
            if !orders.is_empty() {
                cfg.xform_conf = orders;
            }
        }

        cfg.samples = env_parse::<usize>("CSX_SAMPLES").filter(|&s| s > 0);
        if let Some(p) = env_parse::<f64>("CSX_SAMPLING_PORTION") {
            if p > 0.0 && p <= 1.0 {
                cfg.sampling_portion = p;
            }
        }

        if let Some(b) = env_parse::<u8>("CSX_SYMMETRIC") {
            cfg.symmetric = b != 0;
        }

        if let Some(m) = env_parse::<usize>("CSX_MIN_UNIT_SIZE") {
            if (2..=255).contains(&m) {
                cfg.min_unit_size = m;
            }
        }

        if let Some(s) = env_parse::<f64>("CSX_MIN_SCORE") {
            if s >= 0.0 {
                cfg.min_score_per_nnz = s;
            }
        }

        if let Some(b) = env_parse::<u8>("CSX_ALIGNED") {
            cfg.aligned_deltas = b != 0;
        }

        if let Ok(path) = env::var("CSX_FILE") {
            cfg.csx_file = Some(PathBuf::from(path));
        }

        cfg
    }

    /// Effective CPU assignment for each worker thread.
    pub fn cpu_affinity(&self) -> Vec<usize> {
        match &self.affinity {
            Some(cpus) => cpus.clone(),
            None => (0..self.nr_threads).collect(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
