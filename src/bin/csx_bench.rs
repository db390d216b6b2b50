//! Benchmark and correctness driver for CSX SpMV.
//!
//! Usage: `csx_bench <mmf_file>...`
//!
//! Each matrix is tuned with the configuration from the `CSX_*` environment
//! keys, checked against a single-threaded reference SpMV, then benchmarked.
//! Exit codes: 0 on pass, 1 on argument error, 2 on numerical check failure.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use csx::{matvec_kernel, CsxConfig, Input, Matrix, Vector};

const BENCH_LOOPS: usize = 128;
const CHECK_TOLERANCE: f64 = 1e-10;

fn main() -> ExitCode {
    env_logger::init();

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() || files.iter().any(|f| f.starts_with('-')) {
        eprintln!("usage: csx_bench <mmf_file>...");
        return ExitCode::from(1);
    }

    let config = CsxConfig::from_env();
    for file in &files {
        match run_one(Path::new(file), &config) {
            Ok(true) => {}
            Ok(false) => return ExitCode::from(2),
            Err(e) => {
                eprintln!("csx_bench: {}: {}", file, e);
                return ExitCode::from(1);
            }
        }
    }
    csx::shutdown();
    ExitCode::SUCCESS
}

fn run_one(path: &Path, config: &CsxConfig) -> csx::Result<bool> {
    // The reference triples are read up-front; the input itself moves into
    // tuning.
    let reference = csx::matrix::mmf::read_mmf::<f64>(path)?;
    let input = Input::<f64>::from_mmf(path)?;
    let nrows = input.nrows() as usize;
    let ncols = input.ncols() as usize;
    let nnz = input.nnz();

    let t0 = Instant::now();
    let matrix = Matrix::tune(input, config)?;
    let pre_time = t0.elapsed().as_secs_f64();

    let x = Vector::random(ncols, -1.0, 1.0);
    let mut y = Vector::new(nrows);
    matvec_kernel(1.0, &matrix, &x, 0.0, &mut y)?;

    // Single-threaded oracle straight from the triples. A symmetric build
    // stores the lower triangle and mirrors the off-diagonal entries.
    let mirror = matrix.symmetric();
    let mut y_ref = vec![0.0f64; nrows];
    for e in &reference.store.elems {
        if mirror && e.col > e.row {
            continue;
        }
        y_ref[e.row as usize] += e.value * x[e.col as usize];
        if mirror && e.row != e.col {
            y_ref[e.col as usize] += e.value * x[e.row as usize];
        }
    }

    let mut max_err = 0.0f64;
    let mut max_ref = 0.0f64;
    for i in 0..nrows {
        max_err = max_err.max((y[i] - y_ref[i]).abs());
        max_ref = max_ref.max(y_ref[i].abs());
    }
    if max_ref > 0.0 && max_err / max_ref > CHECK_TOLERANCE {
        eprintln!(
            "{}: check failed, relative error {:.3e}",
            path.display(),
            max_err / max_ref
        );
        return Ok(false);
    }

    let t1 = Instant::now();
    for _ in 0..BENCH_LOOPS {
        matvec_kernel(1.0, &matrix, &x, 0.0, &mut y)?;
    }
    let secs = t1.elapsed().as_secs_f64();
    let mflops = (BENCH_LOOPS as f64 * nnz as f64 * 2.0) / (1e6 * secs);

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
    println!(
        "m:{} f:{} s:{} pt:{:.6} t:{:.6} r:{:.2}",
        if matrix.symmetric() { "csx-sym" } else { "csx" },
        name,
        matrix.csx_size(),
        pre_time,
        secs,
        mflops
    );
    Ok(true)
}
