//! Minimal MatrixMarket (MMF) coordinate reader.
//!
//! Supports the `matrix coordinate real general|symmetric` flavor, which is
//! what the tuning pipeline consumes. Entries are one-based in the file and
//! converted to the internal zero-based indexing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{CsxError, Result};
use crate::matrix::{CsxValue, Element, ElementStore};

/// A parsed MMF file: the element sequence plus the symmetry declared in the
/// header banner.
#[derive(Debug)]
pub struct MmfInput<T> {
    pub store: ElementStore<T>,
    pub symmetric: bool,
}

/// Reads an MMF file from `path`.
pub fn read_mmf<T: CsxValue>(path: &Path) -> Result<MmfInput<T>> {
    let file = File::open(path)
        .map_err(|e| CsxError::FileIo(format!("{}: {}", path.display(), e)))?;
    let mut lines = BufReader::new(file).lines();

    let banner = lines
        .next()
        .ok_or_else(|| CsxError::InputMat("empty MMF file".into()))?
        .map_err(CsxError::from)?;
    let symmetric = parse_banner(&banner)?;

    // Skip comments, then the size line.
    let mut size_line = None;
    for line in lines.by_ref() {
        let line = line.map_err(CsxError::from)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        size_line = Some(line);
        break;
    }
    let size_line =
        size_line.ok_or_else(|| CsxError::InputMat("missing MMF size line".into()))?;
    let dims: Vec<u64> = size_line
        .split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect();
    if dims.len() != 3 {
        return Err(CsxError::InputMat("malformed MMF size line".into()));
    }
    let (nrows, ncols, nnz) = (dims[0], dims[1], dims[2] as usize);

    let mut elems = Vec::with_capacity(nnz);
    for line in lines {
        let line = line.map_err(CsxError::from)?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let mut tok = trimmed.split_whitespace();
        let row: u64 = tok
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| CsxError::InputMat("malformed MMF entry".into()))?;
        let col: u64 = tok
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| CsxError::InputMat("malformed MMF entry".into()))?;
        let val: f64 = match tok.next() {
            Some(t) => t
                .parse()
                .map_err(|_| CsxError::InputMat("malformed MMF value".into()))?,
            None => 1.0,
        };
        if row == 0 || col == 0 || row > nrows || col > ncols {
            return Err(CsxError::InputMat(format!(
                "MMF entry ({}, {}) out of bounds",
                row, col
            )));
        }
        elems.push(Element::new(row - 1, col - 1, T::from_f64(val)));
    }

    if elems.len() != nnz {
        return Err(CsxError::InputMat(format!(
            "MMF header announces {} entries but {} were read",
            nnz,
            elems.len()
        )));
    }

    Ok(MmfInput {
        store: ElementStore::new(nrows, ncols, elems),
        symmetric,
    })
}

fn parse_banner(banner: &str) -> Result<bool> {
    let tokens: Vec<String> = banner.split_whitespace().map(str::to_lowercase).collect();
    if tokens.len() < 5
        || tokens[0] != "%%matrixmarket"
        || tokens[1] != "matrix"
        || tokens[2] != "coordinate"
    {
        return Err(CsxError::InputMat("unsupported MMF banner".into()));
    }
    if tokens[3] != "real" && tokens[3] != "integer" && tokens[3] != "pattern" {
        return Err(CsxError::InputMat(format!(
            "unsupported MMF field type '{}'",
            tokens[3]
        )));
    }
    match tokens[4].as_str() {
        "general" => Ok(false),
        "symmetric" => Ok(true),
        other => Err(CsxError::InputMat(format!(
            "unsupported MMF symmetry '{}'",
            other
        ))),
    }
}
