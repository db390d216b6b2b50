//! Save and restore of tuned matrices.
//!
//! Layout, all integers little-endian: magic `CSX\0` | version (u32) |
//! nrows, ncols, nnz (u64 x3) | flags (u8: bit 0 symmetric, bit 1 aligned) |
//! value-size (u8) | index-size (u8) | nr_threads (u32) | per-thread
//! headers (row_start, nr_rows, nr_nzeros, ctl_len as u64, node as u32) |
//! concatenated values | concatenated ctl streams | permutation flag (u8)
//! and, if set, length-prefixed permutation entries.
//!
//! A file may be restored on a host with a different NUMA topology: CPU and
//! node assignments are re-mapped from the restoring configuration.

use std::fs;
use std::path::Path;

use crate::config::CsxConfig;
use crate::csx::matrix::{CsxMatrix, SpmMt};
use crate::error::{CsxError, Result};
use crate::matrix::CsxValue;
use crate::runtime::numa;

const MAGIC: &[u8; 4] = b"CSX\0";
const VERSION: u32 = 1;

const FLAG_SYMMETRIC: u8 = 0x01;
const FLAG_ALIGNED: u8 = 0x02;

pub fn save<T: CsxValue>(mt: &SpmMt<T>, permutation: Option<&[u64]>, path: &Path) -> Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&mt.nrows.to_le_bytes());
    out.extend_from_slice(&mt.ncols.to_le_bytes());
    out.extend_from_slice(&mt.nnz.to_le_bytes());

    let mut flags = 0u8;
    if mt.symmetric {
        flags |= FLAG_SYMMETRIC;
    }
    if mt.aligned {
        flags |= FLAG_ALIGNED;
    }
    out.push(flags);
    out.push(T::BYTES as u8);
    out.push(8); // column indices widen to u64 internally
    out.extend_from_slice(&(mt.nr_threads() as u32).to_le_bytes());

    for t in &mt.threads {
        out.extend_from_slice(&t.row_start.to_le_bytes());
        out.extend_from_slice(&t.nr_rows.to_le_bytes());
        out.extend_from_slice(&t.nr_nzeros.to_le_bytes());
        out.extend_from_slice(&(t.ctl.len() as u64).to_le_bytes());
        out.extend_from_slice(&(t.node as u32).to_le_bytes());
    }
    for t in &mt.threads {
        for &v in &t.values {
            v.write_le(&mut out);
        }
    }
    for t in &mt.threads {
        out.extend_from_slice(&t.ctl);
    }

    match permutation {
        Some(p) => {
            out.push(1);
            out.extend_from_slice(&(p.len() as u64).to_le_bytes());
            for &e in p {
                out.extend_from_slice(&e.to_le_bytes());
            }
        }
        None => out.push(0),
    }

    fs::write(path, &out).map_err(|e| CsxError::FileIo(format!("{}: {}", path.display(), e)))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(CsxError::TunedMat("truncated CSX file".into()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

pub fn restore<T: CsxValue>(
    path: &Path,
    config: &CsxConfig,
) -> Result<(SpmMt<T>, Option<Vec<u64>>)> {
    let buf =
        fs::read(path).map_err(|e| CsxError::FileIo(format!("{}: {}", path.display(), e)))?;
    let mut r = Reader { buf: &buf, pos: 0 };

    if r.take(4)? != MAGIC {
        return Err(CsxError::TunedMat("not a CSX file".into()));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(CsxError::TunedMat(format!(
            "unsupported CSX file version {}",
            version
        )));
    }
    let nrows = r.u64()?;
    let ncols = r.u64()?;
    let nnz = r.u64()?;
    let flags = r.u8()?;
    let value_size = r.u8()?;
    if value_size as usize != T::BYTES {
        return Err(CsxError::TunedMat(format!(
            "file stores {}-byte values, expected {}",
            value_size,
            T::BYTES
        )));
    }
    let _index_size = r.u8()?;
    let nr_threads = r.u32()? as usize;
    if nr_threads == 0 {
        return Err(CsxError::TunedMat("file declares zero threads".into()));
    }

    struct Header {
        row_start: u64,
        nr_rows: u64,
        nr_nzeros: u64,
        ctl_len: u64,
    }
    let mut headers = Vec::with_capacity(nr_threads);
    for _ in 0..nr_threads {
        let row_start = r.u64()?;
        let nr_rows = r.u64()?;
        let nr_nzeros = r.u64()?;
        let ctl_len = r.u64()?;
        let _node = r.u32()?;
        headers.push(Header {
            row_start,
            nr_rows,
            nr_nzeros,
            ctl_len,
        });
    }

    // CPU/node placement is re-mapped from the restoring host's config.
    let affinity = {
        let cpus = config.cpu_affinity();
        if cpus.len() >= nr_threads {
            cpus
        } else {
            (0..nr_threads).collect()
        }
    };

    let mut all_values: Vec<Vec<T>> = Vec::with_capacity(nr_threads);
    for h in &headers {
        let raw = r.take(h.nr_nzeros as usize * T::BYTES)?;
        let values = raw.chunks_exact(T::BYTES).map(T::read_le).collect();
        all_values.push(values);
    }

    let mut threads = Vec::with_capacity(nr_threads);
    for (i, h) in headers.iter().enumerate() {
        let ctl = r.take(h.ctl_len as usize)?.to_vec();
        let cpu = affinity[i];
        let node = numa::node_of_cpu(cpu).unwrap_or(0);
        let mut part = CsxMatrix::new(
            std::mem::take(&mut all_values[i]),
            ctl,
            h.row_start,
            h.nr_rows,
            node,
            cpu,
        );
        numa::bind_to_node(&mut part.values, node);
        numa::bind_to_node(&mut part.ctl, node);
        threads.push(part);
    }

    let permutation = match r.u8()? {
        0 => None,
        _ => {
            let len = r.u64()? as usize;
            let mut p = Vec::with_capacity(len);
            for _ in 0..len {
                p.push(r.u64()?);
            }
            Some(p)
        }
    };

    let total: u64 = threads.iter().map(|t| t.nr_nzeros).sum();
    if total != nnz {
        return Err(CsxError::TunedMat(format!(
            "per-thread non-zeros sum to {} but header says {}",
            total, nnz
        )));
    }

    let mt = SpmMt::new(
        nrows,
        ncols,
        nnz,
        flags & FLAG_SYMMETRIC != 0,
        flags & FLAG_ALIGNED != 0,
        threads,
    );
    Ok((mt, permutation))
}
