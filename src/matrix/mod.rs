// Matrix data structures: element store, CSR input, MMF input.

pub mod conversion;
pub mod csr;
pub mod elements;
pub mod mmf;

pub use conversion::{from_sprs, to_sprs};
pub use csr::{CsrInput, Indexing};
pub use elements::{Element, ElementStore, Order, PatternTag};

use std::ops::AddAssign;

use num_traits::Num;

/// Capability set required of a matrix value type.
///
/// The core only needs a ring with `+=`, plus little-endian serialization
/// for the persisted format and `f64` conversions for numerical checks. The
/// two required instantiations are `f64` and `f32`.
pub trait CsxValue:
    Copy + Num + AddAssign + PartialOrd + Send + Sync + std::fmt::Debug + std::fmt::Display + 'static
{
    /// Serialized size in bytes, recorded in the persisted header.
    const BYTES: usize;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

impl CsxValue for f64 {
    const BYTES: usize = 8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f64::from_le_bytes(bytes[..8].try_into().unwrap())
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }
}

impl CsxValue for f32 {
    const BYTES: usize = 4;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes(bytes[..4].try_into().unwrap())
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

/// Column/row index types accepted at the CSR input boundary. The internal
/// representation always widens to `u64`.
pub trait CsxIndex: Copy + Send + Sync {
    fn as_u64(self) -> u64;
}

impl CsxIndex for u32 {
    fn as_u64(self) -> u64 {
        self as u64
    }
}

impl CsxIndex for u64 {
    fn as_u64(self) -> u64 {
        self
    }
}

impl CsxIndex for usize {
    fn as_u64(self) -> u64 {
        self as u64
    }
}
