//! Error types returned by the library boundary.

use thiserror::Error;

/// Errors reported by tuning, access and kernel operations.
///
/// Warnings (a save path falling back to the default, an out-of-bounds set
/// being skipped, a pattern instance demoted during building) are not errors;
/// they are reported through the `log` facade and never fail an operation.
#[derive(Error, Debug)]
pub enum CsxError {
    #[error("invalid argument: {0}")]
    ArgInvalid(String),

    #[error("row/column index outside the matrix dimensions")]
    OutOfBounds,

    #[error("file I/O failed: {0}")]
    FileIo(String),

    #[error("malformed input matrix: {0}")]
    InputMat(String),

    #[error("building the tuned matrix failed: {0}")]
    TunedMat(String),

    #[error("no explicit entry at the requested position")]
    EntryNotFound,

    #[error("matrix and vector dimensions disagree")]
    DimMismatch,
}

impl From<std::io::Error> for CsxError {
    fn from(e: std::io::Error) -> Self {
        CsxError::FileIo(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CsxError>;
