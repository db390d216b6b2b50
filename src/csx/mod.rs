// The CSX format: control stream primitives, builder, tuned matrices,
// random access and persistence.

pub mod build;
pub mod ctl;
pub mod getset;
pub mod matrix;
pub mod persist;

pub use build::build_partitions;
pub use matrix::{CsxMatrix, SpmMt};
