//! Target assignment and multi-task loss for SSD-style detectors.
//!
//! The [ops] module holds the numeric kernels. The [graph] and [layers]
//! modules describe the same computations as a typed operator graph.

mod common;
pub mod config;
pub mod error;
pub mod graph;
pub mod layers;
pub mod lod;
pub mod ops;
pub mod ssd_loss;

pub use error::*;
pub use lod::*;
