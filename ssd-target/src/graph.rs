//! Typed operator graph over the numeric kernels.
//!
//! A [Program] is an append-only list of [Operator]s over declared
//! variables. Each operator is checked against the [OP_REGISTRY] when
//! appended, and an [Executor] evaluates the program over a [Scope] of
//! [LodTensor]s.

pub use executor::*;
pub use operator::*;
pub use program::*;
pub use registry::*;
pub use tensor::*;

mod executor;
mod operator;
mod program;
mod registry;
mod tensor;
