//! Tensor types
//!
//! This module provides the host `Tensor` type consumed and produced by batch-norm
//! operations: a dtype-tagged contiguous buffer plus its shape.

mod core;
mod shape;
mod storage;

pub use core::Tensor;
pub use shape::Shape;
pub use storage::Storage;
