//! CPU runtime implementation
//!
//! The CPU runtime runs every phase of a batch-norm invocation on the host: tile
//! staging, accumulation kernels, cross-partition merge and the normalize pass.

mod client;
pub(crate) mod engine;
pub(crate) mod helpers;
pub mod kernels;
pub mod pipeline;
pub mod workspace;

pub use client::{CpuClient, DEFAULT_RAYON_MIN_LEN, ParallelismConfig};
