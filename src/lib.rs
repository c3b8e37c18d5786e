//! # bnstat
//!
//! **Streaming batch-normalization statistics for Rust.**
//!
//! bnstat computes per-channel mean and variance over every axis except the channel
//! axis, normalizes the input with them, and maintains running estimates for
//! inference. Statistics are accumulated in a working precision that may be wider than
//! the storage format, with numerically stable algorithms throughout.
//!
//! ## Features
//!
//! - **Welford accumulation**: lane-parallel streaming mean / M2 over tiles
//! - **Two-pass accumulation**: binary-tree sums with power-of-two pre-scaling
//! - **Partitioning**: split the channel axis, or split the reduction axis and merge
//!   per-worker partials with Chan's formula after a barrier
//! - **Precisions**: f64, f32, f16 and bf16 storage; f32 or f64 working precision
//! - **Double-buffered tiles**: the next tile loads while the current one accumulates
//!
//! ## Quick Start
//!
//! ```
//! use bnstat::prelude::*;
//!
//! let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &[4, 2])?;
//! let plan = PartitionPlan::builder(ReduceDims::new(4, 2, 1)).build()?;
//! let client = CpuClient::new();
//!
//! let out = client.batch_norm(BatchNormInput::new(&x), &plan, &BatchNormConfig::default())?;
//! assert_eq!(out.output.shape(), &[4, 2]);
//! # Ok::<(), bnstat::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): multi-threaded split-kept accumulation, normalize and tile
//!   prefetch

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dtype;
pub mod error;
pub mod ops;
pub mod plan;
pub mod runtime;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::BatchNormConfig;
    pub use crate::dtype::{AccumulationPrecision, DType};
    pub use crate::error::{Error, Result};
    pub use crate::ops::{BatchNormInput, BatchNormOps, BatchNormOutput, BatchStats};
    pub use crate::plan::{
        AccumulationStrategy, ChannelLayout, PartitionPlan, PartitionStrategy, ReduceDims,
    };
    pub use crate::runtime::cpu::CpuClient;
    pub use crate::tensor::Tensor;
}
