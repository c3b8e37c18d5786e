//! Operation traits.
//!
//! Implementations are in the backend-specific modules (cpu/).

mod batch_norm;

pub use batch_norm::{BatchNormInput, BatchNormOps, BatchNormOutput, BatchStats};
