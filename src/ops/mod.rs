//! Batch-norm operations
//!
//! Operations are defined as traits implemented by the runtime client, so the client's
//! parallelism settings apply to every call.
//!
//! ```text
//! CpuClient
//!   └── implements BatchNormOps
//!         ├── batch_norm   (training or inference pass)
//!         ├── batch_stats  (statistics only)
//!         └── merge_stats  (combine per-partition statistics)
//! ```

mod cpu;
mod traits;

pub use traits::{BatchNormInput, BatchNormOps, BatchNormOutput, BatchStats};
