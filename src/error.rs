//! Error types for bnstat

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using bnstat's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or running a batch-norm invocation
#[derive(Error, Debug)]
pub enum Error {
    /// Shape mismatch between an operand and what the operation expects
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// DType mismatch between operands
    #[error("DType mismatch: {lhs:?} vs {rhs:?}")]
    DTypeMismatch {
        /// Left-hand side dtype
        lhs: DType,
        /// Right-hand side dtype
        rhs: DType,
    },

    /// The storage precisions of input, affine parameters and running stats do not form
    /// a supported combination for the requested working precision
    #[error(
        "Unsupported precision combination: input {input:?}, params {param:?}, running {running:?} (working {working:?})"
    )]
    UnsupportedPrecision {
        /// Input / output storage dtype
        input: DType,
        /// Weight / bias storage dtype
        param: Option<DType>,
        /// Running statistics storage dtype
        running: Option<DType>,
        /// Working precision
        working: DType,
    },

    /// The workspace granted for cross-partition merge is missing or too small
    #[error("Insufficient workspace: {required} bytes required, {available} available")]
    InsufficientWorkspace {
        /// Bytes the staging area needs
        required: usize,
        /// Bytes granted by the plan
        available: usize,
    },

    /// A worker's tile buffers do not fit its working-memory budget
    #[error("Insufficient working memory: {required} bytes required, {available} available")]
    InsufficientWorkingMemory {
        /// Bytes one worker needs for its buffers
        required: usize,
        /// Per-worker budget from the plan
        available: usize,
    },

    /// Bessel correction requested with a single-element reduction axis
    #[error("Bessel correction is undefined for reduction extent {reduce_size}")]
    BesselUndefined {
        /// Reduction-axis extent
        reduce_size: usize,
    },

    /// The partition plan is malformed
    #[error("Invalid partition plan: {reason}")]
    InvalidPlan {
        /// What is wrong with the plan
        reason: String,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Index out of bounds
    #[error("Index {index} out of bounds for region of size {size}")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Size of the region
        size: usize,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an invalid plan error
    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Whether this error is a configuration failure detected before any compute.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPrecision { .. }
                | Self::InsufficientWorkspace { .. }
                | Self::InsufficientWorkingMemory { .. }
                | Self::BesselUndefined { .. }
                | Self::InvalidPlan { .. }
                | Self::InvalidArgument { .. }
        )
    }
}
