//! CPU implementation of batch-norm operations.

mod batch_norm;
