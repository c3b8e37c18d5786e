//! Batch normalization operations trait.

use crate::config::BatchNormConfig;
use crate::dtype::AccumulationPrecision;
use crate::error::Result;
use crate::plan::PartitionPlan;
use crate::tensor::Tensor;

/// Operands of one batch-norm invocation
#[derive(Copy, Clone, Debug)]
pub struct BatchNormInput<'a> {
    /// Input tensor `[N, C, *spatial]` (or `[*, C]` for channels-last)
    pub input: &'a Tensor,
    /// Affine weight (gamma) `[C]`; ones when absent
    pub weight: Option<&'a Tensor>,
    /// Affine bias (beta) `[C]`; zeros when absent
    pub bias: Option<&'a Tensor>,
    /// Running mean `[C]`
    pub running_mean: Option<&'a Tensor>,
    /// Running variance `[C]`
    pub running_var: Option<&'a Tensor>,
}

impl<'a> BatchNormInput<'a> {
    /// Input without affine parameters or running statistics
    pub fn new(input: &'a Tensor) -> Self {
        Self {
            input,
            weight: None,
            bias: None,
            running_mean: None,
            running_var: None,
        }
    }

    /// Attach affine weight and bias
    pub fn with_affine(mut self, weight: &'a Tensor, bias: &'a Tensor) -> Self {
        self.weight = Some(weight);
        self.bias = Some(bias);
        self
    }

    /// Attach running mean and variance
    pub fn with_running(mut self, mean: &'a Tensor, var: &'a Tensor) -> Self {
        self.running_mean = Some(mean);
        self.running_var = Some(var);
        self
    }
}

/// Results of one batch-norm invocation
#[derive(Clone, Debug)]
pub struct BatchNormOutput {
    /// Normalized output, same shape and dtype as the input
    pub output: Tensor,
    /// Updated running mean (training with running statistics only)
    pub running_mean: Option<Tensor>,
    /// Updated running variance (training with running statistics only)
    pub running_var: Option<Tensor>,
    /// Per-channel batch mean in working precision (training only)
    pub batch_mean: Option<Tensor>,
    /// Per-channel `1 / sqrt(var + eps)` in working precision (training only)
    pub batch_rstd: Option<Tensor>,
}

/// Per-channel batch statistics
#[derive(Clone, Debug)]
pub struct BatchStats {
    /// Mean `[C]`
    pub mean: Tensor,
    /// Biased variance `[C]`
    pub var: Tensor,
    /// Number of elements reduced per channel
    pub count: usize,
}

/// Batch normalization operations
pub trait BatchNormOps {
    /// Batch normalization: `y = (x - mean) * rsqrt(var + eps) * weight + bias`
    ///
    /// In training mode the statistics come from `input` and are computed with the
    /// given partition plan; running statistics, when supplied, are blended with the
    /// configured momentum. In inference mode the running statistics are used directly
    /// and the plan only has to match the input geometry.
    ///
    /// Every planning-time error (shape, precision, plan, workspace, working memory,
    /// Bessel correction on a single-element axis) is raised before any element is read.
    fn batch_norm(
        &self,
        input: BatchNormInput<'_>,
        plan: &PartitionPlan,
        config: &BatchNormConfig,
    ) -> Result<BatchNormOutput>;

    /// Per-channel mean and biased variance of `input`, without normalizing
    fn batch_stats(
        &self,
        input: &Tensor,
        plan: &PartitionPlan,
        config: &BatchNormConfig,
    ) -> Result<BatchStats>;

    /// Combine statistics computed on separate partitions.
    ///
    /// `mean` and `var` are `[P, C]` (biased variances), `counts` holds the element
    /// count of each of the `P` partitions. Partials are merged pairwise with the
    /// binary tree; the result is in `mean`'s dtype.
    fn merge_stats(
        &self,
        mean: &Tensor,
        var: &Tensor,
        counts: &[usize],
        precision: AccumulationPrecision,
    ) -> Result<BatchStats>;
}
