//! CPU implementation of batch normalization operations.

use crate::config::BatchNormConfig;
use crate::dtype::{AccumulationPrecision, DType, PrecisionSet, WorkingFloat};
use crate::error::{Error, Result};
use crate::ops::{BatchNormInput, BatchNormOps, BatchNormOutput, BatchStats};
use crate::plan::{PartitionPlan, ReduceDims};
use crate::runtime::cpu::{
    CpuClient, engine,
    helpers::dispatch_dtype,
    kernels::{RunningStatsUpdater, WelfordPartial, tree_reduce},
};
use crate::tensor::Tensor;
use tracing::debug;

/// BatchNormOps implementation for the CPU client.
impl BatchNormOps for CpuClient {
    fn batch_norm(
        &self,
        args: BatchNormInput<'_>,
        plan: &PartitionPlan,
        config: &BatchNormConfig,
    ) -> Result<BatchNormOutput> {
        config.validate()?;
        let dims = input_dims(args.input, plan, config)?;
        let param = check_pair(args.weight, args.bias, dims.channels, false, "weight")?;
        let running = check_pair(
            args.running_mean,
            args.running_var,
            dims.channels,
            true,
            "running_mean",
        )?;
        PrecisionSet {
            input: args.input.dtype(),
            param,
            running,
            working: config.precision,
        }
        .validate()?;

        if !config.training && running.is_none() {
            return Err(Error::invalid_argument(
                "running_mean",
                "inference requires running statistics",
            ));
        }
        // R == 0 is the empty path and never reaches the Bessel factor
        if config.training && config.bessel_correction && dims.reduce_size() == 1 {
            return Err(Error::BesselUndefined { reduce_size: 1 });
        }

        match config.precision {
            AccumulationPrecision::F32 => batch_norm_impl::<f32>(self, args, plan, config, dims),
            AccumulationPrecision::F64 => batch_norm_impl::<f64>(self, args, plan, config, dims),
        }
    }

    fn batch_stats(
        &self,
        input: &Tensor,
        plan: &PartitionPlan,
        config: &BatchNormConfig,
    ) -> Result<BatchStats> {
        config.validate()?;
        let dims = input_dims(input, plan, config)?;
        PrecisionSet {
            input: input.dtype(),
            param: None,
            running: None,
            working: config.precision,
        }
        .validate()?;

        match config.precision {
            AccumulationPrecision::F32 => batch_stats_impl::<f32>(self, input, plan, config, dims),
            AccumulationPrecision::F64 => batch_stats_impl::<f64>(self, input, plan, config, dims),
        }
    }

    fn merge_stats(
        &self,
        mean: &Tensor,
        var: &Tensor,
        counts: &[usize],
        precision: AccumulationPrecision,
    ) -> Result<BatchStats> {
        if mean.dtype() != var.dtype() {
            return Err(Error::DTypeMismatch {
                lhs: mean.dtype(),
                rhs: var.dtype(),
            });
        }
        if mean.ndim() != 2 {
            return Err(Error::invalid_argument(
                "mean",
                format!("expected [partitions, channels], got shape {:?}", mean.shape()),
            ));
        }
        if var.shape() != mean.shape() {
            return Err(Error::shape_mismatch(mean.shape(), var.shape()));
        }
        let (partitions, channels) = (mean.shape()[0], mean.shape()[1]);
        if counts.len() != partitions {
            return Err(Error::shape_mismatch(&[partitions], &[counts.len()]));
        }
        PrecisionSet {
            input: mean.dtype(),
            param: None,
            running: None,
            working: precision,
        }
        .validate()?;

        match precision {
            AccumulationPrecision::F32 => merge_stats_impl::<f32>(mean, var, counts, channels),
            AccumulationPrecision::F64 => merge_stats_impl::<f64>(mean, var, counts, channels),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Input geometry, checked against the plan
fn input_dims(input: &Tensor, plan: &PartitionPlan, config: &BatchNormConfig) -> Result<ReduceDims> {
    let dims = ReduceDims::from_shape(input.shape(), config.layout)?;
    if dims != plan.dims() {
        let planned = plan.dims();
        return Err(Error::invalid_plan(format!(
            "plan built for [{}, {}, {}] but input {:?} is [{}, {}, {}]",
            planned.outer,
            planned.channels,
            planned.inner,
            input.shape(),
            dims.outer,
            dims.channels,
            dims.inner
        )));
    }
    Ok(dims)
}

/// Check a pair of per-channel tensors; returns their common dtype if any is present.
///
/// With `paired`, both tensors must be given or neither.
fn check_pair(
    a: Option<&Tensor>,
    b: Option<&Tensor>,
    channels: usize,
    paired: bool,
    arg: &'static str,
) -> Result<Option<DType>> {
    for t in [a, b].into_iter().flatten() {
        if t.shape() != [channels] {
            return Err(Error::shape_mismatch(&[channels], t.shape()));
        }
    }
    match (a, b) {
        (Some(a), Some(b)) if a.dtype() != b.dtype() => Err(Error::DTypeMismatch {
            lhs: a.dtype(),
            rhs: b.dtype(),
        }),
        (Some(_), None) | (None, Some(_)) if paired => Err(Error::invalid_argument(
            arg,
            "mean and variance must be given together",
        )),
        (Some(t), _) | (None, Some(t)) => Ok(Some(t.dtype())),
        (None, None) => Ok(None),
    }
}

fn param_or<W: WorkingFloat>(t: Option<&Tensor>, channels: usize, fill: W) -> Vec<W> {
    t.map_or_else(|| vec![fill; channels], |t| t.to_working::<W>())
}

// ============================================================================
// Typed implementations
// ============================================================================

fn batch_norm_impl<W: WorkingFloat>(
    client: &CpuClient,
    args: BatchNormInput<'_>,
    plan: &PartitionPlan,
    config: &BatchNormConfig,
    dims: ReduceDims,
) -> Result<BatchNormOutput> {
    let x = args.input;
    let eps = W::from_f64(config.epsilon);
    let gamma = param_or(args.weight, dims.channels, W::ONE);
    let beta = param_or(args.bias, dims.channels, W::ZERO);

    if !config.training {
        let (Some(rm), Some(rv)) = (args.running_mean, args.running_var) else {
            return Err(Error::invalid_argument(
                "running_mean",
                "inference requires running statistics",
            ));
        };
        let mean = rm.to_working::<W>();
        let var = rv.to_working::<W>();
        let output = dispatch_dtype!(x.dtype(), T => {
            let y = engine::infer::<T, W>(client, dims, x.as_slice::<T>()?, &mean, &var, &gamma, &beta, eps);
            Tensor::from_vec(y, x.shape())?
        });
        return Ok(BatchNormOutput {
            output,
            running_mean: None,
            running_var: None,
            batch_mean: None,
            batch_rstd: None,
        });
    }

    plan.check_resources(std::mem::size_of::<W>())?;
    let stat_dtype = W::DTYPE;

    if dims.numel() == 0 {
        debug!(?dims, "empty input, skipping statistics");
        return Ok(BatchNormOutput {
            output: Tensor::zeros(x.shape(), x.dtype()),
            running_mean: args.running_mean.cloned(),
            running_var: args.running_var.cloned(),
            batch_mean: Some(Tensor::zeros(&[dims.channels], stat_dtype)),
            batch_rstd: Some(Tensor::full_scalar(&[dims.channels], stat_dtype, f64::NAN)),
        });
    }

    let (output, stats) = dispatch_dtype!(x.dtype(), T => {
        let (y, stats) = engine::train::<T, W>(client, plan, x.as_slice::<T>()?, &gamma, &beta, eps)?;
        (Tensor::from_vec(y, x.shape())?, stats)
    });

    let (running_mean, running_var) = match (args.running_mean, args.running_var) {
        (Some(rm), Some(rv)) => {
            let updater = RunningStatsUpdater::new(
                W::from_f64(config.momentum),
                stats.count,
                config.bessel_correction,
            )?;
            let mut mean = rm.to_working::<W>();
            let mut var = rv.to_working::<W>();
            updater.apply(&stats.mean, &stats.var, &mut mean, &mut var);
            (
                Some(Tensor::from_working(&mean, rm.dtype(), rm.shape())?),
                Some(Tensor::from_working(&var, rv.dtype(), rv.shape())?),
            )
        }
        _ => (None, None),
    };

    Ok(BatchNormOutput {
        output,
        running_mean,
        running_var,
        batch_mean: Some(Tensor::from_vec(stats.mean, &[dims.channels])?),
        batch_rstd: Some(Tensor::from_vec(stats.rstd, &[dims.channels])?),
    })
}

fn batch_stats_impl<W: WorkingFloat>(
    client: &CpuClient,
    input: &Tensor,
    plan: &PartitionPlan,
    config: &BatchNormConfig,
    dims: ReduceDims,
) -> Result<BatchStats> {
    plan.check_resources(std::mem::size_of::<W>())?;
    let shape = [dims.channels];

    if dims.numel() == 0 {
        debug!(?dims, "empty input, skipping statistics");
        return Ok(BatchStats {
            mean: Tensor::zeros(&shape, W::DTYPE),
            var: Tensor::full_scalar(&shape, W::DTYPE, f64::NAN),
            count: dims.reduce_size(),
        });
    }

    let eps = W::from_f64(config.epsilon);
    let stats = dispatch_dtype!(input.dtype(), T => {
        engine::batch_statistics::<T, W>(client, plan, input.as_slice::<T>()?, eps)?
    });
    Ok(BatchStats {
        mean: Tensor::from_vec(stats.mean, &shape)?,
        var: Tensor::from_vec(stats.var, &shape)?,
        count: stats.count,
    })
}

fn merge_stats_impl<W: WorkingFloat>(
    mean: &Tensor,
    var: &Tensor,
    counts: &[usize],
    channels: usize,
) -> Result<BatchStats> {
    let means = mean.to_working::<W>();
    let vars = var.to_working::<W>();
    let partials: Vec<WelfordPartial<W>> = counts
        .iter()
        .enumerate()
        .map(|(p, &count)| {
            let span = p * channels..(p + 1) * channels;
            let n = W::from_count(count);
            WelfordPartial {
                mean: means[span.clone()].to_vec(),
                m2: vars[span].iter().map(|&v| v * n).collect(),
                count,
            }
        })
        .collect();
    debug!(partitions = partials.len(), channels, "merging partition statistics");

    let merged = tree_reduce(partials, |a, b| a.merge(b))
        .unwrap_or_else(|| WelfordPartial::new(channels));
    let var_out = merged.variance();
    let shape = [channels];
    Ok(BatchStats {
        mean: Tensor::from_working(&merged.mean, mean.dtype(), &shape)?,
        var: Tensor::from_working(&var_out, mean.dtype(), &shape)?,
        count: merged.count,
    })
}
