//! Batch-norm engine: sequences accumulation, merge, finalize and normalize
//!
//! One generic implementation serves every strategy combination. The partition plan
//! picks the partition strategy (who owns which slice) and the accumulation strategy
//! (how a worker reduces its slice); the working precision is the type parameter `W`
//! and the storage format the type parameter `T`.

use super::CpuClient;
use super::helpers::split_lengths_mut;
use super::kernels::{
    ChannelAffine, WelfordLanes, WelfordPartial, normalize_outer_rows, rsqrt, tree_reduce,
    two_pass_tile,
};
use super::pipeline::{DoubleBuffer, TileBuffer, TileSpec, copy_in, plan_tiles};
use super::workspace::{StagingArea, Workspace};
use crate::dtype::{Element, WorkingFloat};
use crate::error::{Error, Result};
use crate::plan::{AccumulationStrategy, PartitionPlan, PartitionStrategy, ReduceDims};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Barrier;
use tracing::{debug, trace, warn};

/// Per-channel statistics after all partials are merged
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FinalizedStats<W> {
    pub mean: Vec<W>,
    /// Biased variance
    pub var: Vec<W>,
    pub rstd: Vec<W>,
    pub count: usize,
}

impl<W: WorkingFloat> FinalizedStats<W> {
    pub fn from_partial(partial: WelfordPartial<W>, eps: W) -> Self {
        let var = partial.variance();
        if let Some(channel) = var.iter().position(|&v| v < W::ZERO) {
            warn!(channel, "negative batch variance from round-off");
        }
        let rstd = var.iter().map(|&v| rsqrt(v, eps)).collect();
        Self {
            mean: partial.mean,
            var,
            rstd,
            count: partial.count,
        }
    }

    pub fn affine(&self, gamma: &[W], beta: &[W]) -> ChannelAffine<W> {
        ChannelAffine {
            mean: self.mean.clone(),
            rstd: self.rstd.clone(),
            gamma: gamma.to_vec(),
            beta: beta.to_vec(),
        }
    }
}

/// Output buffer and affine parameters for the normalize pass of a training run
pub(crate) struct NormalizeArgs<'a, T, W> {
    pub y: &'a mut [T],
    pub gamma: &'a [W],
    pub beta: &'a [W],
}

// ============================================================================
// Accumulation
// ============================================================================

/// Accumulate `channels x reduce` of `x` into one partial with the plan's strategy
pub(crate) fn accumulate<T: Element, W: WorkingFloat>(
    plan: &PartitionPlan,
    x: &[T],
    channels: Range<usize>,
    reduce: Range<usize>,
) -> WelfordPartial<W> {
    let dims = plan.dims();
    let mut out = WelfordPartial::new(channels.len());
    out.count = reduce.len();

    let tile_reduce = plan.tile_reduce().min(reduce.len()).max(1);
    let stride = plan.row_stride(tile_reduce, std::mem::size_of::<W>());
    let tiles = plan_tiles(
        channels.clone(),
        reduce.clone(),
        plan.tile_channels(),
        tile_reduce,
    );
    if tiles.is_empty() {
        return out;
    }

    let mut pipe = DoubleBuffer::<W>::new(plan.tile_channels(), stride);
    let mut scratch = Vec::with_capacity(stride);
    let load = |t: &TileSpec, buf: &mut TileBuffer<W>| copy_in(x, &dims, t, stride, buf);

    match plan.accumulation() {
        AccumulationStrategy::Welford => {
            let mut lanes = WelfordLanes::<W>::new(plan.tile_channels(), tile_reduce);
            pipe.stream(&tiles, load, |t, buf| {
                if t.reduce.start == reduce.start {
                    lanes.reset(t.channels.len());
                }
                lanes.update_tile(buf.data(), buf.row_stride(), buf.cols());
                trace!(channels = ?t.channels, reduce = ?t.reduce, "welford tile");
                if t.reduce.end == reduce.end {
                    let part = lanes.finalize(&mut scratch);
                    out.write_channels(t.channels.start - channels.start, &part);
                }
            });
        }
        AccumulationStrategy::TwoPassSum => {
            pipe.stream(&tiles, load, |t, buf| {
                debug_assert_eq!(t.reduce, reduce);
                let part = two_pass_tile(
                    buf.data(),
                    buf.row_stride(),
                    buf.rows(),
                    buf.cols(),
                    &mut scratch,
                );
                trace!(channels = ?t.channels, reduce = ?t.reduce, "two-pass tile");
                out.write_channels(t.channels.start - channels.start, &part);
            });
        }
    }
    out
}

/// Split-kept: every worker reduces its own channels over the full reduction axis
fn split_kept_partial<T: Element, W: WorkingFloat>(
    client: &CpuClient,
    plan: &PartitionPlan,
    x: &[T],
) -> WelfordPartial<W> {
    let dims = plan.dims();
    let run = |w: usize| accumulate::<T, W>(plan, x, plan.channel_range(w), plan.reduce_range(w));

    #[cfg(feature = "rayon")]
    let parts: Vec<WelfordPartial<W>> = client.install_parallelism(|| {
        (0..plan.workers()).into_par_iter().map(run).collect()
    });

    #[cfg(not(feature = "rayon"))]
    let parts: Vec<WelfordPartial<W>> = {
        let _ = client;
        (0..plan.workers()).map(run).collect()
    };

    let mut full = WelfordPartial::new(dims.channels);
    full.count = dims.reduce_size();
    for (w, part) in parts.iter().enumerate() {
        full.write_channels(plan.channel_range(w).start, part);
    }
    full
}

// ============================================================================
// Cross-partition merge
// ============================================================================

struct WorkerError {
    before_merge: bool,
    error: Error,
}

type WorkerOutcome<W> = std::result::Result<Option<FinalizedStats<W>>, WorkerError>;

/// Run a worker's accumulation and publish its partial. A panic is caught and turned
/// into an error so the worker still reaches the barrier.
fn publish_guarded<W: WorkingFloat>(
    staging: &StagingArea<W>,
    worker: usize,
    accumulate: impl FnOnce() -> WelfordPartial<W>,
) -> Result<()> {
    let partial = panic::catch_unwind(AssertUnwindSafe(accumulate)).map_err(|_| {
        Error::Internal(format!(
            "split-reduce worker {worker} panicked while accumulating"
        ))
    })?;
    staging.publish(worker, &partial)
}

/// Split-reduce: workers own outer-row slices, publish partials, meet at a barrier,
/// and each merges all partials with the binary tree. Worker 0's copy of the merged
/// statistics is returned; with `normalize`, every worker then normalizes its rows.
pub(crate) fn split_reduce<T: Element, W: WorkingFloat>(
    plan: &PartitionPlan,
    x: &[T],
    eps: W,
    normalize: Option<NormalizeArgs<'_, T, W>>,
) -> Result<FinalizedStats<W>> {
    let dims = plan.dims();
    let workers = plan.workers();
    let staging = StagingArea::new(
        Workspace::<W>::from_bytes(plan.workspace_bytes().unwrap_or(0)),
        workers,
        dims.channels,
    )?;
    let barrier = Barrier::new(workers);

    let row_len = dims.channels * dims.inner;
    let (affine, y_chunks): (Option<(&[W], &[W])>, Vec<Option<&mut [T]>>) = match normalize {
        Some(args) => {
            let lengths: Vec<usize> = plan.slices().iter().map(|s| s.len() * row_len).collect();
            let chunks = split_lengths_mut(args.y, &lengths);
            (
                Some((args.gamma, args.beta)),
                chunks.into_iter().map(Some).collect(),
            )
        }
        None => (None, (0..workers).map(|_| None).collect()),
    };

    let outcomes: Vec<WorkerOutcome<W>> =
        std::thread::scope(|scope| {
            let handles: Vec<_> = y_chunks
                .into_iter()
                .enumerate()
                .map(|(w, y_chunk)| {
                    let staging = &staging;
                    let barrier = &barrier;
                    scope.spawn(move || -> WorkerOutcome<W> {
                        let published = publish_guarded(staging, w, || {
                            accumulate::<T, W>(plan, x, 0..dims.channels, plan.reduce_range(w))
                        });
                        barrier.wait();
                        published.map_err(|error| WorkerError {
                            before_merge: true,
                            error,
                        })?;

                        let after = |error| WorkerError {
                            before_merge: false,
                            error,
                        };
                        let partials = staging.collect().map_err(after)?;
                        let merged = tree_reduce(partials, |a, b| a.merge(b))
                            .ok_or_else(|| after(Error::Internal("no partials to merge".into())))?;
                        let stats = FinalizedStats::from_partial(merged, eps);

                        if let (Some(y), Some((gamma, beta))) = (y_chunk, affine) {
                            let rows = &plan.slices()[w];
                            let xs = &x[rows.start * row_len..rows.end * row_len];
                            normalize_outer_rows(xs, y, dims.inner, &stats.affine(gamma, beta));
                        }
                        Ok((w == 0).then_some(stats))
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(w, h)| {
                    h.join().unwrap_or_else(|_| {
                        Err(WorkerError {
                            before_merge: true,
                            error: Error::Internal(format!("split-reduce worker {w} panicked")),
                        })
                    })
                })
                .collect()
        });

    let mut stats = None;
    let mut root_error = None;
    let mut merge_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(Some(s)) => stats = Some(s),
            Ok(None) => {}
            Err(WorkerError {
                before_merge: true,
                error,
            }) => {
                if root_error.is_none() {
                    root_error = Some(error);
                }
            }
            Err(WorkerError { error, .. }) => {
                if merge_error.is_none() {
                    merge_error = Some(error);
                }
            }
        }
    }
    if let Some(e) = root_error.or(merge_error) {
        return Err(e);
    }
    stats.ok_or_else(|| Error::Internal("worker 0 returned no statistics".into()))
}

// ============================================================================
// Normalize
// ============================================================================

/// Normalize every outer row of `x` into `y`
pub(crate) fn normalize<T: Element, W: WorkingFloat>(
    client: &CpuClient,
    dims: ReduceDims,
    x: &[T],
    y: &mut [T],
    affine: &ChannelAffine<W>,
) {
    let row_len = dims.channels * dims.inner;
    if row_len == 0 || dims.outer == 0 {
        return;
    }

    #[cfg(feature = "rayon")]
    {
        let min_len = client.rayon_min_len();
        client.install_parallelism(|| {
            x.par_chunks(row_len)
                .zip(y.par_chunks_mut(row_len))
                .with_min_len(min_len)
                .for_each(|(xr, yr)| normalize_outer_rows(xr, yr, dims.inner, affine));
        });
    }

    #[cfg(not(feature = "rayon"))]
    {
        let _ = client;
        normalize_outer_rows(x, y, dims.inner, affine);
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Batch statistics of `x` without normalizing
pub(crate) fn batch_statistics<T: Element, W: WorkingFloat>(
    client: &CpuClient,
    plan: &PartitionPlan,
    x: &[T],
    eps: W,
) -> Result<FinalizedStats<W>> {
    debug!(
        partition = ?plan.partition(),
        accumulation = ?plan.accumulation(),
        workers = plan.workers(),
        "computing batch statistics"
    );
    match plan.partition() {
        PartitionStrategy::SplitKept => Ok(FinalizedStats::from_partial(
            split_kept_partial::<T, W>(client, plan, x),
            eps,
        )),
        PartitionStrategy::SplitReduce => split_reduce(plan, x, eps, None),
    }
}

/// Training pass: statistics from `x`, then `y = (x - mean) * rstd * gamma + beta`
pub(crate) fn train<T: Element, W: WorkingFloat>(
    client: &CpuClient,
    plan: &PartitionPlan,
    x: &[T],
    gamma: &[W],
    beta: &[W],
    eps: W,
) -> Result<(Vec<T>, FinalizedStats<W>)> {
    let dims = plan.dims();
    debug!(
        ?dims,
        partition = ?plan.partition(),
        accumulation = ?plan.accumulation(),
        workers = plan.workers(),
        "batch norm training pass"
    );
    let mut y = vec![T::zero(); dims.numel()];
    let stats = match plan.partition() {
        PartitionStrategy::SplitKept => {
            let stats =
                FinalizedStats::from_partial(split_kept_partial::<T, W>(client, plan, x), eps);
            normalize(client, dims, x, &mut y, &stats.affine(gamma, beta));
            stats
        }
        PartitionStrategy::SplitReduce => split_reduce(
            plan,
            x,
            eps,
            Some(NormalizeArgs {
                y: &mut y,
                gamma,
                beta,
            }),
        )?,
    };
    Ok((y, stats))
}

/// Inference pass: normalize with supplied mean and variance
#[allow(clippy::too_many_arguments)]
pub(crate) fn infer<T: Element, W: WorkingFloat>(
    client: &CpuClient,
    dims: ReduceDims,
    x: &[T],
    mean: &[W],
    var: &[W],
    gamma: &[W],
    beta: &[W],
    eps: W,
) -> Vec<T> {
    debug!(?dims, "batch norm inference pass");
    let affine = ChannelAffine {
        mean: mean.to_vec(),
        rstd: var.iter().map(|&v| rsqrt(v, eps)).collect(),
        gamma: gamma.to_vec(),
        beta: beta.to_vec(),
    };
    let mut y = vec![T::zero(); dims.numel()];
    normalize(client, dims, x, &mut y, &affine);
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ReduceDims;

    fn data(dims: ReduceDims) -> Vec<f32> {
        (0..dims.numel())
            .map(|i| ((i * 7919) % 113) as f32 * 0.5 - 20.0)
            .collect()
    }

    fn reference(dims: ReduceDims, x: &[f32]) -> (Vec<f64>, Vec<f64>) {
        let mut mean = vec![0.0; dims.channels];
        let mut var = vec![0.0; dims.channels];
        let n = dims.reduce_size() as f64;
        for c in 0..dims.channels {
            let vals: Vec<f64> = (0..dims.outer)
                .flat_map(|o| (0..dims.inner).map(move |i| (o, i)))
                .map(|(o, i)| x[dims.offset(o, c, i)] as f64)
                .collect();
            mean[c] = vals.iter().sum::<f64>() / n;
            var[c] = vals.iter().map(|v| (v - mean[c]).powi(2)).sum::<f64>() / n;
        }
        (mean, var)
    }

    #[test]
    fn test_strategies_agree_with_reference() {
        let dims = ReduceDims::new(6, 5, 37);
        let x = data(dims);
        let (mean, var) = reference(dims, &x);
        let client = CpuClient::new();
        let plans = [
            PartitionPlan::builder(dims)
                .workers(2)
                .tile_channels(2)
                .tile_reduce(16)
                .build(),
            PartitionPlan::builder(dims)
                .accumulation(AccumulationStrategy::TwoPassSum)
                .tile_channels(3)
                .build(),
            PartitionPlan::builder(dims)
                .partition(PartitionStrategy::SplitReduce)
                .workers(4)
                .tile_reduce(50)
                .workspace(4096)
                .build(),
            PartitionPlan::builder(dims)
                .partition(PartitionStrategy::SplitReduce)
                .accumulation(AccumulationStrategy::TwoPassSum)
                .workers(3)
                .workspace(4096)
                .build(),
        ];
        for plan in plans {
            let plan = plan.unwrap();
            let stats = batch_statistics::<f32, f32>(&client, &plan, &x, 1e-5).unwrap();
            assert_eq!(stats.count, dims.reduce_size());
            for c in 0..dims.channels {
                assert!((stats.mean[c] as f64 - mean[c]).abs() < 1e-4, "{plan:?}");
                assert!((stats.var[c] as f64 - var[c]).abs() < 1e-3 * var[c], "{plan:?}");
            }
        }
    }

    #[test]
    fn test_split_reduce_normalizes_every_slice() {
        let dims = ReduceDims::new(9, 2, 4);
        let x = data(dims);
        let client = CpuClient::new();
        let kept = PartitionPlan::builder(dims).build().unwrap();
        let split = PartitionPlan::builder(dims)
            .partition(PartitionStrategy::SplitReduce)
            .workers(4)
            .workspace(1024)
            .build()
            .unwrap();
        let gamma = [1.5f32, -1.0];
        let beta = [0.25f32, 2.0];
        let (y_kept, _) = train::<f32, f32>(&client, &kept, &x, &gamma, &beta, 1e-5).unwrap();
        let (y_split, _) = train::<f32, f32>(&client, &split, &x, &gamma, &beta, 1e-5).unwrap();
        for (a, b) in y_kept.iter().zip(&y_split) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_empty_reduction_gives_nan_rstd() {
        let dims = ReduceDims::new(0, 3, 4);
        let plan = PartitionPlan::builder(dims).build().unwrap();
        let stats = batch_statistics::<f32, f32>(&CpuClient::new(), &plan, &[], 1e-5).unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, vec![0.0; 3]);
        assert!(stats.rstd.iter().all(|r| r.is_nan()));
    }

    #[test]
    fn test_split_reduce_without_workspace_fails() {
        let dims = ReduceDims::new(8, 2, 1);
        let plan = PartitionPlan::builder(dims)
            .partition(PartitionStrategy::SplitReduce)
            .workers(2)
            .build()
            .unwrap();
        let err = split_reduce::<f32, f32>(&plan, &data(dims), 1e-5, None).unwrap_err();
        assert!(matches!(err, Error::InsufficientWorkspace { .. }));
    }

    #[test]
    fn test_panicking_worker_still_reaches_barrier() {
        let staging = StagingArea::new(Workspace::<f32>::from_bytes(256), 2, 2).unwrap();
        let barrier = Barrier::new(2);
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let failing = scope.spawn(|| {
                let r = publish_guarded(&staging, 0, || panic!("accumulation failed"));
                barrier.wait();
                r
            });
            let healthy = scope.spawn(|| {
                let mut partial = WelfordPartial::new(2);
                partial.count = 1;
                let r = publish_guarded(&staging, 1, || partial);
                barrier.wait();
                r
            });
            vec![failing.join().unwrap(), healthy.join().unwrap()]
        });
        assert!(matches!(results[0], Err(Error::Internal(_))));
        assert!(results[1].is_ok());
        assert!(staging.collect().is_err());
    }
}
