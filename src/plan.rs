//! Partition plans: how one invocation is split across workers and tiles.
//!
//! A [`PartitionPlan`] is produced outside the engine and consumed unchanged. It fixes
//! the tensor's reduction geometry, the partition and accumulation strategies, the
//! per-worker slices, tile sizes and the memory each worker may use. Everything the
//! engine needs to know about resources is checked by [`PartitionPlan::check_resources`]
//! before any element is read.

use crate::error::{Error, Result};
use std::ops::Range;
use tracing::debug;

/// Default per-worker working-memory budget in bytes
pub const DEFAULT_WORKING_MEMORY_BYTES: usize = 192 * 1024;

/// Default row alignment of tile buffers in bytes
pub const DEFAULT_BLOCK_BYTES: usize = 32;

/// Default number of reduction elements per tile (and Welford lanes)
pub const DEFAULT_TILE_REDUCE: usize = 256;

/// Default number of channels per tile
pub const DEFAULT_TILE_CHANNELS: usize = 8;

/// Tile buffers are double-buffered
pub const BUFFER_COUNT: usize = 2;

// ============================================================================
// Geometry
// ============================================================================

/// Where the channel axis sits in the input shape
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// `[N, C, *spatial]`
    #[default]
    ChannelsFirst,
    /// `[*, C]`
    ChannelsLast,
}

/// The input viewed as `[outer, channels, inner]`.
///
/// The reduction extent is `outer * inner`; the flattened reduction index of element
/// `x[o][c][i]` is `o * inner + i`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReduceDims {
    /// Outer reduction extent (R1)
    pub outer: usize,
    /// Kept-axis extent (A)
    pub channels: usize,
    /// Inner reduction extent (R0)
    pub inner: usize,
}

impl ReduceDims {
    /// Geometry from explicit extents
    pub const fn new(outer: usize, channels: usize, inner: usize) -> Self {
        Self {
            outer,
            channels,
            inner,
        }
    }

    /// Geometry of an input `shape` in `layout`
    pub fn from_shape(shape: &[usize], layout: ChannelLayout) -> Result<Self> {
        if shape.len() < 2 {
            return Err(Error::invalid_argument(
                "input",
                format!("expected at least 2 dimensions, got shape {shape:?}"),
            ));
        }
        Ok(match layout {
            ChannelLayout::ChannelsFirst => Self {
                outer: shape[0],
                channels: shape[1],
                inner: shape[2..].iter().product(),
            },
            ChannelLayout::ChannelsLast => {
                let last = shape.len() - 1;
                Self {
                    outer: shape[..last].iter().product(),
                    channels: shape[last],
                    inner: 1,
                }
            }
        })
    }

    /// Reduction extent R
    #[inline]
    pub const fn reduce_size(&self) -> usize {
        self.outer * self.inner
    }

    /// Total element count
    #[inline]
    pub const fn numel(&self) -> usize {
        self.outer * self.channels * self.inner
    }

    /// Offset of `x[outer][channel][inner]`
    #[inline]
    pub const fn offset(&self, outer: usize, channel: usize, inner: usize) -> usize {
        (outer * self.channels + channel) * self.inner + inner
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// How workers divide the tensor
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PartitionStrategy {
    /// Each worker owns a channel range and its whole reduction axis
    #[default]
    SplitKept,
    /// Each worker owns a range of the outer reduction axis for every channel; partials
    /// are merged after a barrier
    ///
    /// Only the outer axis is split. With fewer outer rows than workers (a
    /// channels-first `[1, C, HW]` input, for one) the surplus workers get empty slices
    /// and contribute zero-count partials.
    SplitReduce,
}

/// How a worker accumulates statistics over its reduction slice
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccumulationStrategy {
    /// Streaming lane-parallel Welford over tiles
    #[default]
    Welford,
    /// Full-load two-pass mean / squared deviation with binary-tree sums
    TwoPassSum,
}

// ============================================================================
// Plan
// ============================================================================

/// Immutable description of how one invocation is partitioned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    dims: ReduceDims,
    partition: PartitionStrategy,
    accumulation: AccumulationStrategy,
    slices: Vec<Range<usize>>,
    tile_channels: usize,
    tile_reduce: usize,
    block_bytes: usize,
    working_memory_bytes: usize,
    workspace_bytes: Option<usize>,
}

impl PartitionPlan {
    /// Start a plan for the given geometry
    pub fn builder(dims: ReduceDims) -> PlanBuilder {
        PlanBuilder::new(dims)
    }

    /// Geometry the plan was built for
    #[inline]
    pub fn dims(&self) -> ReduceDims {
        self.dims
    }

    /// Partition strategy
    #[inline]
    pub fn partition(&self) -> PartitionStrategy {
        self.partition
    }

    /// Accumulation strategy
    #[inline]
    pub fn accumulation(&self) -> AccumulationStrategy {
        self.accumulation
    }

    /// Number of workers
    #[inline]
    pub fn workers(&self) -> usize {
        self.slices.len()
    }

    /// Per-worker slices of the split axis (channels or outer reduction axis)
    #[inline]
    pub fn slices(&self) -> &[Range<usize>] {
        &self.slices
    }

    /// Channels per tile
    #[inline]
    pub fn tile_channels(&self) -> usize {
        self.tile_channels
    }

    /// Reduction elements per tile
    #[inline]
    pub fn tile_reduce(&self) -> usize {
        self.tile_reduce
    }

    /// Row alignment of tile buffers in bytes
    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Per-worker working-memory budget in bytes
    #[inline]
    pub fn working_memory_bytes(&self) -> usize {
        self.working_memory_bytes
    }

    /// Workspace granted for cross-partition merge
    #[inline]
    pub fn workspace_bytes(&self) -> Option<usize> {
        self.workspace_bytes
    }

    /// Reduction range (flattened index) owned by `worker`
    pub fn reduce_range(&self, worker: usize) -> Range<usize> {
        match self.partition {
            PartitionStrategy::SplitKept => 0..self.dims.reduce_size(),
            PartitionStrategy::SplitReduce => {
                let s = &self.slices[worker];
                s.start * self.dims.inner..s.end * self.dims.inner
            }
        }
    }

    /// Number of workers whose slice is empty
    pub fn idle_workers(&self) -> usize {
        self.slices.iter().filter(|s| s.is_empty()).count()
    }

    /// Channel range owned by `worker`
    pub fn channel_range(&self, worker: usize) -> Range<usize> {
        match self.partition {
            PartitionStrategy::SplitKept => self.slices[worker].clone(),
            PartitionStrategy::SplitReduce => 0..self.dims.channels,
        }
    }

    /// Tile row length in elements of `elem_bytes`, padded to the block alignment
    pub fn row_stride(&self, cols: usize, elem_bytes: usize) -> usize {
        let block = (self.block_bytes / elem_bytes).max(1);
        cols.div_ceil(block) * block
    }

    /// Bytes one worker needs for its buffers at a working precision of `elem_bytes`
    pub fn required_working_memory(&self, elem_bytes: usize) -> usize {
        let stride = self.row_stride(self.tile_reduce, elem_bytes);
        let tile = self.tile_channels * stride * elem_bytes;
        let scratch = stride * elem_bytes;
        match self.accumulation {
            AccumulationStrategy::Welford => {
                let lanes = 2 * self.tile_channels * self.tile_reduce * elem_bytes;
                let counts = self.tile_reduce * std::mem::size_of::<usize>();
                BUFFER_COUNT * tile + lanes + counts + scratch
            }
            AccumulationStrategy::TwoPassSum => BUFFER_COUNT * tile + scratch,
        }
    }

    /// Workspace bytes the staging area needs at a working precision of `elem_bytes`
    pub fn required_workspace(&self, elem_bytes: usize) -> usize {
        match self.partition {
            PartitionStrategy::SplitKept => 0,
            PartitionStrategy::SplitReduce => 2 * self.workers() * self.dims.channels * elem_bytes,
        }
    }

    /// Check working memory and workspace for a working precision of `elem_bytes`
    pub fn check_resources(&self, elem_bytes: usize) -> Result<()> {
        let required = self.required_working_memory(elem_bytes);
        if required > self.working_memory_bytes {
            return Err(Error::InsufficientWorkingMemory {
                required,
                available: self.working_memory_bytes,
            });
        }

        let required = self.required_workspace(elem_bytes);
        if required > 0 {
            let available = self.workspace_bytes.unwrap_or(0);
            if required > available {
                return Err(Error::InsufficientWorkspace {
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Largest reduction range any worker owns
    fn max_reduce_extent(&self) -> usize {
        (0..self.workers())
            .map(|w| self.reduce_range(w).len())
            .max()
            .unwrap_or(0)
    }
}

/// Split `extent` into `workers` contiguous ranges; the first `extent % workers` get one
/// extra unit.
pub fn even_slices(extent: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }
    let base = extent / workers;
    let extra = extent % workers;
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let r = start..start + len;
            start += len;
            r
        })
        .collect()
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`PartitionPlan`]
#[derive(Clone, Debug)]
pub struct PlanBuilder {
    dims: ReduceDims,
    partition: PartitionStrategy,
    accumulation: AccumulationStrategy,
    workers: usize,
    slices: Option<Vec<Range<usize>>>,
    tile_channels: usize,
    tile_reduce: Option<usize>,
    block_bytes: usize,
    working_memory_bytes: usize,
    workspace_bytes: Option<usize>,
}

impl PlanBuilder {
    fn new(dims: ReduceDims) -> Self {
        Self {
            dims,
            partition: PartitionStrategy::default(),
            accumulation: AccumulationStrategy::default(),
            workers: 1,
            slices: None,
            tile_channels: DEFAULT_TILE_CHANNELS,
            tile_reduce: None,
            block_bytes: DEFAULT_BLOCK_BYTES,
            working_memory_bytes: DEFAULT_WORKING_MEMORY_BYTES,
            workspace_bytes: None,
        }
    }

    /// Partition strategy
    pub fn partition(mut self, partition: PartitionStrategy) -> Self {
        self.partition = partition;
        self
    }

    /// Accumulation strategy
    pub fn accumulation(mut self, accumulation: AccumulationStrategy) -> Self {
        self.accumulation = accumulation;
        self
    }

    /// Number of workers, sliced evenly unless [`Self::slices`] is given
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Explicit per-worker slices of the split axis
    pub fn slices(mut self, slices: Vec<Range<usize>>) -> Self {
        self.workers = slices.len();
        self.slices = Some(slices);
        self
    }

    /// Channels per tile
    pub fn tile_channels(mut self, n: usize) -> Self {
        self.tile_channels = n;
        self
    }

    /// Reduction elements per tile. Defaults to the largest worker slice for
    /// [`AccumulationStrategy::TwoPassSum`] and [`DEFAULT_TILE_REDUCE`] otherwise.
    pub fn tile_reduce(mut self, n: usize) -> Self {
        self.tile_reduce = Some(n);
        self
    }

    /// Row alignment of tile buffers in bytes (a power of two)
    pub fn block_bytes(mut self, n: usize) -> Self {
        self.block_bytes = n;
        self
    }

    /// Per-worker working-memory budget in bytes
    pub fn working_memory(mut self, bytes: usize) -> Self {
        self.working_memory_bytes = bytes;
        self
    }

    /// Workspace granted for cross-partition merge
    pub fn workspace(mut self, bytes: usize) -> Self {
        self.workspace_bytes = Some(bytes);
        self
    }

    /// Validate the structure and build the plan
    pub fn build(self) -> Result<PartitionPlan> {
        if self.workers == 0 {
            return Err(Error::invalid_plan("at least one worker is required"));
        }
        if self.tile_channels == 0 {
            return Err(Error::invalid_plan("tile_channels must be positive"));
        }
        if !self.block_bytes.is_power_of_two() {
            return Err(Error::invalid_plan(format!(
                "block_bytes must be a power of two, got {}",
                self.block_bytes
            )));
        }

        let split_extent = match self.partition {
            PartitionStrategy::SplitKept => self.dims.channels,
            PartitionStrategy::SplitReduce => self.dims.outer,
        };
        let slices = match self.slices {
            Some(s) => s,
            None => even_slices(split_extent, self.workers),
        };
        check_slices(&slices, split_extent)?;
        let idle = slices.iter().filter(|s| s.is_empty()).count();
        if idle > 0 {
            debug!(
                partition = ?self.partition,
                idle,
                workers = slices.len(),
                split_extent,
                "partition plan leaves workers with empty slices"
            );
        }

        let mut plan = PartitionPlan {
            dims: self.dims,
            partition: self.partition,
            accumulation: self.accumulation,
            slices,
            tile_channels: self.tile_channels,
            tile_reduce: 0,
            block_bytes: self.block_bytes,
            working_memory_bytes: self.working_memory_bytes,
            workspace_bytes: self.workspace_bytes,
        };
        let max_extent = plan.max_reduce_extent();
        plan.tile_reduce = match (self.tile_reduce, self.accumulation) {
            (Some(n), _) => n,
            (None, AccumulationStrategy::TwoPassSum) => max_extent.max(1),
            (None, AccumulationStrategy::Welford) => DEFAULT_TILE_REDUCE,
        };
        if plan.tile_reduce == 0 {
            return Err(Error::invalid_plan("tile_reduce must be positive"));
        }
        if plan.accumulation == AccumulationStrategy::TwoPassSum && plan.tile_reduce < max_extent {
            return Err(Error::invalid_plan(format!(
                "two-pass accumulation needs whole reduction slices in one tile: \
                 tile_reduce {} < slice extent {}",
                plan.tile_reduce, max_extent
            )));
        }
        Ok(plan)
    }
}

fn check_slices(slices: &[Range<usize>], extent: usize) -> Result<()> {
    let mut expected_start = 0;
    for (w, s) in slices.iter().enumerate() {
        if s.start != expected_start || s.end < s.start {
            return Err(Error::invalid_plan(format!(
                "slice {w} ({s:?}) must start at {expected_start} and not be reversed"
            )));
        }
        expected_start = s.end;
    }
    if expected_start != extent {
        return Err(Error::invalid_plan(format!(
            "slices cover 0..{expected_start} but the split axis has extent {extent}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims_from_shape() {
        let d = ReduceDims::from_shape(&[8, 3, 4, 5], ChannelLayout::ChannelsFirst).unwrap();
        assert_eq!(d, ReduceDims::new(8, 3, 20));
        assert_eq!(d.reduce_size(), 160);
        assert_eq!(d.offset(1, 2, 3), (3 + 2) * 20 + 3);

        let d = ReduceDims::from_shape(&[8, 4, 4, 3], ChannelLayout::ChannelsLast).unwrap();
        assert_eq!(d, ReduceDims::new(128, 3, 1));

        assert!(ReduceDims::from_shape(&[5], ChannelLayout::ChannelsFirst).is_err());
    }

    #[test]
    fn test_even_slices_tail_first() {
        assert_eq!(even_slices(10, 4), vec![0..3, 3..6, 6..8, 8..10]);
        assert_eq!(even_slices(2, 3), vec![0..1, 1..2, 2..2]);
        assert!(even_slices(5, 0).is_empty());
    }

    #[test]
    fn test_split_reduce_ranges() {
        let plan = PartitionPlan::builder(ReduceDims::new(1000, 4, 1))
            .partition(PartitionStrategy::SplitReduce)
            .workers(4)
            .workspace(1024)
            .build()
            .unwrap();
        assert_eq!(plan.workers(), 4);
        assert_eq!(plan.reduce_range(2), 500..750);
        assert_eq!(plan.channel_range(3), 0..4);
        assert_eq!(plan.required_workspace(4), 2 * 4 * 4 * 4);
        assert!(plan.check_resources(4).is_ok());
    }

    #[test]
    fn test_split_reduce_single_outer_row_idles_workers() {
        let plan = PartitionPlan::builder(ReduceDims::new(1, 8, 49))
            .partition(PartitionStrategy::SplitReduce)
            .workers(4)
            .workspace(1024)
            .build()
            .unwrap();
        assert_eq!(plan.slices(), &[0..1, 1..1, 1..1, 1..1]);
        assert_eq!(plan.idle_workers(), 3);
        assert_eq!(plan.reduce_range(0), 0..49);
        assert!(plan.reduce_range(3).is_empty());
    }

    #[test]
    fn test_workspace_missing_or_small() {
        let builder = PartitionPlan::builder(ReduceDims::new(64, 16, 1))
            .partition(PartitionStrategy::SplitReduce)
            .workers(4);
        let err = builder.clone().build().unwrap().check_resources(4).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientWorkspace {
                required: 512,
                available: 0
            }
        ));
        let err = builder.workspace(100).build().unwrap().check_resources(4);
        assert!(matches!(err, Err(Error::InsufficientWorkspace { .. })));
    }

    #[test]
    fn test_working_memory_budget() {
        let plan = PartitionPlan::builder(ReduceDims::new(1, 64, 4096))
            .tile_reduce(4096)
            .tile_channels(64)
            .working_memory(64 * 1024)
            .build()
            .unwrap();
        let err = plan.check_resources(4).unwrap_err();
        assert!(matches!(err, Error::InsufficientWorkingMemory { .. }));
        assert!(err.is_planning());
    }

    #[test]
    fn test_two_pass_tile_must_cover_slice() {
        let dims = ReduceDims::new(10, 2, 100);
        let plan = PartitionPlan::builder(dims)
            .accumulation(AccumulationStrategy::TwoPassSum)
            .build()
            .unwrap();
        assert_eq!(plan.tile_reduce(), 1000);

        let err = PartitionPlan::builder(dims)
            .accumulation(AccumulationStrategy::TwoPassSum)
            .tile_reduce(512)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPlan { .. }));
    }

    #[test]
    fn test_malformed_slices_rejected() {
        let dims = ReduceDims::new(4, 10, 1);
        for slices in [vec![0..4, 5..10], vec![0..6, 4..10], vec![0..4, 4..9]] {
            let err = PartitionPlan::builder(dims).slices(slices).build().unwrap_err();
            assert!(matches!(err, Error::InvalidPlan { .. }));
        }
        assert!(PartitionPlan::builder(dims).workers(0).build().is_err());
        assert!(PartitionPlan::builder(dims).block_bytes(24).build().is_err());
    }

    #[test]
    fn test_row_stride_alignment() {
        let plan = PartitionPlan::builder(ReduceDims::new(1, 1, 1)).build().unwrap();
        assert_eq!(plan.row_stride(5, 4), 8);
        assert_eq!(plan.row_stride(16, 2), 16);
        assert_eq!(plan.row_stride(3, 8), 4);
    }
}
