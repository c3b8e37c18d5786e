//! Tile staging: strided copy-in and the double-buffered load/compute pipeline
//!
//! A tile is a block of `channels x reduce` elements gathered from the `[R1, A, R0]`
//! input into a dense, row-aligned working-precision buffer. [`DoubleBuffer::stream`]
//! keeps two such buffers: while tile `i` is accumulated out of one, tile `i + 1` is
//! loaded into the other. Each buffer is borrowed exclusively by its loader and shared
//! with its consumer only after the load returned, so compute never observes a
//! partially loaded tile and a buffer is never refilled while it is being read.

use crate::dtype::{Element, PrecisionAdapter, WorkingFloat};
use crate::plan::ReduceDims;
use std::ops::Range;

/// One tile: a channel range crossed with a range of the flattened reduction index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileSpec {
    /// Channels, one buffer row each
    pub channels: Range<usize>,
    /// Flattened reduction indices, one buffer column each
    pub reduce: Range<usize>,
}

/// Split `channels` into groups of at most `tile_channels`, and each group's `reduce`
/// range into tiles of at most `tile_reduce` columns. Groups are emitted in order, the
/// tiles of a group contiguously.
pub fn plan_tiles(
    channels: Range<usize>,
    reduce: Range<usize>,
    tile_channels: usize,
    tile_reduce: usize,
) -> Vec<TileSpec> {
    let mut tiles = Vec::new();
    if reduce.is_empty() {
        return tiles;
    }
    for c0 in channels.clone().step_by(tile_channels) {
        let group = c0..(c0 + tile_channels).min(channels.end);
        for r0 in reduce.clone().step_by(tile_reduce) {
            tiles.push(TileSpec {
                channels: group.clone(),
                reduce: r0..(r0 + tile_reduce).min(reduce.end),
            });
        }
    }
    tiles
}

/// Dense tile buffer in working precision
#[derive(Clone, Debug)]
pub struct TileBuffer<W> {
    data: Vec<W>,
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<W: WorkingFloat> TileBuffer<W> {
    /// Buffer able to hold `rows` rows of `row_stride` elements without reallocating
    pub fn with_capacity(rows: usize, row_stride: usize) -> Self {
        Self {
            data: Vec::with_capacity(rows * row_stride),
            rows: 0,
            cols: 0,
            row_stride,
        }
    }

    /// Set the logical shape and zero the buffer
    pub fn reset(&mut self, rows: usize, cols: usize, row_stride: usize) {
        debug_assert!(cols <= row_stride);
        self.rows = rows;
        self.cols = cols;
        self.row_stride = row_stride;
        self.data.clear();
        self.data.resize(rows * row_stride, W::ZERO);
    }

    /// Rows currently loaded
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Valid columns per row
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Distance between row starts; columns past `cols` are zero padding
    #[inline]
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Backing slice, `rows * row_stride` long
    #[inline]
    pub fn data(&self) -> &[W] {
        &self.data
    }

    /// Valid columns of row `r`
    #[inline]
    pub fn row(&self, r: usize) -> &[W] {
        let start = r * self.row_stride;
        &self.data[start..start + self.cols]
    }
}

/// Gather `tile` out of `src` into `buf`, widening to working precision.
///
/// Each buffer row is assembled from runs that are contiguous in `src` (at most
/// `dims.inner` long); rows are padded with zeros up to `row_stride`.
pub fn copy_in<T: Element, W: WorkingFloat>(
    src: &[T],
    dims: &ReduceDims,
    tile: &TileSpec,
    row_stride: usize,
    buf: &mut TileBuffer<W>,
) {
    let cols = tile.reduce.len();
    buf.reset(tile.channels.len(), cols, row_stride);
    for (row, c) in tile.channels.clone().enumerate() {
        let dst = &mut buf.data[row * row_stride..row * row_stride + cols];
        let mut r = tile.reduce.start;
        let mut k = 0;
        while r < tile.reduce.end {
            let (outer, inner) = (r / dims.inner, r % dims.inner);
            let run = (dims.inner - inner).min(tile.reduce.end - r);
            let off = dims.offset(outer, c, inner);
            PrecisionAdapter::<W>::widen_into(&src[off..off + run], &mut dst[k..k + run]);
            r += run;
            k += run;
        }
    }
}

#[cfg(feature = "rayon")]
#[inline]
fn overlap<A, B>(a: A, b: B)
where
    A: FnOnce() + Send,
    B: FnOnce() + Send,
{
    rayon::join(a, b);
}

#[cfg(not(feature = "rayon"))]
#[inline]
fn overlap<A: FnOnce(), B: FnOnce()>(a: A, b: B) {
    a();
    b();
}

/// Two tile buffers used alternately by [`DoubleBuffer::stream`]
#[derive(Clone, Debug)]
pub struct DoubleBuffer<W> {
    buffers: [TileBuffer<W>; 2],
}

impl<W: WorkingFloat> DoubleBuffer<W> {
    /// Two buffers of `rows x row_stride` capacity
    pub fn new(rows: usize, row_stride: usize) -> Self {
        Self {
            buffers: [
                TileBuffer::with_capacity(rows, row_stride),
                TileBuffer::with_capacity(rows, row_stride),
            ],
        }
    }

    /// Run `compute` over every tile in order, loading each with `load`.
    ///
    /// The load of tile `i + 1` runs alongside the compute of tile `i` (on the rayon
    /// pool when the `rayon` feature is enabled).
    pub fn stream<L, C>(&mut self, tiles: &[TileSpec], load: L, mut compute: C)
    where
        L: Fn(&TileSpec, &mut TileBuffer<W>) + Sync,
        C: FnMut(&TileSpec, &TileBuffer<W>) + Send,
    {
        let Some(first) = tiles.first() else {
            return;
        };
        let [a, b] = &mut self.buffers;
        let (mut front, mut back) = (a, b);

        load(first, front);
        for (i, tile) in tiles.iter().enumerate() {
            match tiles.get(i + 1) {
                Some(next) => {
                    let current: &TileBuffer<W> = front;
                    let incoming: &mut TileBuffer<W> = back;
                    let compute = &mut compute;
                    let load = &load;
                    overlap(|| compute(tile, current), || load(next, incoming));
                }
                None => compute(tile, front),
            }
            std::mem::swap(&mut front, &mut back);
        }
    }
}
