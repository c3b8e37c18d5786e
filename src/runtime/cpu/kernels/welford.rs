//! Welford accumulation and Chan merge.
//!
//! Three shapes of the same recurrence:
//!
//! - [`WelfordState`]: one channel, one sample at a time
//! - [`WelfordPartial`]: a run of channels sharing one count; this is the record
//!   exchanged between tiles and between workers
//! - [`WelfordLanes`]: a tile-parallel accumulator where each of `L` lanes owns every
//!   `L`-th reduction element, finalized into a [`WelfordPartial`] by a weighted
//!   binary-tree sum over lanes

use super::binary_tree::tree_sum;
use crate::dtype::WorkingFloat;

// ============================================================================
// Scalar state
// ============================================================================

/// `{mean, m2, count}` for a single channel
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WelfordState<W> {
    /// Running mean
    pub mean: W,
    /// Sum of squared deviations from the running mean
    pub m2: W,
    /// Samples consumed
    pub count: usize,
}

impl<W: WorkingFloat> WelfordState<W> {
    /// Empty state
    pub fn new() -> Self {
        Self {
            mean: W::ZERO,
            m2: W::ZERO,
            count: 0,
        }
    }

    /// Consume one sample
    #[inline]
    pub fn update(&mut self, x: W) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / W::from_count(self.count);
        self.m2 += delta * (x - self.mean);
    }

    /// Chan's combination of two independent states
    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        if other.count == 0 {
            return *self;
        }
        if self.count == 0 {
            return *other;
        }
        let (mean, m2) = chan_merge(
            self.mean,
            self.m2,
            self.count,
            other.mean,
            other.m2,
            other.count,
        );
        Self {
            mean,
            m2,
            count: self.count + other.count,
        }
    }

    /// Biased variance `m2 / count` (NaN when empty)
    #[inline]
    pub fn variance(&self) -> W {
        self.m2 / W::from_count(self.count)
    }
}

#[inline]
fn chan_merge<W: WorkingFloat>(
    mean_a: W,
    m2_a: W,
    na: usize,
    mean_b: W,
    m2_b: W,
    nb: usize,
) -> (W, W) {
    let n = W::from_count(na + nb);
    let wa = W::from_count(na);
    let wb = W::from_count(nb);
    let delta = mean_b - mean_a;
    let mean = mean_a + delta * (wb / n);
    let m2 = m2_a + m2_b + delta * delta * (wa * wb / n);
    (mean, m2)
}

// ============================================================================
// Channel-vector partial
// ============================================================================

/// Partial statistics for a run of channels that have all seen `count` samples
#[derive(Clone, Debug, PartialEq)]
pub struct WelfordPartial<W> {
    /// Per-channel mean
    pub mean: Vec<W>,
    /// Per-channel sum of squared deviations
    pub m2: Vec<W>,
    /// Samples consumed by every channel
    pub count: usize,
}

impl<W: WorkingFloat> WelfordPartial<W> {
    /// Zeroed record for `channels` channels
    pub fn new(channels: usize) -> Self {
        Self {
            mean: vec![W::ZERO; channels],
            m2: vec![W::ZERO; channels],
            count: 0,
        }
    }

    /// Number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Consume one sample vector, one value per channel
    pub fn update(&mut self, sample: &[W]) {
        debug_assert_eq!(sample.len(), self.channels());
        self.count += 1;
        let inv_n = W::ONE / W::from_count(self.count);
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(sample) {
            let delta = x - *mean;
            *mean += delta * inv_n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Chan's combination, channel by channel. A zero-count side is a no-op.
    pub fn merge(&self, other: &Self) -> Self {
        debug_assert_eq!(self.channels(), other.channels());
        if other.count == 0 {
            return self.clone();
        }
        if self.count == 0 {
            return other.clone();
        }
        let mut out = Self::new(self.channels());
        out.count = self.count + other.count;
        for c in 0..self.channels() {
            let (mean, m2) = chan_merge(
                self.mean[c],
                self.m2[c],
                self.count,
                other.mean[c],
                other.m2[c],
                other.count,
            );
            out.mean[c] = mean;
            out.m2[c] = m2;
        }
        out
    }

    /// Copy `part` into channels `[offset, offset + part.channels())`.
    ///
    /// The destination takes `part.count`; every part written into one record must
    /// carry the same count.
    pub fn write_channels(&mut self, offset: usize, part: &Self) {
        let end = offset + part.channels();
        self.mean[offset..end].copy_from_slice(&part.mean);
        self.m2[offset..end].copy_from_slice(&part.m2);
        self.count = part.count;
    }

    /// Biased variance per channel (NaN when empty)
    pub fn variance(&self) -> Vec<W> {
        let n = W::from_count(self.count);
        self.m2.iter().map(|&m2| m2 / n).collect()
    }

    /// View of channel `c` as a scalar state
    pub fn channel(&self, c: usize) -> WelfordState<W> {
        WelfordState {
            mean: self.mean[c],
            m2: self.m2[c],
            count: self.count,
        }
    }
}

// ============================================================================
// Lane-parallel tile accumulator
// ============================================================================

/// Tile-parallel Welford accumulator.
///
/// Holds `channels x lanes` running means and M2 sums. A tile row of `cols <= lanes`
/// reduction elements updates lanes `0..cols` of its channel, so lane counts differ by
/// at most one when only the final tile is short.
#[derive(Clone, Debug)]
pub struct WelfordLanes<W> {
    lanes: usize,
    channels: usize,
    mean: Vec<W>,
    m2: Vec<W>,
    counts: Vec<usize>,
}

impl<W: WorkingFloat> WelfordLanes<W> {
    /// Accumulator for `channels` channels and `lanes` lanes
    pub fn new(channels: usize, lanes: usize) -> Self {
        Self {
            lanes,
            channels,
            mean: vec![W::ZERO; channels * lanes],
            m2: vec![W::ZERO; channels * lanes],
            counts: vec![0; lanes],
        }
    }

    /// Number of lanes
    #[inline]
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Reset to the empty state for `channels` channels, reusing the allocation
    pub fn reset(&mut self, channels: usize) {
        self.channels = channels;
        self.mean.clear();
        self.mean.resize(channels * self.lanes, W::ZERO);
        self.m2.clear();
        self.m2.resize(channels * self.lanes, W::ZERO);
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Consume a tile laid out as `channels` rows of `cols` values, `row_stride` apart.
    pub fn update_tile(&mut self, data: &[W], row_stride: usize, cols: usize) {
        debug_assert!(cols <= self.lanes);
        for count in &mut self.counts[..cols] {
            *count += 1;
        }

        for c in 0..self.channels {
            let row = &data[c * row_stride..c * row_stride + cols];
            let base = c * self.lanes;
            let mean = &mut self.mean[base..base + cols];
            let m2 = &mut self.m2[base..base + cols];
            for (i, &x) in row.iter().enumerate() {
                let delta = x - mean[i];
                mean[i] += delta / W::from_count(self.counts[i]);
                m2[i] += delta * (x - mean[i]);
            }
        }
    }

    /// Combine lanes into one partial per channel.
    ///
    /// `mean = Σ mean_i·n_i/N`, `m2 = Σ (m2_i + n_i·(mean_i - mean)²)`, both summed with
    /// the binary tree. `scratch` is reused between channels.
    pub fn finalize(&self, scratch: &mut Vec<W>) -> WelfordPartial<W> {
        let mut out = WelfordPartial::new(self.channels);
        let total: usize = self.counts.iter().sum();
        if total == 0 {
            return out;
        }
        out.count = total;

        let active = self
            .counts
            .iter()
            .rposition(|&c| c > 0)
            .map_or(0, |last| last + 1);
        let n_total = W::from_count(total);
        let weights: Vec<W> = self.counts[..active]
            .iter()
            .map(|&n| W::from_count(n) / n_total)
            .collect();

        for c in 0..self.channels {
            let base = c * self.lanes;
            let means = &self.mean[base..base + active];
            let m2s = &self.m2[base..base + active];

            scratch.clear();
            scratch.extend(means.iter().zip(&weights).map(|(&m, &w)| m * w));
            let mean = tree_sum(scratch);

            scratch.clear();
            scratch.extend(
                means
                    .iter()
                    .zip(m2s)
                    .zip(&self.counts[..active])
                    .map(|((&m, &m2), &n)| {
                        let d = m - mean;
                        m2 + W::from_count(n) * d * d
                    }),
            );
            out.mean[c] = mean;
            out.m2[c] = tree_sum(scratch);
        }
        out
    }
}
