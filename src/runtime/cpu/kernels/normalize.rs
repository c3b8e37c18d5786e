//! Affine normalization with finalized per-channel statistics.

use crate::dtype::{Element, WorkingFloat};

/// Per-channel inputs of the normalize pass
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelAffine<W> {
    /// Mean subtracted from every element of the channel
    pub mean: Vec<W>,
    /// Scale applied after centering
    pub rstd: Vec<W>,
    /// Affine weight (gamma)
    pub gamma: Vec<W>,
    /// Affine bias (beta)
    pub beta: Vec<W>,
}

impl<W: WorkingFloat> ChannelAffine<W> {
    /// Number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.mean.len()
    }
}

/// `y[i] = (x[i] - mean) * rstd * gamma + beta`, narrowed to `T` on write.
#[inline]
pub fn normalize_row<T: Element, W: WorkingFloat>(
    x: &[T],
    y: &mut [T],
    mean: W,
    rstd: W,
    gamma: W,
    beta: W,
) {
    debug_assert_eq!(x.len(), y.len());
    for (o, &v) in y.iter_mut().zip(x) {
        *o = ((W::widen(v) - mean) * rstd * gamma + beta).narrow();
    }
}

/// Normalize whole outer rows of a `[R1, A, R0]` tensor.
///
/// `x` and `y` cover an integer number of outer rows, each `A * inner` elements long.
pub fn normalize_outer_rows<T: Element, W: WorkingFloat>(
    x: &[T],
    y: &mut [T],
    inner: usize,
    affine: &ChannelAffine<W>,
) {
    let channels = affine.channels();
    let row_len = channels * inner;
    if row_len == 0 {
        return;
    }
    for (x_row, y_row) in x.chunks_exact(row_len).zip(y.chunks_exact_mut(row_len)) {
        for c in 0..channels {
            let span = c * inner..(c + 1) * inner;
            normalize_row(
                &x_row[span.clone()],
                &mut y_row[span],
                affine.mean[c],
                affine.rstd[c],
                affine.gamma[c],
                affine.beta[c],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_normalize_row_affine() {
        let x = [1.0f32, 3.0, 5.0];
        let mut y = [0.0f32; 3];
        normalize_row(&x, &mut y, 3.0f32, 0.5, 2.0, 1.0);
        assert_eq!(y, [-1.0, 1.0, 3.0]);
    }

    #[test]
    fn test_outer_rows_channel_mapping() {
        // [R1=2, A=2, R0=2]
        let x = [0.0f64, 2.0, 10.0, 20.0, 4.0, 6.0, 30.0, 40.0];
        let mut y = [0.0f64; 8];
        let affine = ChannelAffine {
            mean: vec![3.0, 25.0],
            rstd: vec![1.0, 0.1],
            gamma: vec![1.0, 1.0],
            beta: vec![0.0, 100.0],
        };
        normalize_outer_rows(&x, &mut y, 2, &affine);
        let expect = [-3.0, -1.0, 98.5, 99.5, 1.0, 3.0, 100.5, 101.5];
        for (a, b) in y.iter().zip(expect) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_half_storage_narrowed() {
        let x = [f16::from_f32(2.0), f16::from_f32(6.0)];
        let mut y = [f16::ZERO; 2];
        normalize_row(&x, &mut y, 4.0f32, 0.5, 1.0, 0.0);
        assert_eq!(y, [f16::from_f32(-1.0), f16::from_f32(1.0)]);
    }
}
