//! Two-pass sum reduction over fully loaded rows.
//!
//! Used when a worker's whole reduction slice fits in one tile. Pass one computes the
//! mean, pass two the sum of squared deviations from it. Both passes pre-scale every
//! term by `1/P` (`P` the next power of two `>= n`) before the binary-tree sum and undo
//! the scale afterwards, which keeps partial sums in range for long rows.

use super::binary_tree::tree_sum;
use super::welford::{WelfordPartial, WelfordState};
use crate::dtype::WorkingFloat;

#[inline]
fn pow2_scale<W: WorkingFloat>(n: usize) -> (W, W) {
    let p = W::from_count(n.next_power_of_two());
    (W::ONE / p, p)
}

/// Mean of `values`; NaN when empty.
pub fn tree_mean<W: WorkingFloat>(values: &[W], scratch: &mut Vec<W>) -> W {
    let n = values.len();
    if n == 0 {
        return W::NAN;
    }
    let (pre, p) = pow2_scale::<W>(n);
    scratch.clear();
    scratch.extend(values.iter().map(|&x| x * pre));
    tree_sum(scratch) * (p / W::from_count(n))
}

/// Mean and M2 of one row in two passes
pub fn two_pass_row<W: WorkingFloat>(values: &[W], scratch: &mut Vec<W>) -> WelfordState<W> {
    let n = values.len();
    if n == 0 {
        return WelfordState::new();
    }
    let mean = tree_mean(values, scratch);

    let (pre, p) = pow2_scale::<W>(n);
    scratch.clear();
    scratch.extend(values.iter().map(|&x| {
        let d = x - mean;
        d * d * pre
    }));
    let m2 = tree_sum(scratch) * p;

    WelfordState { mean, m2, count: n }
}

/// Two-pass statistics for a tile of `rows` channels with `cols` values each.
pub fn two_pass_tile<W: WorkingFloat>(
    data: &[W],
    row_stride: usize,
    rows: usize,
    cols: usize,
    scratch: &mut Vec<W>,
) -> WelfordPartial<W> {
    let mut out = WelfordPartial::new(rows);
    out.count = cols;
    for r in 0..rows {
        let row = &data[r * row_stride..r * row_stride + cols];
        let s = two_pass_row(row, scratch);
        out.mean[r] = s.mean;
        out.m2[r] = s.m2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_mean_non_pow2() {
        let v: Vec<f32> = (1..=7).map(|i| i as f32).collect();
        assert!((tree_mean(&v, &mut Vec::new()) - 4.0).abs() < 1e-6);
        assert!(tree_mean::<f64>(&[], &mut Vec::new()).is_nan());
    }

    #[test]
    fn test_two_pass_row() {
        let v = [2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = two_pass_row(&v, &mut Vec::new());
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.variance() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_tile_respects_stride() {
        // two rows of 3 values, padded to stride 4 with garbage in the pad slot
        let data = [1.0f32, 2.0, 3.0, 99.0, 10.0, 10.0, 10.0, -99.0];
        let p = two_pass_tile(&data, 4, 2, 3, &mut Vec::new());
        assert_eq!(p.count, 3);
        assert!((p.mean[0] - 2.0).abs() < 1e-6);
        assert!((p.m2[0] - 2.0).abs() < 1e-6);
        assert!((p.mean[1] - 10.0).abs() < 1e-5);
        assert!(p.m2[1].abs() < 1e-9);
    }
}
