//! Binary-tree reduction: fold the remainder into the lower half, then halve.
//!
//! For `N` values with `H` the largest power of two not above `N`, the first pass
//! folds `a[i] = a[i] ⊕ a[i + H]` for `i < N - H`; afterwards the first `H` slots are
//! combined by repeated halving. The combine order depends only on `N`, so the result
//! is deterministic for a fixed input order.
//!
//! The same primitive reduces Welford lanes within a tile, rows of a full-load sum
//! reduction, and per-worker partials during cross-partition merge.

use crate::dtype::WorkingFloat;

/// Largest power of two `<= n`; zero for `n == 0`.
#[inline]
pub fn floor_pow2(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// Fold `values` in place with `combine`; the total ends up in `values[0]`.
///
/// Returns `false` (and leaves `values` untouched) when the slice is empty.
pub fn tree_fold_in_place<V, F>(values: &mut [V], mut combine: F) -> bool
where
    F: FnMut(&V, &V) -> V,
{
    let n = values.len();
    if n == 0 {
        return false;
    }

    let mut len = floor_pow2(n);
    for i in 0..n - len {
        let folded = combine(&values[i], &values[i + len]);
        values[i] = folded;
    }

    while len > 1 {
        len /= 2;
        for i in 0..len {
            let folded = combine(&values[i], &values[i + len]);
            values[i] = folded;
        }
    }
    true
}

/// Reduce owned values with `combine`, returning `None` for an empty input.
pub fn tree_reduce<V, F>(mut values: Vec<V>, combine: F) -> Option<V>
where
    F: FnMut(&V, &V) -> V,
{
    if !tree_fold_in_place(&mut values, combine) {
        return None;
    }
    values.truncate(1);
    values.pop()
}

/// Sum `values` in place; returns zero for an empty slice.
#[inline]
pub fn tree_sum<W: WorkingFloat>(values: &mut [W]) -> W {
    if tree_fold_in_place(values, |&a, &b| a + b) {
        values[0]
    } else {
        W::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_pow2() {
        assert_eq!(floor_pow2(0), 0);
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(7), 4);
        assert_eq!(floor_pow2(8), 8);
        assert_eq!(floor_pow2(1000), 512);
    }

    #[test]
    fn test_ones_sum_to_length() {
        for n in [1usize, 2, 3, 5, 8, 13, 64, 100, 1023, 1024, 4097] {
            let mut v = vec![1.0f32; n];
            assert_eq!(tree_sum(&mut v), n as f32, "n = {n}");
        }
        let mut empty: [f64; 0] = [];
        assert_eq!(tree_sum(&mut empty), 0.0);
    }

    #[test]
    fn test_combine_order_is_fixed() {
        // record the pairs combined for N = 6: remainder fold (0,4) (1,5), then halving
        let mut order = Vec::new();
        let mut v: Vec<usize> = (0..6).collect();
        tree_fold_in_place(&mut v, |&a, &b| {
            order.push((a, b));
            a.min(b)
        });
        assert_eq!(order, vec![(0, 4), (1, 5), (0, 2), (1, 3), (0, 1)]);
    }

    #[test]
    fn test_tree_reduce_owned() {
        let total = tree_reduce(vec![vec![1], vec![2], vec![3]], |a, b| {
            let mut c = a.clone();
            c.extend_from_slice(b);
            c
        });
        assert_eq!(total, Some(vec![1, 3, 2]));
        assert_eq!(tree_reduce(Vec::<u8>::new(), |a, _| *a), None);
    }
}
