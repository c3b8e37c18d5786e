//! Common test utilities
#![allow(dead_code)]

use bnstat::plan::ReduceDims;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Assert two f32 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Assert two f64 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f64(a: &[f64], b: &[f64], rtol: f64, atol: f64, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// `n` samples of N(mean, std) from a fixed seed
pub fn normal_f32(n: usize, mean: f32, std: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Normal::new(mean, std).unwrap();
    (0..n).map(|_| dist.sample(&mut rng)).collect()
}

/// Per-channel mean and biased variance of a `[outer, channels, inner]` buffer, in f64
pub fn reference_stats(dims: ReduceDims, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = dims.reduce_size() as f64;
    let mut mean = vec![0.0; dims.channels];
    let mut var = vec![0.0; dims.channels];
    for c in 0..dims.channels {
        let values = channel_values(dims, x, c);
        mean[c] = values.iter().sum::<f64>() / n;
        var[c] = values.iter().map(|v| (v - mean[c]).powi(2)).sum::<f64>() / n;
    }
    (mean, var)
}

/// Every element of channel `c`, in flattened reduction order
pub fn channel_values<T: Copy>(dims: ReduceDims, x: &[T], c: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(dims.reduce_size());
    for o in 0..dims.outer {
        for i in 0..dims.inner {
            out.push(x[dims.offset(o, c, i)]);
        }
    }
    out
}
