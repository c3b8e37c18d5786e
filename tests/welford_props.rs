//! Property tests for the statistics kernels

mod common;

use bnstat::prelude::*;
use bnstat::runtime::cpu::kernels::{
    RunningStatsUpdater, WelfordLanes, WelfordState, rsqrt, tree_sum, two_pass_row,
};
use proptest::prelude::*;

fn samples() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e3f64..1.0e3, 1..400)
}

fn welford(values: &[f64]) -> WelfordState<f64> {
    let mut s = WelfordState::new();
    for &v in values {
        s.update(v);
    }
    s
}

fn close(a: f64, b: f64, scale: f64) -> bool {
    (a - b).abs() <= 1e-9 * scale.max(1.0)
}

proptest! {
    #[test]
    fn test_welford_matches_two_pass(values in samples()) {
        let w = welford(&values);
        let t = two_pass_row(&values, &mut Vec::new());
        let scale = values.iter().map(|v| v * v).sum::<f64>();
        prop_assert_eq!(w.count, t.count);
        prop_assert!(close(w.mean, t.mean, scale.sqrt()), "{} vs {}", w.mean, t.mean);
        prop_assert!(close(w.m2, t.m2, scale), "{} vs {}", w.m2, t.m2);
    }

    #[test]
    fn test_merge_associative(
        a in samples(),
        b in samples(),
        c in samples(),
    ) {
        let (sa, sb, sc) = (welford(&a), welford(&b), welford(&c));
        let left = sa.merge(&sb).merge(&sc);
        let right = sa.merge(&sb.merge(&sc));
        let swapped = sc.merge(&sa).merge(&sb);

        let all: Vec<f64> = a.iter().chain(&b).chain(&c).copied().collect();
        let whole = welford(&all);
        let scale = all.iter().map(|v| v * v).sum::<f64>();

        for s in [left, right, swapped] {
            prop_assert_eq!(s.count, whole.count);
            prop_assert!(close(s.mean, whole.mean, scale.sqrt()));
            prop_assert!(close(s.m2, whole.m2, scale));
        }
    }

    #[test]
    fn test_merge_with_empty_is_identity(values in samples()) {
        let s = welford(&values);
        prop_assert_eq!(s.merge(&WelfordState::new()), s);
        prop_assert_eq!(WelfordState::new().merge(&s), s);
    }

    #[test]
    fn test_tree_sum_of_ones_is_exact(n in 0usize..5000) {
        let mut ones = vec![1.0f32; n];
        prop_assert_eq!(tree_sum(&mut ones), n as f32);
    }

    #[test]
    fn test_rsqrt_relative_error(v in 1.0e-4f64..1.0e4) {
        let got = rsqrt(v, 0.0);
        let want = 1.0 / v.sqrt();
        prop_assert!(((got - want) / want).abs() < 1e-6);

        let got = rsqrt(v as f32, 0.0) as f64;
        prop_assert!(((got - want) / want).abs() < 1e-6);
    }

    #[test]
    fn test_running_update_momentum_bounds(
        batch in -1.0e3f32..1.0e3,
        prior in -1.0e3f32..1.0e3,
        r in 2usize..10_000,
    ) {
        let take_batch = RunningStatsUpdater::<f32>::new(1.0, r, false).unwrap();
        prop_assert_eq!(take_batch.mean(batch, prior), batch);
        prop_assert_eq!(take_batch.var(batch.abs(), prior.abs()), batch.abs());
        let keep_prior = RunningStatsUpdater::<f32>::new(0.0, r, true).unwrap();
        prop_assert_eq!(keep_prior.mean(batch, prior), prior);
        prop_assert_eq!(keep_prior.var(batch.abs(), prior.abs()), prior.abs());
    }

    #[test]
    fn test_lanes_match_sequential(
        values in prop::collection::vec(-50.0f64..50.0, 1..300),
        lanes in 1usize..40,
    ) {
        let mut acc = WelfordLanes::<f64>::new(1, lanes);
        for tile in values.chunks(lanes) {
            acc.update_tile(tile, lanes, tile.len());
        }
        let part = acc.finalize(&mut Vec::new());
        let seq = welford(&values);
        let scale = values.iter().map(|v| v * v).sum::<f64>();
        prop_assert_eq!(part.count, values.len());
        prop_assert!(close(part.mean[0], seq.mean, scale.sqrt()));
        prop_assert!(close(part.m2[0], seq.m2, scale));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_partition_strategies_agree(
        outer in 1usize..24,
        channels in 1usize..6,
        inner in 1usize..12,
        workers in 1usize..5,
        seed in any::<u64>(),
    ) {
        let client = CpuClient::new();
        let dims = ReduceDims::new(outer, channels, inner);
        let data = common::normal_f32(dims.numel(), 2.0, 3.0, seed);
        let x = Tensor::from_slice(&data, &[outer, channels, inner]).unwrap();
        let config = BatchNormConfig::default();

        let kept = PartitionPlan::builder(dims).workers(workers).build().unwrap();
        let split = PartitionPlan::builder(dims)
            .partition(PartitionStrategy::SplitReduce)
            .workers(workers)
            .tile_reduce(8)
            .workspace(1 << 12)
            .build()
            .unwrap();

        let a = client.batch_stats(&x, &kept, &config).unwrap();
        let b = client.batch_stats(&x, &split, &config).unwrap();
        prop_assert_eq!(a.count, b.count);
        for (m, n) in a.mean.to_vec::<f32>().iter().zip(b.mean.to_vec::<f32>()) {
            prop_assert!((m - n).abs() < 1e-4);
        }
        for (v, w) in a.var.to_vec::<f32>().iter().zip(b.var.to_vec::<f32>()) {
            prop_assert!((v - w).abs() <= 1e-4 * v.abs().max(1.0));
        }
    }
}
