//! Exponential-moving-average update of running statistics.

use crate::dtype::WorkingFloat;
use crate::error::{Error, Result};

/// Blends batch statistics into running estimates.
///
/// `new_mean = m * batch_mean + (1 - m) * running_mean`
/// `new_var  = m * batch_var * bessel + (1 - m) * running_var`
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunningStatsUpdater<W> {
    momentum: W,
    bessel: W,
}

impl<W: WorkingFloat> RunningStatsUpdater<W> {
    /// Updater for a reduction extent of `reduce_size` elements.
    ///
    /// With `bessel_correction` the batch variance is scaled by `R / (R - 1)`; `R == 1`
    /// is rejected since the factor is undefined.
    pub fn new(momentum: W, reduce_size: usize, bessel_correction: bool) -> Result<Self> {
        let bessel = if bessel_correction {
            if reduce_size <= 1 {
                return Err(Error::BesselUndefined { reduce_size });
            }
            W::from_count(reduce_size) / W::from_count(reduce_size - 1)
        } else {
            W::ONE
        };
        Ok(Self { momentum, bessel })
    }

    /// Bessel factor applied to the batch variance
    #[inline]
    pub fn bessel(&self) -> W {
        self.bessel
    }

    /// Blended mean for one channel
    #[inline]
    pub fn mean(&self, batch_mean: W, running_mean: W) -> W {
        self.momentum * batch_mean + (W::ONE - self.momentum) * running_mean
    }

    /// Blended variance for one channel; `batch_var` is the biased batch variance
    #[inline]
    pub fn var(&self, batch_var: W, running_var: W) -> W {
        self.momentum * (batch_var * self.bessel) + (W::ONE - self.momentum) * running_var
    }

    /// Update running statistics in place, channel by channel
    pub fn apply(
        &self,
        batch_mean: &[W],
        batch_var: &[W],
        running_mean: &mut [W],
        running_var: &mut [W],
    ) {
        debug_assert_eq!(batch_mean.len(), running_mean.len());
        debug_assert_eq!(batch_var.len(), running_var.len());
        for (rm, &bm) in running_mean.iter_mut().zip(batch_mean) {
            *rm = self.mean(bm, *rm);
        }
        for (rv, &bv) in running_var.iter_mut().zip(batch_var) {
            *rv = self.var(bv, *rv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_momentum_one_takes_batch() {
        let u = RunningStatsUpdater::<f32>::new(1.0, 10, false).unwrap();
        assert_eq!(u.mean(3.0, -8.0), 3.0);
        assert_eq!(u.var(2.5, 100.0), 2.5);
    }

    #[test]
    fn test_momentum_zero_keeps_running() {
        let u = RunningStatsUpdater::<f64>::new(0.0, 10, true).unwrap();
        assert_eq!(u.mean(3.0, -8.0), -8.0);
        assert_eq!(u.var(2.5, 100.0), 100.0);
    }

    #[test]
    fn test_bessel_factor() {
        let u = RunningStatsUpdater::<f64>::new(0.1, 5, true).unwrap();
        assert!((u.bessel() - 1.25).abs() < 1e-15);
        let mut rm = [0.0, 1.0];
        let mut rv = [1.0, 1.0];
        u.apply(&[5.0, 1.0], &[4.0, 0.0], &mut rm, &mut rv);
        assert!((rm[0] - 0.5).abs() < 1e-12);
        assert!((rm[1] - 1.0).abs() < 1e-12);
        assert!((rv[0] - (0.1 * 5.0 + 0.9)).abs() < 1e-12);
        assert!((rv[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_single_element_bessel_rejected() {
        let err = RunningStatsUpdater::<f32>::new(0.1, 1, true).unwrap_err();
        assert!(matches!(err, Error::BesselUndefined { reduce_size: 1 }));
        assert!(RunningStatsUpdater::<f32>::new(0.1, 1, false).is_ok());
    }
}
