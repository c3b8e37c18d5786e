//! Per-invocation batch-norm configuration

use crate::dtype::AccumulationPrecision;
use crate::error::{Error, Result};
use crate::plan::ChannelLayout;

/// Default epsilon added to the variance before the reciprocal square root
pub const DEFAULT_EPSILON: f64 = 1e-5;

/// Default running-statistics momentum
pub const DEFAULT_MOMENTUM: f64 = 0.1;

/// Scalars and switches of one batch-norm invocation
///
/// # Example
///
/// ```
/// use bnstat::config::BatchNormConfig;
///
/// let cfg = BatchNormConfig::default().with_momentum(0.01).inference();
/// assert!(!cfg.training);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BatchNormConfig {
    /// Added to the variance before taking the reciprocal square root
    pub epsilon: f64,
    /// Weight of the batch statistic in the running-statistics blend
    pub momentum: f64,
    /// Compute batch statistics (true) or use running statistics (false)
    pub training: bool,
    /// Scale the batch variance by `R / (R - 1)` before blending it into `running_var`
    pub bessel_correction: bool,
    /// Working precision
    pub precision: AccumulationPrecision,
    /// Position of the channel axis
    pub layout: ChannelLayout,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            momentum: DEFAULT_MOMENTUM,
            training: true,
            bessel_correction: true,
            precision: AccumulationPrecision::default(),
            layout: ChannelLayout::default(),
        }
    }
}

impl BatchNormConfig {
    /// Set epsilon
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set momentum
    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Enable or disable Bessel correction of the running variance
    pub fn with_bessel_correction(mut self, enabled: bool) -> Self {
        self.bessel_correction = enabled;
        self
    }

    /// Set the working precision
    pub fn with_precision(mut self, precision: AccumulationPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Set the channel layout
    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Switch to inference mode
    pub fn inference(mut self) -> Self {
        self.training = false;
        self
    }

    /// Reject scalars that cannot produce meaningful statistics
    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(Error::invalid_argument(
                "epsilon",
                format!("must be finite and non-negative, got {}", self.epsilon),
            ));
        }
        if !self.momentum.is_finite() {
            return Err(Error::invalid_argument(
                "momentum",
                format!("must be finite, got {}", self.momentum),
            ));
        }
        Ok(())
    }
}
