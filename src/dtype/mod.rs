//! Data type system for bnstat tensors
//!
//! This module provides the `DType` enum for the storage formats a batch-norm
//! invocation accepts, the [`Element`] trait mapping Rust types to those formats,
//! the [`WorkingFloat`] trait for the precision statistics are computed in, and the
//! [`PrecisionAdapter`] that moves values between the two.

mod adapter;
mod element;
mod working;

pub use adapter::{PrecisionAdapter, PrecisionSet};
pub use element::Element;
pub use working::WorkingFloat;

use std::fmt;

// ============================================================================
// Working Precision Configuration
// ============================================================================

/// Working precision for statistics accumulation and normalization.
///
/// Storage formats narrower than the working precision are widened on load and
/// narrowed on store. Every intermediate (means, M2 sums, rstd, the normalized value
/// before narrowing) lives in the working precision.
///
/// | Precision | Decimal Digits | Use Case |
/// |-----------|----------------|----------|
/// | **F32**   | ~7             | Training and inference (default) |
/// | **F64**   | ~15-16         | F64 inputs, reference runs, very long reduction axes |
///
/// # Default
///
/// F32 is the default. F64 input tensors require F64 working precision.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccumulationPrecision {
    /// Accumulate in F64
    F64,
    /// Accumulate in F32 (default)
    #[default]
    F32,
}

impl AccumulationPrecision {
    /// The storage dtype matching this working precision
    #[inline]
    pub const fn dtype(self) -> DType {
        match self {
            Self::F64 => DType::F64,
            Self::F32 => DType::F32,
        }
    }
}

// ============================================================================
// DType Enum
// ============================================================================

/// Storage formats supported by bnstat tensors
///
/// The discriminant values are stable: F64=0, F32=1, F16=2, BF16=3.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point (most common)
    F32 = 1,
    /// 16-bit floating point (IEEE 754)
    F16 = 2,
    /// 16-bit brain floating point
    BF16 = 3,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Returns true for the 16-bit storage formats
    #[inline]
    pub const fn is_half(self) -> bool {
        matches!(self, Self::F16 | Self::BF16)
    }

    /// Short name used in error messages and logs
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
    }

    #[test]
    fn test_short_names() {
        assert_eq!(DType::BF16.to_string(), "bf16");
        assert_eq!(DType::F32.short_name(), "f32");
        assert!(DType::F16.is_half());
        assert!(!DType::F64.is_half());
    }

    #[test]
    fn test_accumulation_precision_default() {
        assert_eq!(AccumulationPrecision::default(), AccumulationPrecision::F32);
        assert_eq!(AccumulationPrecision::F64.dtype(), DType::F64);
    }
}
