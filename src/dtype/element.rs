//! Element trait for mapping Rust types to DType

use super::DType;
use crate::tensor::Storage;
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;

/// Trait for types that can be stored in a tensor
///
/// This trait connects Rust's type system to bnstat's runtime dtype system and to the
/// typed [`Storage`] enum. It is implemented for `f64`, `f32`, `half::f16` and
/// `half::bf16`.
///
/// # Bounds
/// - `Copy + Send + Sync + 'static` - values move freely between worker threads
/// - `Pod + Zeroable` - byte views and zero-filled buffers (bytemuck)
/// - `PartialOrd + Debug` - comparisons and diagnostics in tests
pub trait Element: Copy + Send + Sync + Pod + Zeroable + PartialOrd + Debug + 'static {
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Convert to f64
    fn to_f64(self) -> f64;

    /// Convert from f64 to this type, rounding to nearest
    fn from_f64(v: f64) -> Self;

    /// Zero value
    fn zero() -> Self;

    /// One value
    fn one() -> Self;

    /// Wrap an owned buffer into the matching storage variant
    fn into_storage(data: Vec<Self>) -> Storage;

    /// Borrow the storage as a slice of this type, if the variant matches
    fn storage_slice(storage: &Storage) -> Option<&[Self]>;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F64(data)
    }

    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F32(data)
    }

    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F32(v) => Some(v),
            _ => None,
        }
    }
}

// ============================================================================
// Half-precision floating point types
// ============================================================================

impl Element for half::f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }

    #[inline]
    fn zero() -> Self {
        half::f16::ZERO
    }

    #[inline]
    fn one() -> Self {
        half::f16::ONE
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F16(data)
    }

    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F16(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for half::bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }

    #[inline]
    fn zero() -> Self {
        half::bf16::ZERO
    }

    #[inline]
    fn one() -> Self {
        half::bf16::ONE
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::BF16(data)
    }

    fn storage_slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::BF16(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_roundtrip_through_f64() {
        let v = half::f16::from_f64(1.5);
        assert_eq!(v.to_f64(), 1.5);
        let b = <half::bf16 as Element>::from_f64(-2.0);
        assert_eq!(Element::to_f64(b), -2.0);
    }

    #[test]
    fn test_storage_slice_matches_variant() {
        let s = f32::into_storage(vec![1.0, 2.0]);
        assert_eq!(f32::storage_slice(&s), Some(&[1.0f32, 2.0][..]));
        assert!(f64::storage_slice(&s).is_none());
    }
}
