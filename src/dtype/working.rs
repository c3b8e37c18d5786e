//! Working-precision float trait
//!
//! Statistics kernels are generic over `W: WorkingFloat`; storage elements are
//! converted into `W` on load and back on store.

use super::Element;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Float type every intermediate of a batch-norm invocation is computed in.
pub trait WorkingFloat:
    Element
    + Default
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + Debug
{
    /// Additive identity
    const ZERO: Self;
    /// Multiplicative identity
    const ONE: Self;
    /// 0.5
    const HALF: Self;
    /// Positive infinity
    const INFINITY: Self;
    /// Quiet NaN
    const NAN: Self;

    /// Widen a storage element into the working precision
    fn widen<T: Element>(v: T) -> Self;

    /// Narrow to a storage element, rounding to nearest
    fn narrow<T: Element>(self) -> T;

    /// Convert a count into the working precision
    fn from_count(n: usize) -> Self;

    /// Square root
    fn sqrt(self) -> Self;

    /// IEEE maximum (returns the non-NaN operand when one is NaN)
    fn max(self, other: Self) -> Self;

    /// True if NaN
    fn is_nan(self) -> bool;
}

impl WorkingFloat for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;
    const INFINITY: Self = f32::INFINITY;
    const NAN: Self = f32::NAN;

    #[inline]
    fn widen<T: Element>(v: T) -> Self {
        // f16/bf16/f32 embed exactly in f32; f64 rounds once
        v.to_f64() as f32
    }

    #[inline]
    fn narrow<T: Element>(self) -> T {
        // the f64 hop is exact, so T sees a single rounding
        T::from_f64(self as f64)
    }

    #[inline]
    fn from_count(n: usize) -> Self {
        n as f32
    }

    #[inline]
    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f32::max(self, other)
    }

    #[inline]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl WorkingFloat for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;
    const INFINITY: Self = f64::INFINITY;
    const NAN: Self = f64::NAN;

    #[inline]
    fn widen<T: Element>(v: T) -> Self {
        v.to_f64()
    }

    #[inline]
    fn narrow<T: Element>(self) -> T {
        T::from_f64(self)
    }

    #[inline]
    fn from_count(n: usize) -> Self {
        n as f64
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }

    #[inline]
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}
