//! Conversion between storage formats and the working precision

use super::{AccumulationPrecision, DType, Element, WorkingFloat};
use crate::error::{Error, Result};
use std::marker::PhantomData;

/// Widens storage elements into working precision and narrows them back.
///
/// Zero-sized; the working precision is the type parameter.
#[derive(Copy, Clone, Debug, Default)]
pub struct PrecisionAdapter<W>(PhantomData<W>);

impl<W: WorkingFloat> PrecisionAdapter<W> {
    /// Widen `src` into `dst`. Both slices must have the same length.
    #[inline]
    pub fn widen_into<T: Element>(src: &[T], dst: &mut [W]) {
        debug_assert_eq!(src.len(), dst.len());
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = W::widen(s);
        }
    }

    /// Narrow `src` into `dst`. Both slices must have the same length.
    #[inline]
    pub fn narrow_into<T: Element>(src: &[W], dst: &mut [T]) {
        debug_assert_eq!(src.len(), dst.len());
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = s.narrow();
        }
    }

    /// Widen into a freshly allocated buffer
    pub fn widen_vec<T: Element>(src: &[T]) -> Vec<W> {
        src.iter().map(|&s| W::widen(s)).collect()
    }

    /// Narrow into a freshly allocated buffer
    pub fn narrow_vec<T: Element>(src: &[W]) -> Vec<T> {
        src.iter().map(|&s| s.narrow()).collect()
    }
}

/// The storage formats taking part in one invocation.
///
/// Supported combinations, for working dtype `Wd`:
///
/// | input        | weight / bias          | running stats          |
/// |--------------|------------------------|------------------------|
/// | f32/f16/bf16 | input dtype or `Wd`    | input dtype or `Wd`    |
/// | f64          | f64 (needs `Wd = f64`) | f64 (needs `Wd = f64`) |
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrecisionSet {
    /// Input and output dtype
    pub input: DType,
    /// Weight / bias dtype, if affine parameters are present
    pub param: Option<DType>,
    /// Running statistics dtype, if running statistics are present
    pub running: Option<DType>,
    /// Working precision
    pub working: AccumulationPrecision,
}

impl PrecisionSet {
    /// Check the combination, failing with [`Error::UnsupportedPrecision`].
    pub fn validate(&self) -> Result<()> {
        let working = self.working.dtype();
        let companion_ok = |d: Option<DType>| match d {
            None => true,
            Some(d) => d == self.input || d == working,
        };
        let input_ok = match self.input {
            DType::F64 => working == DType::F64,
            DType::F32 | DType::F16 | DType::BF16 => true,
        };
        if input_ok && companion_ok(self.param) && companion_ok(self.running) {
            Ok(())
        } else {
            Err(Error::UnsupportedPrecision {
                input: self.input,
                param: self.param,
                running: self.running,
                working,
            })
        }
    }
}
