//! Core Tensor type

use super::{Shape, Storage};
use crate::dtype::{DType, Element, PrecisionAdapter, WorkingFloat};
use crate::error::{Error, Result};

/// Contiguous n-dimensional array in host memory
///
/// `Tensor` pairs a dtype-tagged [`Storage`] buffer with a [`Shape`]. Batch-norm
/// inputs are always row-major contiguous, so there are no strides or views.
///
/// # Example
///
/// ```
/// use bnstat::prelude::*;
///
/// let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
/// assert_eq!(x.dtype(), DType::F32);
/// assert_eq!(x.numel(), 4);
/// # Ok::<(), bnstat::error::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
}

impl Tensor {
    /// Create a tensor by copying a slice of data
    ///
    /// Returns an error if `data.len()` does not equal the product of the `shape` dimensions.
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a tensor that takes ownership of `data`
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            storage: T::into_storage(data),
            shape: Shape::from(shape),
        })
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let len = shape.iter().product();
        Self {
            storage: Storage::zeros(dtype, len),
            shape: Shape::from(shape),
        }
    }

    /// Create a tensor filled with a scalar value, converted to `dtype`
    pub fn full_scalar(shape: &[usize], dtype: DType, value: f64) -> Self {
        let len: usize = shape.iter().product();
        let storage = match dtype {
            DType::F64 => Storage::F64(vec![value; len]),
            DType::F32 => Storage::F32(vec![value as f32; len]),
            DType::F16 => Storage::F16(vec![half::f16::from_f64(value); len]),
            DType::BF16 => Storage::BF16(vec![half::bf16::from_f64(value); len]),
        };
        Self {
            storage,
            shape: Shape::from(shape),
        }
    }

    /// Build a tensor of `dtype` by narrowing working-precision values
    pub fn from_working<W: WorkingFloat>(data: &[W], dtype: DType, shape: &[usize]) -> Result<Self> {
        match dtype {
            DType::F64 => Self::from_vec(PrecisionAdapter::<W>::narrow_vec::<f64>(data), shape),
            DType::F32 => Self::from_vec(PrecisionAdapter::<W>::narrow_vec::<f32>(data), shape),
            DType::F16 => {
                Self::from_vec(PrecisionAdapter::<W>::narrow_vec::<half::f16>(data), shape)
            }
            DType::BF16 => {
                Self::from_vec(PrecisionAdapter::<W>::narrow_vec::<half::bf16>(data), shape)
            }
        }
    }

    /// Storage buffer
    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Shape of the tensor
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.storage.len()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Borrow the elements as `&[T]`; fails if `T` is not the tensor's dtype
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        T::storage_slice(&self.storage).ok_or(Error::DTypeMismatch {
            lhs: T::DTYPE,
            rhs: self.dtype(),
        })
    }

    /// Copy the elements out, converting to `T`
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        match &self.storage {
            Storage::F64(v) => v.iter().map(|&x| T::from_f64(x)).collect(),
            Storage::F32(v) => v.iter().map(|&x| T::from_f64(x as f64)).collect(),
            Storage::F16(v) => v.iter().map(|&x| T::from_f64(x.to_f64())).collect(),
            Storage::BF16(v) => v.iter().map(|&x| T::from_f64(x.to_f64())).collect(),
        }
    }

    /// Widen every element into working precision
    pub fn to_working<W: WorkingFloat>(&self) -> Vec<W> {
        match &self.storage {
            Storage::F64(v) => PrecisionAdapter::<W>::widen_vec(v),
            Storage::F32(v) => PrecisionAdapter::<W>::widen_vec(v),
            Storage::F16(v) => PrecisionAdapter::<W>::widen_vec(v),
            Storage::BF16(v) => PrecisionAdapter::<W>::widen_vec(v),
        }
    }

    /// Raw little-endian bytes of the buffer
    pub fn as_bytes(&self) -> &[u8] {
        self.storage.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_checks_len() {
        let err = Tensor::from_slice(&[1.0f32, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_as_slice_dtype_checked() {
        let t = Tensor::from_slice(&[1.0f64, 2.0], &[2]).unwrap();
        assert_eq!(t.as_slice::<f64>().unwrap(), &[1.0, 2.0]);
        assert!(matches!(
            t.as_slice::<f32>(),
            Err(Error::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_working_roundtrip_through_f16() {
        let t = Tensor::full_scalar(&[3], DType::F16, 0.5);
        let w: Vec<f32> = t.to_working();
        assert_eq!(w, vec![0.5; 3]);
        let back = Tensor::from_working(&w, DType::BF16, &[3]).unwrap();
        assert_eq!(back.dtype(), DType::BF16);
        assert_eq!(back.to_vec::<f32>(), vec![0.5; 3]);
        assert_eq!(back.as_bytes().len(), 6);
    }
}
