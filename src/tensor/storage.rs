//! Storage: owned host buffers, one variant per dtype

use crate::dtype::DType;

/// Owned, contiguous element buffer tagged with its dtype
#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    /// 64-bit floats
    F64(Vec<f64>),
    /// 32-bit floats
    F32(Vec<f32>),
    /// IEEE half floats
    F16(Vec<half::f16>),
    /// Brain floats
    BF16(Vec<half::bf16>),
}

impl Storage {
    /// Zero-filled storage of `len` elements
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F64 => Self::F64(vec![0.0; len]),
            DType::F32 => Self::F32(vec![0.0; len]),
            DType::F16 => Self::F16(vec![half::f16::ZERO; len]),
            DType::BF16 => Self::BF16(vec![half::bf16::ZERO; len]),
        }
    }

    /// Element dtype
    pub fn dtype(&self) -> DType {
        match self {
            Self::F64(_) => DType::F64,
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::BF16(_) => DType::BF16,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F16(v) => v.len(),
            Self::BF16(v) => v.len(),
        }
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of the buffer
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F64(v) => bytemuck::cast_slice(v),
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::F16(v) => bytemuck::cast_slice(v),
            Self::BF16(v) => bytemuck::cast_slice(v),
        }
    }
}
