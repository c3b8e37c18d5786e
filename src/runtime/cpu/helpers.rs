//! Helpers shared by the CPU operation implementations

// ============================================================================
// DType Dispatch Macro
// ============================================================================

/// Macro for dtype dispatch to typed code
///
/// Matches on a storage dtype and executes the block with `T` bound to the matching
/// Rust type. Usage: `dispatch_dtype!(dtype, T => { code using T })`
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F16 => {
                type $T = half::f16;
                $body
            }
            $crate::dtype::DType::BF16 => {
                type $T = half::bf16;
                $body
            }
        }
    };
}

pub(crate) use dispatch_dtype;

/// Split `data` into consecutive mutable chunks of the given lengths
pub(crate) fn split_lengths_mut<'a, T>(mut data: &'a mut [T], lengths: &[usize]) -> Vec<&'a mut [T]> {
    let mut chunks = Vec::with_capacity(lengths.len());
    for &len in lengths {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(len);
        chunks.push(head);
        data = tail;
    }
    chunks
}
