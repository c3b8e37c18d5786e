//! Reciprocal square root of `var + eps` with Newton-Raphson refinement.

use crate::dtype::WorkingFloat;

/// Floor applied to `var + eps` before the reciprocal.
pub const RSQRT_FLOOR: f64 = -99.99;

/// `1 / sqrt(var + eps)` refined beyond the accuracy of `sqrt(1 / x)`.
///
/// The initial estimate `y = sqrt(1/x)` goes through one Newton step for rsqrt, then
/// one correction `y += y * e / 2` with the residual `e = 1 - x * y^2`, evaluated
/// through the exact reciprocal to limit cancellation.
///
/// Edge cases: `var + eps == +inf` gives `0`; `var + eps == 0` gives `+inf`. A negative
/// sum produces NaN. A positive subnormal sum, whose reciprocal overflows, falls back
/// to `1 / sqrt(x)` and stays finite.
#[inline]
pub fn rsqrt<W: WorkingFloat>(var: W, eps: W) -> W {
    let x = (var + eps).max(W::from_f64(RSQRT_FLOOR));
    if x == W::INFINITY {
        return W::ZERO;
    }
    if x == W::ZERO {
        return W::INFINITY;
    }

    let r = W::ONE / x;
    if r == W::INFINITY {
        return W::ONE / x.sqrt();
    }
    let y0 = r.sqrt();

    let t = -W::HALF * x * y0;
    let y1 = y0 * (W::from_f64(1.5) + t * y0);

    let s = W::ONE - x * r;
    let r_res = r - y1 * y1;
    let e = s + x * r_res;

    y1 + y1 * e * W::HALF
}

/// Apply [`rsqrt`] elementwise: `out[i] = rsqrt(var[i], eps)`.
pub fn rsqrt_into<W: WorkingFloat>(var: &[W], eps: W, out: &mut [W]) {
    debug_assert_eq!(var.len(), out.len());
    for (o, &v) in out.iter_mut().zip(var) {
        *o = rsqrt(v, eps);
    }
}
