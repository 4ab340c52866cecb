// IEEE 754 binary16 to binary32, bit exact. Base stations transmit their
// calibration constants as half floats.

const F32_QNAN: u32 = 0x7fc0_0000;
const F32_INF: u32 = 0x7f80_0000;

/// Widens an IEEE half-precision value to `f32`.
///
/// Every finite half, including subnormals, is exactly representable and is
/// converted without rounding. NaN inputs yield the canonical quiet NaN.
pub fn f16_to_f32(half: u16) -> f32 {
    let sign = u32::from(half & 0x8000) << 16;
    let exponent = u32::from((half >> 10) & 0x1f);
    let mantissa = u32::from(half & 0x3ff);

    let bits = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, m) => {
            // Subnormal: shift the leading one into the implicit bit position.
            let shift = m.leading_zeros() - 21;
            let m = m << shift;
            sign | ((113 - shift) << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, 0) => sign | F32_INF,
        (0x1f, _) => F32_QNAN,
        (e, m) => sign | ((e + 112) << 23) | (m << 13),
    };
    f32::from_bits(bits)
}
