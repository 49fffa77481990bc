//! Numeric semantics shared by the interpreter and nowhere else: wrapping
//! integer arithmetic, trapping division, IEEE754 with canonical NaNs, and
//! the checked/saturating float-to-int conversions.

use crate::trap::Trap;

pub(crate) const CANON_NAN_F32: u32 = 0x7FC0_0000;
pub(crate) const CANON_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

/// Arithmetic results canonicalize NaNs; pure bit moves (loads, stores,
/// reinterprets, abs/neg/copysign) must NOT go through these.
#[inline]
pub(crate) fn canon_f32(x: f32) -> f32 {
    if x.is_nan() {
        f32::from_bits(CANON_NAN_F32)
    } else {
        x
    }
}

#[inline]
pub(crate) fn canon_f64(x: f64) -> f64 {
    if x.is_nan() {
        f64::from_bits(CANON_NAN_F64)
    } else {
        x
    }
}

pub(crate) fn i32_div_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i32::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a.wrapping_div(b))
}

pub(crate) fn i32_div_u(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(((a as u32) / (b as u32)) as i32)
}

pub(crate) fn i32_rem_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    // INT_MIN % -1 is defined (0), unlike the division.
    Ok(a.wrapping_rem(b))
}

pub(crate) fn i32_rem_u(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(((a as u32) % (b as u32)) as i32)
}

pub(crate) fn i64_div_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i64::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a.wrapping_div(b))
}

pub(crate) fn i64_div_u(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(((a as u64) / (b as u64)) as i64)
}

pub(crate) fn i64_rem_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a.wrapping_rem(b))
}

pub(crate) fn i64_rem_u(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(((a as u64) % (b as u64)) as i64)
}

/// IEEE `min` with Wasm semantics: NaN wins (canonically) and -0 < +0.
pub(crate) fn f32_min(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::from_bits(CANON_NAN_F32);
    }
    if a == b {
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

pub(crate) fn f32_max(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::from_bits(CANON_NAN_F32);
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

pub(crate) fn f64_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::from_bits(CANON_NAN_F64);
    }
    if a == b {
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

pub(crate) fn f64_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::from_bits(CANON_NAN_F64);
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

// Checked float-to-int truncations. The representable-range checks use
// exactly-representable power-of-two bounds.

pub(crate) fn i32_trunc_f32(x: f32) -> Result<i32, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 2147483648.0 || t < -2147483648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

pub(crate) fn u32_trunc_f32(x: f32) -> Result<u32, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 4294967296.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32)
}

pub(crate) fn i32_trunc_f64(x: f64) -> Result<i32, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 2147483648.0 || t < -2147483648.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i32)
}

pub(crate) fn u32_trunc_f64(x: f64) -> Result<u32, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 4294967296.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u32)
}

pub(crate) fn i64_trunc_f32(x: f32) -> Result<i64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 9223372036854775808.0 || t < -9223372036854775808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

pub(crate) fn u64_trunc_f32(x: f32) -> Result<u64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 18446744073709551616.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

pub(crate) fn i64_trunc_f64(x: f64) -> Result<i64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 9223372036854775808.0 || t < -9223372036854775808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

pub(crate) fn u64_trunc_f64(x: f64) -> Result<u64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t >= 18446744073709551616.0 || t <= -1.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

// Lane views of a v128. Little-endian throughout, like linear memory.

pub(crate) fn i8x16(v: u128) -> [i8; 16] {
    v.to_le_bytes().map(|b| b as i8)
}

pub(crate) fn from_i8x16(lanes: [i8; 16]) -> u128 {
    u128::from_le_bytes(lanes.map(|l| l as u8))
}

pub(crate) fn i16x8(v: u128) -> [i16; 8] {
    let bytes = v.to_le_bytes();
    core::array::from_fn(|i| i16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]))
}

pub(crate) fn from_i16x8(lanes: [i16; 8]) -> u128 {
    let mut bytes = [0u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[2 * i..2 * i + 2].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

pub(crate) fn i32x4(v: u128) -> [i32; 4] {
    let bytes = v.to_le_bytes();
    core::array::from_fn(|i| {
        i32::from_le_bytes(bytes[4 * i..4 * i + 4].try_into().unwrap())
    })
}

pub(crate) fn from_i32x4(lanes: [i32; 4]) -> u128 {
    let mut bytes = [0u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[4 * i..4 * i + 4].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

pub(crate) fn i64x2(v: u128) -> [i64; 2] {
    let bytes = v.to_le_bytes();
    core::array::from_fn(|i| {
        i64::from_le_bytes(bytes[8 * i..8 * i + 8].try_into().unwrap())
    })
}

pub(crate) fn from_i64x2(lanes: [i64; 2]) -> u128 {
    let mut bytes = [0u8; 16];
    for (i, lane) in lanes.iter().enumerate() {
        bytes[8 * i..8 * i + 8].copy_from_slice(&lane.to_le_bytes());
    }
    u128::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_edge_cases() {
        assert_eq!(i32_div_s(i32::MIN, -1).unwrap_err(), Trap::IntegerOverflow);
        assert_eq!(i32_div_u(5, 0).unwrap_err(), Trap::IntegerDivideByZero);
        assert_eq!(i32_rem_s(i32::MIN, -1).unwrap(), 0);
        assert_eq!(i64_div_s(i64::MIN, -1).unwrap_err(), Trap::IntegerOverflow);
        assert_eq!(i32_div_s(-7, 2).unwrap(), -3);
        assert_eq!(i32_rem_s(-7, 2).unwrap(), -1);
    }

    #[test]
    fn min_max_handle_nan_and_signed_zero() {
        assert_eq!(f32_min(-0.0, 0.0).to_bits(), (-0.0f32).to_bits());
        assert_eq!(f32_max(-0.0, 0.0).to_bits(), 0.0f32.to_bits());
        assert_eq!(f32_min(f32::NAN, 1.0).to_bits(), CANON_NAN_F32);
        assert_eq!(f64_max(1.0, f64::NAN).to_bits(), CANON_NAN_F64);
        assert_eq!(f64_min(1.0, 2.0), 1.0);
    }

    #[test]
    fn trunc_traps_on_nan_and_overflow() {
        assert_eq!(
            i32_trunc_f32(f32::NAN).unwrap_err(),
            Trap::InvalidConversionToInteger
        );
        assert_eq!(i32_trunc_f32(2147483648.0).unwrap_err(), Trap::IntegerOverflow);
        assert_eq!(i32_trunc_f32(-2147483648.0).unwrap(), i32::MIN);
        assert_eq!(i32_trunc_f64(2147483647.9).unwrap(), i32::MAX);
        assert_eq!(u32_trunc_f64(-0.9).unwrap(), 0);
        assert_eq!(u32_trunc_f64(-1.0).unwrap_err(), Trap::IntegerOverflow);
        assert_eq!(u64_trunc_f64(18446744073709549568.0).unwrap(), 18446744073709549568);
    }

    #[test]
    fn lane_views_round_trip() {
        let v = 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10u128;
        assert_eq!(from_i8x16(i8x16(v)), v);
        assert_eq!(from_i16x8(i16x8(v)), v);
        assert_eq!(from_i32x4(i32x4(v)), v);
        assert_eq!(from_i64x2(i64x2(v)), v);
    }
}
