// Licensed under the Apache-2.0 license

//! Conversions between PMAC dual-ported RAM words and host values.
//!
//! The controller stores every word least significant byte first. A 24-bit
//! quantity occupies the low three bytes of a 32-bit host slot and the 48-bit
//! `D` and `L` formats span two consecutive slots. Decoding never fails: a
//! meaningless bit pattern decodes to a meaningless but well defined number,
//! exactly as the hardware reports it.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use thiserror::Error;

/// Bias of the exponent field in the 48-bit `L` format, including the 35 bit
/// mantissa scaling.
pub const L_EXPONENT_BIAS: i32 = 2082;

const L_MANTISSA_BITS: u32 = 36;
const L_EXPONENT_MAX: i64 = 0xFFF;
const TWO_POW_24: f64 = 16_777_216.0;

/// PMAC memory region and number format of an address specification.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Region {
    /// Y memory, 24-bit unsigned.
    Y = 1,
    /// X memory, 24-bit unsigned.
    X = 2,
    /// Y memory, 24-bit signed.
    SY = 3,
    /// X memory, 24-bit signed.
    SX = 4,
    /// DPRAM word, 24-bit signed.
    DP = 5,
    /// 48-bit fixed point (X:Y pair).
    D = 6,
    /// IEEE single precision.
    F = 7,
    /// 48-bit PMAC floating point.
    L = 8,
    /// High 16 bits of a Y word.
    HY = 9,
    /// High 16 bits of an X word.
    HX = 10,
}

impl Region {
    pub const ALL: [Region; 10] = [
        Region::Y,
        Region::X,
        Region::SY,
        Region::SX,
        Region::DP,
        Region::D,
        Region::F,
        Region::L,
        Region::HY,
        Region::HX,
    ];

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn code(self) -> &'static str {
        match self {
            Region::Y => "Y",
            Region::X => "X",
            Region::SY => "SY",
            Region::SX => "SX",
            Region::DP => "DP",
            Region::D => "D",
            Region::F => "F",
            Region::L => "L",
            Region::HY => "HY",
            Region::HX => "HX",
        }
    }

    /// Number of host bytes one value of this format occupies.
    pub fn width(self) -> usize {
        match self {
            Region::D | Region::L => 8,
            _ => 4,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Both views of a decoded word. Integer formats fill `long` and mirror it
/// into `double`; floating formats leave `long` at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Value {
    pub long: i64,
    pub double: f64,
}

impl Value {
    pub fn from_long(long: i64) -> Self {
        Self {
            long,
            double: long as f64,
        }
    }

    pub fn from_double(double: f64) -> Self {
        Self { long: 0, double }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("writes to {0} memory are not supported")]
    Unwritable(Region),
}

pub fn get16(p: &[u8]) -> u16 {
    ((p[1] as u16) << 8) | p[0] as u16
}

pub fn put16(p: &mut [u8], value: u16) {
    p[0] = value as u8;
    p[1] = (value >> 8) as u8;
}

pub fn get24u(p: &[u8]) -> u32 {
    ((p[2] as u32) << 16) | ((p[1] as u32) << 8) | p[0] as u32
}

pub fn get24(p: &[u8]) -> i32 {
    ((get24u(p) << 8) as i32) >> 8
}

/// Stores the low 24 bits of `value`; the fourth byte of the slot is untouched.
pub fn put24(p: &mut [u8], value: i32) {
    p[0] = value as u8;
    p[1] = (value >> 8) as u8;
    p[2] = (value >> 16) as u8;
}

pub fn get32(p: &[u8]) -> u32 {
    ((p[3] as u32) << 24) | ((p[2] as u32) << 16) | ((p[1] as u32) << 8) | p[0] as u32
}

pub fn put32(p: &mut [u8], value: u32) {
    p[0] = value as u8;
    p[1] = (value >> 8) as u8;
    p[2] = (value >> 16) as u8;
    p[3] = (value >> 24) as u8;
}

pub fn get_f(p: &[u8]) -> f32 {
    f32::from_bits(get32(p))
}

pub fn put_f(p: &mut [u8], value: f32) {
    put32(p, value.to_bits());
}

/// 48-bit fixed point: unsigned low word, signed high word.
pub fn get_d(p: &[u8]) -> f64 {
    let lo = get24u(&p[0..4]) as f64;
    let hi = get24(&p[4..8]) as f64;
    hi * TWO_POW_24 + lo
}

pub fn put_d(p: &mut [u8], value: i64) {
    put32(&mut p[0..4], (value & 0xFF_FFFF) as u32);
    put32(&mut p[4..8], ((value >> 24) & 0xFF_FFFF) as u32);
}

/// 48-bit PMAC floating point: 36-bit unsigned mantissa spread over both
/// words and a 12-bit biased exponent in the top of the high word.
pub fn get_l(p: &[u8]) -> f64 {
    let lo = get24u(&p[0..4]) as u64;
    let hi = get24u(&p[4..8]);
    let mantissa = (((hi & 0xFFF) as u64) << 24) | lo;
    if mantissa == 0 {
        return 0.0;
    }
    let exponent = ((hi >> 12) & 0xFFF) as i32 - L_EXPONENT_BIAS;
    mantissa as f64 * 2f64.powi(exponent)
}

/// Encodes `value` with a normalized mantissa (bit 35 set). Zero, negative
/// and non-finite inputs encode as zero; out of range exponents saturate.
pub fn put_l(p: &mut [u8], value: f64) {
    let (mantissa, exponent) = normalize_l(value);
    let lo = (mantissa & 0xFF_FFFF) as u32;
    let hi = ((mantissa >> 24) as u32 & 0xFFF) | ((exponent as u32) << 12);
    put32(&mut p[0..4], lo);
    put32(&mut p[4..8], hi);
}

fn normalize_l(value: f64) -> (u64, i64) {
    if !value.is_finite() || value <= 0.0 {
        return (0, 0);
    }
    let mut exp = value.log2().floor() as i32;
    let mut scaled = value / 2f64.powi(exp);
    while scaled >= 2.0 {
        scaled /= 2.0;
        exp += 1;
    }
    while scaled < 1.0 {
        scaled *= 2.0;
        exp -= 1;
    }
    let mut mantissa = (scaled * 2f64.powi(L_MANTISSA_BITS as i32 - 1)).round() as u64;
    if mantissa >> L_MANTISSA_BITS != 0 {
        mantissa >>= 1;
        exp += 1;
    }
    let biased = exp as i64 + (L_EXPONENT_BIAS - (L_MANTISSA_BITS as i32 - 1)) as i64;
    if biased < 0 {
        (0, 0)
    } else if biased > L_EXPONENT_MAX {
        ((1 << L_MANTISSA_BITS) - 1, L_EXPONENT_MAX)
    } else {
        (mantissa, biased)
    }
}

/// Decodes the slot bytes at `p` according to `region`.
pub fn get_data(region: Region, p: &[u8]) -> Value {
    match region {
        Region::HY | Region::HX => Value::from_long(get16(p) as i64),
        Region::Y | Region::X => Value::from_long(get24u(p) as i64),
        Region::SY | Region::SX | Region::DP => Value::from_long(get24(p) as i64),
        Region::F => Value::from_double(get_f(p) as f64),
        Region::D => Value::from_double(get_d(p)),
        Region::L => Value::from_double(get_l(p)),
    }
}

/// Encodes `value` into the slot bytes at `p`. Only the formats the host
/// may write through DPRAM are accepted.
pub fn put_data(region: Region, p: &mut [u8], value: Value) -> Result<(), CodecError> {
    match region {
        Region::HY | Region::HX => put16(p, value.long as u16),
        Region::Y | Region::X | Region::SY | Region::SX | Region::DP => {
            put32(p, value.long as u32)
        }
        Region::F => put_f(p, value.double as f32),
        Region::D | Region::L => return Err(CodecError::Unwritable(region)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_region_codes() {
        for region in Region::ALL {
            assert_eq!(Region::from_code(region.code()), Some(region));
            assert_eq!(Region::try_from(u8::from(region)).unwrap(), region);
        }
        assert_eq!(Region::from_code("Z"), None);
        assert_eq!(Region::from_code("y"), None);
        assert_eq!(u8::from(Region::HX), 10);
    }

    #[test]
    fn test_word_layout_is_lsb_first() {
        let p = [0x34, 0x12, 0x56, 0x78];
        assert_eq!(get16(&p), 0x1234);
        assert_eq!(get24u(&p), 0x561234);
        assert_eq!(get32(&p), 0x78561234);

        let neg = [0xFF, 0xFF, 0xFF, 0x00];
        assert_eq!(get24(&neg), -1);
        assert_eq!(get24u(&neg), 0xFF_FFFF);
    }

    #[test]
    fn test_integer_round_trip() {
        let mut rng = rand::thread_rng();
        let mut p = [0u8; 8];
        for _ in 0..1000 {
            let v16: u16 = rng.gen();
            put16(&mut p, v16);
            assert_eq!(get16(&p), v16);

            let v24: i32 = rng.gen_range(-(1 << 23)..(1 << 23));
            put24(&mut p, v24);
            assert_eq!(get24(&p), v24);
            assert_eq!(get24u(&p), v24 as u32 & 0xFF_FFFF);

            let v32: u32 = rng.gen();
            put32(&mut p, v32);
            assert_eq!(get32(&p), v32);

            let v48: i64 = rng.gen_range(-(1i64 << 47)..(1i64 << 47));
            put_d(&mut p, v48);
            assert_eq!(get_d(&p), v48 as f64);
        }
    }

    #[test]
    fn test_d_format_edges() {
        let mut p = [0u8; 8];
        for v in [0i64, 1, -1, (1 << 24) - 1, 1 << 24, -(1 << 47), (1 << 47) - 1] {
            put_d(&mut p, v);
            assert_eq!(get_d(&p), v as f64, "value {}", v);
        }
    }

    #[test]
    fn test_f_format() {
        let mut p = [0u8; 4];
        put_f(&mut p, 123.5);
        assert_eq!(p, 123.5f32.to_le_bytes());
        assert_eq!(get_f(&p), 123.5);
    }

    #[test]
    fn test_l_format_known_value() {
        // 123.5 = 0x7B8 * 2^-4, normalized so bit 35 of the mantissa is set
        let mut p = [0u8; 8];
        put_l(&mut p, 123.5);
        let hi = get24u(&p[4..8]);
        assert_eq!((hi >> 12) & 0xFFF, 2047 + 6);
        assert_eq!(get_l(&p), 123.5);
    }

    #[test]
    fn test_l_format_round_trip() {
        let mut rng = rand::thread_rng();
        let mut p = [0u8; 8];
        let limit = 2f64.powi(-35);
        for _ in 0..2000 {
            let mantissa: f64 = rng.gen_range(1.0..2.0);
            let exp: i32 = rng.gen_range(-200..200);
            let v = mantissa * 2f64.powi(exp);
            put_l(&mut p, v);
            let back = get_l(&p);
            let rel = ((back - v) / v).abs();
            assert!(rel <= limit, "value {} decoded as {} (rel {})", v, back, rel);
        }
    }

    #[test]
    fn test_l_format_zero_and_invalid() {
        let mut p = [0xAAu8; 8];
        put_l(&mut p, 0.0);
        assert_eq!(get_l(&p), 0.0);
        put_l(&mut p, -5.0);
        assert_eq!(get_l(&p), 0.0);
        put_l(&mut p, f64::NAN);
        assert_eq!(get_l(&p), 0.0);

        // zero mantissa with a non zero exponent still decodes as zero
        let mut raw = [0u8; 8];
        put32(&mut raw[4..8], 0x7FF << 12);
        assert_eq!(get_l(&raw), 0.0);
    }

    #[test]
    fn test_get_data_by_region() {
        let p = [0xFF, 0xFF, 0xFF, 0x00, 0, 0, 0, 0];
        assert_eq!(get_data(Region::Y, &p), Value::from_long(0xFF_FFFF));
        assert_eq!(get_data(Region::X, &p), Value::from_long(0xFF_FFFF));
        assert_eq!(get_data(Region::SY, &p), Value::from_long(-1));
        assert_eq!(get_data(Region::DP, &p), Value::from_long(-1));
        assert_eq!(get_data(Region::HX, &p), Value::from_long(0xFFFF));

        let mut f = [0u8; 4];
        put_f(&mut f, -2.25);
        let v = get_data(Region::F, &f);
        assert_eq!(v.long, 0);
        assert_eq!(v.double, -2.25);
    }

    #[test]
    fn test_put_data_by_region() {
        let mut p = [0u8; 8];
        put_data(Region::SX, &mut p, Value::from_long(-2)).unwrap();
        assert_eq!(&p[0..4], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(get_data(Region::SX, &p).long, -2);

        put_data(Region::HY, &mut p, Value::from_long(0x1234)).unwrap();
        assert_eq!(get16(&p), 0x1234);

        put_data(Region::F, &mut p, Value::from_double(1.5)).unwrap();
        assert_eq!(get_f(&p), 1.5);

        assert_eq!(
            put_data(Region::L, &mut p, Value::from_double(1.0)),
            Err(CodecError::Unwritable(Region::L))
        );
        assert_eq!(
            put_data(Region::D, &mut p, Value::from_double(1.0)),
            Err(CodecError::Unwritable(Region::D))
        );
    }
}
