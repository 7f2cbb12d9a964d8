//! Signed 24.8 fixed-point numbers used for sub-pixel coordinates.

use std::fmt;

/// Bias that lines the fractional bits of a double up with the low byte of
/// its mantissa: `3 * 2^43`, i.e. `3 << (51 - 8)`.
const BIAS: f64 = (3i64 << 43) as f64;

/// A 24.8 signed fixed-point value in its wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fixed(i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    /// Wrap a raw wire value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[must_use]
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    /// Convert from a double, rounding to the nearest 1/256.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        let biased = value + BIAS;
        // Low 32 bits of the mantissa now hold the 24.8 value.
        Self(biased.to_bits() as i32)
    }

    /// Convert to a double. Exact for every representable value.
    #[must_use]
    pub fn to_f64(self) -> f64 {
        let bits = ((1023i64 + 44) << 52) + (1i64 << 51) + i64::from(self.0);
        f64::from_bits(bits as u64) - BIAS
    }

    #[must_use]
    pub const fn from_int(value: i32) -> Self {
        Self(value.wrapping_mul(256))
    }

    /// Integer part, rounded towards zero.
    #[must_use]
    pub const fn to_int(self) -> i32 {
        self.0 / 256
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<Fixed> for f64 {
    fn from(value: Fixed) -> Self {
        value.to_f64()
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}
