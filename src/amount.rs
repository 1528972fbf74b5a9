use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-point money with 2 decimal places, stored as a count of cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 100;

    pub const ZERO: Amount = Amount(0);

    /// Round to the nearest cent, keeping the sign. Non-finite input is zero.
    pub fn from_float(value: f64) -> Self {
        if !value.is_finite() {
            return Amount(0);
        }
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    pub fn from_cents(value: i64) -> Self {
        Amount(value)
    }

    /// Whether `value` rounds to a number of cents that an `Amount` can hold.
    pub fn fits(value: f64) -> bool {
        value.is_finite() && (value * Self::SCALE as f64).round().abs() < i64::MAX as f64
    }

    pub fn to_float(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

/// Round a raw float to cents, half away from zero. Non-finite input is zero.
///
/// Computed in floating point so values beyond the `Amount` range are not
/// clamped; callers that store the result check [`Amount::fits`] first.
pub fn round_cents(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = Amount::SCALE as f64;
    (value * scale).round() / scale
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_float())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Amount::from_float)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}
