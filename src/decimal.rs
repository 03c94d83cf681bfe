// src/decimal.rs
//! Monetary decimal used by costs, rates and balances.
//!
//! Thin newtype over `rust_decimal::Decimal` so the wire form (canonical
//! string) and the rounding mode (banker's) are fixed in one place.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::error::ChargingError;

#[derive(Clone, Copy, Debug, Default, Hash)]
pub struct Dec(Decimal);

impl Dec {
    pub const ZERO: Dec = Dec(Decimal::ZERO);
    pub const ONE: Dec = Dec(Decimal::ONE);
    pub const MINUS_ONE: Dec = Dec(Decimal::NEGATIVE_ONE);

    /// Builds `coefficient * 10^-scale`.
    pub fn new(coefficient: i64, scale: u32) -> Self {
        Dec(Decimal::new(coefficient, scale))
    }

    pub fn from_f64(value: f64) -> Result<Self, ChargingError> {
        Decimal::from_f64(value)
            .map(Dec)
            .ok_or_else(|| ChargingError::MalformedDecimal(value.to_string()))
    }

    pub fn from_i64(value: i64) -> Self {
        Dec(Decimal::from(value))
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    pub fn quo(&self, other: &Dec) -> Result<Dec, ChargingError> {
        self.0
            .checked_div(other.0)
            .map(Dec)
            .ok_or(ChargingError::DivisionByZero)
    }

    /// Banker's rounding at `places` fractional digits.
    pub fn round(&self, places: u32) -> Dec {
        Dec(self
            .0
            .round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Dec {
        Dec(self.0.abs())
    }
}

impl From<Decimal> for Dec {
    fn from(d: Decimal) -> Self {
        Dec(d)
    }
}

impl FromStr for Dec {
    type Err = ChargingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Dec)
            .map_err(|_| ChargingError::MalformedDecimal(s.to_string()))
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl PartialEq for Dec {
    fn eq(&self, other: &Self) -> bool {
        self.0.cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Dec {}

impl PartialOrd for Dec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for Dec {
    type Output = Dec;
    fn add(self, rhs: Dec) -> Dec {
        Dec(self.0 + rhs.0)
    }
}

impl AddAssign for Dec {
    fn add_assign(&mut self, rhs: Dec) {
        self.0 += rhs.0;
    }
}

impl Sub for Dec {
    type Output = Dec;
    fn sub(self, rhs: Dec) -> Dec {
        Dec(self.0 - rhs.0)
    }
}

impl SubAssign for Dec {
    fn sub_assign(&mut self, rhs: Dec) {
        self.0 -= rhs.0;
    }
}

impl Mul for Dec {
    type Output = Dec;
    fn mul(self, rhs: Dec) -> Dec {
        Dec(self.0 * rhs.0)
    }
}

impl Neg for Dec {
    type Output = Dec;
    fn neg(self) -> Dec {
        Dec(-self.0)
    }
}

impl Sum for Dec {
    fn sum<I: Iterator<Item = Dec>>(iter: I) -> Dec {
        iter.fold(Dec::ZERO, |acc, d| acc + d)
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct DecVisitor;

impl<'de> Visitor<'de> for DecVisitor {
    type Value = Dec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal as string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Dec, E> {
        Dec::from_str(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Dec, E> {
        Ok(Dec::from_i64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Dec, E> {
        Ok(Dec(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Dec, E> {
        Dec::from_f64(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Dec, D::Error> {
        deserializer.deserialize_any(DecVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_construction() {
        assert_eq!(Dec::new(150, 2), Dec::from(dec!(1.5)));
        assert_eq!(Dec::from_str("1.50").unwrap(), Dec::new(15, 1));
        assert_eq!(Dec::from_f64(0.25).unwrap(), Dec::new(25, 2));
    }

    #[test]
    fn test_malformed() {
        let err = Dec::from_str("abc").unwrap_err();
        assert_eq!(err, ChargingError::MalformedDecimal("abc".to_string()));
        assert_eq!(err.to_string(), "malformed decimal: abc");
    }

    #[test]
    fn test_bankers_rounding() {
        assert_eq!(Dec::from_str("2.345").unwrap().round(2), Dec::from_str("2.34").unwrap());
        assert_eq!(Dec::from_str("2.355").unwrap().round(2), Dec::from_str("2.36").unwrap());
        assert_eq!(Dec::from_str("-0.5").unwrap().round(0), Dec::ZERO);
    }

    #[test]
    fn test_quo() {
        let r = Dec::new(1, 0).quo(&Dec::new(4, 0)).unwrap();
        assert_eq!(r, Dec::new(25, 2));
        assert_eq!(Dec::ONE.quo(&Dec::ZERO), Err(ChargingError::DivisionByZero));
    }

    #[test]
    fn test_equality_ignores_text_form() {
        assert_eq!(Dec::from_str("1.000").unwrap(), Dec::ONE);
        assert_eq!(Dec::from_str("1.000").unwrap().to_string(), "1");
    }

    #[test]
    fn test_serde() {
        let d: Dec = serde_json::from_str("\"0.0100\"").unwrap();
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"0.01\"");
        let n: Dec = serde_json::from_str("12").unwrap();
        assert_eq!(n, Dec::new(12, 0));
        let f: Dec = serde_json::from_str("0.5").unwrap();
        assert_eq!(f, Dec::new(5, 1));
    }

    #[test]
    fn test_sum_and_neg() {
        let total: Dec = vec![Dec::new(1, 1), Dec::new(2, 1), Dec::new(3, 1)].into_iter().sum();
        assert_eq!(total, Dec::new(6, 1));
        assert_eq!(-Dec::ONE, Dec::MINUS_ONE);
        assert!(Dec::MINUS_ONE.is_negative());
    }

    proptest! {
        #[test]
        fn prop_add_sub_inverse(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000, s in 0u32..6) {
            let x = Dec::new(a, s);
            let y = Dec::new(b, s);
            prop_assert_eq!((x + y) - y, x);
        }

        #[test]
        fn prop_string_roundtrip(a in any::<i64>(), s in 0u32..10) {
            let x = Dec::new(a, s);
            prop_assert_eq!(Dec::from_str(&x.to_string()).unwrap(), x);
        }
    }
}
