//! Fixed-point monetary values.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised when parsing currencies or amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    /// The code is not a supported ISO-4217 currency.
    #[error("Unsupported currency: {0}")]
    Unsupported(String),

    /// The amount is not a valid decimal number.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// ISO-4217 codes with their minor-unit scale.
const CURRENCIES: &[(&str, u32)] = &[
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("CAD", 2),
    ("AUD", 2),
    ("CHF", 2),
    ("CNY", 2),
    ("INR", 2),
    ("MXN", 2),
    ("SEK", 2),
    ("JPY", 0),
    ("KRW", 0),
    ("VND", 0),
    ("CLP", 0),
    ("BHD", 3),
    ("KWD", 3),
    ("OMR", 3),
    ("JOD", 3),
    ("TND", 3),
];

/// A supported ISO-4217 currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Currency {
    code: &'static str,
    scale: u32,
}

impl Currency {
    /// US dollar.
    pub const USD: Currency = Currency {
        code: "USD",
        scale: 2,
    };

    /// Japanese yen.
    pub const JPY: Currency = Currency {
        code: "JPY",
        scale: 0,
    };

    /// Bahraini dinar.
    pub const BHD: Currency = Currency {
        code: "BHD",
        scale: 3,
    };

    /// Looks up a currency by its ISO code (case-insensitive).
    pub fn from_code(code: &str) -> Result<Self, CurrencyError> {
        let upper = code.trim().to_ascii_uppercase();
        CURRENCIES
            .iter()
            .find(|(c, _)| *c == upper)
            .map(|&(code, scale)| Currency { code, scale })
            .ok_or_else(|| CurrencyError::Unsupported(code.to_string()))
    }

    /// Returns the ISO code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the number of minor-unit digits.
    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Currency::from_code(&code).map_err(serde::de::Error::custom)
    }
}

/// A monetary amount held as a fixed-point decimal.
///
/// The amount carries no currency of its own; the owning order does. Amounts
/// that have been through [`Money::round_to`] keep the currency's scale, so
/// `118` in USD renders as `"118.00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money(Decimal);

impl Money {
    /// Creates a money amount from a decimal.
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Creates an amount from whole units (e.g. dollars).
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Creates an amount from minor units at the given scale (e.g. cents at scale 2).
    pub fn from_minor(minor: i64, scale: u32) -> Self {
        Self(Decimal::new(minor, scale))
    }

    /// Returns the underlying decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Multiplies by a quantity, saturating at the representable range.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(Decimal::from(quantity)))
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(Decimal::from(quantity)).map(Money)
    }

    /// Multiplies by a decimal rate (e.g. `0.08` for 8%). The result is not
    /// rounded and saturates at the representable range.
    pub fn apply_rate(&self, rate: Decimal) -> Money {
        Money(self.0.saturating_mul(rate))
    }

    /// Multiplies by a decimal rate, or `None` on overflow.
    pub fn checked_apply_rate(&self, rate: Decimal) -> Option<Money> {
        self.0.checked_mul(rate).map(Money)
    }

    /// Divides evenly by a quantity. The result is not rounded.
    pub fn per_unit(&self, quantity: u32) -> Money {
        if quantity == 0 {
            return Money::zero();
        }
        self.0
            .checked_div(Decimal::from(quantity))
            .map_or(Money::zero(), Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Returns the amount at exactly the currency's scale, or `None` if it
    /// carries more fractional digits than the currency allows.
    ///
    /// `50` in USD becomes `50.00`; `0.5` in JPY is rejected.
    pub fn exact_in(&self, currency: Currency) -> Option<Money> {
        if self.0.normalize().scale() > currency.scale() {
            return None;
        }
        let mut scaled = self.0;
        scaled.rescale(currency.scale());
        (scaled.scale() == currency.scale() && scaled == self.0).then_some(Money(scaled))
    }

    /// Rounds half-to-even to the currency's scale and pins the scale,
    /// so zero-decimal currencies become integers and `118` becomes `118.00`.
    pub fn round_to(&self, currency: Currency) -> Money {
        let mut rounded = self
            .0
            .round_dp_with_strategy(currency.scale(), RoundingStrategy::MidpointNearestEven);
        rounded.rescale(currency.scale());
        Money(rounded)
    }

    /// Returns the smaller of two amounts.
    pub fn min(self, other: Money) -> Money {
        if self <= other { self } else { other }
    }

    /// Clamps negative amounts to zero.
    pub fn non_negative(self) -> Money {
        if self.is_negative() { Money::zero() } else { self }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Money)
            .map_err(|_| CurrencyError::InvalidAmount(s.to_string()))
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// Operators saturate instead of panicking. Amounts that reach them have
// already been bounded by the checked pricing path.
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}
