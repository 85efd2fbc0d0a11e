//! Currency-tagged monetary values.
//!
//! A [`Money`] is a minor-unit integer magnitude tagged with its currency.
//! All arithmetic and comparison is currency-checked: mixing currencies is a
//! programming error surfaced as [`Error::CurrencyMismatch`], never a runtime
//! coercion. Conversion between currencies requires an explicit
//! [`crate::exchange::ExchangeRate`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Operands are denominated in different currencies
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        /// The currency the operation was started with
        expected: Currency,
        /// The offending currency
        found: Currency,
    },
    /// Arithmetic over- or underflow on the minor-unit magnitude
    #[error("Money overflow")]
    Overflow,
    /// Negative amounts cannot be represented
    #[error("Negative amount: {0}")]
    NegativeAmount(Decimal),
    /// Fiat currency code is not three ASCII letters
    #[error("Invalid currency code: `{0}`")]
    InvalidCurrencyCode(String),
}

/// A supported crypto asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CryptoCurrency {
    /// Bitcoin
    Btc,
    /// Bitcoin Cash
    Bch,
    /// Ether
    Eth,
    /// Stellar Lumens
    Xlm,
}

impl CryptoCurrency {
    /// Network ticker.
    pub fn ticker(&self) -> &'static str {
        match self {
            CryptoCurrency::Btc => "BTC",
            CryptoCurrency::Bch => "BCH",
            CryptoCurrency::Eth => "ETH",
            CryptoCurrency::Xlm => "XLM",
        }
    }

    /// Number of minor-unit decimal places.
    pub fn decimals(&self) -> u32 {
        match self {
            CryptoCurrency::Btc | CryptoCurrency::Bch => 8,
            CryptoCurrency::Eth => 18,
            CryptoCurrency::Xlm => 7,
        }
    }

    /// Whether the asset's transactions carry an attached memo field.
    pub fn supports_memo(&self) -> bool {
        matches!(self, CryptoCurrency::Xlm)
    }
}

impl fmt::Display for CryptoCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// A validated ISO-4217 fiat currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiatCurrency([u8; 3]);

impl FiatCurrency {
    /// Parse and validate a three-letter currency code.
    pub fn new(code: &str) -> Result<Self, Error> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::InvalidCurrencyCode(code.to_owned()));
        }
        let mut inner = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            inner[i] = b.to_ascii_uppercase();
        }
        Ok(Self(inner))
    }

    /// The currency code, e.g. `USD`.
    pub fn code(&self) -> &str {
        // Validated on construction
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    /// Number of minor-unit decimal places.
    pub fn decimals(&self) -> u32 {
        2
    }
}

impl fmt::Display for FiatCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FiatCurrency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FiatCurrency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<FiatCurrency> for String {
    fn from(value: FiatCurrency) -> Self {
        value.code().to_owned()
    }
}

/// A currency tag: either a crypto asset or a fiat code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Crypto asset
    Crypto(CryptoCurrency),
    /// Fiat currency
    Fiat(FiatCurrency),
}

impl Currency {
    /// Number of minor-unit decimal places.
    pub fn decimals(&self) -> u32 {
        match self {
            Currency::Crypto(c) => c.decimals(),
            Currency::Fiat(f) => f.decimals(),
        }
    }

    /// Whether this is a crypto asset.
    pub fn is_crypto(&self) -> bool {
        matches!(self, Currency::Crypto(_))
    }

    /// Whether this is a fiat currency.
    pub fn is_fiat(&self) -> bool {
        matches!(self, Currency::Fiat(_))
    }

    /// The crypto asset, if this tag is one.
    pub fn as_crypto(&self) -> Option<CryptoCurrency> {
        match self {
            Currency::Crypto(c) => Some(*c),
            Currency::Fiat(_) => None,
        }
    }

    /// The fiat currency, if this tag is one.
    pub fn as_fiat(&self) -> Option<FiatCurrency> {
        match self {
            Currency::Fiat(f) => Some(*f),
            Currency::Crypto(_) => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Crypto(c) => c.fmt(f),
            Currency::Fiat(c) => c.fmt(f),
        }
    }
}

impl From<CryptoCurrency> for Currency {
    fn from(value: CryptoCurrency) -> Self {
        Currency::Crypto(value)
    }
}

impl From<FiatCurrency> for Currency {
    fn from(value: FiatCurrency) -> Self {
        Currency::Fiat(value)
    }
}

/// An immutable currency-tagged amount in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    currency: Currency,
    minor: u64,
}

impl Money {
    /// Zero of the given currency.
    pub fn zero(currency: impl Into<Currency>) -> Self {
        Self {
            currency: currency.into(),
            minor: 0,
        }
    }

    /// Build from a minor-unit magnitude.
    pub fn from_minor(currency: impl Into<Currency>, minor: u64) -> Self {
        Self {
            currency: currency.into(),
            minor,
        }
    }

    /// Build from a major-unit decimal, rounding half-up at the currency's
    /// precision.
    pub fn from_major(currency: impl Into<Currency>, major: Decimal) -> Result<Self, Error> {
        let currency = currency.into();
        if major.is_sign_negative() && !major.is_zero() {
            return Err(Error::NegativeAmount(major));
        }
        let scale = Decimal::from(10u64.checked_pow(currency.decimals()).ok_or(Error::Overflow)?);
        let minor = major
            .checked_mul(scale)
            .ok_or(Error::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
            .ok_or(Error::Overflow)?;
        Ok(Self { currency, minor })
    }

    /// The currency tag.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Minor-unit magnitude.
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Major-unit decimal at the currency's precision.
    pub fn to_major(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.minor as i128, self.currency.decimals())
    }

    /// Whether this amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Whether this amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), Error> {
        if self.currency != other.currency {
            return Err(Error::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    /// Currency-checked addition.
    pub fn checked_add(&self, other: &Money) -> Result<Money, Error> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            currency: self.currency,
            minor: self.minor.checked_add(other.minor).ok_or(Error::Overflow)?,
        })
    }

    /// Currency-checked subtraction; underflow is an error.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, Error> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            currency: self.currency,
            minor: self.minor.checked_sub(other.minor).ok_or(Error::Overflow)?,
        })
    }

    /// Currency-checked subtraction clamped at zero.
    pub fn saturating_sub(&self, other: &Money) -> Result<Money, Error> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            currency: self.currency,
            minor: self.minor.saturating_sub(other.minor),
        })
    }

    /// Currency-checked comparison.
    pub fn checked_cmp(&self, other: &Money) -> Result<Ordering, Error> {
        self.ensure_same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }

    /// The smaller of two same-currency amounts.
    pub fn checked_min(&self, other: &Money) -> Result<Money, Error> {
        Ok(match self.checked_cmp(other)? {
            Ordering::Greater => *other,
            _ => *self,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_major(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn usd() -> FiatCurrency {
        FiatCurrency::new("USD").expect("valid code")
    }

    #[test]
    fn fiat_code_is_validated() {
        assert!(FiatCurrency::new("usd").is_ok());
        assert_eq!(FiatCurrency::new("usd").expect("valid").code(), "USD");
        assert!(FiatCurrency::new("US").is_err());
        assert!(FiatCurrency::new("U5D").is_err());
    }

    #[test]
    fn arithmetic_is_currency_checked() {
        let a = Money::from_minor(usd(), 1_000);
        let b = Money::from_minor(CryptoCurrency::Btc, 1_000);

        assert!(matches!(
            a.checked_add(&b),
            Err(Error::CurrencyMismatch { .. })
        ));
        assert!(a.checked_cmp(&b).is_err());

        let sum = a.checked_add(&Money::from_minor(usd(), 500)).expect("same currency");
        assert_eq!(sum.minor(), 1_500);
    }

    #[test]
    fn major_round_trip_uses_half_up() {
        let m = Money::from_major(usd(), Decimal::new(10005, 3)).expect("positive");
        // 10.005 rounds away from zero at two decimal places
        assert_eq!(m.minor(), 1_001);
        assert_eq!(m.to_major(), Decimal::new(1001, 2));

        assert!(Money::from_major(usd(), Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn display_renders_major_units() {
        let m = Money::from_minor(usd(), 50_000);
        assert_eq!(m.to_string(), "500.00 USD");
        let b = Money::from_minor(CryptoCurrency::Btc, 150_000_000);
        assert_eq!(b.to_string(), "1.50000000 BTC");
    }
}
