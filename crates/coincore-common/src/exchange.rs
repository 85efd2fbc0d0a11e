//! Exchange rates between currencies.
//!
//! One rounding policy everywhere: conversions round half-up at the target
//! currency's precision. Rates themselves, including inverses, keep full
//! decimal precision so rounding happens only at the final minor-unit amount.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::money::{self, Currency, Money};

/// A directed rate between two currencies: one major unit of `from` is worth
/// `rate` major units of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    from: Currency,
    to: Currency,
    rate: Decimal,
}

impl ExchangeRate {
    /// Build a rate. The rate must be strictly positive.
    pub fn new(
        from: impl Into<Currency>,
        to: impl Into<Currency>,
        rate: Decimal,
    ) -> Result<Self, money::Error> {
        if rate <= Decimal::ZERO {
            return Err(money::Error::NegativeAmount(rate));
        }
        Ok(Self {
            from: from.into(),
            to: to.into(),
            rate,
        })
    }

    /// Source currency.
    pub fn from_currency(&self) -> Currency {
        self.from
    }

    /// Target currency.
    pub fn to_currency(&self) -> Currency {
        self.to
    }

    /// The raw rate.
    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Convert an amount denominated in `from` into `to`, rounding half-up at
    /// the target currency's precision.
    pub fn convert(&self, money: &Money) -> Result<Money, money::Error> {
        if money.currency() != self.from {
            return Err(money::Error::CurrencyMismatch {
                expected: self.from,
                found: money.currency(),
            });
        }
        let major = money
            .to_major()
            .checked_mul(self.rate)
            .ok_or(money::Error::Overflow)?
            .round_dp_with_strategy(self.to.decimals(), RoundingStrategy::MidpointAwayFromZero);
        Money::from_major(self.to, major)
    }

    /// The reciprocal rate at full precision. Converting through it rounds
    /// only at the final amount, so limits survive the round trip.
    pub fn inverse(&self) -> Result<ExchangeRate, money::Error> {
        let inverted = Decimal::ONE
            .checked_div(self.rate)
            .ok_or(money::Error::Overflow)?;
        ExchangeRate::new(self.to, self.from, inverted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{CryptoCurrency, FiatCurrency};

    fn usd() -> FiatCurrency {
        FiatCurrency::new("USD").expect("valid code")
    }

    #[test]
    fn convert_rounds_at_target_precision() {
        // 1 BTC = 30000.00 USD
        let rate = ExchangeRate::new(CryptoCurrency::Btc, usd(), Decimal::new(30_000, 0))
            .expect("positive rate");
        let amount = Money::from_minor(CryptoCurrency::Btc, 12_345_678); // 0.12345678 BTC
        let fiat = rate.convert(&amount).expect("btc input");
        assert_eq!(fiat, Money::from_minor(usd(), 370_370)); // 3703.7034 -> 3703.70

        assert!(rate.convert(&Money::from_minor(usd(), 100)).is_err());
    }

    #[test]
    fn inverse_round_trips_without_drift_at_api_precision() {
        let rate = ExchangeRate::new(CryptoCurrency::Btc, usd(), Decimal::new(30_000, 0))
            .expect("positive rate");
        let inverse = rate.inverse().expect("invertible");
        assert_eq!(inverse.from_currency(), Currency::Fiat(usd()));

        // A fiat limit converted to crypto and compared against a crypto
        // amount converted from the same limit must agree.
        let fiat_limit = Money::from_minor(usd(), 500); // 5.00 USD
        let crypto = inverse.convert(&fiat_limit).expect("fiat input");
        assert_eq!(crypto.currency(), Currency::Crypto(CryptoCurrency::Btc));
        assert_eq!(crypto.minor(), 16_667); // 0.00016667 BTC, half-up at 8dp
    }
}
