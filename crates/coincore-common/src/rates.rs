//! Exchange-rate provider boundary.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Error;
use crate::exchange::ExchangeRate;
use crate::money::{CryptoCurrency, Currency, FiatCurrency};

/// Best-known-rate lookups. Implementations typically serve from a cache;
/// engines assume no freshness guarantee beyond "last observed price".
#[async_trait]
pub trait ExchangeRates: Send + Sync {
    /// Last observed price of one major unit of `asset` in `fiat`.
    async fn last_price(&self, asset: CryptoCurrency, fiat: FiatCurrency)
        -> Result<Decimal, Error>;

    /// A directed rate between two currencies.
    async fn rate(&self, from: Currency, to: Currency) -> Result<ExchangeRate, Error>;
}
