//! Time-boxed, tiered price quotes.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

/// A single volume/price point of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// Trade volume, in major units of the pair's source currency
    pub volume: Decimal,
    /// Effective price at that volume
    pub price: Decimal,
}

/// A quote from the trading rail for a direction and currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferQuote {
    /// Quote identifier, referenced when creating orders against it
    pub id: Uuid,
    /// Volume/price tiers, ordered by ascending volume
    pub price_tiers: Vec<PriceTier>,
    /// Creation time, unix seconds
    pub created_at: u64,
    /// Expiration time, unix seconds; the quote is never used past this
    pub expires_at: u64,
    /// Network fee charged on the destination side
    pub network_fee: Money,
    /// Flat fee charged by the rail
    pub static_fee: Money,
    /// Deposit address for on-chain-sourced quotes
    pub sample_deposit_address: Option<String>,
}

impl TransferQuote {
    /// The quote's validity window, used as the refresh interval.
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(self.created_at))
    }
}

/// A quote paired with the interpolated price for the current amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedQuote {
    /// The underlying quote
    pub transfer_quote: TransferQuote,
    /// Effective price for the amount the quote was priced at
    pub price: Decimal,
}

/// Interpolate the effective price for `volume` from a quote's tiers.
///
/// Volumes below the first tier clamp to the first price, above the last tier
/// to the last; between two tiers the price is linearly interpolated. Returns
/// `None` when the quote carries no tiers.
pub fn interpolate_price(tiers: &[PriceTier], volume: Decimal) -> Option<Decimal> {
    let first = tiers.first()?;
    let last = tiers.last()?;

    if volume <= first.volume {
        return Some(first.price);
    }
    if volume >= last.volume {
        return Some(last.price);
    }
    for pair in tiers.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        if volume >= lower.volume && volume <= upper.volume {
            let span = upper.volume - lower.volume;
            if span.is_zero() {
                return Some(lower.price);
            }
            let fraction = (volume - lower.volume) / span;
            return Some(lower.price + (upper.price - lower.price) * fraction);
        }
    }
    Some(last.price)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Vec<PriceTier> {
        vec![
            PriceTier {
                volume: Decimal::ONE,
                price: Decimal::new(100, 0),
            },
            PriceTier {
                volume: Decimal::new(10, 0),
                price: Decimal::new(90, 0),
            },
            PriceTier {
                volume: Decimal::new(100, 0),
                price: Decimal::new(80, 0),
            },
        ]
    }

    #[test]
    fn clamps_outside_the_tier_range() {
        let t = tiers();
        assert_eq!(
            interpolate_price(&t, Decimal::new(5, 1)),
            Some(Decimal::new(100, 0))
        );
        assert_eq!(
            interpolate_price(&t, Decimal::new(1_000, 0)),
            Some(Decimal::new(80, 0))
        );
    }

    #[test]
    fn interpolates_between_surrounding_tiers() {
        let t = tiers();
        // Halfway between volume 1 and 10
        assert_eq!(
            interpolate_price(&t, Decimal::new(55, 1)),
            Some(Decimal::new(95, 0))
        );
    }

    #[test]
    fn empty_tiers_have_no_price() {
        assert_eq!(interpolate_price(&[], Decimal::ONE), None);
    }
}
