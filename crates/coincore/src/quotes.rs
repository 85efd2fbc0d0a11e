//! Live, periodically refreshed priced quotes.
//!
//! For a direction and currency pair the engine fetches an initial quote,
//! then re-fetches every time the quote's validity window elapses, until
//! stopped. The published stream is the combination of latest quote and
//! latest amount, re-interpolated whenever either changes. A watch channel
//! gives atomic publishes and replay-latest semantics: late subscribers see
//! only the most recent `PricedQuote`.

use std::sync::Arc;
use std::time::Duration;

use coincore_common::{
    interpolate_price, CurrencyPair, Error, Money, PricedQuote, QuoteProvider, TransactionError,
    TransferDirection, TransferQuote,
};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// Quotes with a degenerate validity window are still refreshed, just not in
// a busy loop.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct Running {
    priced: Arc<watch::Sender<PricedQuote>>,
    amount: watch::Sender<Money>,
    refresh: JoinHandle<()>,
}

/// Maintains a live priced quote for one direction and currency pair.
///
/// May be started and stopped repeatedly; a restart never leaks the previous
/// refresh task.
pub struct TransferQuotesEngine {
    provider: Arc<dyn QuoteProvider>,
    running: Option<Running>,
}

impl std::fmt::Debug for TransferQuotesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferQuotesEngine")
            .field("running", &self.running.is_some())
            .finish()
    }
}

fn price_for(quote: &TransferQuote, amount: &Money) -> Decimal {
    interpolate_price(&quote.price_tiers, amount.to_major()).unwrap_or_default()
}

impl TransferQuotesEngine {
    /// Build an engine over a quote provider.
    pub fn new(provider: Arc<dyn QuoteProvider>) -> Self {
        Self {
            provider,
            running: None,
        }
    }

    /// Fetch the initial quote and start the refresh loop.
    ///
    /// The first fetch happens here, so rail errors (notably the
    /// pending-orders limit) surface to the caller rather than dying inside
    /// the loop.
    pub async fn start(
        &mut self,
        direction: TransferDirection,
        pair: CurrencyPair,
    ) -> Result<(), TransactionError> {
        self.stop();

        let quote = self.provider.fetch_quote(direction, &pair).await?;
        let zero = Money::zero(pair.source);
        let priced = PricedQuote {
            price: price_for(&quote, &zero),
            transfer_quote: quote.clone(),
        };

        let (amount_tx, amount_rx) = watch::channel(zero);
        let priced_tx = Arc::new(watch::channel(priced).0);

        let refresh = tokio::spawn(Self::refresh_loop(
            Arc::clone(&self.provider),
            direction,
            pair,
            quote,
            Arc::clone(&priced_tx),
            amount_rx,
        ));

        self.running = Some(Running {
            priced: priced_tx,
            amount: amount_tx,
            refresh,
        });
        Ok(())
    }

    async fn refresh_loop(
        provider: Arc<dyn QuoteProvider>,
        direction: TransferDirection,
        pair: CurrencyPair,
        initial: TransferQuote,
        priced: Arc<watch::Sender<PricedQuote>>,
        amount: watch::Receiver<Money>,
    ) {
        let mut interval = initial.validity().max(MIN_REFRESH_INTERVAL);
        loop {
            tokio::time::sleep(interval).await;
            match provider.fetch_quote(direction, &pair).await {
                Ok(quote) => {
                    let current = *amount.borrow();
                    interval = quote.validity().max(MIN_REFRESH_INTERVAL);
                    priced.send_replace(PricedQuote {
                        price: price_for(&quote, &current),
                        transfer_quote: quote,
                    });
                }
                Err(err) => {
                    // Keep the last good quote and retry on the old cadence.
                    tracing::warn!("Quote refresh for {} failed: {}", pair, err);
                }
            }
        }
    }

    /// Push a new amount and immediately republish the re-interpolated price.
    pub fn update_amount(&self, amount: Money) -> Result<(), Error> {
        let running = self.running.as_ref().ok_or(Error::NotStarted)?;
        running.amount.send_replace(amount);
        let quote = running.priced.borrow().transfer_quote.clone();
        running.priced.send_replace(PricedQuote {
            price: price_for(&quote, &amount),
            transfer_quote: quote,
        });
        Ok(())
    }

    /// The last published priced quote; fails before the first arrives.
    pub fn latest_quote(&self) -> Result<PricedQuote, Error> {
        let running = self.running.as_ref().ok_or(Error::NoQuoteAvailable)?;
        Ok(running.priced.borrow().clone())
    }

    /// Subscribe to priced-quote publishes. The receiver holds the latest
    /// value immediately.
    pub fn subscribe(&self) -> Result<watch::Receiver<PricedQuote>, Error> {
        let running = self.running.as_ref().ok_or(Error::NotStarted)?;
        Ok(running.priced.subscribe())
    }

    /// Stop the refresh loop and drop both streams. Safe to call when
    /// nothing was started.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.refresh.abort();
        }
    }

    /// Whether the engine currently holds a live quote.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for TransferQuotesEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use coincore_common::money::CryptoCurrency;
    use coincore_common::{Currency, FiatCurrency};

    use super::*;
    use crate::testing::{btc, FakeQuoteProvider};

    fn pair() -> CurrencyPair {
        CurrencyPair {
            source: Currency::Crypto(CryptoCurrency::Btc),
            destination: Currency::Fiat(FiatCurrency::new("USD").expect("valid code")),
        }
    }

    #[tokio::test]
    async fn latest_quote_fails_before_start() {
        let engine = TransferQuotesEngine::new(Arc::new(FakeQuoteProvider::with_price(100)));
        assert!(matches!(
            engine.latest_quote(),
            Err(Error::NoQuoteAvailable)
        ));
    }

    #[tokio::test]
    async fn amount_updates_republish_immediately() {
        let provider = Arc::new(FakeQuoteProvider::tiered());
        let mut engine = TransferQuotesEngine::new(provider);
        engine.start(TransferDirection::Internal, pair()).await.expect("fetch ok");

        let before = engine.latest_quote().expect("quote published");
        engine.update_amount(btc(10_000_000_000)).expect("started"); // 100 BTC
        let after = engine.latest_quote().expect("quote published");
        assert_ne!(before.price, after.price);
        assert_eq!(before.transfer_quote.id, after.transfer_quote.id);

        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_when_the_validity_window_elapses() {
        let provider = Arc::new(FakeQuoteProvider::with_validity(2));
        let mut engine = TransferQuotesEngine::new(provider.clone());
        engine.start(TransferDirection::Internal, pair()).await.expect("fetch ok");
        assert_eq!(provider.fetch_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(provider.fetch_count() >= 2);

        engine.stop();
        let fetched = provider.fetch_count();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(provider.fetch_count(), fetched);
    }

    #[tokio::test]
    async fn restart_replaces_the_previous_loop() {
        let provider = Arc::new(FakeQuoteProvider::with_price(100));
        let mut engine = TransferQuotesEngine::new(provider.clone());
        engine.start(TransferDirection::Internal, pair()).await.expect("fetch ok");
        let first = engine.latest_quote().expect("quote published");
        engine.start(TransferDirection::Internal, pair()).await.expect("fetch ok");
        let second = engine.latest_quote().expect("quote published");
        assert_ne!(first.transfer_quote.id, second.transfer_quote.id);
        engine.stop();
        assert!(!engine.is_running());
    }
}
