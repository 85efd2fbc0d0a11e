//! Shared behavior for quote-backed engines.
//!
//! `QuoteBinding` bundles the quote subscription and refresh plumbing that
//! every quote-driven engine needs: it owns the quotes engine and the
//! optional confirmation-refresh subscription, so resource handles never
//! travel through the draft.

use std::sync::Arc;

use coincore_common::{
    CurrencyPair, CustodialApi, Error, FiatCurrency, KycTiers, Money, PendingTx, PricedQuote,
    Product, QuoteProvider, TierService, TransactionError, TransferDirection, TransferLimits,
    ValidationState,
};
use tokio::task::JoinHandle;

use super::RefreshTrigger;
use crate::quotes::TransferQuotesEngine;

/// Quote plumbing owned by a quote-backed engine.
pub struct QuoteBinding {
    quotes: TransferQuotesEngine,
    tiers: Arc<dyn TierService>,
    custodial: Arc<dyn CustodialApi>,
    direction: TransferDirection,
    pair: Option<CurrencyPair>,
    trigger: Option<RefreshTrigger>,
    refresh_sub: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for QuoteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteBinding")
            .field("direction", &self.direction)
            .field("pair", &self.pair)
            .field("subscribed", &self.refresh_sub.is_some())
            .finish()
    }
}

impl QuoteBinding {
    /// Build a binding over the quote, tier and custodial collaborators.
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        tiers: Arc<dyn TierService>,
        custodial: Arc<dyn CustodialApi>,
        direction: TransferDirection,
    ) -> Self {
        Self {
            quotes: TransferQuotesEngine::new(provider),
            tiers,
            custodial,
            direction,
            pair: None,
            trigger: None,
            refresh_sub: None,
        }
    }

    /// Bind the derived pair and the driver's refresh trigger; called from
    /// the owning engine's `start`.
    pub fn bind(&mut self, pair: CurrencyPair, trigger: RefreshTrigger) {
        self.pair = Some(pair);
        self.trigger = Some(trigger);
    }

    /// The transfer direction this binding quotes for.
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Start quote fetching. The initial fetch happens here, so rail errors
    /// surface to `do_initialise_tx`.
    pub async fn start_quotes(&mut self) -> Result<(), TransactionError> {
        let pair = self
            .pair
            .ok_or_else(|| TransactionError::InternalError("quote binding not bound".into()))?;
        self.quotes.start(self.direction, pair).await
    }

    /// Push the entered amount into the live quote.
    pub fn update_amount(&self, amount: Money) -> Result<(), Error> {
        self.quotes.update_amount(amount)
    }

    /// The last published priced quote.
    pub fn latest_quote(&self) -> Result<PricedQuote, Error> {
        self.quotes.latest_quote()
    }

    /// Subscribe once to priced-quote publishes, asking the driver to
    /// refresh-and-revalidate confirmations on every new price. Re-entrant
    /// calls never create a second subscription.
    pub fn ensure_subscribed(&mut self) -> Result<(), Error> {
        if self.refresh_sub.is_some() {
            return Ok(());
        }
        let trigger = self.trigger.clone().ok_or(Error::NotStarted)?;
        let mut rx = self.quotes.subscribe()?;
        self.refresh_sub = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                trigger.request(true);
            }
        }));
        Ok(())
    }

    /// Whether a confirmation-refresh subscription is live.
    pub fn is_subscribed(&self) -> bool {
        self.refresh_sub.is_some()
    }

    /// KYC tiers and product transfer limits, fetched together.
    pub async fn tier_limits(
        &self,
        fiat: FiatCurrency,
        product: Product,
    ) -> Result<(KycTiers, TransferLimits), TransactionError> {
        let tiers = self.tiers.tiers().await?;
        let limits = self.custodial.transfer_limits(fiat, product).await?;
        Ok((tiers, limits))
    }

    /// Map the rail's pending-orders-limit code into a resolved draft with
    /// the dedicated validation state; anything else propagates.
    pub fn handle_pending_orders_error(
        err: TransactionError,
        pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        if err.is_pending_orders_limit() {
            Ok(pending.with_validation_state(ValidationState::PendingOrdersLimitReached))
        } else {
            Err(err.into())
        }
    }

    /// Drop the built confirmations along with the refresh subscription that
    /// was keeping them current.
    pub fn clear_confirmations(&mut self, mut pending: PendingTx) -> PendingTx {
        if let Some(sub) = self.refresh_sub.take() {
            sub.abort();
        }
        pending.confirmations.clear();
        pending
    }

    /// Tear down the subscription and the quote refresh loop. Safe to call
    /// when nothing was started.
    pub fn stop(&mut self) {
        if let Some(sub) = self.refresh_sub.take() {
            sub.abort();
        }
        self.quotes.stop();
    }
}

impl Drop for QuoteBinding {
    fn drop(&mut self) {
        self.stop();
    }
}
