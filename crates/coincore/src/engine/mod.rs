//! The transaction engine contract and its implementations.
//!
//! Every engine is constructed around a fixed triple of source account,
//! target descriptor and exchange-rate provider, bound by [`start`].
//! Lifecycle steps consume and return the [`PendingTx`] draft; validation
//! failures travel on the draft, never as errors. Decorator engines own
//! their wrapped engine and forward the steps they do not change.
//!
//! [`start`]: TransactionEngine::start

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::CryptoCurrency;
use coincore_common::{
    Account, ConfirmationValue, Error, ExchangeRates, FeeLevel, Money, PendingTx,
    TransactionError, TxResult, TxTarget,
};
use tokio::sync::mpsc;

pub mod fiat;
pub mod interest;
pub mod invoice;
pub mod onchain;
pub mod quoted;
pub mod sell;
pub mod swap;
pub mod trading;

pub use fiat::{FiatDepositEngine, FiatWithdrawalEngine};
pub use interest::InterestDepositEngine;
pub use invoice::BitpayEngine;
pub use onchain::OnChainEngine;
pub use sell::CustodialSellEngine;
pub use swap::SwapEngine;
pub use trading::TradingToOnChainEngine;

/// Channel through which an engine asks its driver to refresh the
/// confirmation set, optionally revalidating. Cloneable; sends after the
/// driver is gone are silently dropped.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<bool>,
}

impl RefreshTrigger {
    /// A trigger plus the receiving end for the driver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A trigger whose requests go nowhere; for engines driven directly in
    /// tests.
    pub fn noop() -> Self {
        Self::channel().0
    }

    /// Request a confirmations refresh.
    pub fn request(&self, revalidate: bool) {
        let _ = self.tx.send(revalidate);
    }
}

/// The bound source/target/rates triple every engine operates on.
#[derive(Clone)]
pub(crate) struct EngineContext {
    pub source: Arc<dyn Account>,
    pub target: TxTarget,
    pub rates: Arc<dyn ExchangeRates>,
}

impl EngineContext {
    pub fn source_asset(&self) -> Result<CryptoCurrency, Error> {
        self.source.as_ref().crypto_currency()
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("source", &self.source.label())
            .field("target", &self.target.label())
            .finish()
    }
}

/// The engine lifecycle contract.
///
/// For a single draft the caller serializes calls (update, validate,
/// execute); the engine does not queue concurrent calls itself.
#[async_trait]
pub trait TransactionEngine: Send {
    /// Fail fast when the bound source/target types are incompatible with
    /// this engine. Idempotent; a failure is a programmer error, not a
    /// user-facing validation failure.
    fn assert_inputs_valid(&self) -> Result<(), Error>;

    /// Bind the source/target/rates triple. Composite engines also start
    /// their wrapped engine here.
    fn start(
        &mut self,
        source: Arc<dyn Account>,
        target: TxTarget,
        rates: Arc<dyn ExchangeRates>,
        refresh: RefreshTrigger,
    ) -> Result<(), Error>;

    /// Whether this engine accepts fiat-denominated input amounts.
    fn can_transact_fiat(&self) -> bool {
        false
    }

    /// Whether `do_execute` needs the wallet's second password.
    fn requires_second_password(&self) -> bool {
        false
    }

    /// Produce the first draft: zero amount, current balances, applicable
    /// limits and the feasible fee-level set.
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error>;

    /// Fold a new amount into the draft: revalidate balances, recompute the
    /// fee, push the amount into any live quote.
    async fn do_update_amount(
        &mut self,
        amount: Money,
        pending: PendingTx,
    ) -> Result<PendingTx, Error>;

    /// Change the fee level. Requires the level to be available on the
    /// draft; anything else is a precondition violation.
    async fn do_update_fee_level(
        &mut self,
        pending: PendingTx,
        level: FeeLevel,
        custom_fee_amount: i64,
    ) -> Result<PendingTx, Error>;

    /// Deterministically rebuild the confirmation list from the draft. Safe
    /// to call repeatedly without leaking resources.
    async fn do_build_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error>;

    /// Re-derive confirmations after an external signal. Default is a
    /// pass-through.
    async fn do_refresh_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        Ok(pending)
    }

    /// Fold one updated confirmation option into the draft. Default replaces
    /// the option in place.
    async fn do_option_update_request(
        &mut self,
        pending: PendingTx,
        new_value: ConfirmationValue,
    ) -> Result<PendingTx, Error> {
        Ok(pending.add_or_replace_confirmation(new_value))
    }

    /// Check amount against limits and balance; record the outcome on the
    /// draft.
    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error>;

    /// Full validation: amount, target validity, option completeness.
    /// Records the outcome on the draft.
    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error>;

    /// Begin watching for updates that should refresh the built
    /// confirmations. Idempotent. Default does nothing.
    async fn start_confirmations_update(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        Ok(pending)
    }

    /// Perform the operation. Only called with a draft whose validation
    /// state is `CanExecute`.
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        second_password: &str,
    ) -> Result<TxResult, TransactionError>;

    /// Notify interested parties after execution. Default succeeds.
    async fn do_post_execute(
        &mut self,
        _pending: &PendingTx,
        _result: &TxResult,
    ) -> Result<(), TransactionError> {
        Ok(())
    }

    /// Release every resource the engine holds for this draft. Safe to call
    /// when nothing was started.
    async fn stop(&mut self, pending: &PendingTx);
}

/// Capability of an on-chain engine that can prepare payments for an
/// invoice rail and wants to hear about the outcome.
#[async_trait]
pub trait InvoicePayer: TransactionEngine {
    /// Prepare the payment transaction for the current draft.
    async fn prepare_payment(
        &mut self,
        pending: &PendingTx,
        second_password: &str,
    ) -> Result<coincore_common::PreparedTransaction, TransactionError>;

    /// The invoice payment settled.
    fn on_payment_success(&mut self, pending: &PendingTx);

    /// The invoice payment failed after preparation.
    fn on_payment_failed(&mut self, pending: &PendingTx, error: &TransactionError);
}
