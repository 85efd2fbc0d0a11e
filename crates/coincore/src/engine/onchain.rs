//! Non-custodial on-chain send engine.
//!
//! Builds, fee-prices and broadcasts a transaction from a user-keyed wallet
//! to an on-chain address. The per-level fee comes from the wallet client's
//! current rates; the chosen level is persisted per asset when a preference
//! store is attached.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::{CryptoCurrency, FiatCurrency};
use coincore_common::{
    ensure_coincore, Account, AccountKind, ConfirmationKind, ConfirmationValue, Error,
    ExchangeRates, FeeLevel, FeeLevelRates, FeePreference, Money, NetworkFeeKind, OnChainClient,
    PendingTx, PreparedTransaction, TransactionError, TxCompletionListener, TxResult, TxTarget,
    ValidationState,
};
use std::collections::BTreeSet;
use tracing::instrument;

use super::{EngineContext, InvoicePayer, RefreshTrigger, TransactionEngine};

fn fee_for_level(rates: &FeeLevelRates, level: FeeLevel, custom_amount: i64) -> u64 {
    match level {
        FeeLevel::None => 0,
        FeeLevel::Regular => rates.regular,
        FeeLevel::Priority => rates.priority,
        // An unset custom fee falls back to the regular rate
        FeeLevel::Custom if custom_amount > 0 => custom_amount as u64,
        FeeLevel::Custom => rates.regular,
    }
}

/// Sends from an on-chain wallet to an on-chain address.
pub struct OnChainEngine {
    client: Arc<dyn OnChainClient>,
    user_fiat: FiatCurrency,
    fee_preference: Option<Arc<dyn FeePreference>>,
    completion_listener: Option<Arc<dyn TxCompletionListener>>,
    ctx: Option<EngineContext>,
}

impl std::fmt::Debug for OnChainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnChainEngine")
            .field("user_fiat", &self.user_fiat)
            .finish_non_exhaustive()
    }
}

impl OnChainEngine {
    /// Build a send engine over the wallet client.
    pub fn new(client: Arc<dyn OnChainClient>, user_fiat: FiatCurrency) -> Self {
        Self {
            client,
            user_fiat,
            fee_preference: None,
            completion_listener: None,
            ctx: None,
        }
    }

    /// Attach a per-asset fee-level preference store.
    pub fn with_fee_preference(mut self, preference: Arc<dyn FeePreference>) -> Self {
        self.fee_preference = Some(preference);
        self
    }

    /// Attach a completion hook, called after a successful broadcast.
    pub fn with_completion_listener(mut self, listener: Arc<dyn TxCompletionListener>) -> Self {
        self.completion_listener = Some(listener);
        self
    }

    fn ctx(&self) -> Result<&EngineContext, Error> {
        self.ctx.as_ref().ok_or(Error::NotStarted)
    }

    fn asset(&self) -> Result<CryptoCurrency, Error> {
        self.ctx()?.source_asset()
    }

    fn target_address(&self) -> Result<String, Error> {
        match &self.ctx()?.target {
            TxTarget::CryptoAddress { address, .. } => Ok(address.clone()),
            TxTarget::CryptoAccount {
                address: Some(address),
                ..
            } => Ok(address.clone()),
            TxTarget::Invoice(invoice) => Ok(invoice.address.clone()),
            _ => Err(Error::Precondition("target carries no on-chain address".into())),
        }
    }

    async fn reprice(&self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let ctx = self.ctx()?;
        let rates = match pending.fee_selection.rates {
            Some(rates) => rates,
            None => {
                let fetched = self.client.fee_rates(asset).await?;
                pending.fee_selection.rates = Some(fetched);
                fetched
            }
        };
        let fee = Money::from_minor(
            asset,
            fee_for_level(
                &rates,
                pending.fee_selection.selected_level,
                pending.fee_selection.custom_amount,
            ),
        );
        pending.total_balance = ctx.source.balance().await?;
        pending.available_balance = pending.total_balance.saturating_sub(&fee)?;
        pending.fee_amount = fee;
        pending.fee_for_full_available = fee;
        Ok(pending)
    }

    fn validate_amount_only(pending: &PendingTx) -> Result<(), ValidationState> {
        if !pending.amount.is_positive() {
            return Err(ValidationState::InvalidAmount);
        }
        if pending.amount.checked_cmp(&pending.available_balance)?.is_gt() {
            return Err(ValidationState::InsufficientFunds);
        }
        Ok(())
    }

    fn validate_options(pending: &PendingTx) -> Result<(), ValidationState> {
        if let Some(ConfirmationValue::Memo {
            text, required: true, ..
        }) = pending.confirmation(ConfirmationKind::Memo)
        {
            if text.as_deref().unwrap_or("").is_empty() {
                return Err(ValidationState::OptionInvalid);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionEngine for OnChainEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::OnChainWallet,
            Error::Precondition("on-chain send requires a user-keyed wallet source".into())
        );
        let asset = ctx.source_asset()?;
        let target_asset = match &ctx.target {
            TxTarget::CryptoAddress { asset, .. } | TxTarget::CryptoAccount { asset, .. } => *asset,
            TxTarget::Invoice(invoice) => invoice.asset,
            _ => {
                return Err(Error::Precondition(
                    "on-chain send requires an on-chain target".into(),
                ))
            }
        };
        ensure_coincore!(
            asset == target_asset,
            Error::Precondition("source and target assets differ".into())
        );
        Ok(())
    }

    fn start(
        &mut self,
        source: Arc<dyn Account>,
        target: TxTarget,
        rates: Arc<dyn ExchangeRates>,
        _refresh: RefreshTrigger,
    ) -> Result<(), Error> {
        self.ctx = Some(EngineContext {
            source,
            target,
            rates,
        });
        Ok(())
    }

    fn requires_second_password(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let saved = self
            .fee_preference
            .as_ref()
            .and_then(|p| p.saved_fee_level(asset))
            .unwrap_or(FeeLevel::Regular);

        let mut pending = PendingTx::zeroed(Money::zero(asset), self.user_fiat);
        pending.fee_selection.available_levels =
            BTreeSet::from([FeeLevel::Regular, FeeLevel::Priority, FeeLevel::Custom]);
        pending.fee_selection.selected_level = saved;
        self.reprice(pending).await
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        pending.amount = amount;
        self.reprice(pending).await
    }

    async fn do_update_fee_level(
        &mut self,
        mut pending: PendingTx,
        level: FeeLevel,
        custom_fee_amount: i64,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            pending.fee_selection.is_available(level),
            Error::Precondition(format!("fee level {level:?} not supported by this engine"))
        );
        pending.fee_selection.selected_level = level;
        pending.fee_selection.custom_amount = custom_fee_amount;
        if let Some(preference) = &self.fee_preference {
            preference.save_fee_level(self.asset()?, level);
        }
        self.reprice(pending).await
    }

    async fn do_build_confirmations(&mut self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let ctx = self.ctx()?;
        let mut confirmations = vec![
            ConfirmationValue::From {
                label: ctx.source.label().to_owned(),
            },
            ConfirmationValue::To {
                label: ctx.target.label().to_owned(),
            },
            ConfirmationValue::NetworkFee {
                fee: pending.fee_amount,
                kind: NetworkFeeKind::Withdrawal,
                asset,
            },
            ConfirmationValue::FeedTotal {
                amount: pending.amount,
                fee: pending.fee_amount,
            },
        ];
        if asset.supports_memo() {
            // Preserve memo text across rebuilds
            let existing = match pending.confirmation(ConfirmationKind::Memo) {
                Some(ConfirmationValue::Memo { text, required, .. }) => {
                    (text.clone(), *required)
                }
                _ => (None, false),
            };
            confirmations.push(ConfirmationValue::Memo {
                text: existing.0,
                required: existing.1,
                editable: true,
            });
        }
        pending.confirmations = confirmations;
        Ok(pending)
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let outcome = Self::validate_amount_only(&pending);
        Ok(pending.apply_validation(outcome))
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let address = self.target_address()?;
        if !self.client.is_valid_address(asset, &address).await? {
            return Ok(pending.with_validation_state(ValidationState::InvalidAddress));
        }
        let outcome =
            Self::validate_amount_only(&pending).and_then(|()| Self::validate_options(&pending));
        Ok(pending.apply_validation(outcome))
    }

    #[instrument(skip(self, pending, second_password))]
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        let address = self
            .target_address()
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;
        let prepared = self.client.prepare(pending, &address).await?;
        let tx_id = self
            .client
            .sign_and_broadcast(&prepared, second_password)
            .await?;
        Ok(TxResult::Hashed {
            tx_id,
            amount: pending.amount,
        })
    }

    async fn do_post_execute(
        &mut self,
        _pending: &PendingTx,
        result: &TxResult,
    ) -> Result<(), TransactionError> {
        if let (Some(listener), Ok(ctx)) = (&self.completion_listener, self.ctx()) {
            listener.on_tx_completed(&ctx.target, result).await?;
        }
        Ok(())
    }

    async fn stop(&mut self, _pending: &PendingTx) {}
}

#[async_trait]
impl InvoicePayer for OnChainEngine {
    async fn prepare_payment(
        &mut self,
        pending: &PendingTx,
        _second_password: &str,
    ) -> Result<PreparedTransaction, TransactionError> {
        let address = self
            .target_address()
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;
        self.client.prepare(pending, &address).await
    }

    fn on_payment_success(&mut self, pending: &PendingTx) {
        tracing::info!("Invoice payment of {} settled", pending.amount);
    }

    fn on_payment_failed(&mut self, pending: &PendingTx, error: &TransactionError) {
        tracing::warn!("Invoice payment of {} failed: {}", pending.amount, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{btc, onchain_wallet, usd, FakeOnChain};

    fn btc_address_target() -> TxTarget {
        TxTarget::CryptoAddress {
            asset: CryptoCurrency::Btc,
            address: "bc1qvalid".into(),
            label: "Cold storage".into(),
        }
    }

    async fn started_engine() -> OnChainEngine {
        let client = Arc::new(FakeOnChain::with_rates(100, 300));
        let mut engine = OnChainEngine::new(client, usd());
        engine
            .start(
                onchain_wallet(CryptoCurrency::Btc, 1_000_000),
                btc_address_target(),
                Arc::new(crate::testing::FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn selected_level_is_always_available() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        assert!(pending
            .fee_selection
            .available_levels
            .contains(&pending.fee_selection.selected_level));

        // FeeLevel::None is not in the feasible set
        let err = engine
            .do_update_fee_level(pending.clone(), FeeLevel::None, -1)
            .await;
        assert!(matches!(err, Err(Error::Precondition(_))));

        let p = engine
            .do_update_fee_level(pending, FeeLevel::Priority, -1)
            .await
            .expect("priority available");
        assert_eq!(p.fee_amount, btc(300));
        assert_eq!(p.available_balance, btc(1_000_000 - 300));
    }

    #[tokio::test]
    async fn custom_level_uses_the_supplied_fee() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_fee_level(pending.clone(), FeeLevel::Custom, 250)
            .await
            .expect("custom available");
        assert_eq!(p.fee_amount, btc(250));

        // Unset custom fee falls back to the regular rate
        let p = engine
            .do_update_fee_level(pending, FeeLevel::Custom, -1)
            .await
            .expect("custom available");
        assert_eq!(p.fee_amount, btc(100));
    }

    #[tokio::test]
    async fn invalid_address_fails_full_validation_only() {
        let client = Arc::new(FakeOnChain::with_rates(100, 300).rejecting_addresses());
        let mut engine = OnChainEngine::new(client, usd());
        engine
            .start(
                onchain_wallet(CryptoCurrency::Btc, 1_000_000),
                btc_address_target(),
                Arc::new(crate::testing::FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");

        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(10_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert!(p.validation_state.can_execute());
        let p = engine.do_validate_all(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::InvalidAddress);
    }

    #[tokio::test]
    async fn execute_broadcasts_and_returns_the_hash() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(10_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert!(p.validation_state.can_execute());

        let result = engine.do_execute(&p, "hunter2").await.expect("broadcasts");
        assert!(matches!(result, TxResult::Hashed { .. }));
    }
}
