//! Interest deposit decorator.
//!
//! Wraps the engine that actually moves funds and layers the savings-product
//! rules on top: the product minimum, a fixed priority fee, and the two
//! agreement options that must both be accepted before execution.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::CryptoCurrency;
use coincore_common::{
    ensure_coincore, Account, ConfirmationKind, ConfirmationValue, CustodialApi, Error,
    ExchangeRates, FeeLevel, Money, NetworkFeeKind, PendingTx, TransactionError, TxResult,
    TxTarget, ValidationState,
};
use std::collections::BTreeSet;
use tracing::instrument;

use super::{RefreshTrigger, TransactionEngine};

fn accepted(pending: &PendingTx, kind: ConfirmationKind) -> bool {
    match pending.confirmation(kind) {
        Some(ConfirmationValue::TermsOfService { accepted })
        | Some(ConfirmationValue::TransferAgreement { accepted, .. }) => *accepted,
        _ => false,
    }
}

fn options_valid(pending: &PendingTx) -> bool {
    accepted(pending, ConfirmationKind::TermsOfService)
        && accepted(pending, ConfirmationKind::TransferAgreement)
}

/// Deposits into the interest product by decorating a funds-moving engine.
pub struct InterestDepositEngine<E> {
    inner: E,
    custodial: Arc<dyn CustodialApi>,
    source: Option<Arc<dyn Account>>,
    min_deposit: Option<Money>,
}

impl<E> std::fmt::Debug for InterestDepositEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterestDepositEngine")
            .field("min_deposit", &self.min_deposit)
            .finish_non_exhaustive()
    }
}

impl<E: TransactionEngine> InterestDepositEngine<E> {
    /// Wrap a funds-moving engine with the interest-product rules.
    pub fn new(inner: E, custodial: Arc<dyn CustodialApi>) -> Self {
        Self {
            inner,
            custodial,
            source: None,
            min_deposit: None,
        }
    }

    fn asset(&self) -> Result<CryptoCurrency, Error> {
        self.source
            .as_ref()
            .ok_or(Error::NotStarted)?
            .as_ref()
            .crypto_currency()
    }

    /// Re-stamp the product confirmations on top of whatever the wrapped
    /// engine built, preserving acceptance state across rebuilds.
    fn overlay(&self, mut pending: PendingTx, asset: CryptoCurrency) -> PendingTx {
        let tos = accepted(&pending, ConfirmationKind::TermsOfService);
        let agreement = accepted(&pending, ConfirmationKind::TransferAgreement);
        if let Some(ConfirmationValue::Memo { text, required, .. }) =
            pending.confirmation(ConfirmationKind::Memo).cloned()
        {
            // Interest deposits carry a rail-assigned memo; not user-editable
            pending = pending.add_or_replace_confirmation(ConfirmationValue::Memo {
                text,
                required,
                editable: false,
            });
        }
        let fee = pending.fee_amount;
        let amount = pending.amount;
        pending
            .add_or_replace_confirmation(ConfirmationValue::NetworkFee {
                fee,
                kind: NetworkFeeKind::Deposit,
                asset,
            })
            .add_or_replace_confirmation(ConfirmationValue::TermsOfService { accepted: tos })
            .add_or_replace_confirmation(ConfirmationValue::TransferAgreement {
                accepted: agreement,
                amount,
            })
    }
}

#[async_trait]
impl<E: TransactionEngine> TransactionEngine for InterestDepositEngine<E> {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        self.inner.assert_inputs_valid()?;
        let source = self.source.as_ref().ok_or(Error::NotStarted)?;
        ensure_coincore!(
            source.currency().is_crypto(),
            Error::Precondition("interest deposits move a crypto asset".into())
        );
        Ok(())
    }

    fn start(
        &mut self,
        source: Arc<dyn Account>,
        target: TxTarget,
        rates: Arc<dyn ExchangeRates>,
        refresh: RefreshTrigger,
    ) -> Result<(), Error> {
        self.source = Some(Arc::clone(&source));
        self.inner.start(source, target, rates, refresh)
    }

    fn can_transact_fiat(&self) -> bool {
        self.inner.can_transact_fiat()
    }

    fn requires_second_password(&self) -> bool {
        self.inner.requires_second_password()
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let mut pending = self.inner.do_initialise_tx().await?;
        let limits = self.custodial.interest_limits(asset).await?;
        self.min_deposit = Some(limits.min_deposit_amount);
        pending.min_limit = Some(limits.min_deposit_amount);
        // The product funds deposits at a fixed priority fee
        pending.fee_selection.available_levels = BTreeSet::from([FeeLevel::Priority]);
        pending.fee_selection.selected_level = FeeLevel::Priority;
        Ok(pending)
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        let mut pending = self.inner.do_update_amount(amount, pending).await?;
        pending.min_limit = self.min_deposit;
        Ok(pending)
    }

    async fn do_update_fee_level(
        &mut self,
        pending: PendingTx,
        level: FeeLevel,
        custom_fee_amount: i64,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            pending.fee_selection.is_available(level),
            Error::Precondition(format!("fee level {level:?} not supported by this engine"))
        );
        self.inner
            .do_update_fee_level(pending, level, custom_fee_amount)
            .await
    }

    async fn do_build_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let pending = self.inner.do_build_confirmations(pending).await?;
        Ok(self.overlay(pending, asset))
    }

    async fn do_refresh_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let pending = self.inner.do_refresh_confirmations(pending).await?;
        Ok(self.overlay(pending, asset))
    }

    async fn do_option_update_request(
        &mut self,
        pending: PendingTx,
        new_value: ConfirmationValue,
    ) -> Result<PendingTx, Error> {
        match new_value.kind() {
            ConfirmationKind::TermsOfService | ConfirmationKind::TransferAgreement => {
                Ok(pending.add_or_replace_confirmation(new_value))
            }
            _ => {
                let asset = self.asset()?;
                let pending = self.inner.do_option_update_request(pending, new_value).await?;
                Ok(self.overlay(pending, asset))
            }
        }
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let pending = self.inner.do_validate_amount(pending).await?;
        if !pending.validation_state.can_execute() {
            return Ok(pending);
        }
        let min = self.min_deposit.ok_or(Error::NotStarted)?;
        let below_min = pending
            .amount
            .checked_cmp(&min)
            .map(|ord| ord.is_lt())
            .unwrap_or(true);
        if below_min {
            return Ok(pending.with_validation_state(ValidationState::UnderMinLimit));
        }
        Ok(pending)
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let pending = self.inner.do_validate_all(pending).await?;
        if pending.validation_state.can_execute() && !options_valid(&pending) {
            return Ok(pending.with_validation_state(ValidationState::OptionInvalid));
        }
        self.do_validate_amount(pending).await
    }

    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        self.inner.do_execute(pending, second_password).await
    }

    async fn do_post_execute(
        &mut self,
        pending: &PendingTx,
        result: &TxResult,
    ) -> Result<(), TransactionError> {
        self.inner.do_post_execute(pending, result).await
    }

    async fn stop(&mut self, pending: &PendingTx) {
        self.inner.stop(pending).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OnChainEngine;
    use crate::testing::{btc, onchain_wallet, usd, FakeCustodial, FakeOnChain, FakeRates};

    async fn started_engine() -> InterestDepositEngine<OnChainEngine> {
        let custodial =
            Arc::new(FakeCustodial::default().with_interest_min(btc(50_000)));
        let inner = OnChainEngine::new(Arc::new(FakeOnChain::with_rates(100, 300)), usd());
        let mut engine = InterestDepositEngine::new(inner, custodial);
        engine
            .start(
                onchain_wallet(CryptoCurrency::Btc, 10_000_000),
                TxTarget::CryptoAccount {
                    asset: CryptoCurrency::Btc,
                    label: "BTC Interest".into(),
                    address: Some("bc1qinterest".into()),
                },
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn fee_level_is_pinned_to_priority() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        assert_eq!(pending.fee_selection.selected_level, FeeLevel::Priority);
        assert_eq!(
            pending.fee_selection.available_levels,
            BTreeSet::from([FeeLevel::Priority])
        );
        let err = engine.do_update_fee_level(pending, FeeLevel::Regular, -1).await;
        assert!(matches!(err, Err(Error::Precondition(_))));
    }

    #[tokio::test]
    async fn product_minimum_gates_the_amount() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(10_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);
    }

    #[tokio::test]
    async fn unaccepted_agreements_block_execution() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(100_000), pending)
            .await
            .expect("updated");
        let p = engine.do_build_confirmations(p).await.expect("built");
        assert!(p.has_confirmation(ConfirmationKind::TermsOfService));
        assert!(p.has_confirmation(ConfirmationKind::TransferAgreement));

        let p = engine.do_validate_all(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::OptionInvalid);

        let p = engine
            .do_option_update_request(
                p,
                ConfirmationValue::TermsOfService { accepted: true },
            )
            .await
            .expect("option folded");
        let p = engine.do_validate_all(p.clone()).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::OptionInvalid);

        let amount = p.amount;
        let p = engine
            .do_option_update_request(
                p,
                ConfirmationValue::TransferAgreement {
                    accepted: true,
                    amount,
                },
            )
            .await
            .expect("option folded");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert!(p.validation_state.can_execute());
    }
}
