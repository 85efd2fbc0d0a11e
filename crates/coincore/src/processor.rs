//! The lifecycle driver.
//!
//! `TransactionProcessor` owns one engine and one draft and serializes the
//! lifecycle for a caller: initialise, amend, validate, execute. It also owns
//! the receiving end of the engine's refresh channel; callers pump it with
//! [`TransactionProcessor::poll_refresh`] when they want live confirmations
//! folded in.

use std::sync::Arc;

use coincore_common::{
    Account, ConfirmationValue, Error, ExchangeRates, FeeLevel, Money, PendingTx,
    TransactionError, TxResult, TxTarget, ValidationState,
};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::engine::{RefreshTrigger, TransactionEngine};

fn to_execution_error(state: ValidationState) -> TransactionError {
    match state {
        ValidationState::UnderMinLimit => TransactionError::OrderBelowMin,
        ValidationState::OverMaxLimit => TransactionError::OrderAboveMax,
        ValidationState::InsufficientFunds => TransactionError::InsufficientBalance,
        ValidationState::InvalidAddress => TransactionError::InvalidAddress,
        ValidationState::InvoiceExpired => TransactionError::InvalidQuote,
        ValidationState::HasTxInFlight | ValidationState::PendingOrdersLimitReached => {
            TransactionError::OrderLimitReached
        }
        _ => TransactionError::Unexpected,
    }
}

/// Drives one engine through the lifecycle for one draft.
pub struct TransactionProcessor {
    engine: Box<dyn TransactionEngine>,
    pending: Option<PendingTx>,
    refresh_rx: mpsc::UnboundedReceiver<bool>,
}

impl std::fmt::Debug for TransactionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionProcessor")
            .field("initialised", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl TransactionProcessor {
    /// Bind an engine to a source, target and rate provider.
    pub fn new(
        mut engine: Box<dyn TransactionEngine>,
        source: Arc<dyn Account>,
        target: TxTarget,
        rates: Arc<dyn ExchangeRates>,
    ) -> Result<Self, Error> {
        let (trigger, refresh_rx) = RefreshTrigger::channel();
        engine.start(source, target, rates, trigger)?;
        engine.assert_inputs_valid()?;
        Ok(Self {
            engine,
            pending: None,
            refresh_rx,
        })
    }

    /// The current draft, once initialised.
    pub fn pending(&self) -> Option<&PendingTx> {
        self.pending.as_ref()
    }

    /// Whether `execute` needs the wallet's second password.
    pub fn requires_second_password(&self) -> bool {
        self.engine.requires_second_password()
    }

    fn take_pending(&mut self) -> Result<PendingTx, Error> {
        self.pending
            .take()
            .ok_or_else(|| Error::Precondition("transaction not initialised".into()))
    }

    fn store(&mut self, pending: PendingTx) -> &PendingTx {
        self.pending.insert(pending)
    }

    /// Produce the first draft.
    #[instrument(skip(self))]
    pub async fn initialise(&mut self) -> Result<&PendingTx, Error> {
        let pending = self.engine.do_initialise_tx().await?;
        Ok(self.store(pending))
    }

    /// Fold a new amount into the draft and revalidate it.
    ///
    /// A zero amount resets the draft to its pre-entry state rather than
    /// flagging an invalid amount.
    pub async fn update_amount(&mut self, amount: Money) -> Result<&PendingTx, Error> {
        if amount.currency().is_fiat() && !self.engine.can_transact_fiat() {
            return Err(Error::Precondition(
                "engine does not accept fiat-denominated amounts".into(),
            ));
        }
        let pending = self.take_pending()?;
        let pending = self.engine.do_update_amount(amount, pending).await?;
        let pending = if amount.is_zero() {
            pending.with_validation_state(ValidationState::Uninitialised)
        } else {
            self.engine.do_validate_amount(pending).await?
        };
        Ok(self.store(pending))
    }

    /// Change the fee level. The level must be available on the draft.
    pub async fn update_fee_level(
        &mut self,
        level: FeeLevel,
        custom_fee_amount: i64,
    ) -> Result<&PendingTx, Error> {
        let pending = self.take_pending()?;
        if !pending.fee_selection.is_available(level) {
            self.store(pending);
            return Err(Error::Precondition(format!(
                "fee level {level:?} is not available on this draft"
            )));
        }
        let pending = self
            .engine
            .do_update_fee_level(pending, level, custom_fee_amount)
            .await?;
        let pending = self.engine.do_validate_amount(pending).await?;
        Ok(self.store(pending))
    }

    /// Fold one updated confirmation option into the draft. The option must
    /// already be present.
    pub async fn set_option(&mut self, value: ConfirmationValue) -> Result<&PendingTx, Error> {
        let pending = self.take_pending()?;
        if !pending.has_confirmation(value.kind()) {
            let kind = value.kind();
            self.store(pending);
            return Err(Error::Precondition(format!(
                "confirmation {kind:?} is not part of this draft"
            )));
        }
        let pending = self.engine.do_option_update_request(pending, value).await?;
        Ok(self.store(pending))
    }

    /// Build confirmations, run a full validation and begin watching for
    /// confirmation updates.
    #[instrument(skip(self))]
    pub async fn validate_all(&mut self) -> Result<&PendingTx, Error> {
        let pending = self.take_pending()?;
        let pending = self.engine.do_build_confirmations(pending).await?;
        let pending = self.engine.do_validate_all(pending).await?;
        let pending = self.engine.start_confirmations_update(pending).await?;
        Ok(self.store(pending))
    }

    /// Drain any queued refresh requests and fold them into the draft.
    /// Requests arriving before confirmations are built are dropped.
    ///
    /// Returns whether the draft changed.
    pub async fn poll_refresh(&mut self) -> Result<bool, Error> {
        let mut revalidate = false;
        let mut requested = false;
        while let Ok(flag) = self.refresh_rx.try_recv() {
            requested = true;
            revalidate |= flag;
        }
        if !requested {
            return Ok(false);
        }
        let pending = self.take_pending()?;
        if pending.confirmations.is_empty() {
            self.store(pending);
            return Ok(false);
        }
        let pending = self.engine.do_refresh_confirmations(pending).await?;
        let pending = if revalidate {
            self.engine.do_validate_all(pending).await?
        } else {
            pending
        };
        self.store(pending);
        Ok(true)
    }

    /// Validate and, if the draft holds up, execute it.
    ///
    /// A draft that fails validation maps the failing state onto the matching
    /// rail error instead of executing.
    #[instrument(skip(self, second_password))]
    pub async fn execute(&mut self, second_password: &str) -> Result<TxResult, TransactionError> {
        if self.engine.requires_second_password() && second_password.is_empty() {
            return Err(TransactionError::ExecutionFailed(
                "second password required".into(),
            ));
        }
        self.validate_all()
            .await
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;

        let pending = self
            .pending
            .clone()
            .ok_or_else(|| TransactionError::InternalError("transaction not initialised".into()))?;
        if !pending.validation_state.can_execute() {
            return Err(to_execution_error(pending.validation_state));
        }

        let result = self.engine.do_execute(&pending, second_password).await?;
        self.engine.do_post_execute(&pending, &result).await?;
        Ok(result)
    }

    /// Tear the engine down and drop the draft.
    pub async fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.engine.stop(&pending).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FiatWithdrawalEngine;
    use crate::testing::{fiat_account, usd, usd_money, FakeCustodial, FakeRates};
    use coincore_common::money::CryptoCurrency;

    fn withdrawal_processor() -> TransactionProcessor {
        let custodial = Arc::new(
            FakeCustodial::default().with_bank_limits(usd_money(1_000), usd_money(50_000)),
        );
        TransactionProcessor::new(
            Box::new(FiatWithdrawalEngine::new(custodial)),
            fiat_account("USD Wallet", 50_000, 50_000),
            TxTarget::BankAccount {
                currency: usd(),
                label: "Big Bank".into(),
                bank_id: "bank-1".into(),
            },
            Arc::new(FakeRates::default()),
        )
        .expect("inputs are compatible")
    }

    #[tokio::test]
    async fn amount_updates_require_initialisation() {
        let mut processor = withdrawal_processor();
        let err = processor.update_amount(usd_money(100)).await;
        assert!(matches!(err, Err(Error::Precondition(_))));
    }

    #[tokio::test]
    async fn zero_amount_resets_instead_of_failing() {
        let mut processor = withdrawal_processor();
        processor.initialise().await.expect("initialised");
        let p = processor
            .update_amount(Money::zero(usd()))
            .await
            .expect("updated");
        assert_eq!(p.validation_state, ValidationState::Uninitialised);
    }

    #[tokio::test]
    async fn fiat_amounts_need_a_fiat_capable_engine() {
        let mut processor = withdrawal_processor();
        processor.initialise().await.expect("initialised");
        // A fiat-capable engine still cannot compare a crypto amount against
        // its fiat limits; the mismatch surfaces through validation
        let p = processor
            .update_amount(Money::from_minor(CryptoCurrency::Btc, 1))
            .await
            .expect("engine copies the amount");
        assert_eq!(p.validation_state, ValidationState::UnknownError);
    }

    #[tokio::test]
    async fn failed_validation_maps_to_a_rail_error() {
        let mut processor = withdrawal_processor();
        processor.initialise().await.expect("initialised");
        processor
            .update_amount(usd_money(500))
            .await
            .expect("updated");
        let err = processor.execute("").await;
        assert_eq!(err, Err(TransactionError::OrderBelowMin));
    }

    #[tokio::test]
    async fn options_must_exist_before_they_can_be_set() {
        let mut processor = withdrawal_processor();
        processor.initialise().await.expect("initialised");
        let err = processor
            .set_option(ConfirmationValue::TermsOfService { accepted: true })
            .await;
        assert!(matches!(err, Err(Error::Precondition(_))));
        // The draft survives the rejected option
        assert!(processor.pending().is_some());
    }

    #[tokio::test]
    async fn unavailable_fee_levels_are_rejected_up_front() {
        let mut processor = withdrawal_processor();
        processor.initialise().await.expect("initialised");
        let err = processor.update_fee_level(FeeLevel::Priority, -1).await;
        assert!(matches!(err, Err(Error::Precondition(_))));
        assert!(processor.pending().is_some());
    }
}
