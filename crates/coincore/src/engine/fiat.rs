//! Fiat deposit and withdrawal engines.
//!
//! Both directions share one shape: initialisation fetches bank-transfer
//! limits and produces a zero-amount draft with `FeeLevel::None`; amount
//! updates are pure copies; validation special-cases the very first pass
//! (zero amount, still uninitialised) as valid-so-far.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::FiatCurrency;
use coincore_common::{
    ensure_coincore, Account, AccountKind, ConfirmationValue, CustodialApi, Error, ExchangeRates,
    FeeLevel, Money, PendingTx, TransactionError, TxResult, TxTarget, ValidationState,
};
use tracing::instrument;

use super::{EngineContext, RefreshTrigger, TransactionEngine};

fn validate_limits(
    pending: &PendingTx,
    check_balance: bool,
) -> Result<(), ValidationState> {
    let (min, max) = match (pending.min_limit, pending.max_limit) {
        (Some(min), Some(max)) => (min, max),
        _ => return Err(ValidationState::UnknownError),
    };
    if pending.amount.is_zero() {
        return Err(ValidationState::InvalidAmount);
    }
    if pending.amount.checked_cmp(&min)?.is_lt() {
        return Err(ValidationState::UnderMinLimit);
    }
    if pending.amount.checked_cmp(&max)?.is_gt() {
        return Err(ValidationState::OverMaxLimit);
    }
    if check_balance && pending.available_balance.checked_cmp(&pending.amount)?.is_lt() {
        return Err(ValidationState::InsufficientFunds);
    }
    Ok(())
}

fn is_first_pass(pending: &PendingTx) -> bool {
    pending.validation_state == ValidationState::Uninitialised && pending.amount.is_zero()
}

/// Moves value from a linked bank account into a custodial fiat balance.
pub struct FiatDepositEngine {
    custodial: Arc<dyn CustodialApi>,
    ctx: Option<EngineContext>,
}

impl std::fmt::Debug for FiatDepositEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiatDepositEngine").finish_non_exhaustive()
    }
}

impl FiatDepositEngine {
    /// Build a deposit engine over the custodial rail.
    pub fn new(custodial: Arc<dyn CustodialApi>) -> Self {
        Self {
            custodial,
            ctx: None,
        }
    }

    fn ctx(&self) -> Result<&EngineContext, Error> {
        self.ctx.as_ref().ok_or(Error::NotStarted)
    }

    fn user_fiat(&self) -> Result<FiatCurrency, Error> {
        match &self.ctx()?.target {
            TxTarget::FiatAccount { currency, .. } => Ok(*currency),
            _ => Err(Error::Precondition("deposit target must be a fiat account".into())),
        }
    }
}

#[async_trait]
impl TransactionEngine for FiatDepositEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::LinkedBank,
            Error::Precondition("fiat deposit requires a linked bank source".into())
        );
        ensure_coincore!(
            matches!(ctx.target, TxTarget::FiatAccount { .. }),
            Error::Precondition("fiat deposit requires a fiat account target".into())
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

    fn can_transact_fiat(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let fiat = self.user_fiat()?;
        let limits = self.custodial.bank_transfer_limits(fiat).await?;
        let zero = Money::zero(fiat);
        let mut pending = PendingTx::zeroed(zero, fiat);
        pending.min_limit = Some(limits.min);
        pending.max_limit = Some(limits.max);
        Ok(pending)
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        pending.amount = amount;
        Ok(pending)
    }

    async fn do_update_fee_level(
        &mut self,
        pending: PendingTx,
        level: FeeLevel,
        _custom_fee_amount: i64,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            pending.fee_selection.is_available(level),
            Error::Precondition(format!("fee level {level:?} not supported by this engine"))
        );
        // Only FeeLevel::None is ever available here
        Ok(pending)
    }

    async fn do_build_confirmations(&mut self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let ctx = self.ctx()?;
        pending.confirmations = vec![
            ConfirmationValue::From {
                label: ctx.source.label().to_owned(),
            },
            ConfirmationValue::To {
                label: ctx.target.label().to_owned(),
            },
            ConfirmationValue::EstimatedCompletion,
            ConfirmationValue::FiatFee {
                fee: pending.fee_amount,
            },
            ConfirmationValue::Total {
                total: pending.amount,
            },
        ];
        Ok(pending)
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        if is_first_pass(&pending) {
            return Ok(pending);
        }
        let outcome = validate_limits(&pending, false);
        Ok(pending.apply_validation(outcome))
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        self.do_validate_amount(pending).await
    }

    #[instrument(skip(self, pending, _second_password))]
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        _second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| TransactionError::InternalError("engine not started".into()))?;
        let account_id = ctx
            .source
            .receive_address()
            .await
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;
        self.custodial
            .start_bank_transfer(&account_id, pending.amount)
            .await?;
        Ok(TxResult::UnHashed {
            amount: pending.amount,
        })
    }

    async fn stop(&mut self, _pending: &PendingTx) {}
}

/// Moves value from a custodial fiat balance out to a linked bank account.
pub struct FiatWithdrawalEngine {
    custodial: Arc<dyn CustodialApi>,
    ctx: Option<EngineContext>,
}

impl std::fmt::Debug for FiatWithdrawalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiatWithdrawalEngine").finish_non_exhaustive()
    }
}

impl FiatWithdrawalEngine {
    /// Build a withdrawal engine over the custodial rail.
    pub fn new(custodial: Arc<dyn CustodialApi>) -> Self {
        Self {
            custodial,
            ctx: None,
        }
    }

    fn ctx(&self) -> Result<&EngineContext, Error> {
        self.ctx.as_ref().ok_or(Error::NotStarted)
    }

    fn user_fiat(&self) -> Result<FiatCurrency, Error> {
        self.ctx()?
            .source
            .currency()
            .as_fiat()
            .ok_or_else(|| Error::Precondition("withdrawal source must hold fiat".into()))
    }
}

#[async_trait]
impl TransactionEngine for FiatWithdrawalEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::FiatCustodial,
            Error::Precondition("fiat withdrawal requires a custodial fiat source".into())
        );
        ensure_coincore!(
            matches!(ctx.target, TxTarget::BankAccount { .. }),
            Error::Precondition("fiat withdrawal requires a bank account target".into())
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

    fn can_transact_fiat(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let fiat = self.user_fiat()?;
        let ctx = self.ctx()?;
        let actionable = ctx.source.actionable_balance().await?;
        let total = ctx.source.balance().await?;
        let limits = self.custodial.bank_transfer_limits(fiat).await?;

        let mut pending = PendingTx::zeroed(Money::zero(fiat), fiat);
        pending.total_balance = total;
        pending.available_balance = actionable;
        pending.min_limit = Some(limits.min);
        // A withdrawal can never exceed what is actionable right now
        pending.max_limit = Some(actionable);
        Ok(pending)
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        pending.amount = amount;
        Ok(pending)
    }

    async fn do_update_fee_level(
        &mut self,
        pending: PendingTx,
        level: FeeLevel,
        _custom_fee_amount: i64,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            pending.fee_selection.is_available(level),
            Error::Precondition(format!("fee level {level:?} not supported by this engine"))
        );
        Ok(pending)
    }

    async fn do_build_confirmations(&mut self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let ctx = self.ctx()?;
        pending.confirmations = vec![
            ConfirmationValue::From {
                label: ctx.source.label().to_owned(),
            },
            ConfirmationValue::To {
                label: ctx.target.label().to_owned(),
            },
            ConfirmationValue::FiatFee {
                fee: pending.fee_amount,
            },
            ConfirmationValue::EstimatedCompletion,
            ConfirmationValue::Total {
                total: pending.amount,
            },
        ];
        Ok(pending)
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        if is_first_pass(&pending) {
            return Ok(pending);
        }
        let outcome = validate_limits(&pending, true);
        Ok(pending.apply_validation(outcome))
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        self.do_validate_amount(pending).await
    }

    #[instrument(skip(self, pending, _second_password))]
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        _second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| TransactionError::InternalError("engine not started".into()))?;
        let bank_id = match &ctx.target {
            TxTarget::BankAccount { bank_id, .. } => bank_id.clone(),
            _ => return Err(TransactionError::InternalError("target is not a bank".into())),
        };
        self.custodial
            .create_withdraw_order(pending.amount, &bank_id)
            .await?;
        Ok(TxResult::UnHashed {
            amount: pending.amount,
        })
    }

    async fn stop(&mut self, _pending: &PendingTx) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fiat_account, linked_bank, usd, usd_money, FakeCustodial, FakeRates};

    async fn started_withdrawal() -> FiatWithdrawalEngine {
        let custodial = Arc::new(
            FakeCustodial::default().with_bank_limits(usd_money(1_000), usd_money(50_000)),
        );
        let mut engine = FiatWithdrawalEngine::new(custodial);
        engine
            .start(
                fiat_account("USD Wallet", 50_000, 50_000),
                TxTarget::BankAccount {
                    currency: usd(),
                    label: "Big Bank".into(),
                    bank_id: "bank-1".into(),
                },
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn first_zero_amount_pass_stays_uninitialised() {
        let mut engine = started_withdrawal().await;
        let pending = engine.do_initialise_tx().await.expect("limits fetched");
        let pending = engine.do_validate_amount(pending).await.expect("validated");
        assert_eq!(pending.validation_state, ValidationState::Uninitialised);
    }

    #[tokio::test]
    async fn withdrawal_enforces_the_documented_order() {
        let mut engine = started_withdrawal().await;
        let pending = engine.do_initialise_tx().await.expect("limits fetched");

        // Over max (max bound to actionable balance, 500.00)
        let p = engine
            .do_update_amount(usd_money(60_000), pending.clone())
            .await
            .expect("copy");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::OverMaxLimit);

        // Under min
        let p = engine
            .do_update_amount(usd_money(500), pending.clone())
            .await
            .expect("copy");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);

        // In range
        let p = engine
            .do_update_amount(usd_money(10_000), pending)
            .await
            .expect("copy");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::CanExecute);
    }

    #[tokio::test]
    async fn deposit_rejects_wrong_account_shapes() {
        let custodial = Arc::new(FakeCustodial::default());
        let mut engine = FiatDepositEngine::new(custodial);
        engine
            .start(
                fiat_account("USD Wallet", 0, 0),
                TxTarget::FiatAccount {
                    currency: usd(),
                    label: "USD".into(),
                },
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        // Source is a custodial fiat account, not a linked bank
        assert!(matches!(
            engine.assert_inputs_valid(),
            Err(Error::Precondition(_))
        ));

        let mut engine = FiatDepositEngine::new(Arc::new(FakeCustodial::default()));
        engine
            .start(
                linked_bank("Big Bank"),
                TxTarget::FiatAccount {
                    currency: usd(),
                    label: "USD".into(),
                },
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        assert!(engine.assert_inputs_valid().is_ok());
    }
}
