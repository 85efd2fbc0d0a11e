//! Custodial-to-on-chain withdrawal engine.
//!
//! Moves a custodial trading balance out to a user-supplied on-chain
//! address. The rail charges a flat withdrawal fee and enforces its own
//! minimum; neither is user-selectable.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::{CryptoCurrency, FiatCurrency};
use coincore_common::{
    ensure_coincore, Account, AccountKind, ConfirmationValue, CustodialApi, Error, ExchangeRates,
    FeeLevel, Money, NetworkFeeKind, PendingTx, TransactionError, TxResult, TxTarget,
    ValidationState,
};
use tracing::instrument;

use super::{EngineContext, RefreshTrigger, TransactionEngine};

/// Withdraws custodial crypto to an external on-chain address.
pub struct TradingToOnChainEngine {
    custodial: Arc<dyn CustodialApi>,
    user_fiat: FiatCurrency,
    ctx: Option<EngineContext>,
}

impl std::fmt::Debug for TradingToOnChainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingToOnChainEngine")
            .field("user_fiat", &self.user_fiat)
            .finish_non_exhaustive()
    }
}

impl TradingToOnChainEngine {
    /// Build a withdrawal engine over the custodial rail.
    pub fn new(custodial: Arc<dyn CustodialApi>, user_fiat: FiatCurrency) -> Self {
        Self {
            custodial,
            user_fiat,
            ctx: None,
        }
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
            _ => Err(Error::Precondition("target carries no on-chain address".into())),
        }
    }

    async fn snapshot(&self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let ctx = self.ctx()?;
        pending.total_balance = ctx.source.balance().await?;
        let actionable = ctx.source.actionable_balance().await?;
        pending.available_balance = actionable.saturating_sub(&pending.fee_amount)?;
        Ok(pending)
    }

    fn validate(pending: &PendingTx) -> Result<(), ValidationState> {
        // Under-min is checked first; a zero amount falls under the minimum
        if let Some(min) = pending.min_limit {
            if pending.amount.checked_cmp(&min)?.is_lt() {
                return Err(ValidationState::UnderMinLimit);
            }
        }
        if !pending.amount.is_positive() {
            return Err(ValidationState::InvalidAmount);
        }
        if pending.amount.checked_cmp(&pending.available_balance)?.is_gt() {
            return Err(ValidationState::InsufficientFunds);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionEngine for TradingToOnChainEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::Trading,
            Error::Precondition("withdrawal requires a custodial trading source".into())
        );
        let asset = ctx.source_asset()?;
        let target_asset = match &ctx.target {
            TxTarget::CryptoAddress { asset, .. } | TxTarget::CryptoAccount { asset, .. } => *asset,
            _ => {
                return Err(Error::Precondition(
                    "withdrawal requires an on-chain target".into(),
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

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let fees = self.custodial.withdraw_fee_and_min_limit(asset).await?;
        let mut pending = PendingTx::zeroed(Money::zero(asset), self.user_fiat);
        pending.fee_amount = Money::from_minor(asset, fees.fee);
        pending.fee_for_full_available = pending.fee_amount;
        pending.min_limit = Some(Money::from_minor(asset, fees.min_limit));
        self.snapshot(pending).await
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        pending.amount = amount;
        self.snapshot(pending).await
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
        let asset = self.asset()?;
        let ctx = self.ctx()?;
        pending.confirmations = vec![
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
        Ok(pending)
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let outcome = Self::validate(&pending);
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
        let address = self
            .target_address()
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;
        self.custodial
            .transfer_funds_to_wallet(pending.amount, &address)
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
    use crate::testing::{btc, trading_account, usd, FakeCustodial, FakeRates};

    async fn started_engine() -> TradingToOnChainEngine {
        let custodial = Arc::new(
            FakeCustodial::default().with_withdraw_fee_and_min(500, 10_000),
        );
        let mut engine = TradingToOnChainEngine::new(custodial, usd());
        engine
            .start(
                trading_account(CryptoCurrency::Btc, 1_000_000),
                TxTarget::CryptoAddress {
                    asset: CryptoCurrency::Btc,
                    address: "bc1qexternal".into(),
                    label: "External".into(),
                },
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn fee_and_minimum_come_from_the_rail() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        assert_eq!(pending.fee_amount, btc(500));
        assert_eq!(pending.min_limit, Some(btc(10_000)));
        assert_eq!(pending.available_balance, btc(1_000_000 - 500));
    }

    #[tokio::test]
    async fn rail_minimum_gates_the_amount() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(5_000), pending.clone())
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);

        let p = engine
            .do_update_amount(btc(999_999), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::InsufficientFunds);
    }

    #[tokio::test]
    async fn executes_as_a_custodial_transfer() {
        let mut engine = started_engine().await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(50_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert!(p.validation_state.can_execute());
        let result = engine.do_execute(&p, "").await.expect("transfers");
        assert_eq!(result, TxResult::UnHashed { amount: btc(50_000) });
    }
}
