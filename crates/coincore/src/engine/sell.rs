//! Custodial sell engine.
//!
//! Sells a custodial crypto balance into the user's fiat account through the
//! trading rail. Amounts are entered in the user's fiat; the live quote is
//! kept amount-aware so the displayed price tracks what the order would
//! actually fill at.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::{CryptoCurrency, FiatCurrency};
use coincore_common::{
    ensure_coincore, Account, AccountKind, ConfirmationValue, CustodialApi, Error, ExchangeRate,
    ExchangeRates, FeeLevel, Money, PendingTx, Product, QuoteProvider, TierService,
    TransactionError, TransferDirection, TxResult, TxTarget, ValidationState,
};
use tracing::instrument;

use super::quoted::QuoteBinding;
use super::{EngineContext, RefreshTrigger, TransactionEngine};
use coincore_common::CurrencyPair;

/// Sells custodial crypto into the user's fiat balance.
pub struct CustodialSellEngine {
    binding: QuoteBinding,
    custodial: Arc<dyn CustodialApi>,
    ctx: Option<EngineContext>,
    // The limits endpoint quotes bounds in fiat. Converted per keystroke they
    // drift with the price, so they are fetched once and reused as-is.
    min_api_fiat: Option<Money>,
    max_api_fiat: Option<Money>,
}

impl std::fmt::Debug for CustodialSellEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialSellEngine")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl CustodialSellEngine {
    /// Build a sell engine over the trading rail collaborators.
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        tiers: Arc<dyn TierService>,
        custodial: Arc<dyn CustodialApi>,
    ) -> Self {
        Self {
            binding: QuoteBinding::new(
                provider,
                tiers,
                Arc::clone(&custodial),
                TransferDirection::Internal,
            ),
            custodial,
            ctx: None,
            min_api_fiat: None,
            max_api_fiat: None,
        }
    }

    fn ctx(&self) -> Result<&EngineContext, Error> {
        self.ctx.as_ref().ok_or(Error::NotStarted)
    }

    fn user_fiat(&self) -> Result<FiatCurrency, Error> {
        match &self.ctx()?.target {
            TxTarget::FiatAccount { currency, .. } => Ok(*currency),
            _ => Err(Error::Precondition("sell target must be a fiat account".into())),
        }
    }

    fn asset(&self) -> Result<CryptoCurrency, Error> {
        self.ctx()?.source_asset()
    }

    async fn asset_to_fiat_rate(&self) -> Result<ExchangeRate, Error> {
        let asset = self.asset()?;
        let fiat = self.user_fiat()?;
        let price = self.ctx()?.rates.last_price(asset, fiat).await?;
        Ok(ExchangeRate::new(asset, fiat, price)?)
    }

    fn validate(pending: &PendingTx) -> Result<(), ValidationState> {
        // Under-min is checked first; a zero amount falls under the minimum
        let min = pending.min_limit.ok_or(ValidationState::UnknownError)?;
        if pending.amount.checked_cmp(&min)?.is_lt() {
            return Err(ValidationState::UnderMinLimit);
        }
        if pending.amount.checked_cmp(&pending.available_balance)?.is_gt() {
            return Err(ValidationState::InsufficientFunds);
        }
        if let Some(max) = pending.max_limit {
            if pending.amount.checked_cmp(&max)?.is_gt() {
                return Err(ValidationState::OverMaxLimit);
            }
        }
        if !pending.amount.is_positive() {
            return Err(ValidationState::InvalidAmount);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionEngine for CustodialSellEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::Trading,
            Error::Precondition("sell requires a custodial trading source".into())
        );
        ctx.source_asset()?;
        ensure_coincore!(
            matches!(ctx.target, TxTarget::FiatAccount { .. }),
            Error::Precondition("sell requires a fiat account target".into())
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
        self.ctx = Some(EngineContext {
            source,
            target,
            rates,
        });
        let pair = CurrencyPair {
            source: self.asset()?.into(),
            destination: self.user_fiat()?.into(),
        };
        self.binding.bind(pair, refresh);
        Ok(())
    }

    fn can_transact_fiat(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let fiat = self.user_fiat()?;
        let pending = PendingTx::zeroed(Money::zero(fiat), fiat);

        if let Err(err) = self.binding.start_quotes().await {
            return QuoteBinding::handle_pending_orders_error(err, pending);
        }

        let (_, limits) = self.binding.tier_limits(fiat, Product::Trade).await?;
        self.min_api_fiat = Some(limits.min_limit);
        self.max_api_fiat = Some(limits.max_order.checked_min(&limits.max_limit)?);

        let rate = self.asset_to_fiat_rate().await?;
        let ctx = self.ctx()?;
        let mut pending = pending;
        pending.total_balance = rate.convert(&ctx.source.balance().await?)?;
        pending.available_balance = rate.convert(&ctx.source.actionable_balance().await?)?;
        pending.min_limit = self.min_api_fiat;
        pending.max_limit = self.max_api_fiat;
        Ok(pending)
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        let rate = self.asset_to_fiat_rate().await?;
        let ctx = self.ctx()?;
        pending.amount = amount;
        // Amounts may be entered in either side of the pair; balances and the
        // cached fiat limits follow the entered currency
        let volume = if amount.currency().as_fiat() == Some(pending.selected_fiat) {
            pending.total_balance = rate.convert(&ctx.source.balance().await?)?;
            pending.available_balance = rate.convert(&ctx.source.actionable_balance().await?)?;
            pending.min_limit = self.min_api_fiat;
            pending.max_limit = self.max_api_fiat;
            rate.inverse()?.convert(&amount)?
        } else if amount.currency().as_crypto() == Some(self.asset()?) {
            let to_asset = rate.inverse()?;
            pending.total_balance = ctx.source.balance().await?;
            pending.available_balance = ctx.source.actionable_balance().await?;
            pending.min_limit = match self.min_api_fiat {
                Some(min) => Some(to_asset.convert(&min)?),
                None => None,
            };
            pending.max_limit = match self.max_api_fiat {
                Some(max) => Some(to_asset.convert(&max)?),
                None => None,
            };
            amount
        } else {
            return Err(Error::Precondition(
                "sell amounts are entered in the user's fiat or the source asset".into(),
            ));
        };

        // The quote interpolates in source-asset volume
        let _ = self.binding.update_amount(volume);
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
        let asset = self.asset()?;
        let fiat = self.user_fiat()?;
        let quote = self.binding.latest_quote()?;
        let ctx = self.ctx()?;
        pending.confirmations = vec![
            ConfirmationValue::ExchangePrice {
                money: Money::from_major(fiat, quote.price)?,
                asset,
            },
            ConfirmationValue::From {
                label: ctx.source.label().to_owned(),
            },
            ConfirmationValue::To {
                label: ctx.target.label().to_owned(),
            },
            ConfirmationValue::Total {
                total: pending.amount,
            },
        ];
        Ok(pending)
    }

    async fn do_refresh_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        if pending.confirmations.is_empty() {
            return Ok(pending);
        }
        let quote = self.binding.latest_quote()?;
        let money = Money::from_major(self.user_fiat()?, quote.price)?;
        Ok(pending.add_or_replace_confirmation(ConfirmationValue::ExchangePrice {
            money,
            asset: self.asset()?,
        }))
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let outcome = Self::validate(&pending);
        Ok(pending.apply_validation(outcome))
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        self.do_validate_amount(pending).await
    }

    async fn start_confirmations_update(
        &mut self,
        pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        self.binding.ensure_subscribed()?;
        Ok(pending)
    }

    #[instrument(skip(self, pending, _second_password))]
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        _second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        let quote = self
            .binding
            .latest_quote()
            .map_err(|_| TransactionError::InvalidQuote)?;
        let volume = if pending.amount.currency().is_crypto() {
            pending.amount
        } else {
            self.asset_to_fiat_rate()
                .await
                .and_then(|rate| Ok(rate.inverse()?.convert(&pending.amount)?))
                .map_err(|e| TransactionError::InternalError(e.to_string()))?
        };

        self.custodial.cancel_all_pending_orders().await?;
        let order = self
            .custodial
            .create_custodial_order(
                self.binding.direction(),
                quote.transfer_quote.id,
                volume,
                None,
                None,
            )
            .await?;
        self.custodial.update_order(order.id, true).await?;
        Ok(TxResult::UnHashed {
            amount: pending.amount,
        })
    }

    async fn stop(&mut self, _pending: &PendingTx) {
        self.binding.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        btc, trading_account, usd, usd_money, FakeCustodial, FakeQuoteProvider, FakeRates,
        FakeTiers,
    };

    async fn started_engine(balance_minor: u64) -> CustodialSellEngine {
        // 1 BTC = 100.00 USD in FakeRates::with_price(10_000)
        let custodial = Arc::new(
            FakeCustodial::default().with_transfer_limits(
                usd_money(5_000),
                usd_money(1_000_000),
                usd_money(1_000_000),
            ),
        );
        let mut engine = CustodialSellEngine::new(
            Arc::new(FakeQuoteProvider::with_price(100)),
            Arc::new(FakeTiers::gold()),
            custodial,
        );
        engine
            .start(
                trading_account(CryptoCurrency::Btc, balance_minor),
                TxTarget::FiatAccount {
                    currency: usd(),
                    label: "USD".into(),
                },
                Arc::new(FakeRates::with_price(10_000)),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn under_min_wins_over_insufficient_funds() {
        // 0.25 BTC balance = 25.00 USD available, min limit 50.00 USD
        let mut engine = started_engine(25_000_000).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");

        // 30.00 USD is both below min and above balance; min wins
        let p = engine
            .do_update_amount(usd_money(3_000), pending.clone())
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);

        // 60.00 USD clears the min but not the balance
        let p = engine
            .do_update_amount(usd_money(6_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::InsufficientFunds);
    }

    #[tokio::test]
    async fn zero_amount_falls_under_the_minimum() {
        let mut engine = started_engine(1_000_000_000).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine.do_validate_amount(pending).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);
    }

    #[tokio::test]
    async fn executes_through_the_order_lifecycle() {
        // 10 BTC = 1000.00 USD available
        let mut engine = started_engine(1_000_000_000).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(usd_money(10_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert!(p.validation_state.can_execute());

        let result = engine.do_execute(&p, "").await.expect("order settles");
        assert_eq!(result, TxResult::UnHashed { amount: usd_money(10_000) });
    }

    #[tokio::test]
    async fn crypto_entry_converts_the_limits() {
        // 10 BTC balance; fiat min 50.00 USD is 0.5 BTC at 100.00 USD/BTC
        let mut engine = started_engine(1_000_000_000).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(10_000_000), pending)
            .await
            .expect("updated");
        assert_eq!(p.min_limit, Some(btc(50_000_000)));
        assert_eq!(p.available_balance, btc(1_000_000_000));
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);

        // Another currency entirely is a driver bug
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let err = engine
            .do_update_amount(Money::from_minor(CryptoCurrency::Eth, 1), pending)
            .await;
        assert!(matches!(err, Err(Error::Precondition(_))));
    }
}
