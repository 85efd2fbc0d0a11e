//! Custodial swap engine.
//!
//! Swaps one custodial crypto balance into another against a live quote.
//! Limits come from the trading rail in the user's fiat and are converted
//! into the source asset once per refresh; the effective minimum also covers
//! the destination-side network fee at the quoted price.

use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::{CryptoCurrency, FiatCurrency};
use coincore_common::{
    ensure_coincore, Account, AccountKind, ConfirmationValue, CurrencyPair, CustodialApi, Error,
    ExchangeRate, ExchangeRates, FeeLevel, KycTiers, Money, NetworkFeeKind, PendingTx, PricedQuote,
    Product, QuoteProvider, TierService, TransactionError, TransferDirection, TxResult, TxTarget,
    ValidationState,
};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::instrument;

use super::quoted::QuoteBinding;
use super::{EngineContext, RefreshTrigger, TransactionEngine};

/// Swaps a custodial trading balance into another asset.
pub struct SwapEngine {
    binding: QuoteBinding,
    custodial: Arc<dyn CustodialApi>,
    user_fiat: FiatCurrency,
    ctx: Option<EngineContext>,
    // Rail minimum converted into the source asset, before network fees
    min_api_limit: Option<Money>,
    max_limit: Option<Money>,
    user_tier: Option<KycTiers>,
}

impl std::fmt::Debug for SwapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapEngine")
            .field("binding", &self.binding)
            .field("user_tier", &self.user_tier)
            .finish_non_exhaustive()
    }
}

impl SwapEngine {
    /// Build a swap engine over the trading rail collaborators.
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        tiers: Arc<dyn TierService>,
        custodial: Arc<dyn CustodialApi>,
        user_fiat: FiatCurrency,
    ) -> Self {
        Self {
            binding: QuoteBinding::new(
                provider,
                tiers,
                Arc::clone(&custodial),
                TransferDirection::Internal,
            ),
            custodial,
            user_fiat,
            ctx: None,
            min_api_limit: None,
            max_limit: None,
            user_tier: None,
        }
    }

    fn ctx(&self) -> Result<&EngineContext, Error> {
        self.ctx.as_ref().ok_or(Error::NotStarted)
    }

    fn asset(&self) -> Result<CryptoCurrency, Error> {
        self.ctx()?.source_asset()
    }

    fn target_asset(&self) -> Result<CryptoCurrency, Error> {
        match &self.ctx()?.target {
            TxTarget::CryptoAccount { asset, .. } | TxTarget::CryptoAddress { asset, .. } => {
                Ok(*asset)
            }
            _ => Err(Error::Precondition("swap target must hold a crypto asset".into())),
        }
    }

    /// Convert the fiat-denominated rail limits into the source asset at the
    /// last observed price.
    async fn refresh_limits(&mut self) -> Result<(), Error> {
        let asset = self.asset()?;
        let (tiers, limits) = self.binding.tier_limits(self.user_fiat, Product::Trade).await?;
        self.user_tier = Some(tiers);

        let price = self.ctx()?.rates.last_price(asset, self.user_fiat).await?;
        let to_asset = ExchangeRate::new(asset, self.user_fiat, price)?.inverse()?;
        self.min_api_limit = Some(to_asset.convert(&limits.min_limit)?);
        let max_fiat = limits.max_order.checked_min(&limits.max_limit)?;
        self.max_limit = Some(to_asset.convert(&max_fiat)?);
        Ok(())
    }

    /// The rail minimum plus enough of the source asset to cover the
    /// destination-side network fee at the quoted price.
    fn min_with_network_fee(&self, quote: &PricedQuote) -> Result<Option<Money>, Error> {
        let Some(min_api) = self.min_api_limit else {
            return Ok(None);
        };
        if quote.price <= Decimal::ZERO {
            return Ok(Some(min_api));
        }
        let asset = self.asset()?;
        let fee_in_source = quote
            .transfer_quote
            .network_fee
            .to_major()
            .checked_div(quote.price)
            .unwrap_or_default()
            .round_dp_with_strategy(asset.decimals(), RoundingStrategy::MidpointAwayFromZero);
        Ok(Some(
            min_api.checked_add(&Money::from_major(asset, fee_in_source)?)?,
        ))
    }

    async fn snapshot(&self, mut pending: PendingTx) -> Result<PendingTx, Error> {
        let ctx = self.ctx()?;
        pending.total_balance = ctx.source.balance().await?;
        pending.available_balance = ctx.source.actionable_balance().await?;
        pending.min_limit = match self.binding.latest_quote() {
            Ok(quote) => self.min_with_network_fee(&quote)?,
            Err(_) => self.min_api_limit,
        };
        pending.max_limit = self.max_limit;
        Ok(pending)
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
impl TransactionEngine for SwapEngine {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        let ctx = self.ctx()?;
        ensure_coincore!(
            ctx.source.kind() == AccountKind::Trading,
            Error::Precondition("swap requires a custodial trading source".into())
        );
        let asset = ctx.source_asset()?;
        let target_asset = self.target_asset()?;
        ensure_coincore!(
            asset != target_asset,
            Error::Precondition("swap source and target assets must differ".into())
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
            destination: self.target_asset()?.into(),
        };
        self.binding.bind(pair, refresh);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let asset = self.asset()?;
        let pending = PendingTx::zeroed(Money::zero(asset), self.user_fiat);

        if let Err(err) = self.binding.start_quotes().await {
            return QuoteBinding::handle_pending_orders_error(err, pending);
        }

        self.refresh_limits().await?;
        self.snapshot(pending).await
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        mut pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            amount.currency().as_crypto() == Some(self.asset()?),
            Error::Precondition("swap amounts are entered in the source asset".into())
        );
        pending.amount = amount;
        let _ = self.binding.update_amount(amount);
        // Built confirmations no longer reflect the draft
        let pending = self.binding.clear_confirmations(pending);
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
        let target_asset = self.target_asset()?;
        let quote = self.binding.latest_quote()?;
        let rate = ExchangeRate::new(asset, target_asset, quote.price)?;
        let gross = rate.convert(&pending.amount)?;
        let receive = gross.saturating_sub(&quote.transfer_quote.network_fee)?;
        let ctx = self.ctx()?;

        pending.confirmations = vec![
            ConfirmationValue::SwapExchangeRate {
                unit: Money::from_major(asset, Decimal::ONE)?,
                price: Money::from_major(target_asset, quote.price)?,
            },
            ConfirmationValue::SwapReceiveAmount { amount: receive },
            ConfirmationValue::From {
                label: ctx.source.label().to_owned(),
            },
            ConfirmationValue::To {
                label: ctx.target.label().to_owned(),
            },
            ConfirmationValue::NetworkFee {
                fee: quote.transfer_quote.network_fee,
                kind: NetworkFeeKind::Deposit,
                asset: target_asset,
            },
        ];
        Ok(pending)
    }

    async fn do_refresh_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        if pending.confirmations.is_empty() {
            return Ok(pending);
        }
        self.do_build_confirmations(pending).await
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
        let result = async {
            let quote = self
                .binding
                .latest_quote()
                .map_err(|_| TransactionError::InvalidQuote)?;
            let direction = self.binding.direction();
            let ctx = self
                .ctx
                .as_ref()
                .ok_or_else(|| TransactionError::InternalError("engine not started".into()))?;

            let destination = if direction.requires_destination_address() {
                match &ctx.target {
                    TxTarget::CryptoAccount {
                        address: Some(address),
                        ..
                    }
                    | TxTarget::CryptoAddress { address, .. } => Some(address.clone()),
                    _ => {
                        return Err(TransactionError::InternalError(
                            "direction requires a destination address".into(),
                        ))
                    }
                }
            } else {
                None
            };
            let refund = if direction.requires_refund_address() {
                Some(
                    ctx.source
                        .receive_address()
                        .await
                        .map_err(|e| TransactionError::InternalError(e.to_string()))?,
                )
            } else {
                None
            };

            let order = self
                .custodial
                .create_custodial_order(
                    direction,
                    quote.transfer_quote.id,
                    pending.amount,
                    destination,
                    refund,
                )
                .await?;
            self.custodial.update_order(order.id, true).await?;
            Ok(TxResult::UnHashed {
                amount: pending.amount,
            })
        }
        .await;

        // The quote is spent once an order was attempted against it
        self.binding.stop();
        result
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

    async fn started_engine(provider: Arc<FakeQuoteProvider>) -> SwapEngine {
        // 1 BTC = 100.00 USD; rail min 50.00 USD, max 100000.00 USD
        let custodial = Arc::new(
            FakeCustodial::default().with_transfer_limits(
                usd_money(5_000),
                usd_money(10_000_000),
                usd_money(10_000_000),
            ),
        );
        let mut engine = SwapEngine::new(
            provider,
            Arc::new(FakeTiers::gold()),
            custodial,
            usd(),
        );
        engine
            .start(
                trading_account(CryptoCurrency::Btc, 1_000_000_000),
                TxTarget::CryptoAccount {
                    asset: CryptoCurrency::Bch,
                    label: "BCH Trading".into(),
                    address: None,
                },
                Arc::new(FakeRates::with_price(10_000)),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn pending_orders_limit_resolves_to_a_zeroed_draft() {
        let mut engine =
            started_engine(Arc::new(FakeQuoteProvider::pending_orders_limited())).await;
        let pending = engine.do_initialise_tx().await.expect("resolved, not raised");
        assert_eq!(
            pending.validation_state,
            ValidationState::PendingOrdersLimitReached
        );
        assert!(pending.amount.is_zero());
        assert!(pending.confirmations.is_empty());
    }

    #[tokio::test]
    async fn limits_are_converted_into_the_source_asset() {
        let mut engine = started_engine(Arc::new(FakeQuoteProvider::with_price(100))).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        // 50.00 USD at 100.00 USD/BTC is 0.5 BTC; the fake quote carries no
        // network fee so the effective minimum is the converted rail minimum
        assert_eq!(pending.min_limit, Some(btc(50_000_000)));

        let p = engine
            .do_update_amount(btc(10_000_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_amount(p).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);
    }

    #[tokio::test]
    async fn zero_amount_falls_under_the_minimum() {
        let mut engine = started_engine(Arc::new(FakeQuoteProvider::with_price(100))).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine.do_validate_amount(pending).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);
    }

    #[tokio::test]
    async fn confirmation_subscription_is_idempotent() {
        let mut engine = started_engine(Arc::new(FakeQuoteProvider::with_price(100))).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let pending = engine
            .start_confirmations_update(pending)
            .await
            .expect("subscribed");
        assert!(engine.binding.is_subscribed());
        let pending = engine
            .start_confirmations_update(pending)
            .await
            .expect("still subscribed");
        assert!(engine.binding.is_subscribed());

        engine.stop(&pending).await;
        assert!(!engine.binding.is_subscribed());
    }

    #[tokio::test]
    async fn executes_an_order_and_retires_the_quote() {
        let provider = Arc::new(FakeQuoteProvider::with_price(100));
        let mut engine = started_engine(Arc::clone(&provider)).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine
            .do_update_amount(btc(100_000_000), pending)
            .await
            .expect("updated");
        let p = engine.do_validate_all(p).await.expect("validated");
        assert!(p.validation_state.can_execute());

        let result = engine.do_execute(&p, "").await.expect("order settles");
        assert_eq!(result.amount(), &btc(100_000_000));
    }
}
