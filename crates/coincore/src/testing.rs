//! In-memory doubles for the collaborator boundaries.
//!
//! Used by this crate's own tests and available to downstream crates that
//! drive engines against fakes instead of live rails.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coincore_common::money::{CryptoCurrency, Currency, FiatCurrency};
use coincore_common::util::unix_time;
use coincore_common::{
    Account, AccountKind, ApiError, ApiErrorCode, BankTransferLimits, CryptoWithdrawFeeAndLimit,
    CurrencyPair, CustodialApi, CustodialOrder, EncodedTransaction, Error, ExchangeRate,
    ExchangeRates, FeeLevelRates, InterestLimits, InvoiceApi, KycTier, KycTiers, Money,
    OnChainClient, OrderState, PendingTx, PreparedTransaction, PriceTier, Product, QuoteProvider,
    TierService, TransactionError, TransferDirection, TransferLimits, TransferQuote,
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// US dollars.
pub fn usd() -> FiatCurrency {
    FiatCurrency::new("USD").expect("valid code")
}

/// A USD amount in cents.
pub fn usd_money(minor: u64) -> Money {
    Money::from_minor(usd(), minor)
}

/// A BTC amount in satoshis.
pub fn btc(minor: u64) -> Money {
    Money::from_minor(CryptoCurrency::Btc, minor)
}

/// A fixed-balance account double.
#[derive(Debug)]
pub struct FakeAccount {
    label: String,
    currency: Currency,
    kind: AccountKind,
    total: u64,
    actionable: u64,
    address: String,
}

#[async_trait]
impl Account for FakeAccount {
    fn label(&self) -> &str {
        &self.label
    }

    fn currency(&self) -> Currency {
        self.currency
    }

    fn kind(&self) -> AccountKind {
        self.kind
    }

    async fn balance(&self) -> Result<Money, Error> {
        Ok(Money::from_minor(self.currency, self.total))
    }

    async fn actionable_balance(&self) -> Result<Money, Error> {
        Ok(Money::from_minor(self.currency, self.actionable))
    }

    async fn receive_address(&self) -> Result<String, Error> {
        Ok(self.address.clone())
    }
}

/// A custodial USD balance with the given total and actionable cents.
pub fn fiat_account(label: &str, total: u64, actionable: u64) -> Arc<dyn Account> {
    Arc::new(FakeAccount {
        label: label.to_owned(),
        currency: usd().into(),
        kind: AccountKind::FiatCustodial,
        total,
        actionable,
        address: "fiat-account-id".to_owned(),
    })
}

/// A linked bank account.
pub fn linked_bank(label: &str) -> Arc<dyn Account> {
    Arc::new(FakeAccount {
        label: label.to_owned(),
        currency: usd().into(),
        kind: AccountKind::LinkedBank,
        total: 0,
        actionable: 0,
        address: "bank-account-id".to_owned(),
    })
}

/// A custodial trading account holding `minor` units of `asset`.
pub fn trading_account(asset: CryptoCurrency, minor: u64) -> Arc<dyn Account> {
    Arc::new(FakeAccount {
        label: format!("{} Trading", asset.ticker()),
        currency: asset.into(),
        kind: AccountKind::Trading,
        total: minor,
        actionable: minor,
        address: "trading-deposit-address".to_owned(),
    })
}

/// A user-keyed on-chain wallet holding `minor` units of `asset`.
pub fn onchain_wallet(asset: CryptoCurrency, minor: u64) -> Arc<dyn Account> {
    Arc::new(FakeAccount {
        label: format!("My {} Wallet", asset.ticker()),
        currency: asset.into(),
        kind: AccountKind::OnChainWallet,
        total: minor,
        actionable: minor,
        address: "bc1qsource".to_owned(),
    })
}

/// A rate provider serving one fixed crypto/fiat price.
#[derive(Debug)]
pub struct FakeRates {
    price: Decimal,
}

impl FakeRates {
    /// One major unit of any asset is worth `fiat_minor` minor fiat units.
    pub fn with_price(fiat_minor: u64) -> Self {
        Self {
            price: Decimal::from_i128_with_scale(fiat_minor as i128, 2),
        }
    }
}

impl Default for FakeRates {
    fn default() -> Self {
        Self::with_price(10_000)
    }
}

#[async_trait]
impl ExchangeRates for FakeRates {
    async fn last_price(
        &self,
        _asset: CryptoCurrency,
        _fiat: FiatCurrency,
    ) -> Result<Decimal, Error> {
        Ok(self.price)
    }

    async fn rate(&self, from: Currency, to: Currency) -> Result<ExchangeRate, Error> {
        match (from, to) {
            (Currency::Crypto(_), Currency::Fiat(_)) => {
                Ok(ExchangeRate::new(from, to, self.price)?)
            }
            (Currency::Fiat(_), Currency::Crypto(_)) => {
                Ok(ExchangeRate::new(to, from, self.price)?.inverse()?)
            }
            _ => Ok(ExchangeRate::new(from, to, Decimal::ONE)?),
        }
    }
}

/// A quote provider serving synthetic tiered quotes and counting fetches.
#[derive(Debug)]
pub struct FakeQuoteProvider {
    tiers: Vec<PriceTier>,
    validity_secs: u64,
    fail_pending_orders: bool,
    fetches: AtomicUsize,
}

impl FakeQuoteProvider {
    /// Quotes a flat price regardless of volume.
    pub fn with_price(price: u64) -> Self {
        Self {
            tiers: vec![PriceTier {
                volume: Decimal::ONE,
                price: Decimal::from(price),
            }],
            validity_secs: 60,
            fail_pending_orders: false,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Quotes a volume-dependent price so amount updates move the published
    /// price.
    pub fn tiered() -> Self {
        Self {
            tiers: vec![
                PriceTier {
                    volume: Decimal::ONE,
                    price: Decimal::new(100, 0),
                },
                PriceTier {
                    volume: Decimal::new(10, 0),
                    price: Decimal::new(90, 0),
                },
                PriceTier {
                    volume: Decimal::new(100, 0),
                    price: Decimal::new(80, 0),
                },
            ],
            validity_secs: 60,
            fail_pending_orders: false,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Flat price with a custom validity window, for refresh-cadence tests.
    pub fn with_validity(secs: u64) -> Self {
        Self {
            validity_secs: secs,
            ..Self::with_price(100)
        }
    }

    /// Every fetch fails with the rail's pending-orders-limit code.
    pub fn pending_orders_limited() -> Self {
        Self {
            fail_pending_orders: true,
            ..Self::with_price(100)
        }
    }

    /// How many quotes have been fetched.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for FakeQuoteProvider {
    async fn fetch_quote(
        &self,
        _direction: TransferDirection,
        pair: &CurrencyPair,
    ) -> Result<TransferQuote, TransactionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_pending_orders {
            return Err(TransactionError::Api(ApiError::new(
                ApiErrorCode::PendingOrdersLimitReached,
                "too many pending orders",
            )));
        }
        let now = unix_time();
        Ok(TransferQuote {
            id: Uuid::new_v4(),
            price_tiers: self.tiers.clone(),
            created_at: now,
            expires_at: now + self.validity_secs,
            network_fee: Money::zero(pair.destination),
            static_fee: Money::zero(pair.destination),
            sample_deposit_address: Some("fake-deposit-address".to_owned()),
        })
    }
}

/// A custodial rail double with configurable limits; orders always settle.
#[derive(Debug, Default)]
pub struct FakeCustodial {
    bank_limits: Option<BankTransferLimits>,
    transfer_limits: Option<TransferLimits>,
    interest_min: Option<Money>,
    withdraw_fee_and_min: Option<CryptoWithdrawFeeAndLimit>,
    orders_created: AtomicUsize,
    orders_cancelled: AtomicUsize,
}

impl FakeCustodial {
    /// Configure bank transfer bounds.
    pub fn with_bank_limits(mut self, min: Money, max: Money) -> Self {
        self.bank_limits = Some(BankTransferLimits { min, max });
        self
    }

    /// Configure product transfer limits.
    pub fn with_transfer_limits(mut self, min: Money, max_order: Money, max_limit: Money) -> Self {
        self.transfer_limits = Some(TransferLimits {
            min_limit: min,
            max_order,
            max_limit,
        });
        self
    }

    /// Configure the interest product minimum.
    pub fn with_interest_min(mut self, min: Money) -> Self {
        self.interest_min = Some(min);
        self
    }

    /// Configure the crypto withdrawal fee and minimum, in minor units.
    pub fn with_withdraw_fee_and_min(mut self, fee: u64, min_limit: u64) -> Self {
        self.withdraw_fee_and_min = Some(CryptoWithdrawFeeAndLimit { fee, min_limit });
        self
    }

    /// How many orders have been created.
    pub fn orders_created(&self) -> usize {
        self.orders_created.load(Ordering::SeqCst)
    }

    /// How many cancel-all calls have been made.
    pub fn orders_cancelled(&self) -> usize {
        self.orders_cancelled.load(Ordering::SeqCst)
    }

    fn missing(what: &str) -> TransactionError {
        TransactionError::InternalError(format!("fake has no {what} configured"))
    }
}

#[async_trait]
impl CustodialApi for FakeCustodial {
    async fn bank_transfer_limits(
        &self,
        _fiat: FiatCurrency,
    ) -> Result<BankTransferLimits, TransactionError> {
        self.bank_limits.clone().ok_or_else(|| Self::missing("bank limits"))
    }

    async fn transfer_limits(
        &self,
        _fiat: FiatCurrency,
        _product: Product,
    ) -> Result<TransferLimits, TransactionError> {
        self.transfer_limits
            .clone()
            .ok_or_else(|| Self::missing("transfer limits"))
    }

    async fn interest_limits(
        &self,
        _asset: CryptoCurrency,
    ) -> Result<InterestLimits, TransactionError> {
        self.interest_min
            .map(|min_deposit_amount| InterestLimits { min_deposit_amount })
            .ok_or_else(|| Self::missing("interest limits"))
    }

    async fn withdraw_fee_and_min_limit(
        &self,
        _asset: CryptoCurrency,
    ) -> Result<CryptoWithdrawFeeAndLimit, TransactionError> {
        self.withdraw_fee_and_min
            .ok_or_else(|| Self::missing("withdrawal fee"))
    }

    async fn cancel_all_pending_orders(&self) -> Result<(), TransactionError> {
        self.orders_cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_custodial_order(
        &self,
        _direction: TransferDirection,
        _quote_id: Uuid,
        volume: Money,
        _destination_address: Option<String>,
        _refund_address: Option<String>,
    ) -> Result<CustodialOrder, TransactionError> {
        self.orders_created.fetch_add(1, Ordering::SeqCst);
        Ok(CustodialOrder {
            id: Uuid::new_v4(),
            state: OrderState::Pending,
            deposit_address: None,
            input: volume,
            output: None,
        })
    }

    async fn update_order(&self, _order_id: Uuid, _success: bool) -> Result<(), TransactionError> {
        Ok(())
    }

    async fn create_withdraw_order(
        &self,
        _amount: Money,
        _bank_id: &str,
    ) -> Result<(), TransactionError> {
        Ok(())
    }

    async fn start_bank_transfer(
        &self,
        _account_id: &str,
        _amount: Money,
    ) -> Result<String, TransactionError> {
        Ok("payment-1".to_owned())
    }

    async fn transfer_funds_to_wallet(
        &self,
        _amount: Money,
        _address: &str,
    ) -> Result<(), TransactionError> {
        Ok(())
    }
}

/// A tier service double answering with a fixed standing.
#[derive(Debug)]
pub struct FakeTiers {
    highest: KycTier,
}

impl FakeTiers {
    /// A fully verified user.
    pub fn gold() -> Self {
        Self {
            highest: KycTier::Gold,
        }
    }

    /// An identity-verified user.
    pub fn silver() -> Self {
        Self {
            highest: KycTier::Silver,
        }
    }
}

#[async_trait]
impl TierService for FakeTiers {
    async fn tiers(&self) -> Result<KycTiers, TransactionError> {
        Ok(KycTiers {
            highest_approved: self.highest,
        })
    }
}

/// An on-chain wallet client double with fixed fee rates.
#[derive(Debug)]
pub struct FakeOnChain {
    rates: FeeLevelRates,
    addresses_valid: bool,
}

impl FakeOnChain {
    /// Fixed regular/priority fee rates, in minor units.
    pub fn with_rates(regular: u64, priority: u64) -> Self {
        Self {
            rates: FeeLevelRates { regular, priority },
            addresses_valid: true,
        }
    }

    /// Treat every address as malformed.
    pub fn rejecting_addresses(mut self) -> Self {
        self.addresses_valid = false;
        self
    }
}

#[async_trait]
impl OnChainClient for FakeOnChain {
    async fn fee_rates(&self, _asset: CryptoCurrency) -> Result<FeeLevelRates, Error> {
        Ok(self.rates)
    }

    async fn prepare(
        &self,
        pending: &PendingTx,
        _to: &str,
    ) -> Result<PreparedTransaction, TransactionError> {
        Ok(PreparedTransaction {
            payload: EncodedTransaction {
                encoded: "deadbeef".to_owned(),
                size: 250,
                hash: "prepared-hash".to_owned(),
            },
            amount: pending.amount,
            fee: pending.fee_amount,
        })
    }

    async fn sign_and_broadcast(
        &self,
        prepared: &PreparedTransaction,
        _second_password: &str,
    ) -> Result<String, TransactionError> {
        Ok(prepared.payload.hash.clone())
    }

    async fn is_valid_address(
        &self,
        _asset: CryptoCurrency,
        _address: &str,
    ) -> Result<bool, Error> {
        Ok(self.addresses_valid)
    }
}

/// An invoice rail double recording the verify/submit handshake.
#[derive(Debug, Default)]
pub struct FakeInvoiceApi {
    verified: AtomicBool,
    submitted: AtomicBool,
}

impl FakeInvoiceApi {
    /// Whether `verify_payment` has been called.
    pub fn verified(&self) -> bool {
        self.verified.load(Ordering::SeqCst)
    }

    /// Whether `submit_payment` has been called.
    pub fn submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvoiceApi for FakeInvoiceApi {
    async fn verify_payment(
        &self,
        _invoice_id: &str,
        _payload: &EncodedTransaction,
    ) -> Result<(), TransactionError> {
        self.verified.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_payment(
        &self,
        _invoice_id: &str,
        _payload: &EncodedTransaction,
    ) -> Result<String, TransactionError> {
        self.submitted.store(true, Ordering::SeqCst);
        Ok("settled-hash".to_owned())
    }
}
