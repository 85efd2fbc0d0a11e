//! Custodial wallet rail boundary.
//!
//! Engines drive order creation, limits lookup and custodial transfers
//! through [`CustodialApi`], and fetch quotes through [`QuoteProvider`].
//! Every method is a network call returning a typed DTO or a
//! [`TransactionError`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransactionError;
use crate::money::{CryptoCurrency, Currency, FiatCurrency, Money};
use crate::quote::TransferQuote;

/// The rail topology of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// On-chain wallet to on-chain wallet
    OnChain,
    /// Out of a user-keyed wallet into custody
    FromUserKey,
    /// Out of custody into a user-keyed wallet
    ToUserKey,
    /// Entirely within custody
    Internal,
}

impl TransferDirection {
    /// Whether orders in this direction must carry a destination address.
    pub fn requires_destination_address(&self) -> bool {
        matches!(self, TransferDirection::OnChain | TransferDirection::ToUserKey)
    }

    /// Whether orders in this direction must carry a refund address.
    pub fn requires_refund_address(&self) -> bool {
        matches!(self, TransferDirection::OnChain | TransferDirection::FromUserKey)
    }
}

/// A quoted currency pair, source first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being sold
    pub source: Currency,
    /// Currency being bought
    pub destination: Currency,
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.destination)
    }
}

/// Which custodial product a limits lookup applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Trading and swaps
    Trade,
    /// Interest-bearing savings
    Savings,
}

/// Min/max bounds for bank transfers in one fiat currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransferLimits {
    /// Smallest accepted transfer
    pub min: Money,
    /// Largest accepted transfer
    pub max: Money,
}

/// Tiered transfer limits for a custodial product, fiat-denominated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLimits {
    /// Smallest accepted order
    pub min_limit: Money,
    /// Largest single order
    pub max_order: Money,
    /// Periodic ceiling across orders
    pub max_limit: Money,
}

/// Limits of the interest product for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestLimits {
    /// Smallest accepted deposit
    pub min_deposit_amount: Money,
}

/// Withdrawal fee and minimum for one asset, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoWithdrawFeeAndLimit {
    /// Flat withdrawal fee
    pub fee: u64,
    /// Smallest accepted withdrawal
    pub min_limit: u64,
}

/// Settlement state of a custodial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Created, awaiting funds or confirmation
    Pending,
    /// Settled
    Finished,
    /// Cancelled before settlement
    Canceled,
    /// Failed on the rail
    Failed,
}

/// A custodial order created against a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodialOrder {
    /// Order identifier
    pub id: Uuid,
    /// Settlement state
    pub state: OrderState,
    /// Where to deposit funds for on-chain-sourced orders
    pub deposit_address: Option<String>,
    /// Amount debited
    pub input: Money,
    /// Amount credited, once known
    pub output: Option<Money>,
}

/// The custodial wallet API client boundary.
#[async_trait]
pub trait CustodialApi: Send + Sync {
    /// Bank transfer bounds for a fiat currency.
    async fn bank_transfer_limits(
        &self,
        fiat: FiatCurrency,
    ) -> Result<BankTransferLimits, TransactionError>;

    /// Product transfer limits, fiat-denominated.
    async fn transfer_limits(
        &self,
        fiat: FiatCurrency,
        product: Product,
    ) -> Result<TransferLimits, TransactionError>;

    /// Interest product limits for an asset.
    async fn interest_limits(
        &self,
        asset: CryptoCurrency,
    ) -> Result<InterestLimits, TransactionError>;

    /// Withdrawal fee and minimum for an asset.
    async fn withdraw_fee_and_min_limit(
        &self,
        asset: CryptoCurrency,
    ) -> Result<CryptoWithdrawFeeAndLimit, TransactionError>;

    /// Cancel every unsettled order for this user.
    async fn cancel_all_pending_orders(&self) -> Result<(), TransactionError>;

    /// Create an order against a live quote.
    async fn create_custodial_order(
        &self,
        direction: TransferDirection,
        quote_id: Uuid,
        volume: Money,
        destination_address: Option<String>,
        refund_address: Option<String>,
    ) -> Result<CustodialOrder, TransactionError>;

    /// Confirm or fail a previously created order.
    async fn update_order(&self, order_id: Uuid, success: bool) -> Result<(), TransactionError>;

    /// Initiate a fiat withdrawal to a linked bank.
    async fn create_withdraw_order(
        &self,
        amount: Money,
        bank_id: &str,
    ) -> Result<(), TransactionError>;

    /// Initiate a bank-to-custody transfer; returns the rail payment id.
    async fn start_bank_transfer(
        &self,
        account_id: &str,
        amount: Money,
    ) -> Result<String, TransactionError>;

    /// Move custodial funds to an external wallet address.
    async fn transfer_funds_to_wallet(
        &self,
        amount: Money,
        address: &str,
    ) -> Result<(), TransactionError>;
}

/// Quote fetch boundary of the trading rail.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch a fresh quote for a direction and pair.
    async fn fetch_quote(
        &self,
        direction: TransferDirection,
        pair: &CurrencyPair,
    ) -> Result<TransferQuote, TransactionError>;
}
