//! Account and target contracts.
//!
//! Engines see balances and addresses only through [`Account`]; the concrete
//! wallet and custodial implementations live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, TransactionError};
use crate::money::{CryptoCurrency, Currency, FiatCurrency, Money};
use crate::state::TxResult;

/// What kind of rail an account sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    /// Non-custodial on-chain wallet
    OnChainWallet,
    /// Custodial trading account
    Trading,
    /// Custodial interest account
    Interest,
    /// Custodial fiat balance
    FiatCustodial,
    /// Linked external bank account
    LinkedBank,
}

/// A balance and address provider for one account.
#[async_trait]
pub trait Account: Send + Sync {
    /// Display label.
    fn label(&self) -> &str;

    /// The currency this account holds.
    fn currency(&self) -> Currency;

    /// The rail this account sits on.
    fn kind(&self) -> AccountKind;

    /// Total balance, including funds that are not yet spendable.
    async fn balance(&self) -> Result<Money, Error>;

    /// Spendable balance.
    async fn actionable_balance(&self) -> Result<Money, Error>;

    /// Receive address, or the rail-side account reference for custodial and
    /// bank accounts.
    async fn receive_address(&self) -> Result<String, Error>;
}

impl dyn Account {
    /// The crypto asset this account holds; precondition failure for fiat
    /// sources.
    pub fn crypto_currency(&self) -> Result<CryptoCurrency, Error> {
        self.currency()
            .as_crypto()
            .ok_or_else(|| Error::Precondition("source account does not hold a crypto asset".into()))
    }
}

/// Completion hook a target may register so downstream bookkeeping can run
/// after `do_execute`.
#[async_trait]
pub trait TxCompletionListener: Send + Sync {
    /// Called once with the execution result.
    async fn on_tx_completed(&self, target: &TxTarget, result: &TxResult)
        -> Result<(), TransactionError>;
}

/// A fixed-amount payment invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTarget {
    /// Rail-side invoice identifier
    pub invoice_id: String,
    /// Asset the invoice is payable in
    pub asset: CryptoCurrency,
    /// Payment address from the invoice
    pub address: String,
    /// Non-negotiable invoice amount
    pub amount: Money,
    /// Expiry, unix seconds
    pub expires_at: u64,
}

/// The destination descriptor of a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxTarget {
    /// A raw on-chain address
    CryptoAddress {
        /// Asset of the address
        asset: CryptoCurrency,
        /// The address itself
        address: String,
        /// Display label
        label: String,
    },
    /// A custodial crypto account
    CryptoAccount {
        /// Asset the account holds
        asset: CryptoCurrency,
        /// Display label
        label: String,
        /// Receive address, for directions that need one
        address: Option<String>,
    },
    /// A custodial fiat balance
    FiatAccount {
        /// Account currency
        currency: FiatCurrency,
        /// Display label
        label: String,
    },
    /// A linked external bank account
    BankAccount {
        /// Account currency
        currency: FiatCurrency,
        /// Display label
        label: String,
        /// Rail-side bank reference
        bank_id: String,
    },
    /// A fixed-amount invoice
    Invoice(InvoiceTarget),
}

impl TxTarget {
    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            TxTarget::CryptoAddress { label, .. }
            | TxTarget::CryptoAccount { label, .. }
            | TxTarget::FiatAccount { label, .. }
            | TxTarget::BankAccount { label, .. } => label,
            TxTarget::Invoice(invoice) => &invoice.invoice_id,
        }
    }
}
