//! Validation states, fee levels and execution results.

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Outcome vocabulary of a validation pass, carried on the `PendingTx`.
///
/// Everything other than `CanExecute` and `Uninitialised` is a user-recoverable
/// failure; validation never raises these as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationState {
    /// The draft passed a full validation and may be executed
    CanExecute,
    /// No validation has run yet
    Uninitialised,
    /// An earlier transaction is still settling
    HasTxInFlight,
    /// Amount is zero or malformed
    InvalidAmount,
    /// Amount exceeds the spendable balance
    InsufficientFunds,
    /// Target address failed validation
    InvalidAddress,
    /// A required confirmation option is missing or unaccepted
    OptionInvalid,
    /// Amount is below the applicable minimum
    UnderMinLimit,
    /// The rail refused a new order because too many are pending
    PendingOrdersLimitReached,
    /// Amount is above the applicable maximum
    OverMaxLimit,
    /// The invoice being paid has expired
    InvoiceExpired,
    /// Catch-all for unrecognised failures
    UnknownError,
}

impl ValidationState {
    /// Whether the draft may be executed.
    pub fn can_execute(&self) -> bool {
        matches!(self, ValidationState::CanExecute)
    }
}

// A money error inside a validation check means the engine compared across
// currencies it should have converted first; surfaced, not thrown.
impl From<crate::money::Error> for ValidationState {
    fn from(err: crate::money::Error) -> Self {
        tracing::warn!("Money error during validation: {}", err);
        ValidationState::UnknownError
    }
}

/// A named tier of network or service fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeeLevel {
    /// No fee applies
    None,
    /// Standard confirmation target
    Regular,
    /// Next-block confirmation target
    Priority,
    /// Caller-supplied fee
    Custom,
}

/// Per-level fee rates, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLevelRates {
    /// Regular-level fee
    pub regular: u64,
    /// Priority-level fee
    pub priority: u64,
}

/// Outcome of `do_execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum TxResult {
    /// On-chain result carrying the broadcast transaction hash
    Hashed {
        /// Transaction hash or rail payment id
        tx_id: String,
        /// Executed amount
        amount: Money,
    },
    /// Custodial or fiat result; the rail batches and returns no hash
    UnHashed {
        /// Executed amount
        amount: Money,
    },
}

impl TxResult {
    /// The executed amount.
    pub fn amount(&self) -> &Money {
        match self {
            TxResult::Hashed { amount, .. } | TxResult::UnHashed { amount } => amount,
        }
    }
}
