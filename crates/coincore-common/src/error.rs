//! Error taxonomies.
//!
//! Three tiers: [`Error`] for engine and programmer errors, the
//! [`TransactionError`] rail taxonomy surfaced from `do_execute` and
//! `do_initialise_tx`, and [`ApiError`] wrapping recognised rail error codes.
//! Validation failures are never errors; they travel on the draft as
//! `ValidationState`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money;

/// Engine error.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine was driven in a way its contract forbids
    #[error("Precondition violated: {0}")]
    Precondition(String),
    /// Money arithmetic or currency error
    #[error(transparent)]
    Money(#[from] money::Error),
    /// An operation was called before `start`
    #[error("Engine not started")]
    NotStarted,
    /// No priced quote has been published yet
    #[error("No quote available")]
    NoQuoteAvailable,
    /// Rail failure bubbled out of a lifecycle step
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Rail error codes the engines recognise and translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiErrorCode {
    /// The user has too many unsettled orders
    PendingOrdersLimitReached,
    /// Generic server-side failure
    InternalServerError,
    /// Anything the engine does not translate
    Unknown,
}

/// A typed error returned by a custodial rail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Rail rejected the request ({code:?}): {message}")]
pub struct ApiError {
    /// Recognised error code
    pub code: ApiErrorCode,
    /// Rail-supplied message
    pub message: String,
}

impl ApiError {
    /// Build an error for a recognised code.
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Transport and rail failure taxonomy, reported to the caller for
/// user-facing messaging. The engine never retries these itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    /// Too many unsettled orders on the rail
    #[error("Order limit reached")]
    OrderLimitReached,
    /// Order rejected as below the rail minimum
    #[error("Order below minimum")]
    OrderBelowMin,
    /// Order rejected as above the rail maximum
    #[error("Order above maximum")]
    OrderAboveMax,
    /// Custodial balance cannot cover the order
    #[error("Insufficient balance")]
    InsufficientBalance,
    /// Withdrawal exceeds the actionable fiat balance
    #[error("Insufficient funds for withdrawal")]
    WithdrawalInsufficientFunds,
    /// The rail rejected the destination address
    #[error("Invalid address")]
    InvalidAddress,
    /// The referenced quote is invalid or has expired
    #[error("Quote invalid or expired")]
    InvalidQuote,
    /// The rail has disabled this transfer direction
    #[error("Transfer direction disabled")]
    OrderDirectionDisabled,
    /// The operation was accepted but failed to execute
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    /// Rail-internal failure
    #[error("Internal error: {0}")]
    InternalError(String),
    /// Typed rail error carrying its code
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Anything else
    #[error("Unexpected error")]
    Unexpected,
}

impl TransactionError {
    /// Whether this failure carries the pending-orders-limit code.
    pub fn is_pending_orders_limit(&self) -> bool {
        matches!(
            self,
            TransactionError::Api(ApiError {
                code: ApiErrorCode::PendingOrdersLimitReached,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_the_pending_orders_code() {
        let err = TransactionError::Api(ApiError::new(
            ApiErrorCode::PendingOrdersLimitReached,
            "too many pending orders",
        ));
        assert!(err.is_pending_orders_limit());
        assert!(!TransactionError::OrderLimitReached.is_pending_orders_limit());
        assert!(!TransactionError::Api(ApiError::new(ApiErrorCode::Unknown, "x"))
            .is_pending_orders_limit());
    }
}
