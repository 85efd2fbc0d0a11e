//! Coincore transaction engines.
//!
//! The polymorphic construction/validation pipeline that turns "move value
//! from account A to target B" into a validated, fee-priced, confirmable and
//! executable transaction, uniformly across on-chain wallets, custodial
//! trading accounts and fiat bank rails.
//!
//! An engine is driven through the [`engine::TransactionEngine`] lifecycle;
//! [`processor::TransactionProcessor`] serializes that lifecycle for a
//! caller. Quote-backed engines hold a [`quotes::TransferQuotesEngine`] that
//! keeps a live, periodically refreshed priced quote.

pub mod engine;
pub mod processor;
pub mod quotes;
pub mod testing;

pub use coincore_common as common;
pub use coincore_common::{
    Error, FeeLevel, Money, PendingTx, TransactionError, TxResult, TxTarget, ValidationState,
};
pub use engine::{InvoicePayer, RefreshTrigger, TransactionEngine};
pub use processor::TransactionProcessor;
pub use quotes::TransferQuotesEngine;
