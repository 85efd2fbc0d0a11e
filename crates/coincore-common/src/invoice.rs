//! Invoice payment rail boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// A prepared raw transaction, ready for submission to an invoice rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedTransaction {
    /// Hex-encoded serialized transaction
    pub encoded: String,
    /// Serialized size in bytes
    pub size: usize,
    /// Transaction hash
    pub hash: String,
}

/// The invoice rail API client boundary.
#[async_trait]
pub trait InvoiceApi: Send + Sync {
    /// Ask the rail to verify a payment payload against the invoice.
    async fn verify_payment(
        &self,
        invoice_id: &str,
        payload: &EncodedTransaction,
    ) -> Result<(), TransactionError>;

    /// Submit the payment; returns the settlement hash.
    async fn submit_payment(
        &self,
        invoice_id: &str,
        payload: &EncodedTransaction,
    ) -> Result<String, TransactionError>;
}
