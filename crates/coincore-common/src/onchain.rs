//! On-chain wallet boundary.
//!
//! Key derivation, signing and broadcast internals are out of scope; the
//! engines only see this narrow client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, TransactionError};
use crate::invoice::EncodedTransaction;
use crate::money::{CryptoCurrency, Money};
use crate::pending::PendingTx;
use crate::state::{FeeLevel, FeeLevelRates};

/// A transaction prepared against a draft, not yet broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    /// Serialized payload
    pub payload: EncodedTransaction,
    /// Amount the transaction moves
    pub amount: Money,
    /// Network fee the transaction pays
    pub fee: Money,
}

/// On-chain wallet client boundary.
#[async_trait]
pub trait OnChainClient: Send + Sync {
    /// Current per-level fee rates for an asset, in minor units.
    async fn fee_rates(&self, asset: CryptoCurrency) -> Result<FeeLevelRates, Error>;

    /// Build an unsigned-to-the-caller, fully prepared transaction for the
    /// draft.
    async fn prepare(
        &self,
        pending: &PendingTx,
        to: &str,
    ) -> Result<PreparedTransaction, TransactionError>;

    /// Sign and broadcast a prepared transaction; returns the hash.
    async fn sign_and_broadcast(
        &self,
        prepared: &PreparedTransaction,
        second_password: &str,
    ) -> Result<String, TransactionError>;

    /// Whether an address is well formed for the asset.
    async fn is_valid_address(&self, asset: CryptoCurrency, address: &str) -> Result<bool, Error>;
}

/// Persisted fee-level preference per asset.
pub trait FeePreference: Send + Sync {
    /// The saved level for an asset, if any.
    fn saved_fee_level(&self, asset: CryptoCurrency) -> Option<FeeLevel>;

    /// Persist the chosen level for an asset.
    fn save_fee_level(&self, asset: CryptoCurrency, level: FeeLevel);
}
