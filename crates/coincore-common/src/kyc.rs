//! KYC verification tiers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// Verification tier levels, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KycTier {
    /// Unverified
    Bronze,
    /// Identity verified
    Silver,
    /// Identity and address verified
    Gold,
}

/// The user's current verification standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycTiers {
    /// Highest tier the user is approved for
    pub highest_approved: KycTier,
}

impl KycTiers {
    /// Whether the user is approved at or above the given tier.
    pub fn is_approved_for(&self, tier: KycTier) -> bool {
        self.highest_approved >= tier
    }
}

/// Verification tier lookup boundary.
#[async_trait]
pub trait TierService: Send + Sync {
    /// The user's current tiers.
    async fn tiers(&self) -> Result<KycTiers, TransactionError>;
}
