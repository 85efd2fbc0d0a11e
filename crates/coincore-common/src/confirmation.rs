//! Display-ready confirmation line items.
//!
//! Confirmations summarise a draft before execution. The list on a
//! `PendingTx` is rebuilt wholesale whenever upstream state changes
//! materially; engines key individual entries by [`ConfirmationKind`].

use serde::{Deserialize, Serialize};

use crate::money::{CryptoCurrency, Money};
use crate::state::ValidationState;

/// The kind of a confirmation entry, used as the replacement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationKind {
    /// Source account label
    From,
    /// Target label
    To,
    /// Latest quoted price
    ExchangePrice,
    /// Unit exchange rate of a swap
    SwapExchangeRate,
    /// Expected receive amount of a swap
    SwapReceiveAmount,
    /// Amount plus fee feed line
    FeedTotal,
    /// Total debited
    Total,
    /// Network fee on one side of the move
    NetworkFee,
    /// Service fee on a fiat rail
    FiatFee,
    /// Estimated completion notice
    EstimatedCompletion,
    /// Attached memo
    Memo,
    /// Terms-of-service acceptance flag
    TermsOfService,
    /// Transfer-agreement acceptance flag
    TransferAgreement,
    /// Seconds left on a fixed-amount invoice
    InvoiceCountdown,
    /// Validation failure notice
    ErrorNotice,
}

/// Which side of the move a network fee applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFeeKind {
    /// Fee paid when funds enter the rail
    Deposit,
    /// Fee paid when funds leave the rail
    Withdrawal,
}

/// A single structured confirmation value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfirmationValue {
    /// Source account label
    From {
        /// Account label
        label: String,
    },
    /// Target label
    To {
        /// Target label
        label: String,
    },
    /// Latest quoted price for one unit of the source asset
    ExchangePrice {
        /// Price per unit
        money: Money,
        /// Asset being priced
        asset: CryptoCurrency,
    },
    /// Unit exchange rate of a swap
    SwapExchangeRate {
        /// One major unit of the source asset
        unit: Money,
        /// Its value in the destination asset
        price: Money,
    },
    /// Expected receive amount of a swap
    SwapReceiveAmount {
        /// Amount credited on the destination side
        amount: Money,
    },
    /// Amount plus fee feed line
    FeedTotal {
        /// Entered amount
        amount: Money,
        /// Applicable fee
        fee: Money,
    },
    /// Total debited
    Total {
        /// Amount including fees
        total: Money,
    },
    /// Network fee on one side of the move
    NetworkFee {
        /// Fee amount
        fee: Money,
        /// Which side it applies to
        kind: NetworkFeeKind,
        /// Asset the fee is paid in
        asset: CryptoCurrency,
    },
    /// Service fee on a fiat rail
    FiatFee {
        /// Fee amount
        fee: Money,
    },
    /// Estimated completion notice
    EstimatedCompletion,
    /// Attached memo
    Memo {
        /// Memo text, if entered
        text: Option<String>,
        /// Whether the target requires a memo
        required: bool,
        /// Whether the user may still edit it
        editable: bool,
    },
    /// Terms-of-service acceptance flag
    TermsOfService {
        /// Whether the user has accepted
        accepted: bool,
    },
    /// Transfer-agreement acceptance flag
    TransferAgreement {
        /// Whether the user has accepted
        accepted: bool,
        /// The amount the agreement covers
        amount: Money,
    },
    /// Seconds left on a fixed-amount invoice
    InvoiceCountdown {
        /// Remaining validity in seconds
        remaining_secs: i64,
    },
    /// Validation failure notice
    ErrorNotice {
        /// The failing state
        state: ValidationState,
        /// Limit to display alongside, when relevant
        money: Option<Money>,
    },
}

impl ConfirmationValue {
    /// The kind this value is keyed under.
    pub fn kind(&self) -> ConfirmationKind {
        match self {
            ConfirmationValue::From { .. } => ConfirmationKind::From,
            ConfirmationValue::To { .. } => ConfirmationKind::To,
            ConfirmationValue::ExchangePrice { .. } => ConfirmationKind::ExchangePrice,
            ConfirmationValue::SwapExchangeRate { .. } => ConfirmationKind::SwapExchangeRate,
            ConfirmationValue::SwapReceiveAmount { .. } => ConfirmationKind::SwapReceiveAmount,
            ConfirmationValue::FeedTotal { .. } => ConfirmationKind::FeedTotal,
            ConfirmationValue::Total { .. } => ConfirmationKind::Total,
            ConfirmationValue::NetworkFee { .. } => ConfirmationKind::NetworkFee,
            ConfirmationValue::FiatFee { .. } => ConfirmationKind::FiatFee,
            ConfirmationValue::EstimatedCompletion => ConfirmationKind::EstimatedCompletion,
            ConfirmationValue::Memo { .. } => ConfirmationKind::Memo,
            ConfirmationValue::TermsOfService { .. } => ConfirmationKind::TermsOfService,
            ConfirmationValue::TransferAgreement { .. } => ConfirmationKind::TransferAgreement,
            ConfirmationValue::InvoiceCountdown { .. } => ConfirmationKind::InvoiceCountdown,
            ConfirmationValue::ErrorNotice { .. } => ConfirmationKind::ErrorNotice,
        }
    }
}
