//! Coincore shared types and collaborator contracts.
//!
//! This crate is the base foundation for the coincore transaction engines.
//! It holds the currency-tagged value types, the `PendingTx` draft aggregate,
//! the validation and error vocabularies, and the async traits through which
//! the engines talk to accounts, custodial rails, quote providers and
//! exchange-rate sources. No engine logic lives here.

pub mod account;
pub mod confirmation;
pub mod custodial;
pub mod error;
pub mod exchange;
pub mod invoice;
pub mod kyc;
pub mod money;
pub mod onchain;
pub mod pending;
pub mod quote;
pub mod rates;
pub mod state;
pub mod util;

pub use account::{Account, AccountKind, InvoiceTarget, TxCompletionListener, TxTarget};
pub use confirmation::{ConfirmationKind, ConfirmationValue, NetworkFeeKind};
pub use custodial::{
    BankTransferLimits, CryptoWithdrawFeeAndLimit, CurrencyPair, CustodialApi, CustodialOrder,
    InterestLimits, OrderState, Product, QuoteProvider, TransferDirection, TransferLimits,
};
pub use error::{ApiError, ApiErrorCode, Error, TransactionError};
pub use exchange::ExchangeRate;
pub use invoice::{EncodedTransaction, InvoiceApi};
pub use kyc::{KycTier, KycTiers, TierService};
pub use money::{CryptoCurrency, Currency, FiatCurrency, Money};
pub use onchain::{FeePreference, OnChainClient, PreparedTransaction};
pub use pending::{FeeSelection, PendingTx};
pub use quote::{interpolate_price, PriceTier, PricedQuote, TransferQuote};
pub use rates::ExchangeRates;
pub use state::{FeeLevel, FeeLevelRates, TxResult, ValidationState};

/// Return the given error when the condition does not hold.
#[macro_export]
macro_rules! ensure_coincore {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
