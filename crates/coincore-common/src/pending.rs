//! The in-progress transaction draft.
//!
//! `PendingTx` is mutated by replacement: every engine step consumes a draft
//! and returns an updated copy. It is plain data; resource handles such as a
//! live quote subscription are owned by the engine instance, never stored
//! here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::confirmation::{ConfirmationKind, ConfirmationValue};
use crate::money::{FiatCurrency, Money};
use crate::state::{FeeLevel, FeeLevelRates, ValidationState};

/// The fee level selection of a draft.
///
/// Invariant: `selected_level` is a member of `available_levels` at all times
/// after initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSelection {
    /// Currently selected level
    pub selected_level: FeeLevel,
    /// Caller-supplied fee in minor units; `-1` means unset
    pub custom_amount: i64,
    /// Levels this engine supports
    pub available_levels: BTreeSet<FeeLevel>,
    /// Current per-level rates, when the rail exposes them
    pub rates: Option<FeeLevelRates>,
}

impl Default for FeeSelection {
    fn default() -> Self {
        Self {
            selected_level: FeeLevel::None,
            custom_amount: -1,
            available_levels: BTreeSet::from([FeeLevel::None]),
            rates: None,
        }
    }
}

impl FeeSelection {
    /// Whether the given level may be selected.
    pub fn is_available(&self, level: FeeLevel) -> bool {
        self.available_levels.contains(&level)
    }
}

/// The mutable-by-replacement transaction draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTx {
    /// User-entered amount
    pub amount: Money,
    /// Total balance snapshot of the source
    pub total_balance: Money,
    /// Spendable balance snapshot; never exceeds `total_balance`
    pub available_balance: Money,
    /// Fee that a full-available spend would incur
    pub fee_for_full_available: Money,
    /// Fee for the current amount and fee level
    pub fee_amount: Money,
    /// Fee level selection
    pub fee_selection: FeeSelection,
    /// The user's display fiat
    pub selected_fiat: FiatCurrency,
    /// Display-ready confirmation list; empty until built
    pub confirmations: Vec<ConfirmationValue>,
    /// Lower amount bound, once fetched
    pub min_limit: Option<Money>,
    /// Upper amount bound, once fetched
    pub max_limit: Option<Money>,
    /// Outcome of the latest validation pass
    pub validation_state: ValidationState,
}

impl PendingTx {
    /// A zeroed draft in the given currency, ready for initialisation.
    pub fn zeroed(zero: Money, selected_fiat: FiatCurrency) -> Self {
        Self {
            amount: zero,
            total_balance: zero,
            available_balance: zero,
            fee_for_full_available: zero,
            fee_amount: zero,
            fee_selection: FeeSelection::default(),
            selected_fiat,
            confirmations: Vec::new(),
            min_limit: None,
            max_limit: None,
            validation_state: ValidationState::Uninitialised,
        }
    }

    /// Whether a confirmation of the given kind is present.
    pub fn has_confirmation(&self, kind: ConfirmationKind) -> bool {
        self.confirmations.iter().any(|c| c.kind() == kind)
    }

    /// The confirmation of the given kind, if present.
    pub fn confirmation(&self, kind: ConfirmationKind) -> Option<&ConfirmationValue> {
        self.confirmations.iter().find(|c| c.kind() == kind)
    }

    /// Replace the confirmation of the same kind, or append.
    pub fn add_or_replace_confirmation(mut self, value: ConfirmationValue) -> Self {
        match self.confirmations.iter_mut().find(|c| c.kind() == value.kind()) {
            Some(slot) => *slot = value,
            None => self.confirmations.push(value),
        }
        self
    }

    /// Replace the confirmation of the same kind, or prepend.
    pub fn add_or_prepend_confirmation(mut self, value: ConfirmationValue) -> Self {
        match self.confirmations.iter_mut().find(|c| c.kind() == value.kind()) {
            Some(slot) => *slot = value,
            None => self.confirmations.insert(0, value),
        }
        self
    }

    /// Drop the confirmation of the given kind, if present.
    pub fn remove_confirmation(mut self, kind: ConfirmationKind) -> Self {
        self.confirmations.retain(|c| c.kind() != kind);
        self
    }

    /// Set the validation state and keep the error-notice confirmation in
    /// step: failures insert a notice once confirmations are built, success
    /// removes it.
    pub fn with_validation_state(mut self, state: ValidationState) -> Self {
        self.validation_state = state;
        if self.confirmations.is_empty() {
            return self;
        }
        match state {
            ValidationState::CanExecute | ValidationState::Uninitialised => {
                self.remove_confirmation(ConfirmationKind::ErrorNotice)
            }
            other => {
                let money = if other == ValidationState::UnderMinLimit {
                    self.min_limit
                } else {
                    None
                };
                self.add_or_replace_confirmation(ConfirmationValue::ErrorNotice {
                    state: other,
                    money,
                })
            }
        }
    }

    /// Fold a validation outcome into the draft: `Ok` marks it executable,
    /// `Err` records the failing state.
    pub fn apply_validation(self, outcome: Result<(), ValidationState>) -> Self {
        match outcome {
            Ok(()) => self.with_validation_state(ValidationState::CanExecute),
            Err(state) => self.with_validation_state(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::FiatCurrency;

    fn draft() -> PendingTx {
        let usd = FiatCurrency::new("USD").expect("valid code");
        PendingTx::zeroed(Money::zero(usd), usd)
    }

    #[test]
    fn add_or_replace_keys_by_kind() {
        let p = draft()
            .add_or_replace_confirmation(ConfirmationValue::From {
                label: "one".into(),
            })
            .add_or_replace_confirmation(ConfirmationValue::From {
                label: "two".into(),
            });
        assert_eq!(p.confirmations.len(), 1);
        assert_eq!(
            p.confirmation(ConfirmationKind::From),
            Some(&ConfirmationValue::From {
                label: "two".into()
            })
        );
    }

    #[test]
    fn error_notice_tracks_validation_state() {
        let usd = FiatCurrency::new("USD").expect("valid code");
        let mut p = draft().add_or_replace_confirmation(ConfirmationValue::From {
            label: "acct".into(),
        });
        p.min_limit = Some(Money::from_minor(usd, 1_000));

        let p = p.apply_validation(Err(ValidationState::UnderMinLimit));
        assert_eq!(p.validation_state, ValidationState::UnderMinLimit);
        assert_eq!(
            p.confirmation(ConfirmationKind::ErrorNotice),
            Some(&ConfirmationValue::ErrorNotice {
                state: ValidationState::UnderMinLimit,
                money: Some(Money::from_minor(usd, 1_000)),
            })
        );

        let p = p.apply_validation(Ok(()));
        assert!(p.validation_state.can_execute());
        assert!(!p.has_confirmation(ConfirmationKind::ErrorNotice));
    }

    #[test]
    fn no_error_notice_before_confirmations_exist() {
        let p = draft().apply_validation(Err(ValidationState::InvalidAmount));
        assert_eq!(p.validation_state, ValidationState::InvalidAmount);
        assert!(p.confirmations.is_empty());
    }
}
