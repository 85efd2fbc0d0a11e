//! Bitpay invoice decorator.
//!
//! Wraps an on-chain engine that can prepare payments and pins the draft to
//! the invoice's fixed amount. A countdown task keeps the remaining-validity
//! confirmation ticking; once the invoice is about to lapse the draft
//! validates to `InvoiceExpired` and can no longer execute.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coincore_common::money::CryptoCurrency;
use coincore_common::util::unix_time;
use coincore_common::{
    ensure_coincore, Account, ConfirmationValue, Error, ExchangeRates, FeeLevel, InvoiceApi,
    InvoiceTarget, Money, PendingTx, TransactionError, TxResult, TxTarget, ValidationState,
};
use std::collections::BTreeSet;
use tokio::task::JoinHandle;
use tracing::instrument;

use super::{InvoicePayer, RefreshTrigger, TransactionEngine};

// Executing this close to expiry would race the rail's own cutoff.
const TIMEOUT_STOP_SECS: i64 = 2;

// The rail needs a moment between accepting the payload and settling it.
const SETTLEMENT_GRACE: Duration = Duration::from_secs(3);

/// Pays a fixed-amount Bitpay invoice through a wrapped on-chain engine.
pub struct BitpayEngine<E> {
    inner: E,
    invoice_api: Arc<dyn InvoiceApi>,
    invoice: Option<InvoiceTarget>,
    trigger: Option<RefreshTrigger>,
    countdown: Option<JoinHandle<()>>,
}

impl<E> std::fmt::Debug for BitpayEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitpayEngine")
            .field("invoice", &self.invoice.as_ref().map(|i| &i.invoice_id))
            .field("counting_down", &self.countdown.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: InvoicePayer> BitpayEngine<E> {
    /// Wrap an invoice-capable engine with the Bitpay rail.
    pub fn new(inner: E, invoice_api: Arc<dyn InvoiceApi>) -> Self {
        Self {
            inner,
            invoice_api,
            invoice: None,
            trigger: None,
            countdown: None,
        }
    }

    fn invoice(&self) -> Result<&InvoiceTarget, Error> {
        self.invoice.as_ref().ok_or(Error::NotStarted)
    }

    fn remaining_secs(&self) -> Result<i64, Error> {
        let expires_at = self.invoice()?.expires_at;
        Ok(expires_at as i64 - unix_time() as i64)
    }

    /// Tick once a second so the driver refreshes the countdown line; ask for
    /// revalidation once the expiry threshold is crossed.
    fn start_countdown(&mut self) -> Result<(), Error> {
        if self.countdown.is_some() {
            return Ok(());
        }
        let trigger = self.trigger.clone().ok_or(Error::NotStarted)?;
        let expires_at = self.invoice()?.expires_at;
        self.countdown = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let remaining = expires_at as i64 - unix_time() as i64;
                trigger.request(remaining <= TIMEOUT_STOP_SECS);
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl<E: InvoicePayer> TransactionEngine for BitpayEngine<E> {
    fn assert_inputs_valid(&self) -> Result<(), Error> {
        self.inner.assert_inputs_valid()?;
        let invoice = self.invoice()?;
        // The invoice rail settles in BTC only
        ensure_coincore!(
            invoice.asset == CryptoCurrency::Btc,
            Error::Precondition("invoice payments settle in BTC only".into())
        );
        Ok(())
    }

    fn start(
        &mut self,
        source: Arc<dyn Account>,
        target: TxTarget,
        rates: Arc<dyn ExchangeRates>,
        refresh: RefreshTrigger,
    ) -> Result<(), Error> {
        match &target {
            TxTarget::Invoice(invoice) => self.invoice = Some(invoice.clone()),
            _ => {
                return Err(Error::Precondition(
                    "invoice engine requires an invoice target".into(),
                ))
            }
        }
        self.trigger = Some(refresh.clone());
        self.inner.start(source, target, rates, refresh)
    }

    fn requires_second_password(&self) -> bool {
        self.inner.requires_second_password()
    }

    #[instrument(skip(self))]
    async fn do_initialise_tx(&mut self) -> Result<PendingTx, Error> {
        let amount = self.invoice()?.amount;
        let mut pending = self.inner.do_initialise_tx().await?;
        // The invoice dictates both the amount and a next-block fee
        pending.fee_selection.available_levels = BTreeSet::from([FeeLevel::Priority]);
        pending.fee_selection.selected_level = FeeLevel::Priority;
        self.inner.do_update_amount(amount, pending).await
    }

    async fn do_update_amount(
        &mut self,
        amount: Money,
        pending: PendingTx,
    ) -> Result<PendingTx, Error> {
        // Only the engine itself applies the invoice amount; any non-zero
        // caller amount is a driver bug
        ensure_coincore!(
            amount.is_zero(),
            Error::Precondition("invoice amounts are fixed by the invoice".into())
        );
        let fixed = self.invoice()?.amount;
        self.inner.do_update_amount(fixed, pending).await
    }

    async fn do_update_fee_level(
        &mut self,
        pending: PendingTx,
        level: FeeLevel,
        custom_fee_amount: i64,
    ) -> Result<PendingTx, Error> {
        ensure_coincore!(
            pending.fee_selection.is_available(level),
            Error::Precondition(format!("fee level {level:?} not supported by this engine"))
        );
        self.inner
            .do_update_fee_level(pending, level, custom_fee_amount)
            .await
    }

    async fn do_build_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let pending = self.inner.do_build_confirmations(pending).await?;
        self.start_countdown()?;
        let remaining = self.remaining_secs()?;
        Ok(
            pending.add_or_prepend_confirmation(ConfirmationValue::InvoiceCountdown {
                remaining_secs: remaining,
            }),
        )
    }

    async fn do_refresh_confirmations(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        let pending = self.inner.do_refresh_confirmations(pending).await?;
        if pending.confirmations.is_empty() {
            return Ok(pending);
        }
        let remaining = self.remaining_secs()?;
        Ok(
            pending.add_or_prepend_confirmation(ConfirmationValue::InvoiceCountdown {
                remaining_secs: remaining,
            }),
        )
    }

    async fn do_validate_amount(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        self.inner.do_validate_amount(pending).await
    }

    async fn do_validate_all(&mut self, pending: PendingTx) -> Result<PendingTx, Error> {
        if self.remaining_secs()? <= TIMEOUT_STOP_SECS {
            return Ok(pending.with_validation_state(ValidationState::InvoiceExpired));
        }
        self.inner.do_validate_all(pending).await
    }

    #[instrument(skip(self, pending, second_password))]
    async fn do_execute(
        &mut self,
        pending: &PendingTx,
        second_password: &str,
    ) -> Result<TxResult, TransactionError> {
        let invoice_id = self
            .invoice()
            .map_err(|e| TransactionError::InternalError(e.to_string()))?
            .invoice_id
            .clone();

        let prepared = self.inner.prepare_payment(pending, second_password).await?;

        let settled: Result<String, TransactionError> = async {
            self.invoice_api
                .verify_payment(&invoice_id, &prepared.payload)
                .await?;
            tokio::time::sleep(SETTLEMENT_GRACE).await;
            self.invoice_api
                .submit_payment(&invoice_id, &prepared.payload)
                .await
        }
        .await;

        match settled {
            Ok(tx_id) => {
                self.inner.on_payment_success(pending);
                Ok(TxResult::Hashed {
                    tx_id,
                    amount: pending.amount,
                })
            }
            Err(err) => {
                self.inner.on_payment_failed(pending, &err);
                Err(err)
            }
        }
    }

    async fn do_post_execute(
        &mut self,
        pending: &PendingTx,
        result: &TxResult,
    ) -> Result<(), TransactionError> {
        self.inner.do_post_execute(pending, result).await
    }

    async fn stop(&mut self, pending: &PendingTx) {
        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
        self.inner.stop(pending).await;
    }
}

impl<E> Drop for BitpayEngine<E> {
    fn drop(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OnChainEngine;
    use crate::testing::{btc, onchain_wallet, usd, FakeInvoiceApi, FakeOnChain, FakeRates};
    use coincore_common::ConfirmationKind;

    fn invoice_target(expires_in_secs: u64) -> TxTarget {
        TxTarget::Invoice(InvoiceTarget {
            invoice_id: "inv-1".into(),
            asset: CryptoCurrency::Btc,
            address: "bc1qinvoice".into(),
            amount: btc(75_000),
            expires_at: unix_time() + expires_in_secs,
        })
    }

    async fn started_engine(
        api: Arc<FakeInvoiceApi>,
        expires_in_secs: u64,
    ) -> BitpayEngine<OnChainEngine> {
        let inner = OnChainEngine::new(Arc::new(FakeOnChain::with_rates(100, 300)), usd());
        let mut engine = BitpayEngine::new(inner, api);
        engine
            .start(
                onchain_wallet(CryptoCurrency::Btc, 10_000_000),
                invoice_target(expires_in_secs),
                Arc::new(FakeRates::default()),
                RefreshTrigger::noop(),
            )
            .expect("start binds");
        engine
    }

    #[tokio::test]
    async fn amount_is_fixed_by_the_invoice() {
        let mut engine = started_engine(Arc::new(FakeInvoiceApi::default()), 600).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        assert_eq!(pending.amount, btc(75_000));

        let err = engine.do_update_amount(btc(1), pending.clone()).await;
        assert!(matches!(err, Err(Error::Precondition(_))));

        // Even the invoice's own amount is rejected when caller-supplied
        let err = engine.do_update_amount(btc(75_000), pending.clone()).await;
        assert!(matches!(err, Err(Error::Precondition(_))));

        // A zero update is the caller's reset; the invoice amount sticks
        let p = engine
            .do_update_amount(Money::zero(CryptoCurrency::Btc), pending)
            .await
            .expect("zero allowed");
        assert_eq!(p.amount, btc(75_000));
    }

    #[tokio::test]
    async fn near_expiry_invoices_fail_validation() {
        let mut engine = started_engine(Arc::new(FakeInvoiceApi::default()), 1).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine.do_validate_all(pending).await.expect("validated");
        assert_eq!(p.validation_state, ValidationState::InvoiceExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_verifies_then_submits() {
        let api = Arc::new(FakeInvoiceApi::default());
        let mut engine = started_engine(Arc::clone(&api), 600).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine.do_validate_all(pending).await.expect("validated");
        assert!(p.validation_state.can_execute());

        let result = engine.do_execute(&p, "hunter2").await.expect("settles");
        assert!(matches!(result, TxResult::Hashed { .. }));
        assert!(api.verified());
        assert!(api.submitted());
    }

    #[tokio::test]
    async fn countdown_is_prepended_once_confirmations_build() {
        let mut engine = started_engine(Arc::new(FakeInvoiceApi::default()), 600).await;
        let pending = engine.do_initialise_tx().await.expect("initialised");
        let p = engine.do_build_confirmations(pending).await.expect("built");
        assert_eq!(
            p.confirmations.first().map(ConfirmationValue::kind),
            Some(ConfirmationKind::InvoiceCountdown)
        );
        engine.stop(&p).await;
    }
}
