//! A custodial swap driven end to end through the processor.

use std::sync::Arc;
use std::time::Duration;

use coincore::common::money::CryptoCurrency;
use coincore::common::ConfirmationKind;
use coincore::engine::SwapEngine;
use coincore::testing::{
    btc, trading_account, usd, usd_money, FakeCustodial, FakeQuoteProvider, FakeRates, FakeTiers,
};
use coincore::{Money, TransactionProcessor, TxResult, TxTarget, ValidationState};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn swap_processor(
    provider: Arc<FakeQuoteProvider>,
    custodial: Arc<FakeCustodial>,
) -> TransactionProcessor {
    let engine = SwapEngine::new(
        provider,
        Arc::new(FakeTiers::gold()),
        custodial,
        usd(),
    );
    TransactionProcessor::new(
        Box::new(engine),
        // 10 BTC at 100.00 USD/BTC
        trading_account(CryptoCurrency::Btc, 1_000_000_000),
        TxTarget::CryptoAccount {
            asset: CryptoCurrency::Bch,
            label: "BCH Trading".into(),
            address: None,
        },
        Arc::new(FakeRates::with_price(10_000)),
    )
    .expect("inputs are compatible")
}

fn rail() -> Arc<FakeCustodial> {
    // Rail bounds 50.00 to 100000.00 USD
    Arc::new(FakeCustodial::default().with_transfer_limits(
        usd_money(5_000),
        usd_money(10_000_000),
        usd_money(10_000_000),
    ))
}

#[tokio::test]
async fn swap_executes_an_order_against_the_quote() {
    init_logging();
    let custodial = rail();
    let mut processor = swap_processor(
        Arc::new(FakeQuoteProvider::with_price(100)),
        Arc::clone(&custodial),
    );

    processor.initialise().await.expect("quote fetched");
    processor
        .update_amount(btc(100_000_000))
        .await
        .expect("amount folded");

    let pending = processor.validate_all().await.expect("validated");
    assert!(pending.validation_state.can_execute());
    // 1 BTC at 100 BCH/BTC with no network fee
    assert_eq!(
        pending.confirmation(ConfirmationKind::SwapReceiveAmount),
        Some(&coincore::common::ConfirmationValue::SwapReceiveAmount {
            amount: Money::from_minor(CryptoCurrency::Bch, 10_000_000_000),
        })
    );

    let result = processor.execute("").await.expect("order settles");
    assert_eq!(
        result,
        TxResult::UnHashed {
            amount: btc(100_000_000)
        }
    );
    assert_eq!(custodial.orders_created(), 1);
}

#[tokio::test]
async fn pending_orders_limit_surfaces_on_the_draft() {
    init_logging();
    let mut processor = swap_processor(
        Arc::new(FakeQuoteProvider::pending_orders_limited()),
        rail(),
    );
    let pending = processor.initialise().await.expect("resolved, not raised");
    assert_eq!(
        pending.validation_state,
        ValidationState::PendingOrdersLimitReached
    );
    assert!(pending.amount.is_zero());
}

#[tokio::test(start_paused = true)]
async fn quote_refreshes_flow_into_the_draft() {
    init_logging();
    let provider = Arc::new(FakeQuoteProvider::with_validity(2));
    let mut processor = swap_processor(Arc::clone(&provider), rail());

    processor.initialise().await.expect("quote fetched");
    processor
        .update_amount(btc(100_000_000))
        .await
        .expect("amount folded");
    processor.validate_all().await.expect("validated");
    assert_eq!(provider.fetch_count(), 1);

    // Nothing new has been published since the subscription started
    assert!(!processor.poll_refresh().await.expect("drained"));

    // Let the quote validity window lapse so the engine re-fetches
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(provider.fetch_count() >= 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(processor.poll_refresh().await.expect("refreshed"));
    let pending = processor.pending().expect("draft exists");
    assert!(pending.validation_state.can_execute());
}
