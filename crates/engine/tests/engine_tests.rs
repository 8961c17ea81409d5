//! Reconciliation engine end to end against scripted capabilities

mod common;

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use common::{dec, settle, test_config, FakePriceSource, FakeWallet, Harness};
use onramp_engine::EngineConfig;
use onramp_types::{
    ConnectionState, ConnectionStatus, PreconditionError, PurchaseIntent, QuoteSource, RampError, TransactionStatus,
};

fn created(id: &str) -> serde_json::Value {
    json!({
        "type": "PURCHASE_CREATED",
        "payload": { "purchase": { "id": id, "cryptoAmount": "10", "fiatAmount": 20 } }
    })
}

fn succeeded(id: &str) -> serde_json::Value {
    json!({ "type": "PURCHASE_SUCCESSFUL", "payload": { "purchase": { "id": id } } })
}

/// Engine with a live 2.0 rate and a wallet already connected as 0xabc
async fn connected_harness() -> Harness {
    let harness = Harness::start(
        &test_config(),
        FakePriceSource::new("0.50", "4.0"),
        Some(FakeWallet::new(Some("0xabc"))),
    );
    settle().await;
    harness
}

// ============================================================================
// Prices
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_hop_quote_drives_intent() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);
    settle().await;

    let snapshot = h.engine.snapshot();
    let quote = snapshot.quote.expect("quote after first refresh");
    assert_eq!(quote.rate, dec("2.0"));
    assert_eq!(quote.source, QuoteSource::Live);
    assert!(!snapshot.price_loading);

    let intent = h.engine.set_fiat_amount(dec("20"))?;
    assert_eq!(intent.asset_amount, dec("10"));
    assert_eq!(h.engine.snapshot().intent, intent);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_new_quote_rederives_intent_in_same_snapshot() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);
    settle().await;
    h.engine.set_fiat_amount(dec("20"))?;

    let mut updates = h.engine.subscribe();
    updates.borrow_and_update();

    h.prices.set_asset("1.0");
    let quote = h.engine.refresh_price_now().await.unwrap();
    assert_eq!(quote.rate, dec("4.0"));

    assert!(updates.has_changed()?);
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.quote.unwrap().rate, dec("4.0"));
    assert_eq!(snapshot.intent.fiat_amount, dec("20"));
    assert_eq!(snapshot.intent.asset_amount, dec("5"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_seed_rate_until_first_fetch() -> Result<()> {
    let prices = FakePriceSource::new("0.50", "4.0");
    prices.hold();
    let h = Harness::start(&EngineConfig::default(), prices, None);

    let seeded = h.engine.snapshot().quote.unwrap();
    assert_eq!(seeded.rate, dec("1.15"));
    assert_eq!(seeded.source, QuoteSource::Cached);

    settle().await;
    assert!(h.engine.snapshot().price_loading);

    h.prices.release();
    settle().await;

    let snapshot = h.engine.snapshot();
    assert!(!snapshot.price_loading);
    assert_eq!(snapshot.quote.unwrap().source, QuoteSource::Live);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_shows_cached_rate() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);
    settle().await;

    h.prices.fail_fiat();
    let quote = h.engine.refresh_price_now().await.unwrap();

    assert_eq!(quote.rate, dec("2.0"));
    assert_eq!(quote.source, QuoteSource::Cached);
    assert!(!h.engine.snapshot().price_loading);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_refresh_now_coalesces_with_scheduled_fetch() -> Result<()> {
    let prices = FakePriceSource::new("0.50", "4.0");
    prices.hold();
    let h = Harness::start(&test_config(), prices, None);
    settle().await;
    assert_eq!(h.prices.calls(), 1);

    let quote = h.engine.refresh_price_now().await;
    assert_eq!(quote, None);
    assert_eq!(h.prices.calls(), 1);

    h.prices.release();
    settle().await;
    assert_eq!(h.engine.snapshot().quote.unwrap().rate, dec("2.0"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_schedules_run_on_their_intervals() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), Some(FakeWallet::new(None)));
    settle().await;
    assert_eq!(h.prices.calls(), 1);
    assert_eq!(h.wallet().queries(), 1);

    h.advance(Duration::from_secs(2)).await;
    assert_eq!(h.wallet().queries(), 2);
    assert_eq!(h.prices.calls(), 1);

    h.advance(Duration::from_secs(13)).await;
    assert_eq!(h.prices.calls(), 2);

    Ok(())
}

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_without_wallet_reports_unavailable() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);

    let state = h.engine.request_connect().await;
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.last_error.as_deref(), Some("Wallet not available"));

    settle().await;
    assert_eq!(h.engine.snapshot().connection, state);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connect_flows_into_snapshot() -> Result<()> {
    let wallet = FakeWallet::new(None);
    wallet.approve_connect_with("0xabc");
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), Some(wallet));

    let state = h.engine.request_connect().await;
    assert_eq!(state, ConnectionState::connected("0xabc"));
    assert_eq!(h.engine.snapshot().connection, state);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_notice_reaches_snapshot() -> Result<()> {
    let h = connected_harness().await;
    assert!(h.engine.snapshot().connection.is_connected());

    h.wallet().set_address(None);
    h.wallet().push(onramp_engine::WalletNotice::Disconnect);

    let connection = h.engine.snapshot().connection;
    assert_eq!(connection.status, ConnectionStatus::Disconnected);
    assert_eq!(connection.last_error.as_deref(), Some("Wallet disconnected"));

    Ok(())
}

// ============================================================================
// Purchase Sessions and Ledger
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_requires_connected_wallet() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);
    settle().await;

    let err = h.engine.request_open_purchase(PurchaseIntent::default()).unwrap_err();
    assert_eq!(err, RampError::Precondition(PreconditionError::WalletNotConnected));

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.purchase_error.as_deref(), Some("Please connect your wallet first"));
    assert!(!snapshot.session_open);
    assert_eq!(h.widgets.created(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_widget_receives_address_and_amount() -> Result<()> {
    let h = connected_harness().await;

    let intent = h.engine.set_fiat_amount(dec("20"))?;
    h.engine.request_open_purchase(intent)?;

    let config = h.widgets.last_config().unwrap();
    assert_eq!(config.user_address.as_deref(), Some("0xabc"));
    assert_eq!(config.fiat_value.as_deref(), Some("20"));
    assert_eq!(config.swap_asset, "CELO");

    let snapshot = h.engine.snapshot();
    assert!(snapshot.purchase_busy);
    assert!(snapshot.session_open);
    assert_eq!(snapshot.purchase_error, None);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_session_is_open() -> Result<()> {
    let h = connected_harness().await;

    h.engine.request_open_purchase(PurchaseIntent::default())?;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    assert_eq!(h.widgets.created(), 2);
    assert_eq!(h.widgets.destroyed(), vec![0]);
    assert_eq!(h.widgets.live(), 1);

    h.engine.close_purchase();
    assert_eq!(h.widgets.destroyed(), vec![0, 1]);

    let snapshot = h.engine.snapshot();
    assert!(!snapshot.session_open);
    assert!(!snapshot.purchase_busy);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_yield_one_completed_record() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    h.widgets.emit(0, created("tx1"));
    h.widgets.emit(0, created("tx1"));
    h.widgets.emit(0, succeeded("tx1"));
    h.widgets.emit(0, succeeded("tx1"));
    settle().await;

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.transaction_count, 1);
    let record = &snapshot.transactions[0];
    assert_eq!(record.id, "tx1");
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.asset_amount, dec("10"));
    assert_eq!(record.fiat_currency, "PLN");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_for_unknown_purchase_is_dropped() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    h.widgets.emit(0, succeeded("ghost"));
    h.widgets.emit(0, json!({ "type": "SOMETHING_NEW", "payload": {} }));
    settle().await;

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.transaction_count, 0);
    assert!(snapshot.purchase_busy);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_widget_close_idles_without_settling_purchase() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    h.widgets.emit(0, created("tx1"));
    h.widgets.emit(0, json!({ "type": "WIDGET_CLOSE" }));
    settle().await;

    let snapshot = h.engine.snapshot();
    assert!(!snapshot.purchase_busy);
    assert_eq!(snapshot.transactions[0].status, TransactionStatus::Pending);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_widget_error_is_surfaced() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    h.widgets.emit(0, json!({ "type": "WIDGET_ERROR", "payload": { "message": "card declined" } }));
    settle().await;

    let snapshot = h.engine.snapshot();
    assert!(!snapshot.purchase_busy);
    assert_eq!(snapshot.purchase_error.as_deref(), Some("card declined"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_replaced_session_keeps_reporting_purchases_only() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    // Late events from the first widget
    h.widgets.emit(0, json!({ "type": "WIDGET_CLOSE" }));
    h.widgets.emit(0, created("tx-old"));
    settle().await;

    let snapshot = h.engine.snapshot();
    assert!(snapshot.purchase_busy);
    assert_eq!(snapshot.transaction_count, 1);
    assert_eq!(snapshot.transactions[0].id, "tx-old");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_open_failures_are_classified_and_released() -> Result<()> {
    let h = connected_harness().await;

    h.widgets.fail_create(Some("Missing API key"));
    assert!(h.engine.request_open_purchase(PurchaseIntent::default()).is_err());
    let message = h.engine.snapshot().purchase_error.unwrap();
    assert!(message.starts_with("Failed to open purchase widget. API key configuration issue"));
    assert_eq!(h.widgets.created(), 0);

    h.widgets.fail_create(None);
    h.widgets.fail_show(Some("network unreachable"));
    assert!(h.engine.request_open_purchase(PurchaseIntent::default()).is_err());
    let snapshot = h.engine.snapshot();
    assert!(snapshot.purchase_error.unwrap().contains("Network connection issue"));
    assert!(!snapshot.purchase_busy);
    assert!(!snapshot.session_open);

    // The widget that failed to show was still torn down
    assert_eq!(h.widgets.destroyed(), vec![0]);

    Ok(())
}

// ============================================================================
// Disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_releases_everything() -> Result<()> {
    let h = connected_harness().await;
    h.engine.request_open_purchase(PurchaseIntent::default())?;

    h.engine.dispose();
    assert!(h.engine.is_disposed());
    assert_eq!(h.widgets.destroyed(), vec![0]);
    assert_eq!(h.wallet().listener_count(), 0);

    let queries = h.wallet().queries();
    let fetches = h.prices.calls();
    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.wallet().queries(), queries);
    assert_eq!(h.prices.calls(), fetches);

    let err = h.engine.request_open_purchase(PurchaseIntent::default()).unwrap_err();
    assert_eq!(err, RampError::Precondition(PreconditionError::EngineDisposed));

    // Second dispose is harmless
    h.engine.dispose();

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_late_completions_after_dispose_change_nothing() -> Result<()> {
    let wallet = FakeWallet::new(None);
    wallet.approve_connect_with("0xabc");
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), Some(wallet));
    settle().await;

    let mut connect = tokio_test::task::spawn(h.engine.request_connect());
    tokio_test::assert_pending!(connect.poll());
    assert_eq!(h.engine.snapshot().connection.status, ConnectionStatus::Connecting);

    h.engine.dispose();
    let frozen = h.engine.snapshot();

    // The connect sequence still finishes against the wallet
    let state = connect.await;
    assert!(state.is_connected());

    assert_eq!(h.engine.snapshot(), frozen);
    assert_eq!(frozen.connection.status, ConnectionStatus::Connecting);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_late_price_after_dispose_changes_nothing() -> Result<()> {
    let h = Harness::start(&test_config(), FakePriceSource::new("0.50", "4.0"), None);
    settle().await;

    h.prices.set_asset("1.0");
    h.prices.hold();
    let mut refresh = tokio_test::task::spawn(h.engine.refresh_price_now());
    tokio_test::assert_pending!(refresh.poll());
    assert!(h.engine.snapshot().price_loading);

    h.engine.dispose();
    let frozen = h.engine.snapshot();

    h.prices.release();
    let quote = refresh.await.unwrap();

    assert_eq!(quote.rate, dec("2.0"));
    assert_eq!(h.engine.snapshot(), frozen);
    assert!(frozen.price_loading);

    Ok(())
}
