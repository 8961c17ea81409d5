//! Reconciliation engine.
//!
//! Composition root for the price feed, the wallet monitor, the purchase
//! session controller and the transaction ledger. All engine state lives in
//! one [`EngineState`] behind a mutex and is changed only through
//! [`Shared::update`], which publishes a fresh [`EngineSnapshot`] on a watch
//! channel after every mutation. Once disposed, `update` refuses to run, so a
//! fetch or wallet query that resolves late changes nothing.
//!
//! Lock order: wallet monitor, then engine state. The engine never calls into
//! the monitor while holding its own lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use onramp_types::{
    ConnectionState, PreconditionError, PriceQuote, PurchaseIntent, RampError, RampResult, TransactionRecord,
};

use crate::config::EngineConfig;
use crate::ledger::TransactionLedger;
use crate::price_feed::{PriceFeedAggregator, PriceSource};
use crate::session::{SessionController, SessionEvent, SessionHandle, SessionId, WidgetEvent, WidgetFactory};
use crate::wallet::{WalletMonitor, WalletProvider};

const OPEN_FAILURE_PREFIX: &str = "Failed to open purchase widget. ";

/// External capabilities the engine is wired to
pub struct EngineDeps {
    pub price_source: Arc<dyn PriceSource>,
    /// `None` when no wallet is installed
    pub wallet: Option<Arc<dyn WalletProvider>>,
    pub widgets: Arc<dyn WidgetFactory>,
}

/// Read-only merged view handed to the UI shell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    /// Increments whenever any other field changes
    pub version: u64,
    pub connection: ConnectionState,
    pub quote: Option<PriceQuote>,
    pub price_loading: bool,
    /// Quote older than the configured threshold, as of this snapshot
    pub quote_stale: bool,
    pub intent: PurchaseIntent,
    pub purchase_busy: bool,
    pub session_open: bool,
    pub purchase_error: Option<String>,
    /// Most recent first
    pub transactions: Vec<TransactionRecord>,
    pub transaction_count: usize,
}

struct EngineState {
    connection: ConnectionState,
    quote: Option<PriceQuote>,
    price_loading: bool,
    intent: PurchaseIntent,
    purchase_error: Option<String>,
    ledger: TransactionLedger,
    session: SessionController,
    handle: Option<SessionHandle>,
}

impl EngineState {
    fn snapshot(&self, version: u64, stale_after_secs: i64) -> EngineSnapshot {
        EngineSnapshot {
            version,
            connection: self.connection.clone(),
            quote: self.quote.clone(),
            price_loading: self.price_loading,
            quote_stale: self
                .quote
                .as_ref()
                .is_some_and(|q| q.is_stale(Utc::now(), stale_after_secs)),
            intent: self.intent.clone(),
            purchase_busy: self.session.is_busy(),
            session_open: self.session.is_open(),
            purchase_error: self.purchase_error.clone(),
            transactions: self.ledger.list().cloned().collect(),
            transaction_count: self.ledger.len(),
        }
    }

    /// Replace the quote and re-derive the intent in the same step
    fn set_quote(&mut self, quote: Option<PriceQuote>) {
        if let Some(quote) = &quote {
            self.intent.rederive(quote);
        }
        self.quote = quote;
    }

    fn apply_session_event(&mut self, event: SessionEvent) {
        self.ledger.apply_event(&event.event);
        self.session.on_event(&event);

        if let WidgetEvent::WidgetError { message } = &event.event {
            if self.session.active_id() == Some(event.session) {
                warn!("Widget error in session {}: {}", event.session, message);
                self.purchase_error = Some(message.clone());
            }
        }
    }

    fn close_session(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.session.close(handle);
        }
        self.session.close_active();
    }
}

struct Shared {
    state: Mutex<EngineState>,
    snapshot: watch::Sender<EngineSnapshot>,
    disposed: AtomicBool,
    stale_after_secs: i64,
}

impl Shared {
    /// The single mutation path. `None` once the engine is disposed.
    fn update<R>(&self, label: &str, f: impl FnOnce(&mut EngineState) -> R) -> Option<R> {
        let mut state = lock(&self.state);
        if self.disposed.load(Ordering::Acquire) {
            debug!("Engine disposed, ignoring {}", label);
            return None;
        }

        let result = f(&mut state);

        self.snapshot.send_if_modified(|current| {
            let mut next = state.snapshot(current.version, self.stale_after_secs);
            if next == *current {
                return false;
            }
            next.version += 1;
            *current = next;
            true
        });
        Some(result)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

pub struct ReconciliationEngine {
    shared: Arc<Shared>,
    prices: Arc<PriceFeedAggregator>,
    wallet: Arc<WalletMonitor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconciliationEngine {
    /// Wire the components and start both schedules. Must be called from
    /// within a tokio runtime.
    pub fn start(config: &EngineConfig, deps: EngineDeps) -> Self {
        let seed = config
            .price
            .seed_rate
            .and_then(|rate| PriceQuote::cached(rate, Utc::now()));
        let prices = Arc::new(PriceFeedAggregator::with_seed(deps.price_source, seed));
        let wallet = Arc::new(WalletMonitor::new(deps.wallet, &config.wallet));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            connection: wallet.current(),
            quote: prices.current_quote(),
            price_loading: false,
            intent: PurchaseIntent::default(),
            purchase_error: None,
            ledger: TransactionLedger::new(),
            session: SessionController::new(deps.widgets, config.widget.clone(), events_tx),
            handle: None,
        };
        let initial = state.snapshot(0, config.price.stale_after_secs);
        let (snapshot, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            snapshot,
            disposed: AtomicBool::new(false),
            stale_after_secs: config.price.stale_after_secs,
        });

        let observer = Arc::downgrade(&shared);
        wallet.subscribe(move |connection| {
            if let Some(shared) = observer.upgrade() {
                shared.update("wallet state", |state| state.connection = connection.clone());
            }
        });
        wallet.attach();

        let tasks = vec![
            tokio::spawn(run_price_schedule(
                shared.clone(),
                prices.clone(),
                config.price.refresh_interval(),
            )),
            tokio::spawn(run_wallet_schedule(wallet.clone(), config.wallet.poll_interval())),
            tokio::spawn(run_event_pump(shared.clone(), events_rx)),
        ];

        info!(
            "Reconciliation engine started (price every {:?}, wallet every {:?}, wallet present: {})",
            config.price.refresh_interval(),
            config.wallet.poll_interval(),
            wallet.has_provider()
        );

        Self {
            shared,
            prices,
            wallet,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Run the connect sequence. Failures end up in the connection state.
    pub async fn request_connect(&self) -> ConnectionState {
        if self.is_disposed() {
            return self.snapshot().connection;
        }

        match self.wallet.connect().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Wallet connect failed: {}", e);
                self.wallet.current()
            }
        }
    }

    /// Open the purchase widget for `intent`, replacing any open session.
    /// The failure message is also recorded in the snapshot.
    pub fn request_open_purchase(&self, intent: PurchaseIntent) -> RampResult<SessionId> {
        let outcome = self.shared.update("open purchase", |state| {
            state.intent = intent;
            if let Some(quote) = &state.quote {
                state.intent.rederive(quote);
            }
            state.close_session();

            match state.session.open(&state.intent, &state.connection) {
                Ok(handle) => {
                    let id = handle.id();
                    state.handle = Some(handle);
                    state.purchase_error = None;
                    Ok(id)
                }
                Err(e) => {
                    let message = describe_open_failure(&e);
                    warn!("Could not open purchase: {}", message);
                    state.purchase_error = Some(message);
                    Err(e)
                }
            }
        });

        outcome.unwrap_or_else(|| Err(PreconditionError::EngineDisposed.into()))
    }

    /// Fetch a quote now. Coalesces with a refresh already in flight.
    /// Returns the quote on display afterwards.
    pub async fn refresh_price_now(&self) -> Option<PriceQuote> {
        refresh_price(&self.shared, &self.prices).await;
        self.snapshot().quote
    }

    /// Set the fiat side of the intent and derive the asset side
    pub fn set_fiat_amount(&self, fiat: Decimal) -> RampResult<PurchaseIntent> {
        self.edit_intent("set fiat amount", |intent, quote| intent.set_fiat(fiat, quote))
    }

    /// Set the asset side of the intent and derive the fiat side
    pub fn set_asset_amount(&self, asset: Decimal) -> RampResult<PurchaseIntent> {
        self.edit_intent("set asset amount", |intent, quote| intent.set_asset(asset, quote))
    }

    /// Close the open purchase session, if any
    pub fn close_purchase(&self) {
        self.shared.update("close purchase", EngineState::close_session);
    }

    /// Stop both schedules, release the widget and detach from the wallet.
    /// Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = lock(&self.shared.state);
            if self.shared.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            state.close_session();
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.wallet.detach();
        info!("Reconciliation engine disposed");
    }

    fn edit_intent<F>(&self, label: &str, edit: F) -> RampResult<PurchaseIntent>
    where
        F: FnOnce(&mut PurchaseIntent, Option<&PriceQuote>) -> Result<(), PreconditionError>,
    {
        let outcome = self.shared.update(label, |state| -> RampResult<PurchaseIntent> {
            let mut intent = state.intent.clone();
            edit(&mut intent, state.quote.as_ref())?;
            state.intent = intent.clone();
            Ok(intent)
        });

        outcome.unwrap_or_else(|| Err(PreconditionError::EngineDisposed.into()))
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// User-facing message for a failed open
pub fn describe_open_failure(error: &RampError) -> String {
    match error {
        RampError::Widget(e) => {
            let detail = if e.message.contains("API key") {
                "API key configuration issue. Please check your Ramp Network API key."
            } else if e.message.to_lowercase().contains("network") {
                "Network connection issue. Please check your internet connection."
            } else {
                e.message.as_str()
            };
            format!("{}{}", OPEN_FAILURE_PREFIX, detail)
        }
        other => other.to_string(),
    }
}

/// Refresh and publish while holding the flight, so a newer refresh can
/// never be overwritten by this one.
async fn refresh_price(shared: &Shared, prices: &PriceFeedAggregator) {
    if shared.is_disposed() {
        return;
    }
    let Some(flight) = prices.try_begin() else {
        return;
    };

    shared.update("price loading", |state| state.price_loading = true);
    let quote = match flight.run().await {
        Ok(quote) => Some(quote),
        Err(_) => prices.current_quote(),
    };
    shared.update("price quote", |state| {
        state.set_quote(quote);
        state.price_loading = false;
    });
}

async fn run_price_schedule(shared: Arc<Shared>, prices: Arc<PriceFeedAggregator>, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        refresh_price(&shared, &prices).await;
    }
}

async fn run_wallet_schedule(wallet: Arc<WalletMonitor>, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        wallet.poll().await;
    }
}

async fn run_event_pump(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        shared.update("widget event", |state| state.apply_session_event(event));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
