//! Controllable fakes for the engine's external capabilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Notify;

use onramp_engine::{
    EngineConfig, EngineDeps, ListenerId, NoticeHandler, PriceSource, ProviderError, PurchaseWidget,
    ReconciliationEngine, WalletNotice, WalletProvider, WidgetConfig, WidgetEventHandler, WidgetFactory,
};
use onramp_types::{FetchError, WidgetError};

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Let spawned tasks run until they block again
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Config without a seed rate so the first quote is always a live one
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.price.seed_rate = None;
    config
}

// ============================================================================
// Price Source
// ============================================================================

pub struct FakePriceSource {
    asset: Mutex<Result<Decimal, FetchError>>,
    fiat: Mutex<Result<Decimal, FetchError>>,
    gated: AtomicBool,
    gate: Notify,
    calls: AtomicUsize,
}

impl FakePriceSource {
    pub fn new(asset: &str, fiat: &str) -> Arc<Self> {
        Arc::new(Self {
            asset: Mutex::new(Ok(dec(asset))),
            fiat: Mutex::new(Ok(dec(fiat))),
            gated: AtomicBool::new(false),
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_asset(&self, asset: &str) {
        *self.asset.lock().unwrap() = Ok(dec(asset));
    }

    pub fn fail_fiat(&self) {
        *self.fiat.lock().unwrap() = Err(FetchError::network("fx rate", "connection reset"));
    }

    /// Block asset lookups until [`release`](Self::release)
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one held lookup complete
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for FakePriceSource {
    async fn asset_price(&self) -> Result<Decimal, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.asset.lock().unwrap().clone()
    }

    async fn fiat_rate(&self) -> Result<Decimal, FetchError> {
        self.fiat.lock().unwrap().clone()
    }
}

// ============================================================================
// Wallet Provider
// ============================================================================

pub struct FakeWallet {
    address: Mutex<Option<String>>,
    query_fails: AtomicBool,
    connect_error: Mutex<Option<String>>,
    address_on_connect: Mutex<Option<String>>,
    gated: AtomicBool,
    gate: Notify,
    queries: AtomicUsize,
    connects: AtomicUsize,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, NoticeHandler)>>,
}

impl FakeWallet {
    pub fn new(address: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            address: Mutex::new(address.map(str::to_string)),
            query_fails: AtomicBool::new(false),
            connect_error: Mutex::new(None),
            address_on_connect: Mutex::new(None),
            gated: AtomicBool::new(false),
            gate: Notify::new(),
            queries: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            next_listener: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn set_address(&self, address: Option<&str>) {
        *self.address.lock().unwrap() = address.map(str::to_string);
    }

    /// Address the wallet reports once `connect` succeeds
    pub fn approve_connect_with(&self, address: &str) {
        *self.address_on_connect.lock().unwrap() = Some(address.to_string());
    }

    pub fn reject_connect(&self, message: &str) {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_queries(&self, fail: bool) {
        self.query_fails.store(fail, Ordering::SeqCst);
    }

    /// Block address queries until [`release`](Self::release)
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn push(&self, notice: WalletNotice) {
        let handlers: Vec<NoticeHandler> = self.listeners.lock().unwrap().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(notice);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn get_address(&self) -> Result<Option<String>, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        // Read before blocking so a held query answers with what was true
        // when it was issued.
        let address = self.address.lock().unwrap().clone();
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.query_fails.load(Ordering::SeqCst) {
            return Err(ProviderError("provider crashed".to_string()));
        }
        Ok(address)
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.connect_error.lock().unwrap().clone() {
            return Err(ProviderError(message));
        }
        if let Some(address) = self.address_on_connect.lock().unwrap().clone() {
            self.set_address(Some(&address));
        }
        Ok(())
    }

    fn on(&self, handler: NoticeHandler) -> Option<ListenerId> {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, handler));
        Some(id)
    }

    fn off(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(listener, _)| *listener != id);
    }
}

// ============================================================================
// Purchase Widget
// ============================================================================

type SharedHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
pub struct WidgetLog {
    pub configs: Vec<WidgetConfig>,
    pub shown: Vec<usize>,
    pub destroyed: Vec<usize>,
    handlers: Vec<Option<SharedHandler>>,
}

/// Records every widget it builds; instances are numbered from 0
#[derive(Default)]
pub struct RecordingWidgetFactory {
    log: Arc<Mutex<WidgetLog>>,
    create_error: Mutex<Option<String>>,
    show_error: Arc<Mutex<Option<String>>>,
}

impl RecordingWidgetFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create(&self, message: Option<&str>) {
        *self.create_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn fail_show(&self, message: Option<&str>) {
        *self.show_error.lock().unwrap() = message.map(str::to_string);
    }

    /// Deliver a raw event as widget `instance`
    pub fn emit(&self, instance: usize, raw: Value) {
        let handler = self.log.lock().unwrap().handlers.get(instance).cloned().flatten();
        if let Some(handler) = handler {
            handler(raw);
        }
    }

    pub fn created(&self) -> usize {
        self.log.lock().unwrap().configs.len()
    }

    pub fn destroyed(&self) -> Vec<usize> {
        self.log.lock().unwrap().destroyed.clone()
    }

    pub fn live(&self) -> usize {
        let log = self.log.lock().unwrap();
        log.configs.len() - log.destroyed.len()
    }

    pub fn last_config(&self) -> Option<WidgetConfig> {
        self.log.lock().unwrap().configs.last().cloned()
    }
}

impl WidgetFactory for RecordingWidgetFactory {
    fn create(&self, config: &WidgetConfig) -> Result<Box<dyn PurchaseWidget>, WidgetError> {
        if let Some(message) = self.create_error.lock().unwrap().clone() {
            return Err(WidgetError::new(message));
        }

        let mut log = self.log.lock().unwrap();
        log.configs.push(config.clone());
        log.handlers.push(None);

        Ok(Box::new(RecordingWidget {
            index: log.configs.len() - 1,
            log: self.log.clone(),
            show_error: self.show_error.clone(),
        }))
    }
}

struct RecordingWidget {
    index: usize,
    log: Arc<Mutex<WidgetLog>>,
    show_error: Arc<Mutex<Option<String>>>,
}

impl PurchaseWidget for RecordingWidget {
    fn show(&mut self) -> Result<(), WidgetError> {
        if let Some(message) = self.show_error.lock().unwrap().clone() {
            return Err(WidgetError::new(message));
        }
        self.log.lock().unwrap().shown.push(self.index);
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), WidgetError> {
        self.log.lock().unwrap().destroyed.push(self.index);
        Ok(())
    }

    fn on_any(&mut self, handler: WidgetEventHandler) {
        self.log.lock().unwrap().handlers[self.index] = Some(Arc::from(handler));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: ReconciliationEngine,
    pub prices: Arc<FakePriceSource>,
    pub wallet: Option<Arc<FakeWallet>>,
    pub widgets: Arc<RecordingWidgetFactory>,
}

impl Harness {
    pub fn start(config: &EngineConfig, prices: Arc<FakePriceSource>, wallet: Option<Arc<FakeWallet>>) -> Self {
        let widgets = RecordingWidgetFactory::new();
        let engine = ReconciliationEngine::start(
            config,
            EngineDeps {
                price_source: prices.clone(),
                wallet: wallet.clone().map(|w| w as Arc<dyn WalletProvider>),
                widgets: widgets.clone(),
            },
        );
        Self {
            engine,
            prices,
            wallet,
            widgets,
        }
    }

    pub fn wallet(&self) -> &FakeWallet {
        self.wallet.as_deref().unwrap()
    }

    /// Advance paused time and let the woken tasks run
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        settle().await;
    }
}
