//! Headless adapters used by the terminal binary: a wallet with a fixed
//! address and a widget that prints its configuration to stdout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use onramp_types::WidgetError;

use crate::session::{PurchaseWidget, WidgetConfig, WidgetEventHandler, WidgetFactory};
use crate::wallet::{ListenerId, NoticeHandler, ProviderError, WalletNotice, WalletProvider};

// ============================================================================
// Static Wallet
// ============================================================================

/// Wallet that always reports the same address once connected
pub struct StaticWalletProvider {
    address: String,
    connected: AtomicBool,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, NoticeHandler)>>,
}

impl StaticWalletProvider {
    pub fn new(address: impl Into<String>, connected: bool) -> Self {
        Self {
            address: address.into(),
            connected: AtomicBool::new(connected),
            next_listener: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Drop the connection and push a disconnect notice
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.notify(WalletNotice::Disconnect);
    }

    fn notify(&self, notice: WalletNotice) {
        let handlers: Vec<NoticeHandler> = lock(&self.listeners).iter().map(|(_, h)| h.clone()).collect();
        debug!("Delivering {:?} to {} listener(s)", notice, handlers.len());
        for handler in handlers {
            handler(notice);
        }
    }
}

#[async_trait]
impl WalletProvider for StaticWalletProvider {
    async fn get_address(&self) -> Result<Option<String>, ProviderError> {
        Ok(self
            .connected
            .load(Ordering::Acquire)
            .then(|| self.address.clone()))
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn on(&self, handler: NoticeHandler) -> Option<ListenerId> {
        let id = self.next_listener.fetch_add(1, Ordering::AcqRel);
        lock(&self.listeners).push((id, handler));
        Some(id)
    }

    fn off(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(listener, _)| *listener != id);
    }
}

// ============================================================================
// Console Widget
// ============================================================================

type SharedHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Builds [`ConsoleWidget`]s and routes typed-in events to the live one
#[derive(Clone, Default)]
pub struct ConsoleWidgetFactory {
    live: Arc<Mutex<Option<SharedHandler>>>,
}

impl ConsoleWidgetFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw event to the shown widget. `false` if none is shown.
    pub fn emit(&self, raw: Value) -> bool {
        let handler = lock(&self.live).clone();
        match handler {
            Some(handler) => {
                handler(raw);
                true
            }
            None => false,
        }
    }
}

impl WidgetFactory for ConsoleWidgetFactory {
    fn create(&self, config: &WidgetConfig) -> Result<Box<dyn PurchaseWidget>, WidgetError> {
        let rendered = serde_json::to_string_pretty(config).map_err(|e| WidgetError::new(e.to_string()))?;
        Ok(Box::new(ConsoleWidget {
            rendered,
            handler: None,
            live: self.live.clone(),
        }))
    }
}

pub struct ConsoleWidget {
    rendered: String,
    handler: Option<SharedHandler>,
    live: Arc<Mutex<Option<SharedHandler>>>,
}

impl PurchaseWidget for ConsoleWidget {
    fn show(&mut self) -> Result<(), WidgetError> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| WidgetError::new("Widget shown before an event handler was registered"))?;

        println!("--- purchase widget ---\n{}\n-----------------------", self.rendered);
        *lock(&self.live) = Some(handler.clone());
        handler(json!({ "type": "WIDGET_OPEN" }));
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), WidgetError> {
        let mut live = lock(&self.live);
        if let (Some(ours), Some(current)) = (&self.handler, live.as_ref()) {
            if Arc::ptr_eq(ours, current) {
                *live = None;
            }
        }
        info!("Console widget destroyed");
        Ok(())
    }

    fn on_any(&mut self, handler: WidgetEventHandler) {
        self.handler = Some(Arc::from(handler));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
