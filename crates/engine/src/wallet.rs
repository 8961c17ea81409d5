//! Wallet connectivity monitor.
//!
//! Two producers feed one consumer: the periodic poll and the provider's push
//! notices both turn into [`WalletFact`]s applied by [`WalletMonitor::apply`].
//! Every fact is stamped from a monotonic observation clock when it is
//! observed (a poll when it is issued, a notice when it arrives), and a fact
//! older than the last applied one is dropped. Applying a fact that leaves the
//! state unchanged notifies nobody.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use onramp_types::{
    ConnectError, ConnectionState, ConnectionStatus, MSG_CONNECT_FAILED, MSG_WALLET_CHECK_FAILED,
    MSG_WALLET_DISCONNECTED, MSG_WALLET_UNAVAILABLE,
};

use crate::config::WalletConfig;

// ============================================================================
// Provider Capability
// ============================================================================

pub type ListenerId = u64;

/// Push notifications a provider may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletNotice {
    AccountsChanged,
    Disconnect,
}

pub type NoticeHandler = Arc<dyn Fn(WalletNotice) + Send + Sync>;

/// Fault raised by the wallet provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// External wallet provider
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Currently selected address, if the wallet is connected
    async fn get_address(&self) -> Result<Option<String>, ProviderError>;

    /// Ask the wallet to connect
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Register a notice handler. `None` when the provider has no push channel.
    fn on(&self, handler: NoticeHandler) -> Option<ListenerId>;

    fn off(&self, id: ListenerId);
}

// ============================================================================
// Facts
// ============================================================================

/// Something learned about the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactKind {
    /// Poll found an address
    Address(String),
    /// Poll found no address. `prior` is the state when the poll was issued.
    NoAddress { prior: ConnectionState },
    /// Provider pushed a disconnect
    Disconnected,
    /// No provider capability present
    Unavailable,
    /// Provider query threw
    Fault(String),
    ConnectStarted,
    ConnectRejected(String),
    ConnectSettled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletFact {
    /// Observation stamp; larger is newer
    pub observed: u64,
    pub kind: FactKind,
}

/// State a poll or push fact implies on its own. `None` for the connect
/// lifecycle facts, which are relative to the state they land on.
pub fn implied_state(kind: &FactKind) -> Option<ConnectionState> {
    match kind {
        FactKind::Address(address) => Some(ConnectionState::connected(address.clone())),
        FactKind::NoAddress { prior } => Some(match prior.status {
            ConnectionStatus::Connected => ConnectionState::disconnected(Some(MSG_WALLET_DISCONNECTED.to_string())),
            _ => prior.clone(),
        }),
        FactKind::Disconnected => Some(ConnectionState::disconnected(Some(MSG_WALLET_DISCONNECTED.to_string()))),
        FactKind::Unavailable => Some(ConnectionState::disconnected(Some(MSG_WALLET_UNAVAILABLE.to_string()))),
        FactKind::Fault(message) => Some(ConnectionState::disconnected(Some(message.clone()))),
        FactKind::ConnectStarted | FactKind::ConnectRejected(_) | FactKind::ConnectSettled => None,
    }
}

/// State implied by applying `kind` on top of `prev`
pub fn next_state(prev: &ConnectionState, kind: &FactKind) -> ConnectionState {
    if let Some(state) = implied_state(kind) {
        return state;
    }
    match kind {
        FactKind::ConnectStarted => match prev.status {
            ConnectionStatus::Connected => prev.clone(),
            _ => ConnectionState::connecting(),
        },
        FactKind::ConnectRejected(message) => match prev.status {
            ConnectionStatus::Connected => prev.clone(),
            _ => ConnectionState::failed(message.clone()),
        },
        FactKind::ConnectSettled => match prev.status {
            ConnectionStatus::Connecting => ConnectionState::disconnected(None),
            _ => prev.clone(),
        },
        _ => prev.clone(),
    }
}

// ============================================================================
// Monitor
// ============================================================================

pub type StateObserver = Box<dyn Fn(&ConnectionState) + Send + Sync>;

struct MonitorInner {
    state: ConnectionState,
    last_observed: u64,
    observers: Vec<StateObserver>,
}

/// Clears the connecting flag when a connect sequence ends or is cancelled
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WalletMonitor {
    provider: Option<Arc<dyn WalletProvider>>,
    settle_delay: Duration,
    recheck_delay: Duration,
    clock: AtomicU64,
    connecting: AtomicBool,
    inner: Mutex<MonitorInner>,
    listener: Mutex<Option<ListenerId>>,
}

impl WalletMonitor {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: &WalletConfig) -> Self {
        Self {
            provider,
            settle_delay: config.connect_settle(),
            recheck_delay: config.connect_recheck(),
            clock: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            inner: Mutex::new(MonitorInner {
                state: ConnectionState::default(),
                last_observed: 0,
                observers: Vec::new(),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Register for provider push notices. Must run inside a tokio runtime,
    /// since account changes are answered with a re-poll task.
    pub fn attach(self: &Arc<Self>) {
        let Some(provider) = &self.provider else {
            debug!("No wallet provider, push notices unavailable");
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("Wallet monitor attached outside a runtime, push notices ignored");
            return;
        };

        let monitor = Arc::downgrade(self);
        let handler: NoticeHandler = Arc::new(move |notice| {
            let Some(monitor) = monitor.upgrade() else {
                return;
            };
            match notice {
                WalletNotice::Disconnect => {
                    info!("Wallet provider reported disconnect");
                    monitor.record(FactKind::Disconnected);
                }
                WalletNotice::AccountsChanged => {
                    info!("Wallet accounts changed, re-polling");
                    runtime.spawn(async move {
                        monitor.poll().await;
                    });
                }
            }
        });

        if let Some(id) = provider.on(handler) {
            *lock(&self.listener) = Some(id);
        }
    }

    /// Unregister from the provider and drop all observers
    pub fn detach(&self) {
        if let (Some(provider), Some(id)) = (&self.provider, lock(&self.listener).take()) {
            provider.off(id);
        }
        lock(&self.inner).observers.clear();
    }

    /// Observe state changes. Observers run on the update path and must not
    /// call back into the monitor.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        lock(&self.inner).observers.push(Box::new(observer));
    }

    pub fn current(&self) -> ConnectionState {
        lock(&self.inner).state.clone()
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// Take an observation stamp
    pub fn observe(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stamp a poll and sample the state it was issued against
    fn observe_poll(&self) -> (u64, ConnectionState) {
        let inner = lock(&self.inner);
        (self.observe(), inner.state.clone())
    }

    /// The single update path. Returns whether the state changed.
    pub fn apply(&self, fact: WalletFact) -> bool {
        let mut inner = lock(&self.inner);

        if fact.observed <= inner.last_observed {
            debug!(
                "Dropping stale wallet fact {:?} (observed {}, last applied {})",
                fact.kind, fact.observed, inner.last_observed
            );
            return false;
        }
        inner.last_observed = fact.observed;

        let next = next_state(&inner.state, &fact.kind);
        if next == inner.state {
            return false;
        }

        info!("Wallet state {:?} -> {:?}", inner.state.status, next.status);
        inner.state = next;
        for observer in &inner.observers {
            observer(&inner.state);
        }
        true
    }

    /// Stamp and apply a fact observed right now
    pub fn record(&self, kind: FactKind) -> bool {
        let observed = self.observe();
        self.apply(WalletFact { observed, kind })
    }

    /// Query the provider once and apply what it says
    pub async fn poll(&self) -> ConnectionState {
        let (observed, prior) = self.observe_poll();

        let kind = match &self.provider {
            None => FactKind::Unavailable,
            Some(provider) => match provider.get_address().await {
                Ok(Some(address)) if !address.is_empty() => FactKind::Address(address),
                Ok(_) => FactKind::NoAddress { prior },
                Err(e) => {
                    warn!("Error checking wallet status: {}", e);
                    FactKind::Fault(MSG_WALLET_CHECK_FAILED.to_string())
                }
            },
        };

        self.apply(WalletFact { observed, kind });
        self.current()
    }

    /// Request a connection, then re-poll after the settle delay and once more
    /// after the recheck delay. A call made while another connect is running
    /// returns the current state without doing anything.
    pub async fn connect(&self) -> Result<ConnectionState, ConnectError> {
        let Some(provider) = self.provider.clone() else {
            warn!("Connect requested but no wallet provider is present");
            self.record(FactKind::Unavailable);
            return Err(ConnectError::ProviderUnavailable);
        };

        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Connect already in progress");
            return Ok(self.current());
        }
        let _guard = ConnectGuard(&self.connecting);

        info!("Attempting to connect wallet");
        self.record(FactKind::ConnectStarted);

        if let Err(e) = provider.connect().await {
            warn!("Error connecting wallet: {}", e);
            let message = if e.0.trim().is_empty() {
                MSG_CONNECT_FAILED.to_string()
            } else {
                e.0
            };
            self.record(FactKind::ConnectRejected(message.clone()));
            return Err(ConnectError::Rejected(message));
        }

        tokio::time::sleep(self.settle_delay).await;
        self.poll().await;
        tokio::time::sleep(self.recheck_delay).await;
        self.poll().await;

        self.record(FactKind::ConnectSettled);
        let state = self.current();
        info!("Wallet connection attempt completed: {:?}", state.status);
        Ok(state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
