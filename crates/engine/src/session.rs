//! Purchase widget session control.
//!
//! At most one widget instance is live at a time. The instance is owned by an
//! [`ActiveSession`] whose `Drop` destroys it, so every exit path (explicit
//! close, replacement by a newer session, failed `show`, owner teardown)
//! releases the widget.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use onramp_types::{
    ConnectionState, NewPurchase, PreconditionError, PurchaseIntent, RampError, TransactionStatus, WidgetError,
};

use crate::config::{WidgetEnvironment, WidgetSettings};

// ============================================================================
// Widget Capability
// ============================================================================

/// Receives every raw event the widget emits
pub type WidgetEventHandler = Box<dyn Fn(Value) + Send + Sync>;

/// One embedded purchase widget instance
pub trait PurchaseWidget: Send {
    fn show(&mut self) -> Result<(), WidgetError>;

    fn destroy(&mut self) -> Result<(), WidgetError>;

    /// Subscribe to all events (`on('*', handler)`)
    fn on_any(&mut self, handler: WidgetEventHandler);
}

/// Constructs widget instances from a configuration bag
pub trait WidgetFactory: Send + Sync {
    fn create(&self, config: &WidgetConfig) -> Result<Box<dyn PurchaseWidget>, WidgetError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetEnvironmentConfig {
    pub environment: String,
}

/// Configuration bag handed to the widget constructor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub url: String,
    pub host_app_name: String,
    pub host_logo_url: String,
    pub default_flow: String,
    pub enabled_flows: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    pub swap_asset: String,
    pub fiat_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiat_value: Option<String>,
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_status_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<WidgetEnvironmentConfig>,
}

impl WidgetConfig {
    pub fn build(settings: &WidgetSettings, intent: &PurchaseIntent, connection: &ConnectionState) -> Self {
        let demo = settings.environment == WidgetEnvironment::Demo;

        Self {
            url: settings.url().to_string(),
            host_app_name: settings.host_label.clone(),
            host_logo_url: settings.host_logo_url.clone(),
            default_flow: settings.default_flow.clone(),
            enabled_flows: settings.enabled_flows.clone(),
            user_address: connection.address.clone(),
            swap_asset: settings.asset.clone(),
            fiat_currency: settings.fiat_currency.clone(),
            fiat_value: intent.fiat_value().map(|v| v.normalize().to_string()),
            variant: settings.variant.clone(),
            webhook_status_url: settings.webhook_status_url.clone(),
            api_key: settings.api_key.clone(),
            host_api_key: settings.api_key.clone(),
            config: demo.then(|| WidgetEnvironmentConfig {
                environment: "demo".to_string(),
            }),
        }
    }
}

// ============================================================================
// Event Normalization
// ============================================================================

const EVENT_WIDGET_OPEN: &str = "WIDGET_OPEN";
const EVENT_WIDGET_CONFIG_DONE: &str = "WIDGET_CONFIG_DONE";
const EVENT_WIDGET_CLOSE: &str = "WIDGET_CLOSE";
const EVENT_PURCHASE_CREATED: &str = "PURCHASE_CREATED";
const EVENT_PURCHASE_SUCCESSFUL: &str = "PURCHASE_SUCCESSFUL";
const EVENT_PURCHASE_FAILED: &str = "PURCHASE_FAILED";
const EVENT_WIDGET_ERROR: &str = "WIDGET_ERROR";

/// What a session knew when it was opened; fills gaps in creation events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub asset: String,
    pub fiat_currency: String,
    pub fiat_amount: Decimal,
}

/// The recognised subset of widget events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Opened,
    Closed,
    PurchaseCreated { id: String, purchase: NewPurchase },
    PurchaseSucceeded { id: String },
    PurchaseFailed { id: String },
    WidgetError { message: String },
}

impl WidgetEvent {
    /// Map a raw `{ type, payload }` event onto the closed event set.
    /// Unrecognised or incomplete events yield `None`.
    pub fn normalize(raw: &Value, context: &SessionContext) -> Option<Self> {
        let kind = raw.get("type").and_then(Value::as_str)?;
        let purchase = raw.get("payload").and_then(|p| p.get("purchase"));
        let purchase_id = purchase
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match kind {
            EVENT_WIDGET_OPEN | EVENT_WIDGET_CONFIG_DONE => Some(WidgetEvent::Opened),
            EVENT_WIDGET_CLOSE => Some(WidgetEvent::Closed),
            EVENT_PURCHASE_CREATED => {
                let purchase = purchase?;
                let created_at = Utc::now();
                let id = purchase_id.unwrap_or_else(|| created_at.timestamp_millis().to_string());

                Some(WidgetEvent::PurchaseCreated {
                    id,
                    purchase: NewPurchase {
                        asset: context.asset.clone(),
                        asset_amount: purchase.get("cryptoAmount").and_then(decimal_value).unwrap_or_default(),
                        fiat_amount: purchase
                            .get("fiatAmount")
                            .or_else(|| purchase.get("fiatValue"))
                            .and_then(decimal_value)
                            .unwrap_or(context.fiat_amount),
                        fiat_currency: context.fiat_currency.clone(),
                        created_at,
                    },
                })
            }
            EVENT_PURCHASE_SUCCESSFUL => purchase_id.map(|id| WidgetEvent::PurchaseSucceeded { id }),
            EVENT_PURCHASE_FAILED => purchase_id.map(|id| WidgetEvent::PurchaseFailed { id }),
            EVENT_WIDGET_ERROR => {
                let payload = raw.get("payload");
                let message = payload
                    .and_then(|p| p.get("message").or(Some(p)))
                    .map(|m| match m.as_str() {
                        Some(text) => text.to_string(),
                        None => m.to_string(),
                    })
                    .unwrap_or_else(|| "Widget error".to_string());
                Some(WidgetEvent::WidgetError { message })
            }
            _ => None,
        }
    }

    /// Ledger status implied by this event, if it is a status event
    pub fn status(&self) -> Option<(&str, TransactionStatus)> {
        match self {
            WidgetEvent::PurchaseSucceeded { id } => Some((id, TransactionStatus::Completed)),
            WidgetEvent::PurchaseFailed { id } => Some((id, TransactionStatus::Failed)),
            _ => None,
        }
    }
}

/// Accepts strings or numbers
fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n
            .to_string()
            .parse()
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        _ => None,
    }
}

// ============================================================================
// Controller
// ============================================================================

pub type SessionId = u64;

/// A normalized event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: WidgetEvent,
}

/// Ownership token for the live widget. Consumed by [`SessionController::close`].
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

struct ActiveSession {
    id: SessionId,
    widget: Box<dyn PurchaseWidget>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        match self.widget.destroy() {
            Ok(()) => debug!("Destroyed widget for session {}", self.id),
            Err(e) => error!("Error destroying widget for session {}: {}", self.id, e),
        }
    }
}

pub struct SessionController {
    factory: Arc<dyn WidgetFactory>,
    settings: WidgetSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Option<ActiveSession>,
    busy: bool,
    next_id: SessionId,
}

impl SessionController {
    pub fn new(
        factory: Arc<dyn WidgetFactory>,
        settings: WidgetSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            factory,
            settings,
            events,
            active: None,
            busy: false,
            next_id: 0,
        }
    }

    /// Construct and show a widget. Any session still open is released first.
    pub fn open(&mut self, intent: &PurchaseIntent, connection: &ConnectionState) -> Result<SessionHandle, RampError> {
        if !connection.is_connected() {
            return Err(PreconditionError::WalletNotConnected.into());
        }

        self.close_active();

        self.next_id += 1;
        let id = self.next_id;
        let config = WidgetConfig::build(&self.settings, intent, connection);
        info!(
            "Opening widget session {} (asset {}, fiat {}, has api key: {})",
            id,
            config.swap_asset,
            config.fiat_currency,
            config.api_key.is_some()
        );

        let mut widget = self.factory.create(&config).map_err(|e| {
            error!("Error initializing widget: {}", e);
            e
        })?;
        widget.on_any(self.event_handler(id, intent));

        // Owned from here on: dropping it destroys the widget.
        let mut session = ActiveSession { id, widget };
        self.busy = true;
        if let Err(e) = session.widget.show() {
            error!("Error showing widget for session {}: {}", id, e);
            self.busy = false;
            return Err(e.into());
        }

        self.active = Some(session);
        Ok(SessionHandle { id })
    }

    /// Release the session behind `handle`. A handle for a session that was
    /// already replaced is ignored.
    pub fn close(&mut self, handle: SessionHandle) {
        if self.active.as_ref().map(|s| s.id) == Some(handle.id) {
            info!("Closing widget session {}", handle.id);
            self.close_active();
        } else {
            debug!("Session {} already released", handle.id);
        }
    }

    /// Release whatever session is open
    pub fn close_active(&mut self) {
        if self.active.take().is_some() {
            self.busy = false;
        }
    }

    /// Track widget lifecycle. Only events of the live session move the busy
    /// flag; purchase events never do.
    pub fn on_event(&mut self, event: &SessionEvent) -> bool {
        if self.active_id() != Some(event.session) {
            return false;
        }
        match event.event {
            WidgetEvent::Closed | WidgetEvent::WidgetError { .. } if self.busy => {
                self.busy = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|s| s.id)
    }

    fn event_handler(&self, session: SessionId, intent: &PurchaseIntent) -> WidgetEventHandler {
        let context = SessionContext {
            asset: self.settings.asset.clone(),
            fiat_currency: self.settings.fiat_currency.clone(),
            fiat_amount: intent.fiat_amount,
        };
        let events = self.events.clone();

        Box::new(move |raw: Value| {
            let kind = raw.get("type").and_then(Value::as_str).unwrap_or("<untyped>").to_string();
            match WidgetEvent::normalize(&raw, &context) {
                Some(event) => {
                    debug!("Widget event {} for session {}", kind, session);
                    if events.send(SessionEvent { session, event }).is_err() {
                        debug!("Widget event {} dropped, engine stopped", kind);
                    }
                }
                None => debug!("Unhandled widget event: {}", kind),
            }
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("Session controller dropped with an open widget, releasing it");
            self.close_active();
        }
    }
}
