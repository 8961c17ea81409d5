use std::fs;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use onramp_types::{
    CONNECT_RECHECK_DELAY_MS, CONNECT_SETTLE_DELAY_MS, DEFAULT_ASSET_ID, DEFAULT_ASSET_SYMBOL,
    DEFAULT_REFERENCE_FIAT, DEFAULT_SEED_RATE, DEFAULT_TARGET_FIAT, PRICE_REFRESH_INTERVAL_MS,
    PRICE_REQUEST_TIMEOUT_MS, QUOTE_STALE_AFTER_SECS, WALLET_POLL_INTERVAL_MS,
};

use crate::error::{EngineError, EngineResult};

const PRODUCTION_WIDGET_URL: &str = "https://app.ramp.network";
const DEMO_WIDGET_URL: &str = "https://ri-widget-staging.netlify.app";

/// Engine configuration loaded from a TOML file
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Price lookups and refresh schedule
    pub price: PriceConfig,

    /// Wallet polling and connect timing
    pub wallet: WalletConfig,

    /// Purchase widget configuration bag
    pub widget: WidgetSettings,
}

/// Price feed configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Asset identifier understood by the asset price endpoint
    pub asset_id: String,

    /// Fiat the asset price is requested in
    pub reference_fiat: String,

    /// Fiat the user pays with
    pub target_fiat: String,

    /// Asset price endpoint, queried with `ids` and `vs_currencies`
    pub asset_price_url: String,

    /// FX endpoint; the reference fiat is appended as the last path segment
    pub fx_url: String,

    /// Refresh interval in milliseconds
    pub refresh_interval_ms: u64,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Quote age after which the snapshot flags it stale (seconds)
    pub stale_after_secs: i64,

    /// Rate shown before the first live quote
    pub seed_rate: Option<Decimal>,
}

/// Wallet monitor timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Delay after a connect request before the first re-poll
    pub connect_settle_ms: u64,

    /// Delay between the first and second re-poll
    pub connect_recheck_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WidgetEnvironment {
    #[default]
    Production,
    Demo,
}

/// Static part of the widget configuration bag
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WidgetSettings {
    pub environment: WidgetEnvironment,
    pub host_label: String,
    pub host_logo_url: String,
    pub default_flow: String,
    pub enabled_flows: Vec<String>,
    pub asset: String,
    pub fiat_currency: String,
    pub variant: String,
    pub api_key: Option<String>,
    pub webhook_status_url: Option<String>,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Io(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.price.validate()?;
        self.wallet.validate()?;
        self.widget.validate()?;
        Ok(())
    }
}

impl PriceConfig {
    fn validate(&self) -> EngineResult<()> {
        require_non_empty("price.asset_id", &self.asset_id)?;
        require_non_empty("price.reference_fiat", &self.reference_fiat)?;
        require_non_empty("price.target_fiat", &self.target_fiat)?;
        require_url("price.asset_price_url", &self.asset_price_url)?;
        require_url("price.fx_url", &self.fx_url)?;
        require_positive("price.refresh_interval_ms", self.refresh_interval_ms)?;
        require_positive("price.request_timeout_ms", self.request_timeout_ms)?;

        if self.stale_after_secs <= 0 {
            return Err(EngineError::InvalidConfig(format!(
                "price.stale_after_secs must be greater than 0, got {}",
                self.stale_after_secs
            )));
        }

        if let Some(seed) = self.seed_rate {
            if seed <= Decimal::ZERO {
                return Err(EngineError::InvalidConfig(format!(
                    "price.seed_rate must be positive, got {}",
                    seed
                )));
            }
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl WalletConfig {
    fn validate(&self) -> EngineResult<()> {
        require_positive("wallet.poll_interval_ms", self.poll_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn connect_recheck(&self) -> Duration {
        Duration::from_millis(self.connect_recheck_ms)
    }
}

impl WidgetSettings {
    fn validate(&self) -> EngineResult<()> {
        require_non_empty("widget.host_label", &self.host_label)?;
        require_non_empty("widget.default_flow", &self.default_flow)?;
        require_non_empty("widget.asset", &self.asset)?;
        require_non_empty("widget.fiat_currency", &self.fiat_currency)?;

        if !self.enabled_flows.contains(&self.default_flow) {
            return Err(EngineError::InvalidConfig(format!(
                "widget.default_flow '{}' is not among enabled_flows {:?}",
                self.default_flow, self.enabled_flows
            )));
        }

        if let Some(url) = &self.webhook_status_url {
            require_url("widget.webhook_status_url", url)?;
        }

        Ok(())
    }

    /// Widget host for the configured environment
    pub fn url(&self) -> &'static str {
        match self.environment {
            WidgetEnvironment::Production => PRODUCTION_WIDGET_URL,
            WidgetEnvironment::Demo => DEMO_WIDGET_URL,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            asset_id: DEFAULT_ASSET_ID.to_string(),
            reference_fiat: DEFAULT_REFERENCE_FIAT.to_string(),
            target_fiat: DEFAULT_TARGET_FIAT.to_string(),
            asset_price_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            fx_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
            refresh_interval_ms: PRICE_REFRESH_INTERVAL_MS,
            request_timeout_ms: PRICE_REQUEST_TIMEOUT_MS,
            stale_after_secs: QUOTE_STALE_AFTER_SECS,
            seed_rate: DEFAULT_SEED_RATE.parse().ok(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WALLET_POLL_INTERVAL_MS,
            connect_settle_ms: CONNECT_SETTLE_DELAY_MS,
            connect_recheck_ms: CONNECT_RECHECK_DELAY_MS,
        }
    }
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            environment: WidgetEnvironment::Production,
            host_label: "Celo Mini App".to_string(),
            host_logo_url: "/logo.png".to_string(),
            default_flow: "ONRAMP".to_string(),
            enabled_flows: vec!["ONRAMP".to_string()],
            asset: DEFAULT_ASSET_SYMBOL.to_string(),
            fiat_currency: DEFAULT_TARGET_FIAT.to_string(),
            variant: "auto".to_string(),
            api_key: None,
            webhook_status_url: None,
        }
    }
}

/// Write an example configuration file
pub fn create_example_config(path: impl AsRef<Path>) -> EngineResult<()> {
    let mut example = EngineConfig::default();
    example.widget.environment = WidgetEnvironment::Demo;
    example.widget.webhook_status_url = Some("https://example.com/api/ramp/webhook".to_string());
    example.save(path)
}

fn require_non_empty(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidConfig(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> EngineResult<()> {
    if value == 0 {
        return Err(EngineError::InvalidConfig(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> EngineResult<()> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(EngineError::InvalidConfig(format!(
            "{} must be an http(s) URL, got '{}'",
            field, value
        )));
    }
    Ok(())
}
