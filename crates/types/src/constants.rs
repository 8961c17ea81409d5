//! Constants shared by the engine, its configuration defaults and its tests

// ============================================================================
// Schedules (milliseconds)
// ============================================================================

/// Interval between price refreshes
pub const PRICE_REFRESH_INTERVAL_MS: u64 = 15_000;

/// Interval between wallet address polls
pub const WALLET_POLL_INTERVAL_MS: u64 = 2_000;

/// Wait after a connection request before the first re-poll
pub const CONNECT_SETTLE_DELAY_MS: u64 = 1_500;

/// Wait between the first and second post-connect re-poll
pub const CONNECT_RECHECK_DELAY_MS: u64 = 1_000;

/// Age after which a quote is flagged stale in the snapshot
pub const QUOTE_STALE_AFTER_SECS: i64 = 300;

/// Timeout applied to each HTTP price lookup
pub const PRICE_REQUEST_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Assets
// ============================================================================

/// Asset purchased through the widget
pub const DEFAULT_ASSET_SYMBOL: &str = "CELO";

/// Price-source identifier of the asset
pub const DEFAULT_ASSET_ID: &str = "celo";

/// Fiat the asset price is quoted in by the first lookup
pub const DEFAULT_REFERENCE_FIAT: &str = "usd";

/// Fiat the user pays with
pub const DEFAULT_TARGET_FIAT: &str = "PLN";

/// Rate shown before the first live quote arrives (target fiat per asset unit)
pub const DEFAULT_SEED_RATE: &str = "1.15";

// ============================================================================
// Precision
// ============================================================================

/// Decimal places kept when deriving an asset amount
pub const ASSET_DECIMALS: u32 = 8;

/// Decimal places kept when deriving a fiat amount
pub const FIAT_DECIMALS: u32 = 2;

// ============================================================================
// Messages
// ============================================================================

pub const MSG_WALLET_UNAVAILABLE: &str = "Wallet not available";
pub const MSG_WALLET_DISCONNECTED: &str = "Wallet disconnected";
pub const MSG_WALLET_CHECK_FAILED: &str = "Failed to check wallet status";
pub const MSG_CONNECT_FAILED: &str = "Failed to connect wallet";
