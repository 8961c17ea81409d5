use thiserror::Error;

// ============================================================================
// Component Errors
// ============================================================================

/// Failure of a price lookup. Never fatal: the previous quote stays on display
/// and the refresh timer tries again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Transport failure or non-success HTTP status
    #[error("Network error fetching {source_name}: {reason}")]
    Network { source_name: String, reason: String },

    /// Response body could not be decoded
    #[error("Malformed response from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Response decoded but the expected field was absent
    #[error("Response from {source_name} is missing '{field}'")]
    MissingField { source_name: String, field: String },

    /// Response carried a zero, negative or non-finite value
    #[error("Invalid value from {source_name}: {value}")]
    InvalidValue { source_name: String, value: String },
}

impl FetchError {
    pub fn network(source_name: &str, reason: impl ToString) -> Self {
        Self::Network {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(source_name: &str, reason: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_field(source_name: &str, field: &str) -> Self {
        Self::MissingField {
            source_name: source_name.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_value(source_name: &str, value: impl ToString) -> Self {
        Self::InvalidValue {
            source_name: source_name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Wallet connection could not be established
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No wallet provider capability is present
    #[error("Wallet not available")]
    ProviderUnavailable,

    /// The provider refused or failed the connection request
    #[error("{0}")]
    Rejected(String),
}

/// A purchase was requested in a state that does not allow it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Please connect your wallet first")]
    WalletNotConnected,

    #[error("Amount must be a non-negative number, got '{0}'")]
    InvalidAmount(String),

    #[error("Engine has been disposed")]
    EngineDisposed,
}

/// Opaque failure reported by, or raised while driving, the purchase widget
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WidgetError {
    pub message: String,
}

impl WidgetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A status update arrived for a transaction the ledger has never seen
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Status update for unknown transaction '{id}'")]
pub struct OrderingWarning {
    pub id: String,
}

// ============================================================================
// Umbrella Error
// ============================================================================

/// Any failure that can surface from the reconciliation core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RampError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Widget(#[from] WidgetError),

    #[error(transparent)]
    Ordering(#[from] OrderingWarning),
}
