//! Wallet connectivity state as exposed to the UI shell

use serde::{Deserialize, Serialize};

/// Coarse connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// The single authoritative view of the user's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionState {
    /// Address reported by the provider, present only while connected
    pub address: Option<String>,

    /// Current status
    pub status: ConnectionStatus,

    /// Message describing the most recent failure, cleared on success
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            status: ConnectionStatus::Connected,
            last_error: None,
        }
    }

    pub fn disconnected(last_error: Option<String>) -> Self {
        Self {
            address: None,
            status: ConnectionStatus::Disconnected,
            last_error,
        }
    }

    pub fn connecting() -> Self {
        Self {
            address: None,
            status: ConnectionStatus::Connecting,
            last_error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            address: None,
            status: ConnectionStatus::Error,
            last_error: Some(message.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
