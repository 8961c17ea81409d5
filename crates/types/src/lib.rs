//! Shared types for the fiat on-ramp
//!
//! This crate provides the data model, error taxonomy and constants used by
//! the reconciliation engine and anything that reads its snapshots.

pub mod constants;
pub mod errors;
pub mod price;
pub mod purchase;
pub mod wallet;

// Re-export all public types
pub use constants::*;
pub use errors::*;
pub use price::*;
pub use purchase::*;
pub use wallet::*;

/// Result type alias using the umbrella error type
pub type RampResult<T> = std::result::Result<T, RampError>;
