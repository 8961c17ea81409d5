//! Purchase intent and transaction records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{ASSET_DECIMALS, FIAT_DECIMALS};
use crate::errors::PreconditionError;
use crate::price::PriceQuote;

// ============================================================================
// Purchase Intent
// ============================================================================

/// Which side of the intent the user last edited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrivingField {
    Fiat,
    Asset,
}

/// User-declared purchase amounts. One side drives, the other is derived from
/// the rate at the moment of derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PurchaseIntent {
    pub fiat_amount: Decimal,
    pub asset_amount: Decimal,
    pub driving: Option<DrivingField>,
}

impl PurchaseIntent {
    /// Intent driven by a fiat amount
    pub fn with_fiat(fiat: Decimal, quote: Option<&PriceQuote>) -> Result<Self, PreconditionError> {
        let mut intent = Self::default();
        intent.set_fiat(fiat, quote)?;
        Ok(intent)
    }

    /// Parse a user-typed amount. Empty input means zero.
    pub fn parse_amount(input: &str) -> Result<Decimal, PreconditionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Decimal::ZERO);
        }
        let value: Decimal = trimmed
            .parse()
            .map_err(|_| PreconditionError::InvalidAmount(trimmed.to_string()))?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(PreconditionError::InvalidAmount(trimmed.to_string()));
        }
        Ok(value)
    }

    /// Set the fiat side and derive the asset side
    pub fn set_fiat(&mut self, fiat: Decimal, quote: Option<&PriceQuote>) -> Result<(), PreconditionError> {
        ensure_non_negative(fiat)?;
        self.fiat_amount = fiat;
        self.driving = Some(DrivingField::Fiat);
        if let Some(quote) = quote {
            self.rederive(quote);
        }
        Ok(())
    }

    /// Set the asset side and derive the fiat side
    pub fn set_asset(&mut self, asset: Decimal, quote: Option<&PriceQuote>) -> Result<(), PreconditionError> {
        ensure_non_negative(asset)?;
        self.asset_amount = asset;
        self.driving = Some(DrivingField::Asset);
        if let Some(quote) = quote {
            self.rederive(quote);
        }
        Ok(())
    }

    /// Recompute the derived side from the driving side. Returns whether
    /// anything changed.
    pub fn rederive(&mut self, quote: &PriceQuote) -> bool {
        match self.driving {
            Some(DrivingField::Fiat) => {
                let asset = quote.fiat_to_asset(self.fiat_amount).round_dp(ASSET_DECIMALS);
                let changed = asset != self.asset_amount;
                self.asset_amount = asset;
                changed
            }
            Some(DrivingField::Asset) => {
                let fiat = quote.asset_to_fiat(self.asset_amount).round_dp(FIAT_DECIMALS);
                let changed = fiat != self.fiat_amount;
                self.fiat_amount = fiat;
                changed
            }
            None => false,
        }
    }

    /// Fiat value to pre-fill in the widget, if the user entered one
    pub fn fiat_value(&self) -> Option<Decimal> {
        (!self.fiat_amount.is_zero()).then_some(self.fiat_amount)
    }
}

fn ensure_non_negative(value: Decimal) -> Result<(), PreconditionError> {
    if value < Decimal::ZERO {
        return Err(PreconditionError::InvalidAmount(value.to_string()));
    }
    Ok(())
}

// ============================================================================
// Transaction Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Fields of a newly created purchase, as reported by the widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchase {
    pub asset: String,
    pub asset_amount: Decimal,
    pub fiat_amount: Decimal,
    pub fiat_currency: String,
    pub created_at: DateTime<Utc>,
}

/// One purchase attempt tracked by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Widget-assigned purchase identifier
    pub id: String,
    pub asset: String,
    pub asset_amount: Decimal,
    pub fiat_amount: Decimal,
    pub fiat_currency: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn pending(id: impl Into<String>, purchase: NewPurchase) -> Self {
        Self {
            id: id.into(),
            asset: purchase.asset,
            asset_amount: purchase.asset_amount,
            fiat_amount: purchase.fiat_amount,
            fiat_currency: purchase.fiat_currency,
            status: TransactionStatus::Pending,
            created_at: purchase.created_at,
        }
    }
}
