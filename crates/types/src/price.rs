//! Exchange-rate quote for the purchased asset

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where the currently displayed quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    /// Produced by the most recent refresh
    Live,
    /// Retained after a failed refresh, or seeded from configuration
    Cached,
}

/// Target-fiat price of one asset unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Always strictly positive
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub source: QuoteSource,
}

impl PriceQuote {
    /// Build a live quote; `None` unless `rate > 0`
    pub fn live(rate: Decimal, fetched_at: DateTime<Utc>) -> Option<Self> {
        Self::with_source(rate, fetched_at, QuoteSource::Live)
    }

    /// Build a cached quote; `None` unless `rate > 0`
    pub fn cached(rate: Decimal, fetched_at: DateTime<Utc>) -> Option<Self> {
        Self::with_source(rate, fetched_at, QuoteSource::Cached)
    }

    fn with_source(rate: Decimal, fetched_at: DateTime<Utc>, source: QuoteSource) -> Option<Self> {
        if rate <= Decimal::ZERO {
            return None;
        }
        Some(Self {
            rate,
            fetched_at,
            source,
        })
    }

    /// Same rate and timestamp, marked as retained
    pub fn to_cached(&self) -> Self {
        Self {
            source: QuoteSource::Cached,
            ..self.clone()
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.fetched_at)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        self.age(now) > Duration::seconds(max_age_secs)
    }

    /// Asset units bought by `fiat`, unrounded
    pub fn fiat_to_asset(&self, fiat: Decimal) -> Decimal {
        fiat / self.rate
    }

    /// Fiat cost of `asset` units, unrounded
    pub fn asset_to_fiat(&self, asset: Decimal) -> Decimal {
        asset * self.rate
    }
}
