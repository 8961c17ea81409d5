//! Two-hop price aggregation with single-flight refresh.
//!
//! Lookup #1 prices the asset in a reference fiat, lookup #2 converts the
//! reference fiat into the target fiat. Both must succeed for the quote to be
//! replaced; otherwise the previous quote stays on display marked `Cached`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use onramp_types::{FetchError, PriceQuote};

/// The two external rate lookups
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Asset price in the reference fiat
    async fn asset_price(&self) -> Result<Decimal, FetchError>;

    /// Units of target fiat per unit of reference fiat
    async fn fiat_rate(&self) -> Result<Decimal, FetchError>;
}

/// Combines the two lookups into one asset-to-target-fiat quote
pub struct PriceFeedAggregator {
    source: Arc<dyn PriceSource>,
    current: RwLock<Option<PriceQuote>>,
    in_flight: AtomicBool,
}

/// Exclusive claim on the aggregator's single refresh slot.
///
/// The slot is released when the flight is dropped, including on
/// cancellation, so anything done before the drop (publishing the result)
/// cannot be overtaken by a newer refresh.
pub struct PriceFlight<'a> {
    aggregator: &'a PriceFeedAggregator,
}

impl Drop for PriceFlight<'_> {
    fn drop(&mut self) {
        self.aggregator.in_flight.store(false, Ordering::Release);
    }
}

impl PriceFlight<'_> {
    /// Fetch both legs and replace the quote. On failure the previous quote
    /// is kept (as `Cached`).
    pub async fn run(&self) -> Result<PriceQuote, FetchError> {
        let aggregator = self.aggregator;
        match aggregator.fetch_quote().await {
            Ok(quote) => {
                *aggregator.write_current() = Some(quote.clone());
                info!("Updated price: 1 unit = {} (live)", quote.rate.round_dp(4));
                Ok(quote)
            }
            Err(e) => {
                warn!("Price refresh failed, keeping previous quote: {}", e);
                let mut current = aggregator.write_current();
                if let Some(previous) = current.as_ref() {
                    *current = Some(previous.to_cached());
                }
                Err(e)
            }
        }
    }
}

impl PriceFeedAggregator {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Start from a seeded quote shown until the first live fetch lands
    pub fn with_seed(source: Arc<dyn PriceSource>, seed: Option<PriceQuote>) -> Self {
        let aggregator = Self::new(source);
        if let Some(seed) = seed {
            *aggregator.write_current() = Some(seed.to_cached());
        }
        aggregator
    }

    /// Claim the refresh slot. `None` while another refresh holds it.
    pub fn try_begin(&self) -> Option<PriceFlight<'_>> {
        match self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(PriceFlight { aggregator: self }),
            Err(_) => {
                debug!("Price refresh already in flight, skipping");
                None
            }
        }
    }

    /// Fetch both legs and replace the quote.
    ///
    /// Returns `Ok(None)` without touching the network when another refresh is
    /// still in flight. On failure the previous quote is kept (as `Cached`).
    pub async fn refresh(&self) -> Result<Option<PriceQuote>, FetchError> {
        let Some(flight) = self.try_begin() else {
            return Ok(None);
        };
        flight.run().await.map(Some)
    }

    async fn fetch_quote(&self) -> Result<PriceQuote, FetchError> {
        let asset_price = self.source.asset_price().await?;
        let fiat_rate = self.source.fiat_rate().await?;
        let rate = asset_price * fiat_rate;

        debug!("Asset price {} x fiat rate {} = {}", asset_price, fiat_rate, rate);

        PriceQuote::live(rate, Utc::now()).ok_or_else(|| FetchError::invalid_value("aggregate", rate))
    }

    /// Most recent quote, if any fetch has succeeded or a seed was given
    pub fn current_quote(&self) -> Option<PriceQuote> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<PriceQuote>> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
