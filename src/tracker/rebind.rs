//! ATM rebind controller
//!
//! Periodically re-resolves the ATM strike from the index spot price. When
//! the strike moves, the controller locates the new call/put contracts,
//! publishes them as the active pair, seeds the price cache from a point
//! lookup, resubscribes the feed and opens a short cooldown during which the
//! scheduler emits nothing.

use arc_swap::ArcSwap;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::clock::Clock;
use super::strike::resolve_index_strike;
use crate::common::errors::{Result, TrackerError};
use crate::common::traits::MarketDataSource;
use crate::common::types::{IndexName, LegKind, TrackedPair};
use crate::config::types::TrackerSettings;
use crate::feed::{PriceCache, StreamClient};

/// Result of one rebind check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebindOutcome {
    /// Check interval has not elapsed yet
    NotDue,
    /// Strike still matches the tracked pair
    Unchanged,
    /// A lookup failed; the old pair stays active until the next check
    Deferred(String),
    /// The tracked pair was replaced
    Rebound(Arc<TrackedPair>),
}

/// Owns the active [`TrackedPair`] and decides when to replace it
pub struct RebindController {
    market: Arc<dyn MarketDataSource>,
    index: IndexName,
    expiry: NaiveDate,
    check_interval: chrono::Duration,
    cooldown: chrono::Duration,
    lookup_timeout: Duration,
    active: Arc<ArcSwap<TrackedPair>>,
    last_check: DateTime<Utc>,
    cooldown_until: Option<DateTime<Utc>>,
    last_reference: Option<Decimal>,
    rebinds: u32,
}

impl RebindController {
    /// Resolve the initial ATM pair from the current spot price
    #[instrument(skip(market, settings))]
    pub async fn resolve_initial(
        market: Arc<dyn MarketDataSource>,
        index: IndexName,
        expiry: NaiveDate,
        settings: &TrackerSettings,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let lookup_timeout = settings.lookup_timeout();
        let reference = bounded(
            lookup_timeout,
            "reference price",
            market.reference_price(index),
        )
        .await?;
        let strike = resolve_index_strike(reference, index);
        let pair = locate_pair(market.as_ref(), lookup_timeout, index, expiry, strike).await?;

        info!(
            spot = %reference,
            strike = %strike,
            call = %pair.call.trading_symbol,
            put = %pair.put.trading_symbol,
            "Resolved ATM straddle"
        );

        Ok(Self {
            market,
            index,
            expiry,
            check_interval: to_chrono(settings.rebind_check_interval()),
            cooldown: to_chrono(settings.cooldown()),
            lookup_timeout,
            active: Arc::new(ArcSwap::from_pointee(pair)),
            last_check: now,
            cooldown_until: None,
            last_reference: Some(reference),
            rebinds: 0,
        })
    }

    /// Run a rebind check if one is due at `now`.
    ///
    /// The cache seed and the cooldown are stamped from `clock` after the
    /// lookups finish, not from `now`.
    pub async fn check(
        &mut self,
        now: DateTime<Utc>,
        clock: &dyn Clock,
        feed: &StreamClient,
        cache: &PriceCache,
    ) -> RebindOutcome {
        if now - self.last_check < self.check_interval {
            return RebindOutcome::NotDue;
        }
        self.last_check = now;

        let reference = match bounded(
            self.lookup_timeout,
            "reference price",
            self.market.reference_price(self.index),
        )
        .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!("Spot lookup failed, retrying next interval: {}", e);
                return RebindOutcome::Deferred(e.to_string());
            }
        };
        self.last_reference = Some(reference);

        let candidate = resolve_index_strike(reference, self.index);
        let current = self.active.load_full();
        if candidate == current.strike {
            debug!(spot = %reference, strike = %candidate, "ATM strike unchanged");
            return RebindOutcome::Unchanged;
        }

        let pair = match locate_pair(
            self.market.as_ref(),
            self.lookup_timeout,
            self.index,
            self.expiry,
            candidate,
        )
        .await
        {
            Ok(pair) => Arc::new(pair),
            Err(e) => {
                warn!(
                    strike = %candidate,
                    "Keeping {} straddle, contract lookup failed: {}",
                    current.strike,
                    e
                );
                return RebindOutcome::Deferred(e.to_string());
            }
        };

        info!(
            spot = %reference,
            from = %current.strike,
            to = %candidate,
            "ATM strike moved, rebinding"
        );

        self.active.store(pair.clone());
        if let Err(e) = self.seed_prices(&pair, cache, clock).await {
            warn!("Initial prices for new strike unavailable: {}", e);
        }
        feed.rebind(pair.tokens());
        let restarted = clock.now();
        self.cooldown_until = Some(restarted + self.cooldown);
        self.rebinds += 1;

        RebindOutcome::Rebound(pair)
    }

    /// Point-price lookup for both legs, written into the cache
    pub async fn seed_prices(
        &self,
        pair: &TrackedPair,
        cache: &PriceCache,
        clock: &dyn Clock,
    ) -> Result<()> {
        let legs = [pair.call.clone(), pair.put.clone()];
        let prices = bounded(
            self.lookup_timeout,
            "point prices",
            self.market.point_prices(&legs),
        )
        .await?;

        let now = clock.now();
        for leg in &legs {
            match prices.get(&leg.token) {
                Some(price) => cache.update(leg.token, *price, now),
                None => {
                    return Err(TrackerError::InstrumentNotFound(format!(
                        "no point price for {}",
                        leg.trading_symbol
                    )))
                }
            }
        }
        Ok(())
    }

    /// Whether sampling is suppressed at `now`
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Currently tracked pair
    pub fn active_pair(&self) -> Arc<TrackedPair> {
        self.active.load_full()
    }

    /// Spot price seen by the latest successful lookup
    pub fn last_reference(&self) -> Option<Decimal> {
        self.last_reference
    }

    /// Number of completed rebinds
    pub fn rebinds(&self) -> u32 {
        self.rebinds
    }
}

/// Look up both legs for `strike`
async fn locate_pair(
    market: &dyn MarketDataSource,
    lookup_timeout: Duration,
    index: IndexName,
    expiry: NaiveDate,
    strike: Decimal,
) -> Result<TrackedPair> {
    let call = bounded(
        lookup_timeout,
        "call contract",
        market.find_instrument(index, expiry, strike, LegKind::Call),
    )
    .await?;
    let put = bounded(
        lookup_timeout,
        "put contract",
        market.find_instrument(index, expiry, strike, LegKind::Put),
    )
    .await?;

    Ok(TrackedPair {
        index,
        expiry,
        strike,
        call,
        put,
    })
}

/// Apply the lookup timeout to a collaborator call
async fn bounded<T>(
    limit: Duration,
    what: &str,
    lookup: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, lookup)
        .await
        .map_err(|_| TrackerError::Timeout(format!("{} lookup exceeded {:?}", what, limit)))?
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1000))
}
