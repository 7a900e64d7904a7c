//! Latest-price cache written by the feed and read by the sampler

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::common::traits::PriceSink;
use crate::common::types::{CacheEntry, InstrumentToken, LtpTick};

/// Thread-safe map from instrument to its last observed price.
///
/// Entries are overwritten, never removed, for the lifetime of a session.
/// Each entry is replaced as a whole under the write lock so a reader never
/// sees a price paired with another update's timestamp.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<InstrumentToken, CacheEntry>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `token`
    pub fn update(&self, token: InstrumentToken, price: Decimal, updated_at: DateTime<Utc>) {
        self.entries.write().insert(
            token,
            CacheEntry {
                token,
                price,
                updated_at,
            },
        );
    }

    /// Latest entry for `token`, if any price has been seen
    pub fn read(&self, token: InstrumentToken) -> Option<CacheEntry> {
        self.entries.read().get(&token).copied()
    }

    /// Number of instruments with a cached price
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PriceSink for PriceCache {
    fn on_price(&self, tick: &LtpTick) {
        let at = tick.exchange_time.unwrap_or_else(Utc::now);
        self.update(tick.token, tick.last_price, at);
    }
}
