//! Trait definitions for the tracker's external collaborators
//!
//! Each seam is a trait so the tracker can be driven against the live broker
//! and a Postgres store in production, and against in-process fakes in tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

use super::errors::Result;
use super::types::{
    IndexName, Instrument, InstrumentToken, LegKind, LtpTick, PriceSample, SessionRecord,
};

/// Reference price and instrument lookups (point-in-time, not streamed)
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Current spot price of the index
    async fn reference_price(&self, index: IndexName) -> Result<Decimal>;

    /// Locate the option contract for one leg of the straddle
    async fn find_instrument(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
        leg: LegKind,
    ) -> Result<Instrument>;

    /// Last traded prices for the given contracts
    async fn point_prices(
        &self,
        instruments: &[Instrument],
    ) -> Result<HashMap<InstrumentToken, Decimal>>;
}

/// Persistence of sessions, samples and snapshot records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Open a session and return its record
    async fn create_session(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
    ) -> Result<SessionRecord>;

    /// Record one sample; implementations may buffer
    async fn add_tick(&self, session_id: i64, sample: &PriceSample) -> Result<()>;

    /// Write out anything buffered by `add_tick`
    async fn flush(&self) -> Result<()>;

    /// Record that the tracked strike moved
    async fn update_session_strike(&self, session_id: i64, strike: Decimal) -> Result<()>;

    /// Record where a snapshot was written
    async fn add_chart_record(&self, session_id: i64, path: &str) -> Result<()>;

    /// Close the session
    async fn end_session(&self, session_id: i64) -> Result<()>;
}

/// Inputs for one snapshot of the accumulated series
#[derive(Debug, Clone)]
pub struct SeriesSnapshot<'a> {
    pub timestamps: &'a [DateTime<chrono::Utc>],
    pub straddle_prices: &'a [Decimal],
    pub session_id: i64,
    pub index: IndexName,
    pub strike: Decimal,
    pub expiry_label: String,
}

/// Renders the accumulated series somewhere durable
pub trait SnapshotRenderer: Send + Sync {
    /// Render and return the storage path
    fn render_series(&self, series: &SeriesSnapshot<'_>) -> Result<PathBuf>;
}

/// Receives every emitted sample
pub trait TickObserver: Send {
    fn on_sample(&mut self, sample: &PriceSample, local_time: DateTime<Tz>);
}

/// Destination for prices decoded by the streaming feed
pub trait PriceSink: Send + Sync {
    fn on_price(&self, tick: &LtpTick);
}
