//! Straddle Tracker Library
//!
//! Tracks the at-the-money straddle of an index option chain in real time:
//! a reconnecting tick stream feeds a price cache, and a fixed-rate scheduler
//! samples call + put, follows the ATM strike as the index moves, persists
//! samples and writes periodic snapshots.

pub mod common;
pub mod config;
pub mod feed;
pub mod kite;
pub mod snapshot;
pub mod storage;
pub mod tracker;

// Re-export commonly used types
pub use common::errors::{Result, TrackerError};
pub use common::traits::{MarketDataSource, PriceSink, SnapshotRenderer, TickObserver, TickStore};
pub use common::types::{
    FeedStatus, IndexName, Instrument, InstrumentToken, LegKind, LtpTick, PriceSample,
    SessionRecord, TrackedPair,
};
pub use config::types::AppConfig;
pub use feed::{PriceCache, ReconnectPolicy, StreamClient};
pub use kite::{KiteRestClient, KiteTickerTransport};
pub use snapshot::JsonSnapshotWriter;
pub use storage::{MemoryTickStore, PgTickStore};
pub use tracker::{EndReason, SessionSummary, ShutdownSignal, StraddleTracker, TrackerConfig};
