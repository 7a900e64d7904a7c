//! Domain types shared by the feed, the tracker and its collaborators

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::errors::TrackerError;

/// Exchange-assigned numeric instrument identity used by the streaming feed
pub type InstrumentToken = u32;

/// Index whose ATM straddle is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexName {
    Nifty,
    Sensex,
}

impl IndexName {
    /// Distance between listed strikes
    pub fn strike_interval(&self) -> u32 {
        match self {
            IndexName::Nifty => 50,
            IndexName::Sensex => 100,
        }
    }

    /// Quote key for the spot (reference) price
    pub fn quote_symbol(&self) -> &'static str {
        match self {
            IndexName::Nifty => "NSE:NIFTY 50",
            IndexName::Sensex => "BSE:SENSEX",
        }
    }

    /// Exchange segment the index options are listed on
    pub fn option_exchange(&self) -> &'static str {
        match self {
            IndexName::Nifty => "NFO",
            IndexName::Sensex => "BFO",
        }
    }

    /// Underlying name as it appears in the instrument dump
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::Nifty => "NIFTY",
            IndexName::Sensex => "SENSEX",
        }
    }
}

impl std::fmt::Display for IndexName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndexName {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NIFTY" => Ok(IndexName::Nifty),
            "SENSEX" => Ok(IndexName::Sensex),
            other => Err(TrackerError::Configuration(format!(
                "unknown index: {}",
                other
            ))),
        }
    }
}

/// One side of the straddle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegKind {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl LegKind {
    /// Instrument type code used by the exchange
    pub fn code(&self) -> &'static str {
        match self {
            LegKind::Call => "CE",
            LegKind::Put => "PE",
        }
    }
}

impl std::fmt::Display for LegKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A listed option contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Streaming identity
    pub token: InstrumentToken,
    /// Exchange trading symbol, e.g. NIFTY24JAN23500CE
    pub trading_symbol: String,
    /// Exchange segment (NFO/BFO)
    pub exchange: String,
    /// Underlying index
    pub index: IndexName,
    /// Contract expiry
    pub expiry: NaiveDate,
    /// Strike price
    pub strike: Decimal,
    /// Call or put
    pub leg: LegKind,
}

impl Instrument {
    /// Key used by point-price (quote) lookups
    pub fn quote_key(&self) -> String {
        format!("{}:{}", self.exchange, self.trading_symbol)
    }
}

/// The two instruments currently tracked for a session.
///
/// Never mutated in place; a rebind publishes a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPair {
    pub index: IndexName,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub call: Instrument,
    pub put: Instrument,
}

impl TrackedPair {
    /// Tokens to subscribe for this pair
    pub fn tokens(&self) -> Vec<InstrumentToken> {
        vec![self.call.token, self.put.token]
    }

    /// Expiry formatted the way charts label it (07-Mar-2024)
    pub fn expiry_label(&self) -> String {
        self.expiry.format("%d-%b-%Y").to_string()
    }
}

/// Last-traded price delivered by the streaming feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtpTick {
    pub token: InstrumentToken,
    pub last_price: Decimal,
    /// Exchange timestamp when the packet carries one
    pub exchange_time: Option<DateTime<Utc>>,
}

/// Latest observed price for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub token: InstrumentToken,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// One scheduler-period observation of the straddle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub call_price: Decimal,
    pub put_price: Decimal,
    /// call + put
    pub straddle_price: Decimal,
    /// Spot price of the index when known
    pub reference_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl PriceSample {
    /// Build a sample, deriving the straddle price from the legs
    pub fn new(
        call_price: Decimal,
        put_price: Decimal,
        reference_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            call_price,
            put_price,
            straddle_price: call_price + put_price,
            reference_price,
            timestamp,
        }
    }
}

/// Connection status of the streaming feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not started yet
    Idle,
    /// Connection attempt in flight
    Connecting,
    /// Subscribed and receiving
    Connected,
    /// Waiting before the next connection attempt
    Reconnecting { attempt: u32, delay: Duration },
    /// Stopped on request
    Stopped,
    /// Gave up after the reconnect budget ran out
    Exhausted { attempts: u32 },
}

impl FeedStatus {
    /// Whether the feed has permanently given up
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FeedStatus::Exhausted { .. })
    }
}

/// Persisted description of one tracking run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub index: IndexName,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, at shutdown
    pub ended_at: Option<DateTime<Utc>>,
}
