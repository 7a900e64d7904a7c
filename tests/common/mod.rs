//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use straddle_tracker::common::traits::MarketDataSource;
use straddle_tracker::feed::{FeedConnection, FeedTransport, TransportEvent};
use straddle_tracker::tracker::Clock;
use straddle_tracker::{IndexName, Instrument, InstrumentToken, LegKind, Result, TrackerError};

/// Expiry used throughout the fixtures
pub fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 25).unwrap()
}

/// `h:m:s` IST on the fixture expiry date, as UTC
pub fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Kolkata
        .with_ymd_and_hms(2024, 1, 25, h, m, s)
        .unwrap()
        .with_timezone(&Utc)
}

/// Call token for a strike; the put is one higher
pub fn call_token(strike: Decimal) -> InstrumentToken {
    strike.trunc().to_u32().unwrap() * 10 + 1
}

pub fn put_token(strike: Decimal) -> InstrumentToken {
    call_token(strike) + 1
}

// ============================================================================
// Fake feed transport
// ============================================================================

/// What the next `connect` call does
#[derive(Debug, Clone)]
pub enum Script {
    /// Connection refused
    Refuse,
    /// Connection opens, delivers these events, then stays open
    Accept(Vec<TransportEvent>),
    /// Connection opens, delivers these events, then drops
    AcceptThenDrop(Vec<TransportEvent>),
}

#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub at: Instant,
    pub instruments: Vec<InstrumentToken>,
}

struct FakeState {
    scripts: VecDeque<Script>,
    fallback: Script,
    connects: Vec<ConnectRecord>,
    live: Option<mpsc::UnboundedSender<TransportEvent>>,
    closes: usize,
}

/// Scripted transport that records every connection attempt
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    fn with_fallback(fallback: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                scripts: VecDeque::new(),
                fallback,
                connects: Vec::new(),
                live: None,
                closes: 0,
            })),
        }
    }

    /// Every unscripted connect succeeds and stays open
    pub fn accepting() -> Self {
        Self::with_fallback(Script::Accept(Vec::new()))
    }

    /// Every unscripted connect is refused
    pub fn refusing() -> Self {
        Self::with_fallback(Script::Refuse)
    }

    pub fn push(&self, script: Script) -> &Self {
        self.state.lock().scripts.push_back(script);
        self
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.state.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Deliver an event on the live connection
    pub fn send(&self, event: TransportEvent) -> bool {
        match self.state.lock().live.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Gaps between consecutive connection attempts
    pub fn connect_gaps(&self) -> Vec<Duration> {
        self.connects()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }

    /// Wait (in tokio time) until at least `count` connects happened
    pub async fn wait_for_connects(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(3600), async {
            while self.connect_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connect count never reached");
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn connect(&self, instruments: &[InstrumentToken]) -> Result<Box<dyn FeedConnection>> {
        let mut state = self.state.lock();
        state.connects.push(ConnectRecord {
            at: Instant::now(),
            instruments: instruments.to_vec(),
        });
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| state.fallback.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        match script {
            Script::Refuse => {
                state.live = None;
                return Err(TrackerError::WebSocketConnection(
                    "connection refused".to_string(),
                ));
            }
            Script::Accept(events) => {
                for event in events {
                    let _ = tx.send(event);
                }
                state.live = Some(tx);
            }
            Script::AcceptThenDrop(events) => {
                for event in events {
                    let _ = tx.send(event);
                }
                state.live = None;
            }
        }

        Ok(Box::new(FakeConnection {
            events: rx,
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl FeedConnection for FakeConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.events.close();
        let mut state = self.state.lock();
        state.closes += 1;
        state.live = None;
    }
}

// ============================================================================
// Fake market data
// ============================================================================

struct MarketState {
    references: VecDeque<Decimal>,
    last_reference: Decimal,
    call_price: Decimal,
    put_price: Decimal,
    missing_strikes: Vec<Decimal>,
    reference_calls: usize,
    reference_failures: usize,
    reference_delay: Duration,
    lookup_delay: Duration,
    point_prices_fail: bool,
}

/// Market data source replaying a sequence of spot prices.
///
/// Each `reference_price` call consumes the next value; the last one repeats.
/// Contracts exist for every strike except those marked missing. Failures and
/// delays can be switched on through any clone while a tracker runs.
#[derive(Clone)]
pub struct FakeMarketData {
    state: Arc<Mutex<MarketState>>,
}

impl FakeMarketData {
    pub fn new(references: &[Decimal]) -> Self {
        let last_reference = references.last().copied().unwrap_or(dec!(23500));
        Self {
            state: Arc::new(Mutex::new(MarketState {
                references: references.iter().copied().collect(),
                last_reference,
                call_price: dec!(120.5),
                put_price: dec!(98.25),
                missing_strikes: Vec::new(),
                reference_calls: 0,
                reference_failures: 0,
                reference_delay: Duration::ZERO,
                lookup_delay: Duration::ZERO,
                point_prices_fail: false,
            })),
        }
    }

    pub fn with_leg_prices(self, call: Decimal, put: Decimal) -> Self {
        {
            let mut state = self.state.lock();
            state.call_price = call;
            state.put_price = put;
        }
        self
    }

    pub fn without_strike(self, strike: Decimal) -> Self {
        self.state.lock().missing_strikes.push(strike);
        self
    }

    pub fn reference_calls(&self) -> usize {
        self.state.lock().reference_calls
    }

    /// The next `count` spot lookups fail without consuming a value
    pub fn fail_references(&self, count: usize) {
        self.state.lock().reference_failures = count;
    }

    /// Every spot lookup sleeps this long (tokio time) before answering
    pub fn delay_references(&self, delay: Duration) {
        self.state.lock().reference_delay = delay;
    }

    /// Every contract lookup sleeps this long (tokio time) before answering
    pub fn delay_lookups(&self, delay: Duration) {
        self.state.lock().lookup_delay = delay;
    }

    pub fn fail_point_prices(&self, fail: bool) {
        self.state.lock().point_prices_fail = fail;
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl MarketDataSource for FakeMarketData {
    async fn reference_price(&self, _index: IndexName) -> Result<Decimal> {
        let (delay, answer) = {
            let mut state = self.state.lock();
            state.reference_calls += 1;
            let answer = if state.reference_failures > 0 {
                state.reference_failures -= 1;
                Err(TrackerError::InvalidResponse(
                    "quote endpoint returned 503".to_string(),
                ))
            } else {
                Ok(match state.references.pop_front() {
                    Some(price) => price,
                    None => state.last_reference,
                })
            };
            (state.reference_delay, answer)
        };
        pause(delay).await;
        answer
    }

    async fn find_instrument(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
        leg: LegKind,
    ) -> Result<Instrument> {
        let (delay, missing) = {
            let state = self.state.lock();
            (state.lookup_delay, state.missing_strikes.contains(&strike))
        };
        pause(delay).await;
        if missing {
            return Err(TrackerError::InstrumentNotFound(format!("{} {}", strike, leg)));
        }
        let token = match leg {
            LegKind::Call => call_token(strike),
            LegKind::Put => put_token(strike),
        };
        Ok(Instrument {
            token,
            trading_symbol: format!("{}24JAN{}{}", index, strike, leg.code()),
            exchange: index.option_exchange().to_string(),
            index,
            expiry,
            strike,
            leg,
        })
    }

    async fn point_prices(
        &self,
        instruments: &[Instrument],
    ) -> Result<HashMap<InstrumentToken, Decimal>> {
        let state = self.state.lock();
        if state.point_prices_fail {
            return Err(TrackerError::InvalidResponse(
                "quote response missing data".to_string(),
            ));
        }
        Ok(instruments
            .iter()
            .map(|inst| {
                let price = match inst.leg {
                    LegKind::Call => state.call_price,
                    LegKind::Put => state.put_price,
                };
                (inst.token, price)
            })
            .collect())
    }
}

// ============================================================================
// Clocks
// ============================================================================

/// Wall clock that follows tokio's (possibly paused) time
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}
