//! Fixed-rate sampling scheduler
//!
//! [`StraddleTracker`] drives one session: it resolves the initial pair,
//! opens the feed, and then on every period reads both legs from the price
//! cache, emits a straddle sample, and periodically snapshots the series.
//! The stream feeds the cache on its own task, so a slow or reconnecting
//! feed never blocks sampling.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::hours::TradingWindow;
use super::rebind::{RebindController, RebindOutcome};
use super::session::{EndReason, SessionState, SessionSummary, ShutdownSignal};
use crate::common::errors::{Result, TrackerError};
use crate::common::traits::{
    MarketDataSource, PriceSink, SeriesSnapshot, SnapshotRenderer, TickObserver, TickStore,
};
use crate::common::types::{FeedStatus, IndexName, PriceSample, SessionRecord, TrackedPair};
use crate::config::types::TrackerSettings;
use crate::feed::{PriceCache, StreamClient};

/// Why a period produced no sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Session not running
    NotRunning,
    /// Inside the post-rebind cooldown
    Cooldown,
    /// A leg has no usable price yet
    MissingPrice,
}

/// Result of one scheduler period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Emitted(PriceSample),
    Skipped(SkipReason),
    /// The pair was replaced this period
    Rebound { strike: Decimal },
    Ended(EndReason),
}

/// What to track
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub index: IndexName,
    pub expiry: NaiveDate,
    pub settings: TrackerSettings,
}

pub struct StraddleTracker {
    index: IndexName,
    expiry: NaiveDate,
    settings: TrackerSettings,
    window: TradingWindow,
    market: Arc<dyn MarketDataSource>,
    store: Arc<dyn TickStore>,
    snapshots: Option<Arc<dyn SnapshotRenderer>>,
    observer: Option<Box<dyn TickObserver>>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    cache: Arc<PriceCache>,
    feed: StreamClient,
    rebind: Option<RebindController>,
    state: SessionState,
    session: Option<SessionRecord>,
    timestamps: Vec<DateTime<Utc>>,
    straddle_prices: Vec<Decimal>,
    last_snapshot: Option<DateTime<Utc>>,
    samples: u64,
    end_reason: Option<EndReason>,
}

impl StraddleTracker {
    pub fn new(
        config: TrackerConfig,
        market: Arc<dyn MarketDataSource>,
        store: Arc<dyn TickStore>,
        feed: StreamClient,
    ) -> Result<Self> {
        let window = TradingWindow::from_settings(&config.settings)?;
        Ok(Self {
            index: config.index,
            expiry: config.expiry,
            settings: config.settings,
            window,
            market,
            store,
            snapshots: None,
            observer: None,
            clock: Arc::new(SystemClock),
            shutdown: ShutdownSignal::new(),
            cache: Arc::new(PriceCache::new()),
            feed,
            rebind: None,
            state: SessionState::Created,
            session: None,
            timestamps: Vec::new(),
            straddle_prices: Vec::new(),
            last_snapshot: None,
            samples: 0,
            end_reason: None,
        })
    }

    pub fn with_snapshots(mut self, renderer: Arc<dyn SnapshotRenderer>) -> Self {
        self.snapshots = Some(renderer);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TickObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the session to completion
    pub async fn run(&mut self) -> Result<SessionSummary> {
        let now = self.clock.now();
        if self.shutdown.is_triggered() {
            self.finish(EndReason::Cancelled).await;
            return Ok(self.summary());
        }
        if !self.window.contains(now) {
            info!(
                local_time = %self.window.local(now).format("%H:%M:%S"),
                "Outside trading hours, not starting"
            );
            self.finish(EndReason::MarketClosed).await;
            return Ok(self.summary());
        }

        self.start().await?;

        let mut ticker = interval(self.settings.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; give the feed one period first.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let TickOutcome::Ended(_) = self.tick().await {
                break;
            }
        }

        Ok(self.summary())
    }

    /// Resolve the pair, open the session and start the feed
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(TrackerError::InvalidState(format!(
                "cannot start a session in state {:?}",
                self.state
            )));
        }

        let now = self.clock.now();
        let controller = RebindController::resolve_initial(
            self.market.clone(),
            self.index,
            self.expiry,
            &self.settings,
            now,
        )
        .await?;
        let pair = controller.active_pair();
        controller.seed_prices(&pair, &self.cache, self.clock.as_ref()).await?;

        let session = self
            .store
            .create_session(self.index, self.expiry, pair.strike)
            .await?;
        info!(
            session_id = session.id,
            index = %self.index,
            strike = %pair.strike,
            expiry = %pair.expiry_label(),
            "Session started"
        );

        let sink: Arc<dyn PriceSink> = self.cache.clone();
        self.feed.start(pair.tokens(), sink)?;

        self.session = Some(session);
        self.rebind = Some(controller);
        self.last_snapshot = Some(now);
        self.state = SessionState::Running;
        Ok(())
    }

    /// One scheduler period
    pub async fn tick(&mut self) -> TickOutcome {
        match self.state {
            SessionState::Created => return TickOutcome::Skipped(SkipReason::NotRunning),
            SessionState::Ended => {
                return TickOutcome::Ended(self.end_reason.unwrap_or(EndReason::Cancelled))
            }
            SessionState::Running => {}
        }

        let now = self.clock.now();
        if self.shutdown.is_triggered() {
            info!("Shutdown requested");
            return self.end(EndReason::Cancelled).await;
        }
        if !self.window.contains(now) {
            info!("Market closed");
            return self.end(EndReason::MarketClosed).await;
        }
        if let FeedStatus::Exhausted { attempts } = self.feed.status() {
            error!("{}, ending session", TrackerError::FeedExhausted(attempts));
            return self.end(EndReason::FeedExhausted).await;
        }

        let outcome = match self.rebind.as_mut() {
            Some(controller) => {
                controller
                    .check(now, self.clock.as_ref(), &self.feed, &self.cache)
                    .await
            }
            None => return TickOutcome::Skipped(SkipReason::NotRunning),
        };
        if let RebindOutcome::Rebound(pair) = outcome {
            self.record_strike(pair.strike).await;
            return TickOutcome::Rebound {
                strike: pair.strike,
            };
        }

        let Some(controller) = self.rebind.as_ref() else {
            return TickOutcome::Skipped(SkipReason::NotRunning);
        };
        if controller.in_cooldown(now) {
            return TickOutcome::Skipped(SkipReason::Cooldown);
        }

        let pair = controller.active_pair();
        let reference = controller.last_reference();
        let (call, put) = match (self.cache.read(pair.call.token), self.cache.read(pair.put.token))
        {
            (Some(call), Some(put)) if call.price > Decimal::ZERO && put.price > Decimal::ZERO => {
                (call.price, put.price)
            }
            (call, put) => {
                debug!(
                    call = ?call.map(|e| e.price),
                    put = ?put.map(|e| e.price),
                    "Leg price unavailable, skipping sample"
                );
                return TickOutcome::Skipped(SkipReason::MissingPrice);
            }
        };

        let sample = PriceSample::new(call, put, reference, now);
        self.record_sample(&sample).await;
        self.maybe_snapshot(now).await;

        TickOutcome::Emitted(sample)
    }

    /// Stop the feed, flush, snapshot and close the session. Idempotent.
    pub async fn finish(&mut self, reason: EndReason) {
        if self.state == SessionState::Ended {
            return;
        }

        self.feed.stop();
        self.feed.join().await;

        if let Some(session_id) = self.session.as_ref().map(|s| s.id) {
            if let Err(e) = self.store.flush().await {
                warn!("Final flush failed: {}", e);
            }
            if self.samples > 0 {
                self.snapshot().await;
            }
            if let Err(e) = self.store.end_session(session_id).await {
                warn!("Failed to close session {}: {}", session_id, e);
            }
        }

        let now = self.clock.now();
        if let Some(session) = self.session.as_mut() {
            session.ended_at.get_or_insert(now);
        }

        self.state = SessionState::Ended;
        self.end_reason = Some(reason);
        info!(
            reason = %reason,
            samples = self.samples,
            "Session ended"
        );
    }

    async fn end(&mut self, reason: EndReason) -> TickOutcome {
        self.finish(reason).await;
        TickOutcome::Ended(reason)
    }

    async fn record_strike(&mut self, strike: Decimal) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.strike = strike;
        if let Err(e) = self.store.update_session_strike(session.id, strike).await {
            warn!("Failed to record strike change: {}", e);
        }
    }

    async fn record_sample(&mut self, sample: &PriceSample) {
        self.timestamps.push(sample.timestamp);
        self.straddle_prices.push(sample.straddle_price);
        self.samples += 1;

        if let Some(session) = self.session.as_ref() {
            if let Err(e) = self.store.add_tick(session.id, sample).await {
                warn!("Failed to store sample: {}", e);
            }
        }

        if let Some(observer) = self.observer.as_mut() {
            observer.on_sample(sample, self.window.local(sample.timestamp));
        }
    }

    async fn maybe_snapshot(&mut self, now: DateTime<Utc>) {
        let due = match self.last_snapshot {
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= self.settings.snapshot_interval())
                .unwrap_or(false),
            None => true,
        };
        if due {
            self.last_snapshot = Some(now);
            self.snapshot().await;
        }
    }

    async fn snapshot(&mut self) {
        let (Some(renderer), Some(session)) = (self.snapshots.as_ref(), self.session.as_ref())
        else {
            return;
        };
        if self.timestamps.is_empty() {
            return;
        }

        if let Err(e) = self.store.flush().await {
            warn!("Flush before snapshot failed: {}", e);
        }

        let series = SeriesSnapshot {
            timestamps: &self.timestamps,
            straddle_prices: &self.straddle_prices,
            session_id: session.id,
            index: self.index,
            strike: session.strike,
            expiry_label: self.expiry.format("%d-%b-%Y").to_string(),
        };
        match renderer.render_series(&series) {
            Ok(path) => {
                let path = path.to_string_lossy().into_owned();
                info!("Snapshot saved: {}", path);
                if let Err(e) = self.store.add_chart_record(session.id, &path).await {
                    warn!("Failed to record snapshot: {}", e);
                }
            }
            Err(e) => warn!("Snapshot failed: {}", e),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session.as_ref().map(|s| s.id),
            samples: self.samples,
            rebinds: self.rebind.as_ref().map_or(0, |r| r.rebinds()),
            final_strike: self.session.as_ref().map(|s| s.strike),
            end_reason: self.end_reason,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionRecord> {
        self.session.as_ref()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn active_pair(&self) -> Option<Arc<TrackedPair>> {
        self.rebind.as_ref().map(|r| r.active_pair())
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.feed.status()
    }

    pub fn cache(&self) -> Arc<PriceCache> {
        self.cache.clone()
    }
}
