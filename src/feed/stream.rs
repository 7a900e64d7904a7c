//! Reconnecting stream client
//!
//! Owns one logical subscription to the push feed. A single background task
//! connects, pumps ticks into a [`PriceSink`], and on an unexpected drop
//! reconnects with exponential backoff. The instrument set is published
//! through an `ArcSwap` and read at connect time, so a rebind issued while a
//! reconnect is pending always lands on the latest set.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::transport::{FeedConnection, FeedTransport, TransportEvent};
use crate::common::errors::{Result, TrackerError};
use crate::common::traits::PriceSink;
use crate::common::types::{FeedStatus, InstrumentToken};

/// Instruction from the owner to the feed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// Keep running; a new generation means "resubscribe now"
    Run { generation: u64 },
    Stop,
}

/// State shared between the client handle and its task
#[derive(Debug)]
struct Shared {
    should_run: AtomicBool,
    desired: ArcSwap<Vec<InstrumentToken>>,
    attempts: AtomicU32,
}

/// Why a connection ended
enum Outcome {
    Stopped,
    Resubscribe,
    Dropped(String),
}

/// Self-healing subscription to a push feed
pub struct StreamClient {
    transport: Arc<dyn FeedTransport>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    control_tx: watch::Sender<Control>,
    status_tx: Arc<watch::Sender<FeedStatus>>,
    status_rx: watch::Receiver<FeedStatus>,
    task: Option<JoinHandle<()>>,
}

impl StreamClient {
    /// Create an idle client; nothing connects until [`start`](Self::start)
    pub fn new(transport: Arc<dyn FeedTransport>, policy: ReconnectPolicy) -> Self {
        let (control_tx, _) = watch::channel(Control::Run { generation: 0 });
        let (status_tx, status_rx) = watch::channel(FeedStatus::Idle);
        Self {
            transport,
            policy,
            connect_timeout: Duration::from_secs(10),
            shared: Arc::new(Shared {
                should_run: AtomicBool::new(false),
                desired: ArcSwap::from_pointee(Vec::new()),
                attempts: AtomicU32::new(0),
            }),
            control_tx,
            status_tx: Arc::new(status_tx),
            status_rx,
            task: None,
        }
    }

    /// Set the timeout applied to each connection attempt
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Begin connecting in the background and return immediately
    pub fn start(
        &mut self,
        instruments: Vec<InstrumentToken>,
        sink: Arc<dyn PriceSink>,
    ) -> Result<()> {
        if self.task.is_some() {
            return Err(TrackerError::InvalidState(
                "stream client already started".to_string(),
            ));
        }

        info!(instruments = ?instruments, "Starting feed subscription");
        self.shared.desired.store(Arc::new(instruments));
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.should_run.store(true, Ordering::SeqCst);
        self.control_tx.send_replace(Control::Run { generation: 0 });

        let task = FeedTask {
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            sink,
            policy: self.policy,
            connect_timeout: self.connect_timeout,
            control: self.control_tx.subscribe(),
            status: self.status_tx.clone(),
        };
        self.task = Some(tokio::spawn(task.run()));
        Ok(())
    }

    /// Replace the subscribed instrument set.
    ///
    /// The live connection is torn down and a new one is opened for
    /// `instruments`. A reconnect already waiting out its backoff is cut
    /// short and connects with the new set.
    pub fn rebind(&self, instruments: Vec<InstrumentToken>) {
        info!(instruments = ?instruments, "Rebinding feed subscription");
        self.shared.desired.store(Arc::new(instruments));
        if !self.shared.should_run.load(Ordering::SeqCst) {
            return;
        }
        self.control_tx.send_modify(|control| {
            if let Control::Run { generation } = control {
                *generation += 1;
            }
        });
    }

    /// Stop the feed without triggering a reconnect. Safe to call repeatedly.
    pub fn stop(&self) {
        // The flag flips before the transport is closed so the resulting close
        // is never mistaken for a drop.
        if self.shared.should_run.swap(false, Ordering::SeqCst) {
            info!("Stopping feed subscription");
            self.control_tx.send_replace(Control::Stop);
        }
    }

    /// Wait for the background task to finish after [`stop`](Self::stop)
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Feed task ended abnormally: {}", e);
            }
        }
    }

    /// Current connection status
    pub fn status(&self) -> FeedStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch connection status changes
    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Consecutive failed attempts since the last received message
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Instrument set the next connection will subscribe to
    pub fn instruments(&self) -> Arc<Vec<InstrumentToken>> {
        self.shared.desired.load_full()
    }

    pub fn is_running(&self) -> bool {
        self.shared.should_run.load(Ordering::SeqCst)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the background task owns
struct FeedTask {
    transport: Arc<dyn FeedTransport>,
    shared: Arc<Shared>,
    sink: Arc<dyn PriceSink>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    control: watch::Receiver<Control>,
    status: Arc<watch::Sender<FeedStatus>>,
}

impl FeedTask {
    async fn run(mut self) {
        let mut backoff = ReconnectState::new(self.policy);

        loop {
            if !self.shared.should_run.load(Ordering::SeqCst) {
                break;
            }

            // Read the set now, not when the reconnect was scheduled.
            let instruments = self.shared.desired.load_full();
            self.status.send_replace(FeedStatus::Connecting);
            debug!(instruments = ?instruments, "Connecting to feed");

            let connected = timeout(self.connect_timeout, self.transport.connect(&instruments)).await;
            let outcome = match connected {
                Ok(Ok(mut conn)) => {
                    info!("Feed connected");
                    self.status.send_replace(FeedStatus::Connected);
                    self.pump(&mut conn, &mut backoff).await
                }
                Ok(Err(e)) => Outcome::Dropped(e.to_string()),
                Err(_) => Outcome::Dropped("connect timed out".to_string()),
            };

            match outcome {
                Outcome::Stopped => break,
                Outcome::Resubscribe => continue,
                Outcome::Dropped(reason) => {
                    if !self.shared.should_run.load(Ordering::SeqCst) {
                        break;
                    }

                    let Some((attempt, delay)) = backoff.on_failure() else {
                        error!(
                            attempts = backoff.attempts(),
                            "Feed reconnect budget exhausted: {}", reason
                        );
                        self.status.send_replace(FeedStatus::Exhausted {
                            attempts: backoff.attempts(),
                        });
                        return;
                    };

                    self.shared.attempts.store(attempt, Ordering::SeqCst);
                    warn!(attempt, ?delay, "Feed dropped ({}), reconnecting", reason);
                    self.status
                        .send_replace(FeedStatus::Reconnecting { attempt, delay });

                    tokio::select! {
                        _ = sleep(delay) => {}
                        changed = self.control.changed() => {
                            if changed.is_err() || *self.control.borrow_and_update() == Control::Stop {
                                break;
                            }
                            debug!("Resubscribe requested during backoff");
                        }
                    }
                }
            }
        }

        self.status.send_replace(FeedStatus::Stopped);
        info!("Feed task stopped");
    }

    async fn pump(
        &mut self,
        conn: &mut Box<dyn FeedConnection>,
        backoff: &mut ReconnectState,
    ) -> Outcome {
        loop {
            tokio::select! {
                event = conn.next_event() => match event {
                    Some(TransportEvent::Ticks(ticks)) => {
                        backoff.on_message();
                        self.shared.attempts.store(0, Ordering::SeqCst);
                        for tick in &ticks {
                            self.sink.on_price(tick);
                        }
                    }
                    Some(TransportEvent::Heartbeat) => {
                        backoff.on_message();
                        self.shared.attempts.store(0, Ordering::SeqCst);
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        conn.close().await;
                        return Outcome::Dropped(
                            reason.unwrap_or_else(|| "closed by server".to_string()),
                        );
                    }
                    Some(TransportEvent::Error(e)) => {
                        conn.close().await;
                        return Outcome::Dropped(e);
                    }
                    None => return Outcome::Dropped("stream ended".to_string()),
                },
                changed = self.control.changed() => {
                    conn.close().await;
                    if changed.is_err() {
                        return Outcome::Stopped;
                    }
                    return match *self.control.borrow_and_update() {
                        Control::Stop => Outcome::Stopped,
                        Control::Run { .. } => Outcome::Resubscribe,
                    };
                }
            }
        }
    }
}
