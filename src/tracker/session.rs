//! Session lifecycle types

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of one tracking run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Created,
    Running,
    Ended,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Outside the trading window
    MarketClosed,
    /// Operator requested shutdown
    Cancelled,
    /// The feed gave up reconnecting
    FeedExhausted,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::MarketClosed => "market closed",
            EndReason::Cancelled => "cancelled",
            EndReason::FeedExhausted => "feed exhausted",
        };
        f.write_str(s)
    }
}

/// What a finished run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: Option<i64>,
    pub samples: u64,
    pub rebinds: u32,
    pub final_strike: Option<Decimal>,
    pub end_reason: Option<EndReason>,
}

/// Cooperative shutdown flag shared between the signal handler and the tracker
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
