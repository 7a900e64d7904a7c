//! In-process tick store used for dry runs

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::common::errors::{Result, TrackerError};
use crate::common::traits::TickStore;
use crate::common::types::{IndexName, PriceSample, SessionRecord};

/// Calls received by a [`MemoryTickStore`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionCreated(i64),
    Tick(i64),
    Flush,
    StrikeUpdated(i64, Decimal),
    Chart(i64, String),
    SessionEnded(i64),
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    sessions: Vec<SessionRecord>,
    ticks: Vec<(i64, PriceSample)>,
    charts: Vec<(i64, String)>,
    events: Vec<StoreEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryTickStore {
    state: Mutex<MemoryState>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().sessions.clone()
    }

    pub fn ticks(&self) -> Vec<(i64, PriceSample)> {
        self.state.lock().ticks.clone()
    }

    pub fn charts(&self) -> Vec<(i64, String)> {
        self.state.lock().charts.clone()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.state.lock().events.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| **e == StoreEvent::Flush)
            .count()
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn create_session(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
    ) -> Result<SessionRecord> {
        let mut state = self.state.lock();
        if state
            .sessions
            .iter()
            .any(|s| s.index == index && s.ended_at.is_none())
        {
            return Err(TrackerError::Storage(format!(
                "an open {} session already exists",
                index
            )));
        }

        state.next_id += 1;
        let record = SessionRecord {
            id: state.next_id,
            index,
            expiry,
            strike,
            started_at: Utc::now(),
            ended_at: None,
        };
        state.sessions.push(record.clone());
        state.events.push(StoreEvent::SessionCreated(record.id));
        Ok(record)
    }

    async fn add_tick(&self, session_id: i64, sample: &PriceSample) -> Result<()> {
        let mut state = self.state.lock();
        state.ticks.push((session_id, sample.clone()));
        state.events.push(StoreEvent::Tick(session_id));
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.state.lock().events.push(StoreEvent::Flush);
        Ok(())
    }

    async fn update_session_strike(&self, session_id: i64, strike: Decimal) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| TrackerError::Storage(format!("unknown session {}", session_id)))?;
        session.strike = strike;
        state
            .events
            .push(StoreEvent::StrikeUpdated(session_id, strike));
        Ok(())
    }

    async fn add_chart_record(&self, session_id: i64, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.charts.push((session_id, path.to_string()));
        state
            .events
            .push(StoreEvent::Chart(session_id, path.to_string()));
        Ok(())
    }

    async fn end_session(&self, session_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| TrackerError::Storage(format!("unknown session {}", session_id)))?;
        session.ended_at.get_or_insert_with(Utc::now);
        state.events.push(StoreEvent::SessionEnded(session_id));
        Ok(())
    }
}
