//! Trading-hours window in exchange-local time

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::common::errors::Result;
use crate::config::loader::timezone;
use crate::config::types::TrackerSettings;

/// Inclusive `[open, close]` window in the exchange's time zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub tz: Tz,
}

impl TradingWindow {
    pub fn new(open: NaiveTime, close: NaiveTime, tz: Tz) -> Self {
        Self { open, close, tz }
    }

    /// Window described by the tracker settings
    pub fn from_settings(settings: &TrackerSettings) -> Result<Self> {
        Ok(Self::new(
            settings.market_open,
            settings.market_close,
            timezone(settings)?,
        ))
    }

    /// Exchange-local view of `at`
    pub fn local(&self, at: DateTime<Utc>) -> DateTime<Tz> {
        at.with_timezone(&self.tz)
    }

    /// Whether `at` falls inside the window (both ends inclusive)
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at).time();
        self.open <= local && local <= self.close
    }
}
