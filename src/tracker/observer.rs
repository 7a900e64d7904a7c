//! Console observer for emitted samples

use chrono::DateTime;
use chrono_tz::Tz;
use tracing::info;

use crate::common::traits::TickObserver;
use crate::common::types::PriceSample;

/// Logs each sample as one line and counts them
#[derive(Debug, Default)]
pub struct LogObserver {
    ticks: u64,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl TickObserver for LogObserver {
    fn on_sample(&mut self, sample: &PriceSample, local_time: DateTime<Tz>) {
        self.ticks += 1;
        info!(
            tick = self.ticks,
            "[{}] Straddle: {:.2} (CE: {:.2} | PE: {:.2})",
            local_time.format("%H:%M:%S"),
            sample.straddle_price,
            sample.call_price,
            sample.put_price
        );
    }
}
