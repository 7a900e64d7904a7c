//! JSON snapshot writer
//!
//! Each snapshot is a self-contained document holding the chart title, every
//! point of the series so far and summary statistics, written to
//! `straddle_<session>_<YYYYmmdd_HHMMSS>.json` under the snapshots directory.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::errors::{Result, TrackerError};
use crate::common::traits::{SeriesSnapshot, SnapshotRenderer};

/// High, low, range and last of a price series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesStats {
    pub high: Decimal,
    pub low: Decimal,
    pub range: Decimal,
    pub last: Decimal,
}

impl SeriesStats {
    /// `None` for an empty series
    pub fn from_prices(prices: &[Decimal]) -> Option<Self> {
        let last = *prices.last()?;
        let (high, low) = prices
            .iter()
            .fold((last, last), |(hi, lo), p| (hi.max(*p), lo.min(*p)));
        Some(Self {
            high,
            low,
            range: high - low,
            last,
        })
    }
}

#[derive(Serialize)]
struct Point {
    timestamp: DateTime<Utc>,
    straddle: Decimal,
}

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    title: String,
    session_id: i64,
    index: &'a str,
    strike: Decimal,
    expiry: &'a str,
    generated_at: DateTime<Utc>,
    stats: SeriesStats,
    points: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct JsonSnapshotWriter {
    dir: PathBuf,
}

impl JsonSnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `NIFTY 23500 Straddle | Expiry: 25-Jan-2024`
pub fn snapshot_title(series: &SeriesSnapshot<'_>) -> String {
    format!(
        "{} {} Straddle | Expiry: {}",
        series.index,
        series.strike.normalize(),
        series.expiry_label
    )
}

impl SnapshotRenderer for JsonSnapshotWriter {
    fn render_series(&self, series: &SeriesSnapshot<'_>) -> Result<PathBuf> {
        if series.timestamps.len() != series.straddle_prices.len() {
            return Err(TrackerError::Snapshot(format!(
                "{} timestamps for {} prices",
                series.timestamps.len(),
                series.straddle_prices.len()
            )));
        }
        let stats = SeriesStats::from_prices(series.straddle_prices)
            .ok_or_else(|| TrackerError::Snapshot("no samples to render".to_string()))?;

        fs::create_dir_all(&self.dir)?;
        let generated_at = Utc::now();
        let path = self.dir.join(format!(
            "straddle_{}_{}.json",
            series.session_id,
            generated_at.format("%Y%m%d_%H%M%S")
        ));

        let document = SnapshotDocument {
            title: snapshot_title(series),
            session_id: series.session_id,
            index: series.index.as_str(),
            strike: series.strike,
            expiry: &series.expiry_label,
            generated_at,
            stats,
            points: series
                .timestamps
                .iter()
                .zip(series.straddle_prices)
                .map(|(timestamp, straddle)| Point {
                    timestamp: *timestamp,
                    straddle: *straddle,
                })
                .collect(),
        };

        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, &document)?;
        out.flush()?;

        debug!(path = %path.display(), points = series.timestamps.len(), "Snapshot written");
        Ok(path)
    }
}
