//! Snapshot rendering of the accumulated straddle series

pub mod writer;

pub use writer::{JsonSnapshotWriter, SeriesStats};
