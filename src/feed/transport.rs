//! Transport seam between the stream client and the wire

use async_trait::async_trait;

use crate::common::errors::Result;
use crate::common::types::{InstrumentToken, LtpTick};

/// Events surfaced by an open transport connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One or more decoded price updates
    Ticks(Vec<LtpTick>),
    /// Keep-alive from the server
    Heartbeat,
    /// Server or peer closed the connection
    Closed(Option<String>),
    /// Transport-level failure; the connection is unusable
    Error(String),
}

/// Opens subscribed connections to a push feed
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Connect and subscribe to `instruments`
    async fn connect(&self, instruments: &[InstrumentToken]) -> Result<Box<dyn FeedConnection>>;
}

/// A single live subscription
#[async_trait]
pub trait FeedConnection: Send {
    /// Next event, or `None` once the connection is gone
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection; must be safe to call more than once
    async fn close(&mut self);
}
