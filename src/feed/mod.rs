//! Streaming price feed: cache, reconnect policy and the reconnecting client

pub mod backoff;
pub mod cache;
pub mod stream;
pub mod transport;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use cache::PriceCache;
pub use stream::StreamClient;
pub use transport::{FeedConnection, FeedTransport, TransportEvent};
