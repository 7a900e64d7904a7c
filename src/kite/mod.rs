//! Kite Connect module - REST lookups and the streaming ticker transport

pub mod messages;
pub mod rest;
pub mod websocket;

pub use rest::KiteRestClient;
pub use websocket::KiteTickerTransport;
