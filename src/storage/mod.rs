//! Session and sample persistence

pub mod memory;
pub mod postgres;

pub use memory::{MemoryTickStore, StoreEvent};
pub use postgres::PgTickStore;
