//! Straddle tracking: strike resolution, rebinding and the sampling loop

pub mod clock;
pub mod hours;
pub mod observer;
pub mod rebind;
pub mod scheduler;
pub mod session;
pub mod strike;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hours::TradingWindow;
pub use observer::LogObserver;
pub use rebind::{RebindController, RebindOutcome};
pub use scheduler::{SkipReason, StraddleTracker, TickOutcome, TrackerConfig};
pub use session::{EndReason, SessionState, SessionSummary, ShutdownSignal};
pub use strike::{resolve_index_strike, resolve_strike};
