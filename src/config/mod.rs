//! Configuration loading and types

pub mod loader;
pub mod types;

pub use loader::{credentials, load_config, timezone, validate_tracker};
pub use types::AppConfig;
