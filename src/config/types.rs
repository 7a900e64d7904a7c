//! Configuration types

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Kite Connect broker configuration
    #[serde(default)]
    pub kite: KiteConfig,
    /// Database configuration (optional; without it only dry runs are possible)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Sampling, rebind and trading-hours settings
    #[serde(default)]
    pub tracker: TrackerSettings,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Kite Connect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiteConfig {
    /// API key issued for the app
    #[serde(default)]
    pub api_key: Option<String>,
    /// Access token obtained from the daily login
    #[serde(default)]
    pub access_token: Option<String>,
    /// Base URL for the REST API
    #[serde(default = "default_kite_rest_url")]
    pub rest_url: String,
    /// WebSocket URL for streaming ticks
    #[serde(default = "default_kite_ws_url")]
    pub websocket_url: String,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            access_token: None,
            rest_url: default_kite_rest_url(),
            websocket_url: default_kite_ws_url(),
        }
    }
}

fn default_kite_rest_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_kite_ws_url() -> String {
    "wss://ws.kite.trade".to_string()
}

/// Authenticated Kite credentials
#[derive(Debug, Clone)]
pub struct KiteCredentials {
    pub api_key: String,
    pub access_token: String,
}

impl KiteCredentials {
    pub fn new(api_key: String, access_token: String) -> Self {
        Self {
            api_key,
            access_token,
        }
    }

    /// Value of the Authorization header
    pub fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }
}

/// Database configuration for tick persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    /// Ticks buffered before an automatic flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Unwritten ticks kept across failed flushes; the oldest are dropped past this
    #[serde(default = "default_max_buffered_ticks")]
    pub max_buffered_ticks: usize,
}

impl DatabaseConfig {
    /// Settings for `url` with every other field at its default
    pub fn with_url(url: String) -> Self {
        Self {
            url,
            max_connections: default_max_connections(),
            connection_timeout_seconds: default_connection_timeout(),
            batch_size: default_batch_size(),
            max_buffered_ticks: default_max_buffered_ticks(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    1
}

fn default_max_buffered_ticks() -> usize {
    10_000
}

/// Sampling, rebind and trading-hours settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// IANA time zone of the exchange
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local market open (inclusive)
    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,
    /// Local market close (inclusive)
    #[serde(default = "default_market_close")]
    pub market_close: NaiveTime,
    /// Sampling period in milliseconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
    /// How often the ATM strike is re-evaluated
    #[serde(default = "default_rebind_check")]
    pub rebind_check_seconds: u64,
    /// Sampling pause after a rebind
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    /// Time between periodic snapshots
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_seconds: u64,
    /// Directory snapshots are written to
    #[serde(default = "default_snapshots_dir")]
    pub snapshots_dir: PathBuf,
    /// Upper bound on a single reference/instrument/point-price lookup
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_seconds: u64,
}

impl TrackerSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn rebind_check_interval(&self) -> Duration {
        Duration::from_secs(self.rebind_check_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_seconds)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds.max(1))
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            sample_interval_ms: default_sample_interval(),
            rebind_check_seconds: default_rebind_check(),
            cooldown_seconds: default_cooldown(),
            snapshot_interval_seconds: default_snapshot_interval(),
            snapshots_dir: default_snapshots_dir(),
            lookup_timeout_seconds: default_lookup_timeout(),
        }
    }
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default()
}

fn default_market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default()
}

fn default_sample_interval() -> u64 {
    1000
}

fn default_rebind_check() -> u64 {
    5
}

fn default_cooldown() -> u64 {
    2
}

fn default_snapshot_interval() -> u64 {
    30
}

fn default_snapshots_dir() -> PathBuf {
    PathBuf::from("./charts")
}

fn default_lookup_timeout() -> u64 {
    5
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Reconnect attempts before the feed gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Cap on the exponential reconnect delay, in seconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_seconds: u64,
    /// WebSocket connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Capacity of the transport-to-feed event channel
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_reconnect_delay_seconds: default_max_reconnect_delay(),
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
            channel_size: default_channel_size(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_max_reconnect_delay() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_channel_size() -> usize {
    1000
}
