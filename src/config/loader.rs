//! Configuration loader

use chrono_tz::Tz;
use config::{Config, Environment, File};
use std::path::Path;

use super::types::{AppConfig, KiteConfig, KiteCredentials, TrackerSettings};
use crate::common::errors::{Result, TrackerError};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_, or KITE_ for broker fields)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| TrackerError::Configuration(e.to_string()))?;

    let mut app: AppConfig = config
        .try_deserialize()
        .map_err(|e| TrackerError::Configuration(e.to_string()))?;

    apply_kite_env(&mut app.kite);
    if app.database.is_none() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            app.database = Some(super::types::DatabaseConfig::with_url(url));
        }
    }

    Ok(app)
}

/// Overlay the conventional KITE_* variables onto the broker section
fn apply_kite_env(kite: &mut KiteConfig) {
    if let Ok(key) = std::env::var("KITE_API_KEY") {
        kite.api_key = Some(key);
    }
    if let Ok(token) = std::env::var("KITE_ACCESS_TOKEN") {
        kite.access_token = Some(token);
    }
    if let Ok(url) = std::env::var("KITE_REST_URL") {
        kite.rest_url = url;
    }
    if let Ok(url) = std::env::var("KITE_WS_URL") {
        kite.websocket_url = url;
    }
}

/// Credentials required before any broker call is made
pub fn credentials(kite: &KiteConfig) -> Result<KiteCredentials> {
    let mut missing = Vec::new();
    let api_key = kite.api_key.clone().filter(|k| !k.is_empty());
    let access_token = kite.access_token.clone().filter(|t| !t.is_empty());
    if api_key.is_none() {
        missing.push("KITE_API_KEY");
    }
    if access_token.is_none() {
        missing.push("KITE_ACCESS_TOKEN");
    }

    match (api_key, access_token) {
        (Some(api_key), Some(access_token)) => Ok(KiteCredentials::new(api_key, access_token)),
        _ => Err(TrackerError::Configuration(format!(
            "missing configuration: {}",
            missing.join(", ")
        ))),
    }
}

/// Exchange time zone named by the tracker settings
pub fn timezone(settings: &TrackerSettings) -> Result<Tz> {
    settings
        .timezone
        .parse::<Tz>()
        .map_err(|e| TrackerError::Configuration(format!("invalid timezone: {}", e)))
}

/// Reject settings the tracker cannot run with
pub fn validate_tracker(settings: &TrackerSettings) -> Result<()> {
    timezone(settings)?;
    if settings.market_open > settings.market_close {
        return Err(TrackerError::Configuration(format!(
            "market_open {} is after market_close {}",
            settings.market_open, settings.market_close
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_missing_credentials_are_reported() {
        let err = credentials(&KiteConfig::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("KITE_API_KEY"));
        assert!(message.contains("KITE_ACCESS_TOKEN"));
    }

    #[test]
    fn test_credentials_present() {
        let kite = KiteConfig {
            api_key: Some("k".into()),
            access_token: Some("t".into()),
            ..KiteConfig::default()
        };
        let creds = credentials(&kite).unwrap();
        assert_eq!(creds.api_key, "k");
    }

    #[test]
    fn test_invalid_timezone() {
        let settings = TrackerSettings {
            timezone: "Mars/Olympus".into(),
            ..TrackerSettings::default()
        };
        assert!(matches!(
            validate_tracker(&settings),
            Err(TrackerError::Configuration(_))
        ));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let settings = TrackerSettings {
            market_open: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ..TrackerSettings::default()
        };
        assert!(validate_tracker(&settings).is_err());
    }
}
