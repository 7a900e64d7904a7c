//! Straddle Tracker - Main Entry Point
//!
//! Tracks the ATM straddle of NIFTY or SENSEX during market hours, storing a
//! sample every second and writing periodic snapshots.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use straddle_tracker::common::traits::{MarketDataSource, TickStore};
use straddle_tracker::config::{credentials, load_config, timezone, validate_tracker};
use straddle_tracker::tracker::LogObserver;
use straddle_tracker::{
    IndexName, JsonSnapshotWriter, KiteRestClient, KiteTickerTransport, MemoryTickStore,
    PgTickStore, ReconnectPolicy, ShutdownSignal, StraddleTracker, StreamClient, TrackerConfig,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Index to track (NIFTY or SENSEX)
    #[arg(long, default_value = "NIFTY")]
    index: String,

    /// Option expiry (YYYY-MM-DD); nearest available when omitted
    #[arg(long)]
    expiry: Option<NaiveDate>,

    /// Keep samples in memory instead of Postgres
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting straddle tracker");
    info!("Configuration file: {}", args.config);

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = load_config(Some(&args.config))?;
    validate_tracker(&config.tracker)?;
    let creds = credentials(&config.kite)?;
    let index: IndexName = args.index.parse()?;

    let rest = Arc::new(KiteRestClient::with_timeout(
        &config.kite.rest_url,
        creds.clone(),
        Duration::from_secs(config.settings.request_timeout_seconds),
    )?);

    let expiry = match args.expiry {
        Some(expiry) => expiry,
        None => {
            let today = Utc::now().with_timezone(&timezone(&config.tracker)?).date_naive();
            rest.nearest_expiry(index, today)
                .await
                .context("resolving nearest expiry")?
        }
    };
    info!(index = %index, expiry = %expiry, "Tracking straddle");

    let store: Arc<dyn TickStore> = if args.dry_run {
        info!("Dry run, samples stay in memory");
        Arc::new(MemoryTickStore::new())
    } else {
        let Some(db) = config.database.as_ref() else {
            bail!("no database configured; set DATABASE_URL or pass --dry-run");
        };
        let store = PgTickStore::connect(db).await?;
        store.init_schema().await?;
        Arc::new(store)
    };

    let transport = KiteTickerTransport::new(&config.kite.websocket_url, &creds)?
        .with_channel_size(config.settings.channel_size);
    let policy = ReconnectPolicy::new(
        Duration::from_secs(1),
        Duration::from_secs(config.settings.max_reconnect_delay_seconds),
        config.settings.max_reconnect_attempts,
    );
    let feed = StreamClient::new(Arc::new(transport), policy)
        .with_connect_timeout(Duration::from_secs(config.settings.connect_timeout_seconds));

    let shutdown = ShutdownSignal::new();
    let market: Arc<dyn MarketDataSource> = rest;
    let mut tracker = StraddleTracker::new(
        TrackerConfig {
            index,
            expiry,
            settings: config.tracker.clone(),
        },
        market,
        store,
        feed,
    )?
    .with_snapshots(Arc::new(JsonSnapshotWriter::new(
        config.tracker.snapshots_dir.clone(),
    )))
    .with_observer(Box::new(LogObserver::new()))
    .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, finishing session...");
                shutdown.trigger();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let summary = tracker.run().await?;

    println!("Session summary");
    match summary.session_id {
        Some(id) => println!("  session id:       {}", id),
        None => println!("  session id:       (none)"),
    }
    println!("  samples recorded: {}", summary.samples);
    println!("  rebinds:          {}", summary.rebinds);
    if let Some(strike) = summary.final_strike {
        println!("  final strike:     {}", strike);
    }
    if let Some(reason) = summary.end_reason {
        println!("  ended:            {}", reason);
    }

    Ok(())
}
