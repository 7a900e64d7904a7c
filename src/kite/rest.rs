//! REST API client for Kite Connect quotes and instruments

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::messages::{ApiEnvelope, InstrumentRow, LtpResponse};
use crate::common::errors::{Result, TrackerError};
use crate::common::traits::MarketDataSource;
use crate::common::types::{IndexName, Instrument, InstrumentToken, LegKind};
use crate::config::types::KiteCredentials;

/// API version header value
const KITE_VERSION: &str = "3";

/// REST API client for Kite Connect
#[derive(Debug, Clone)]
pub struct KiteRestClient {
    /// HTTP client
    client: Client,
    /// Base URL for the REST API
    base_url: String,
    /// Credentials sent with every request
    credentials: KiteCredentials,
    /// Option contracts per exchange, fetched once per process
    instruments: Arc<RwLock<HashMap<String, Arc<Vec<Instrument>>>>>,
}

impl KiteRestClient {
    /// Create a new REST client
    pub fn new(base_url: &str, credentials: KiteCredentials) -> Result<Self> {
        Self::with_timeout(base_url, credentials, Duration::from_secs(30))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(
        base_url: &str,
        credentials: KiteCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            instruments: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.credentials.authorization())
    }

    /// Last traded price for each `EXCHANGE:SYMBOL` key
    #[instrument(skip(self))]
    pub async fn get_ltp(&self, keys: &[String]) -> Result<LtpResponse> {
        if keys.is_empty() {
            return Ok(LtpResponse::new());
        }

        let query: Vec<(&str, &str)> = keys.iter().map(|k| ("i", k.as_str())).collect();
        let response = self.get("/quote/ltp").query(&query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, body
            )));
        }

        let envelope: ApiEnvelope<LtpResponse> = response.json().await?;
        envelope.into_data()
    }

    /// Index option contracts listed on `exchange`
    #[instrument(skip(self))]
    pub async fn option_instruments(&self, exchange: &str) -> Result<Arc<Vec<Instrument>>> {
        if let Some(cached) = self.instruments.read().await.get(exchange) {
            return Ok(cached.clone());
        }

        debug!("Fetching instrument dump for {}", exchange);
        let response = self.get(&format!("/instruments/{}", exchange)).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let parsed = Arc::new(parse_instrument_dump(&body)?);

        let mut cache = self.instruments.write().await;
        Ok(cache
            .entry(exchange.to_string())
            .or_insert(parsed)
            .clone())
    }

    /// Available expiries for an index, ascending
    pub async fn expiries(&self, index: IndexName) -> Result<Vec<NaiveDate>> {
        let instruments = self.option_instruments(index.option_exchange()).await?;
        let mut expiries: Vec<NaiveDate> = instruments
            .iter()
            .filter(|inst| inst.index == index)
            .map(|inst| inst.expiry)
            .collect();
        expiries.sort_unstable();
        expiries.dedup();
        Ok(expiries)
    }

    /// First expiry on or after `today`
    pub async fn nearest_expiry(&self, index: IndexName, today: NaiveDate) -> Result<NaiveDate> {
        self.expiries(index)
            .await?
            .into_iter()
            .find(|expiry| *expiry >= today)
            .ok_or_else(|| {
                TrackerError::InstrumentNotFound(format!("no upcoming {} expiry", index))
            })
    }
}

/// Parse the CSV instrument dump, keeping index option contracts only
pub fn parse_instrument_dump(body: &str) -> Result<Vec<Instrument>> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let mut instruments = Vec::new();
    let mut skipped = 0usize;

    for row in reader.deserialize::<InstrumentRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                skipped += 1;
                debug!("Skipping malformed instrument row: {}", e);
                continue;
            }
        };

        let leg = match row.instrument_type.as_str() {
            "CE" => LegKind::Call,
            "PE" => LegKind::Put,
            _ => continue,
        };
        let (Ok(index), Some(expiry)) = (row.name.parse::<IndexName>(), row.expiry) else {
            continue;
        };

        instruments.push(Instrument {
            token: row.instrument_token,
            trading_symbol: row.tradingsymbol,
            exchange: row.exchange,
            index,
            expiry,
            strike: row.strike.normalize(),
            leg,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} malformed instrument rows", skipped);
    }
    Ok(instruments)
}

#[async_trait]
impl MarketDataSource for KiteRestClient {
    async fn reference_price(&self, index: IndexName) -> Result<Decimal> {
        let symbol = index.quote_symbol().to_string();
        let quotes = self.get_ltp(std::slice::from_ref(&symbol)).await?;
        quotes
            .get(&symbol)
            .map(|q| q.last_price)
            .ok_or(TrackerError::InstrumentNotFound(symbol))
    }

    async fn find_instrument(
        &self,
        index: IndexName,
        expiry: NaiveDate,
        strike: Decimal,
        leg: LegKind,
    ) -> Result<Instrument> {
        let instruments = self.option_instruments(index.option_exchange()).await?;
        instruments
            .iter()
            .find(|inst| {
                inst.index == index
                    && inst.expiry == expiry
                    && inst.strike == strike
                    && inst.leg == leg
            })
            .cloned()
            .ok_or_else(|| {
                TrackerError::InstrumentNotFound(format!("{} {} {} {}", index, expiry, strike, leg))
            })
    }

    async fn point_prices(
        &self,
        instruments: &[Instrument],
    ) -> Result<HashMap<InstrumentToken, Decimal>> {
        let keys: Vec<String> = instruments.iter().map(Instrument::quote_key).collect();
        let quotes = self.get_ltp(&keys).await?;
        Ok(quotes
            .into_values()
            .map(|q| (q.instrument_token, q.last_price))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DUMP: &str = "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange
12010498,46916,NIFTY24JAN23500CE,\"NIFTY\",0,2024-01-25,23500,0.05,50,CE,NFO-OPT,NFO
12010754,46917,NIFTY24JAN23500PE,\"NIFTY\",0,2024-01-25,23500.0,0.05,50,PE,NFO-OPT,NFO
13238274,51712,NIFTY24JANFUT,\"NIFTY\",0,2024-01-25,0,0.05,50,FUT,NFO-FUT,NFO
9999,1,BANKNIFTY24JAN48000CE,\"BANKNIFTY\",0,2024-01-24,48000,0.05,15,CE,NFO-OPT,NFO
";

    fn test_credentials() -> KiteCredentials {
        KiteCredentials::new("key".to_string(), "token".to_string())
    }

    #[test]
    fn test_url_normalization() {
        let client = KiteRestClient::new("https://api.kite.trade/", test_credentials()).unwrap();
        assert!(!client.base_url.ends_with('/'));
    }

    #[test]
    fn test_parse_dump_keeps_index_options() {
        let instruments = parse_instrument_dump(DUMP).unwrap();
        assert_eq!(instruments.len(), 2);

        let call = &instruments[0];
        assert_eq!(call.token, 12010498);
        assert_eq!(call.leg, LegKind::Call);
        assert_eq!(call.index, IndexName::Nifty);
        assert_eq!(call.strike, dec!(23500));
        assert_eq!(call.quote_key(), "NFO:NIFTY24JAN23500CE");
        assert_eq!(instruments[1].leg, LegKind::Put);
    }
}
