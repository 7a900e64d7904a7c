//! Kite Connect message types and the binary tick decoder

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::errors::{Result, TrackerError};
use crate::common::types::{InstrumentToken, LtpTick};

/// Streaming mode requested for subscribed tokens
pub const LTP_MODE: &str = "ltp";

/// Outgoing control message: `{"a": "subscribe", "v": [...]}`
#[derive(Debug, Clone, Serialize)]
pub struct WsCommand<T: Serialize> {
    #[serde(rename = "a")]
    pub action: &'static str,
    #[serde(rename = "v")]
    pub value: T,
}

/// Subscribe message for a token list
pub fn subscribe_message(tokens: &[InstrumentToken]) -> WsCommand<Vec<InstrumentToken>> {
    WsCommand {
        action: "subscribe",
        value: tokens.to_vec(),
    }
}

/// LTP mode message; the value is the `[mode, [tokens]]` pair
pub fn mode_message(tokens: &[InstrumentToken]) -> WsCommand<(&'static str, Vec<InstrumentToken>)> {
    WsCommand {
        action: "mode",
        value: (LTP_MODE, tokens.to_vec()),
    }
}

/// Text frame pushed by the ticker (errors, order updates, notices)
#[derive(Debug, Clone, Deserialize)]
pub struct WsTextMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Standard REST envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: String,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload of a successful response
    pub fn into_data(self) -> Result<T> {
        if self.status != "success" {
            return Err(TrackerError::InvalidResponse(format!(
                "{}: {}",
                self.error_type.unwrap_or_else(|| "error".to_string()),
                self.message.unwrap_or_default()
            )));
        }
        self.data.ok_or_else(|| {
            TrackerError::InvalidResponse("successful response without data".to_string())
        })
    }
}

/// One entry of `/quote/ltp`
#[derive(Debug, Clone, Deserialize)]
pub struct LtpQuote {
    pub instrument_token: InstrumentToken,
    pub last_price: Decimal,
}

/// `/quote/ltp` payload keyed by `EXCHANGE:SYMBOL`
pub type LtpResponse = HashMap<String, LtpQuote>;

/// One row of the `/instruments/<exchange>` CSV dump
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentRow {
    pub instrument_token: InstrumentToken,
    pub tradingsymbol: String,
    pub name: String,
    #[serde(default, deserialize_with = "empty_date")]
    pub expiry: Option<NaiveDate>,
    pub strike: Decimal,
    pub instrument_type: String,
    pub exchange: String,
}

fn empty_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Decoded binary frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryFrame {
    /// Single-byte keep-alive
    Heartbeat,
    Ticks(Vec<LtpTick>),
}

/// Price divisor for a token's segment (currency derivatives quote in 1e-7).
fn price_divisor(token: InstrumentToken) -> u32 {
    // Segment is the low byte of the token; 3 is CDS.
    if token & 0xff == 3 {
        7
    } else {
        2
    }
}

/// Decode a binary ticker frame.
///
/// Layout: 2-byte packet count, then per packet a 2-byte length followed by
/// the packet. Every mode starts with the token and the last price as
/// big-endian `i32`; full-mode packets (184 bytes) carry the exchange
/// timestamp at offset 60.
pub fn parse_binary(frame: &[u8]) -> Result<BinaryFrame> {
    if frame.len() < 2 {
        return Ok(BinaryFrame::Heartbeat);
    }

    let count = read_u16(frame, 0)? as usize;
    let mut offset = 2;
    let mut ticks = Vec::with_capacity(count);

    for _ in 0..count {
        let len = read_u16(frame, offset)? as usize;
        offset += 2;
        let packet = frame.get(offset..offset + len).ok_or_else(|| {
            TrackerError::InvalidResponse(format!(
                "tick packet truncated: need {} bytes at {}, frame has {}",
                len,
                offset,
                frame.len()
            ))
        })?;
        offset += len;

        if packet.len() < 8 {
            continue;
        }
        let token = read_i32(packet, 0)? as InstrumentToken;
        let raw_price = read_i32(packet, 4)?;
        let exchange_time = if packet.len() >= 64 {
            DateTime::from_timestamp(read_i32(packet, 60)? as i64, 0)
        } else {
            None
        };

        ticks.push(LtpTick {
            token,
            last_price: Decimal::new(raw_price as i64, price_divisor(token)),
            exchange_time,
        });
    }

    Ok(BinaryFrame::Ticks(ticks))
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    buf.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| TrackerError::InvalidResponse(format!("short frame at offset {}", at)))
}

fn read_i32(buf: &[u8], at: usize) -> Result<i32> {
    buf.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TrackerError::InvalidResponse(format!("short packet at offset {}", at)))
}

/// Encode ticks as an LTP-mode frame (used by tests and replays)
pub fn encode_ltp_frame(ticks: &[(InstrumentToken, i32)]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + ticks.len() * 10);
    frame.extend_from_slice(&(ticks.len() as u16).to_be_bytes());
    for (token, price) in ticks {
        frame.extend_from_slice(&8u16.to_be_bytes());
        frame.extend_from_slice(&(*token as i32).to_be_bytes());
        frame.extend_from_slice(&price.to_be_bytes());
    }
    frame
}
