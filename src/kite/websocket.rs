//! WebSocket transport for the Kite ticker

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::messages::{mode_message, parse_binary, subscribe_message, BinaryFrame, WsTextMessage};
use crate::common::channels::{create_event_channel_with_size, DEFAULT_CHANNEL_SIZE};
use crate::common::errors::{Result, TrackerError};
use crate::common::types::InstrumentToken;
use crate::config::types::KiteCredentials;
use crate::feed::transport::{FeedConnection, FeedTransport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens ticker connections subscribed in LTP mode
#[derive(Debug, Clone)]
pub struct KiteTickerTransport {
    /// WebSocket URL including the credential query
    url: Url,
    /// Capacity of the reader-to-consumer channel
    channel_size: usize,
}

impl KiteTickerTransport {
    /// Create a transport for the ticker at `ws_url`
    pub fn new(ws_url: &str, credentials: &KiteCredentials) -> Result<Self> {
        let mut url = Url::parse(ws_url)
            .map_err(|e| TrackerError::Configuration(format!("invalid websocket url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("api_key", &credentials.api_key)
            .append_pair("access_token", &credentials.access_token);

        Ok(Self {
            url,
            channel_size: DEFAULT_CHANNEL_SIZE,
        })
    }

    /// Set the event channel capacity
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size;
        self
    }
}

#[async_trait]
impl FeedTransport for KiteTickerTransport {
    #[instrument(skip(self))]
    async fn connect(&self, instruments: &[InstrumentToken]) -> Result<Box<dyn FeedConnection>> {
        info!("Connecting to Kite ticker: {}", self.url.host_str().unwrap_or_default());

        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TrackerError::WebSocketConnection(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let subscribe = serde_json::to_string(&subscribe_message(instruments))?;
        debug!("Sending subscription message: {}", subscribe);
        write.send(Message::Text(subscribe)).await?;

        let mode = serde_json::to_string(&mode_message(instruments))?;
        write.send(Message::Text(mode)).await?;

        let (tx, rx) = create_event_channel_with_size(self.channel_size);
        let reader = tokio::spawn(read_frames(read, tx));

        Ok(Box::new(KiteConnection {
            write: Some(write),
            events: rx,
            reader,
        }))
    }
}

/// Forward decoded frames until the socket ends or the consumer goes away
async fn read_frames(mut read: SplitStream<WsStream>, events: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Binary(data))) => match parse_binary(&data) {
                Ok(BinaryFrame::Heartbeat) => TransportEvent::Heartbeat,
                Ok(BinaryFrame::Ticks(ticks)) if ticks.is_empty() => continue,
                Ok(BinaryFrame::Ticks(ticks)) => TransportEvent::Ticks(ticks),
                Err(e) => {
                    warn!("Failed to decode tick frame: {}", e);
                    continue;
                }
            },
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<WsTextMessage>(&text) {
                    Ok(msg) if msg.message_type == "error" => {
                        warn!("Ticker error: {}", msg.data)
                    }
                    Ok(msg) => debug!("Ticker message {}: {}", msg.message_type, msg.data),
                    Err(e) => warn!("Failed to parse message: {} - {}", e, text),
                }
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                debug!("Received control frame");
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                info!("WebSocket closed: {:?}", frame);
                TransportEvent::Closed(frame.map(|f| f.reason.to_string()))
            }
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => TransportEvent::Error(e.to_string()),
            None => TransportEvent::Closed(None),
        };

        let terminal = matches!(event, TransportEvent::Closed(_) | TransportEvent::Error(_));
        if events.send(event).await.is_err() || terminal {
            break;
        }
    }
}

/// One live ticker subscription
struct KiteConnection {
    write: Option<SplitSink<WsStream, Message>>,
    events: mpsc::Receiver<TransportEvent>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl FeedConnection for KiteConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        if let Some(mut write) = self.write.take() {
            if let Err(e) = write.send(Message::Close(None)).await {
                debug!("Close frame not sent: {}", e);
            }
            let _ = write.close().await;
        }
        self.reader.abort();
    }
}

impl Drop for KiteConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
