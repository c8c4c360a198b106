//! WebSocket client for the room relay

use super::protocol::{InboundMessage, SignalingMessage};
use crate::config::SessionConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Inbound relay messages, in arrival order
///
/// Yields at most one `Err(Error::SignalingLost)` and then ends. The stream
/// cannot be restarted; a new connection needs a new session.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage>> + Send>>;

/// Outbound half of a signaling channel
pub trait SignalingSink: Send + Sync {
    /// Queue a message for the relay
    fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Close the channel (idempotent)
    fn close(&self) -> Result<()>;
}

/// An open signaling channel
pub struct SignalingChannel {
    /// Outbound half
    pub sink: Box<dyn SignalingSink>,
    /// Inbound half
    pub inbound: InboundStream,
}

/// Opens signaling channels for a session
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Connect to the relay for the configured room
    async fn connect(&self, config: &SessionConfig) -> Result<SignalingChannel>;
}

/// Connector over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<SignalingChannel> {
        let (client, inbound) = SignalingClient::connect(config).await?;
        Ok(SignalingChannel {
            sink: Box::new(client),
            inbound,
        })
    }
}

/// WebSocket signaling client
pub struct SignalingClient {
    /// Room every outbound envelope is addressed to
    room_id: String,

    /// Outgoing frame sender (drained by the writer task)
    tx: mpsc::UnboundedSender<Message>,

    /// Set once a close frame has been queued
    closed: AtomicBool,
}

/// Build the relay endpoint for `config`
///
/// The relay reads the room, the participant name and the room topology from
/// the query string of the upgrade request.
pub fn endpoint_url(config: &SessionConfig) -> Result<Url> {
    let mut url = Url::parse(&config.signaling_url).map_err(|e| {
        Error::InvalidConfig(format!(
            "Invalid signaling_url {}: {}",
            config.signaling_url, e
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("roomId", &config.room_id);
        query.append_pair("username", &config.username);
        query.append_pair("type", config.room_type.as_str());
        if config.broadcaster {
            query.append_pair("broadcaster", "true");
        }
        if config.screen_share {
            query.append_pair("screenShare", "true");
        }
    }

    Ok(url)
}

impl SignalingClient {
    /// Connect to the relay
    ///
    /// Opens the WebSocket, spawns the writer and reader tasks and returns
    /// the client together with the inbound message stream.
    pub async fn connect(config: &SessionConfig) -> Result<(Self, InboundStream)> {
        let url = endpoint_url(config)?;
        info!(room_id = %config.room_id, "Connecting to signaling server: {}", config.signaling_url);

        let (ws_stream, _) = tokio::time::timeout(config.connect_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| {
                Error::ConnectionError(format!(
                    "Timed out after {}s connecting to {}",
                    config.connect_timeout_secs, config.signaling_url
                ))
            })?
            .map_err(|e| Error::ConnectionError(format!("Failed to connect: {}", e)))?;

        info!(room_id = %config.room_id, "Connected to signaling server");

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, inbound_tx));

        let client = Self {
            room_id: config.room_id.clone(),
            tx,
            closed: AtomicBool::new(false),
        };

        Ok((client, Box::pin(UnboundedReceiverStream::new(inbound_rx))))
    }

    /// Writer task: sends frames from the channel to the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if is_close {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Reader task: decodes frames and forwards them to the inbound stream
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inbound: mpsc::UnboundedSender<Result<InboundMessage>>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    debug!("Received signaling message: {}", text);
                    match SignalingMessage::from_json(&text) {
                        Ok(Some(message)) => {
                            if inbound.send(Ok(message)).is_err() {
                                debug!("Inbound stream dropped");
                                break;
                            }
                        }
                        Ok(None) => debug!("Ignoring unknown signaling message type"),
                        Err(e) => warn!("Failed to handle signaling message: {}", e),
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!("WebSocket connection closed: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    let _ = inbound.send(Err(Error::SignalingLost(e.to_string())));
                    break;
                }
                _ => {}
            }
        }

        debug!("Receiver task terminated");
    }

    /// Whether a close frame has been queued
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SignalingLost("channel closed".to_string()));
        }

        let json = message.to_json(&self.room_id)?;
        debug!(kind = message.kind(), "Sending signaling message");

        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::SignalingLost("writer task has stopped".to_string()))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // A stopped writer means the socket is already gone
        if self.tx.send(Message::Close(None)).is_err() {
            debug!("Writer task already stopped; nothing to close");
        }
        Ok(())
    }
}
