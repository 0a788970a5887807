//! Tracker WebSocket server.
//!
//! This module provides the WebSocket front end that handles:
//! - Client connections
//! - Hello message on connect
//! - Subscribe / unsubscribe requests
//! - Forwarding device messages from the tracker service to the socket

use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use btbb_core::{TrackerSettings, PROTOCOL_BTBBDEV};
use btbb_protocol::{
    decode_client_message, encode_server_message, ClientMessage, CodecError, ErrorMessage,
    HelloMessage, ServerMessage,
};

use crate::service::{ServiceConfig, TrackerHandle, TrackerService};
use crate::subscriber::{Subscriber, SubscriberId};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Configuration for the tracker server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name sent in Hello message.
    pub name: String,
    /// Server version sent in Hello message.
    pub version: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Outbound queue depth per connection. A subscriber whose queue fills
    /// up is dropped, so it must hold a full snapshot.
    pub subscriber_queue: usize,
    /// How long a socket write may block before the client is disconnected.
    pub write_timeout: Duration,
    /// Tracker service settings.
    pub service: ServiceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: btbb_core::config::DEFAULT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2501)),
            subscriber_queue: btbb_core::config::DEFAULT_SUBSCRIBER_QUEUE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            service: ServiceConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a server configuration from stored settings.
    pub fn from_settings(settings: &TrackerSettings) -> Result<Self, std::net::AddrParseError> {
        Ok(Self {
            name: settings.name().to_string(),
            bind_addr: settings.bind_addr().parse()?,
            subscriber_queue: settings.subscriber_queue(),
            service: ServiceConfig {
                registry: settings.registry_config(),
                publish_interval: settings.publish_interval(),
                ..ServiceConfig::default()
            },
            ..Self::default()
        })
    }

    pub fn publish_interval(&self) -> Duration {
        self.service.publish_interval
    }
}

/// The tracker WebSocket server.
pub struct TrackerServer {
    config: ServerConfig,
    service: TrackerService,
}

impl TrackerServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let service = TrackerService::new(config.service.clone());
        Self { config, service }
    }

    /// Get a handle for feeding packets and querying the tracker.
    pub fn handle(&self) -> TrackerHandle {
        self.service.handle()
    }

    /// Run the server, listening for WebSocket connections.
    pub async fn run(self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Tracker server listening on {}", self.config.bind_addr);

        let tracker = self.service.handle();
        tokio::spawn(self.service.run());

        // Accept connections
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let config = self.config.clone();
                    let tracker = tracker.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, config, tracker).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: ServerConfig,
    tracker: TrackerHandle,
) -> Result<(), BoxError> {
    info!("New connection from {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let limit = config.write_timeout;

    // Send Hello message
    let hello = HelloMessage::new(&config.name, &config.version);
    let hello_msg = encode_server_message(&ServerMessage::Hello(hello))?;
    write(&mut ws_tx, Message::Text(hello_msg), limit).await?;
    debug!("Sent Hello to {}", addr);

    // The tracker pushes into a fresh queue per subscription; only this task
    // writes the socket. The queue ending while subscribed means the tracker
    // dropped this subscriber.
    let mut conn = Connection {
        id: SubscriberId::next(),
        queue: config.subscriber_queue,
        limit,
        outbound: None,
    };

    let result = loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut conn, &tracker, &mut ws_tx).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Binary frame from {}", addr);
                        let error = CodecError::BinaryFrame.to_string();
                        if let Err(e) = send_error(&mut ws_tx, &error, limit).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} closed connection", addr);
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write(&mut ws_tx, Message::Pong(data), limit).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break Ok(());
                    }
                    None => {
                        info!("Client {} disconnected", addr);
                        break Ok(());
                    }
                    _ => {} // Ignore other message types
                }
            }

            // Forward device messages queued by the tracker
            message = next_outbound(&mut conn.outbound), if conn.outbound.is_some() => {
                let Some(message) = message else {
                    warn!("Client {} dropped by tracker, closing", addr);
                    let _ = write(&mut ws_tx, Message::Close(None), limit).await;
                    break Ok(());
                };
                let text = match encode_server_message(&message) {
                    Ok(text) => text,
                    Err(e) => break Err(e.into()),
                };
                if let Err(e) = write(&mut ws_tx, Message::Text(text), limit).await {
                    error!("Failed to send to {}: {}", addr, e);
                    break Ok(());
                }
            }
        }
    };

    // Departure is never an error for the tracker.
    let _ = tracker.unsubscribe(conn.id).await;
    result
}

/// Per-connection subscription state.
struct Connection {
    id: SubscriberId,
    queue: usize,
    limit: Duration,
    outbound: Option<mpsc::Receiver<ServerMessage>>,
}

async fn next_outbound(outbound: &mut Option<mpsc::Receiver<ServerMessage>>) -> Option<ServerMessage> {
    match outbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle a message received from a client.
async fn handle_client_message(
    text: &str,
    conn: &mut Connection,
    tracker: &TrackerHandle,
    ws_tx: &mut WsSink,
) -> Result<(), BoxError> {
    let id = conn.id;
    let msg = match decode_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Malformed request from subscriber {}: {}", id, e);
            return send_error(ws_tx, "Malformed request.", conn.limit).await;
        }
    };

    match msg {
        ClientMessage::Subscribe(req) => {
            if !req.subscribe.eq_ignore_ascii_case(PROTOCOL_BTBBDEV) {
                warn!("Subscriber {} asked for unknown protocol {:?}", id, req.subscribe);
                return send_error(ws_tx, "Unknown protocol requested.", conn.limit).await;
            }
            let fields = req.field_requests();
            debug!("Subscriber {} subscribed to {} fields", id, fields.len());
            let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(conn.queue);
            conn.outbound = Some(out_rx);
            tracker
                .subscribe(Subscriber::new(id, fields, Box::new(out_tx)))
                .await?;
        }
        ClientMessage::Unsubscribe(req) => {
            debug!("Subscriber {} unsubscribed from {}", id, req.unsubscribe);
            conn.outbound = None;
            tracker.unsubscribe(id).await?;
        }
    }

    Ok(())
}

/// Write one frame, giving up on a client that stopped reading.
async fn write(ws_tx: &mut WsSink, message: Message, limit: Duration) -> Result<(), BoxError> {
    match timeout(limit, ws_tx.send(message)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(format!("write timed out after {:?}", limit).into()),
    }
}

async fn send_error(ws_tx: &mut WsSink, error: &str, limit: Duration) -> Result<(), BoxError> {
    let msg = encode_server_message(&ServerMessage::Error(ErrorMessage::new(error)))?;
    write(ws_tx, Message::Text(msg), limit).await
}
