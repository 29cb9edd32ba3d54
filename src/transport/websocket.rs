//! WebSocket transport to the realtime endpoint.
//!
//! One writer task drains an unbounded channel into the socket so `send`
//! never waits on the network. One reader task parses server messages and
//! hands the resulting events to the [`TransportGate`].

use crate::codec::EncodedFrame;
use crate::config::EndpointConfig;
use crate::defaults;
use crate::error::{Result, VoiceError};
use crate::transport::protocol::{ClientMessage, ServerMessage};
use crate::transport::{Connector, EventHandler, SessionTransport, TransportEvent, TransportGate};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to the endpoint over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    response_rate: u32,
}

impl WebSocketConnector {
    /// `response_rate` applies to audio whose MIME type carries no rate.
    pub fn new(response_rate: u32) -> Self {
        Self { response_rate }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(defaults::RESPONSE_SAMPLE_RATE)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        config: &EndpointConfig,
        handler: EventHandler,
    ) -> Result<Box<dyn SessionTransport>> {
        let key = config
            .resolve_api_key()
            .ok_or_else(|| VoiceError::AuthRejected {
                message: format!("no API key configured (set {})", config.api_key_env),
            })?;

        info!(url = %config.url, model = %config.model, "Connecting to endpoint");

        let (ws_stream, _) = connect_async(endpoint_url(&config.url, &key).as_str())
            .await
            .map_err(map_connect_error)?;

        debug!("WebSocket established, sending setup");

        let (mut write, read) = ws_stream.split();

        let setup = ClientMessage::setup(config)
            .to_json()
            .map_err(|e| VoiceError::EncodeFailure {
                message: format!("setup message: {}", e),
            })?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| VoiceError::NetworkUnreachable {
                message: format!("failed to send setup: {}", e),
            })?;

        let gate = Arc::new(TransportGate::new(handler));
        let (tx, rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(writer_task(write, rx));
        let reader = tokio::spawn(reader_task(read, Arc::clone(&gate), self.response_rate));

        Ok(Box::new(WebSocketTransport {
            tx,
            gate,
            tasks: Mutex::new(vec![reader, writer]),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Append the API key as a query parameter.
fn endpoint_url(base: &str, key: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", base, separator, key)
}

fn map_connect_error(err: WsError) -> VoiceError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                VoiceError::AuthRejected {
                    message: format!("endpoint returned HTTP {}", status),
                }
            } else {
                VoiceError::NetworkUnreachable {
                    message: format!("endpoint returned HTTP {}", status),
                }
            }
        }
        other => VoiceError::NetworkUnreachable {
            message: other.to_string(),
        },
    }
}

/// Writer task: drains queued messages into the socket.
async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = write.send(msg).await {
            debug!("Failed to send WebSocket message: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    debug!("Writer task terminated");
}

/// Reader task: parses inbound messages until the socket ends.
async fn reader_task(mut read: SplitStream<WsStream>, gate: Arc<TransportGate>, response_rate: u32) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_payload(&text, &gate, response_rate),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_payload(text, &gate, response_rate),
                Err(_) => warn!(len = bytes.len(), "Ignoring non-UTF-8 binary message"),
            },
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame
                    && frame.code != CloseCode::Normal
                {
                    let code = u16::from(frame.code);
                    warn!(code, reason = %frame.reason, "Endpoint closed the session");
                    gate.deliver(TransportEvent::Error(format!(
                        "closed by endpoint ({}): {}",
                        code, frame.reason
                    )));
                } else {
                    info!("Endpoint closed the session");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                gate.deliver(TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }

    gate.finish();
    debug!("Reader task terminated");
}

fn handle_payload(text: &str, gate: &TransportGate, response_rate: u32) {
    match ServerMessage::from_json(text) {
        Ok(message) => {
            for event in message.into_events(response_rate) {
                gate.deliver(event);
            }
        }
        Err(e) => warn!("Failed to parse endpoint message: {}", e),
    }
}

struct WebSocketTransport {
    tx: mpsc::UnboundedSender<Message>,
    gate: Arc<TransportGate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionTransport for WebSocketTransport {
    fn send(&self, frame: EncodedFrame) -> Result<()> {
        if !self.gate.is_open() {
            debug!(sequence = frame.sequence, "Dropping frame, session not open");
            return Ok(());
        }

        let json = ClientMessage::audio(&frame)
            .to_json()
            .map_err(|e| VoiceError::EncodeFailure {
                message: e.to_string(),
            })?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| VoiceError::Transport {
                message: "connection writer has stopped".to_string(),
            })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if self.tx.send(Message::Close(Some(frame))).is_err() {
            debug!("Writer already gone, skipping close frame");
        }

        // The writer exits after flushing the close frame.
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for task in tasks.into_iter().take(1) {
            task.abort();
        }

        self.gate.finish();
    }

    fn is_open(&self) -> bool {
        self.gate.is_open()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}
