//! Bidirectional session with the remote speech endpoint.
//!
//! A [`Connector`] opens a [`SessionTransport`]; inbound traffic is delivered
//! to an [`EventHandler`] in wire-arrival order. Every transport routes its
//! events through a [`TransportGate`], which enforces the lifecycle contract:
//! nothing after `Closed`, and `Closed` at most once.

pub mod connectivity;
pub mod mock;
pub mod protocol;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use connectivity::{ConnectivityProbe, DnsProbe, StaticProbe};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

use crate::codec::{EncodedFrame, ResponseChunk};
use crate::config::EndpointConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Inbound transport traffic and lifecycle signals.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The endpoint accepted the session and will take audio.
    Opened,
    AudioChunk(ResponseChunk),
    /// The endpoint cut off the current response.
    Interrupted,
    /// Terminal. Delivered at most once per transport.
    Closed,
    Error(String),
}

pub type EventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// An open session with the endpoint.
pub trait SessionTransport: Send + Sync {
    /// Queue a frame for sending without waiting on the network.
    ///
    /// Frames sent before the session is open are dropped.
    fn send(&self, frame: EncodedFrame) -> Result<()>;

    /// Close the session. Idempotent; eventually yields exactly one `Closed`.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Establishes transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and hand inbound events to `handler`.
    ///
    /// Fails with `NetworkUnreachable` or `AuthRejected`.
    async fn connect(
        &self,
        config: &EndpointConfig,
        handler: EventHandler,
    ) -> Result<Box<dyn SessionTransport>>;
}

/// Lifecycle filter between a transport and its event handler.
pub struct TransportGate {
    handler: EventHandler,
    open: AtomicBool,
    closed: Mutex<bool>,
}

impl TransportGate {
    pub fn new(handler: EventHandler) -> Self {
        Self {
            handler,
            open: AtomicBool::new(false),
            closed: Mutex::new(false),
        }
    }

    /// Forward an event unless the gate already closed.
    ///
    /// `Closed` is routed through [`finish`](Self::finish).
    pub fn deliver(&self, event: TransportEvent) {
        if matches!(event, TransportEvent::Closed) {
            self.finish();
            return;
        }

        let closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
        if *closed {
            return;
        }
        if matches!(event, TransportEvent::Opened) {
            self.open.store(true, Ordering::SeqCst);
        }
        (self.handler)(event);
    }

    /// Emit the terminal `Closed` event if it has not been emitted yet.
    pub fn finish(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
        if *closed {
            return;
        }
        *closed = true;
        self.open.store(false, Ordering::SeqCst);
        (self.handler)(TransportEvent::Closed);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|p| p.into_inner())
    }
}
