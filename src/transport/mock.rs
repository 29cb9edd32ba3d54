//! Scripted transport for tests.
//!
//! [`MockConnector`] hands out transports whose far end is a [`MockRemote`].
//! Tests drive inbound traffic through the remote and inspect what the
//! session sent.

use crate::codec::{EncodedFrame, ResponseChunk, encode_pcm16};
use crate::config::EndpointConfig;
use crate::error::{Result, VoiceError};
use crate::transport::{Connector, EventHandler, SessionTransport, TransportEvent, TransportGate};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectFailure {
    AuthRejected,
    NetworkUnreachable,
}

#[derive(Default)]
struct ConnectorState {
    failure: Mutex<Option<ConnectFailure>>,
    delay: Mutex<Duration>,
    auto_open: AtomicBool,
    connects: AtomicUsize,
    remotes: Mutex<Vec<MockRemote>>,
}

/// Mock implementation of [`Connector`]. Clones share state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_rejected(self) -> Self {
        *lock(&self.state.failure) = Some(ConnectFailure::AuthRejected);
        self
    }

    pub fn with_network_unreachable(self) -> Self {
        *lock(&self.state.failure) = Some(ConnectFailure::NetworkUnreachable);
        self
    }

    /// Hold every connect attempt for `delay` before resolving.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.state.delay) = delay;
        self
    }

    /// Emit `Opened` as soon as the connection is made.
    pub fn with_auto_open(self) -> Self {
        self.state.auto_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Far end of the most recent successful connection.
    pub fn remote(&self) -> Option<MockRemote> {
        lock(&self.state.remotes).last().cloned()
    }

    pub fn remotes(&self) -> Vec<MockRemote> {
        lock(&self.state.remotes).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _config: &EndpointConfig,
        handler: EventHandler,
    ) -> Result<Box<dyn SessionTransport>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.state.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match *lock(&self.state.failure) {
            Some(ConnectFailure::AuthRejected) => {
                return Err(VoiceError::AuthRejected {
                    message: "mock endpoint rejected the key".to_string(),
                });
            }
            Some(ConnectFailure::NetworkUnreachable) => {
                return Err(VoiceError::NetworkUnreachable {
                    message: "mock endpoint unreachable".to_string(),
                });
            }
            None => {}
        }

        let remote = MockRemote {
            inner: Arc::new(RemoteInner {
                gate: TransportGate::new(Arc::clone(&handler)),
                handler,
                frames: Mutex::new(Vec::new()),
                dropped: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
            }),
        };
        lock(&self.state.remotes).push(remote.clone());

        if self.state.auto_open.load(Ordering::SeqCst) {
            remote.open();
        }

        Ok(Box::new(MockTransport { remote }))
    }
}

struct RemoteInner {
    gate: TransportGate,
    handler: EventHandler,
    frames: Mutex<Vec<EncodedFrame>>,
    dropped: AtomicUsize,
    close_calls: AtomicUsize,
}

/// The endpoint side of a mock transport.
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<RemoteInner>,
}

impl MockRemote {
    pub fn open(&self) {
        self.inner.gate.deliver(TransportEvent::Opened);
    }

    pub fn audio(&self, chunk: ResponseChunk) {
        self.inner.gate.deliver(TransportEvent::AudioChunk(chunk));
    }

    /// Send `duration` of constant-level PCM at `rate`.
    pub fn audio_for(&self, duration: Duration, rate: u32) {
        let samples = (duration.as_secs_f64() * rate as f64).round() as usize;
        let pcm = encode_pcm16(&vec![0.1; samples]);
        self.audio(ResponseChunk::from_inline(
            STANDARD.encode(pcm),
            format!("audio/pcm;rate={}", rate),
            rate,
        ));
    }

    pub fn interrupt(&self) {
        self.inner.gate.deliver(TransportEvent::Interrupted);
    }

    pub fn error(&self, reason: &str) {
        self.inner.gate.deliver(TransportEvent::Error(reason.to_string()));
    }

    /// Close from the endpoint side.
    pub fn close(&self) {
        self.inner.gate.finish();
    }

    /// Hand an event straight to the session handler, skipping the gate.
    ///
    /// Simulates a callback that was already in flight when the transport
    /// closed.
    pub fn inject_raw(&self, event: TransportEvent) {
        (self.inner.handler)(event);
    }

    pub fn frames(&self) -> Vec<EncodedFrame> {
        lock(&self.inner.frames).clone()
    }

    pub fn frame_count(&self) -> usize {
        lock(&self.inner.frames).len()
    }

    /// Frames the session tried to send before the transport was open.
    pub fn dropped_count(&self) -> usize {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    /// Times the session called `close`.
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.gate.is_closed()
    }
}

struct MockTransport {
    remote: MockRemote,
}

impl SessionTransport for MockTransport {
    fn send(&self, frame: EncodedFrame) -> Result<()> {
        let inner = &self.remote.inner;
        if inner.gate.is_open() {
            lock(&inner.frames).push(frame);
        } else {
            inner.dropped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&self) {
        self.remote.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        self.remote.inner.gate.finish();
    }

    fn is_open(&self) -> bool {
        self.remote.inner.gate.is_open()
    }
}
