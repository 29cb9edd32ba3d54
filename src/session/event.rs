//! Events flowing from devices and transport into the session driver.
//!
//! Every callback handed out for a session is built by an [`EventSink`]
//! that stamps the session's generation onto what it forwards. The driver
//! discards anything stamped with an old generation.

use crate::audio::device::{CompletionCallback, FrameCallback};
use crate::audio::types::{CaptureFrame, PlaybackToken};
use crate::transport::{EventHandler, TransportEvent};
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    Capture(CaptureFrame),
    Transport(TransportEvent),
    PlaybackEnded(PlaybackToken),
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub generation: u64,
    pub kind: SessionEventKind,
}

/// Builds generation-tagged callbacks feeding one channel.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: Sender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            generation: self.generation,
            kind,
        };
        if self.tx.send(event).is_err() {
            trace!(generation = self.generation, "driver gone, event dropped");
        }
    }

    pub fn frame_callback(&self) -> FrameCallback {
        let sink = self.clone();
        Box::new(move |frame| sink.send(SessionEventKind::Capture(frame)))
    }

    pub fn completion_callback(&self) -> CompletionCallback {
        let sink = self.clone();
        Arc::new(move |token| sink.send(SessionEventKind::PlaybackEnded(token)))
    }

    pub fn transport_handler(&self) -> EventHandler {
        let sink = self.clone();
        Arc::new(move |event| sink.send(SessionEventKind::Transport(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callbacks_carry_generation() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = EventSink::new(7, tx);

        (sink.frame_callback())(CaptureFrame::new(vec![0.0], 16000, 0));
        (sink.completion_callback())(PlaybackToken(3));
        (sink.transport_handler())(TransportEvent::Opened);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.generation == 7));
        assert!(matches!(events[0].kind, SessionEventKind::Capture(_)));
        assert!(matches!(
            events[1].kind,
            SessionEventKind::PlaybackEnded(PlaybackToken(3))
        ));
        assert!(matches!(
            events[2].kind,
            SessionEventKind::Transport(TransportEvent::Opened)
        ));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        EventSink::new(1, tx).send(SessionEventKind::PlaybackEnded(PlaybackToken(1)));
    }
}
