//! Barge-in handling.

use crate::playback::scheduler::PlaybackScheduler;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Who cut off the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// The endpoint reported `interrupted`.
    Server,
    /// The local user asked for silence.
    User,
}

impl fmt::Display for InterruptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptSource::Server => write!(f, "server"),
            InterruptSource::User => write!(f, "user"),
        }
    }
}

/// Silences playback on interruption. Both sources are handled the same way.
#[derive(Clone)]
pub struct InterruptionController {
    scheduler: Arc<PlaybackScheduler>,
}

impl InterruptionController {
    pub fn new(scheduler: Arc<PlaybackScheduler>) -> Self {
        Self { scheduler }
    }

    /// Flush all playback; the next buffer starts at the device clock.
    ///
    /// Returns the number of buffers cut off.
    pub fn interrupt(&self, source: InterruptSource) -> usize {
        let flushed = self.scheduler.flush_all();
        info!(%source, flushed, "playback interrupted");
        flushed
    }
}
