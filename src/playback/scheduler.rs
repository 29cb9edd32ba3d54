//! Gapless scheduling of response audio on the output device clock.
//!
//! Buffers are laid end to end starting at a `next_start` cursor that never
//! falls behind the device clock. Every scheduled buffer is tracked by token
//! until it finishes or is cancelled.

use crate::audio::device::OutputHandle;
use crate::audio::types::{DeviceTime, PlaybackBuffer, PlaybackToken};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Placement of one buffer on the device clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPlayback {
    pub token: PlaybackToken,
    pub start: DeviceTime,
    pub duration: Duration,
}

impl ScheduledPlayback {
    pub fn end(&self) -> DeviceTime {
        self.start + self.duration
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    next_start: DeviceTime,
    active: HashMap<PlaybackToken, ScheduledPlayback>,
}

pub struct PlaybackScheduler {
    output: Arc<dyn OutputHandle>,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn OutputHandle>) -> Self {
        let next_start = output.now();
        Self {
            output,
            state: Mutex::new(SchedulerState {
                next_start,
                active: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// On failure the cursor does not move.
    pub fn enqueue(&self, buffer: &PlaybackBuffer) -> Result<ScheduledPlayback> {
        let mut state = self.lock();

        let start = state.next_start.max(self.output.now());
        let token = self.output.schedule(buffer, start)?;

        let scheduled = ScheduledPlayback {
            token,
            start,
            duration: buffer.duration,
        };
        state.next_start = scheduled.end();
        state.active.insert(token, scheduled);

        trace!(
            token = %token,
            start_ms = start.as_millis() as u64,
            duration_ms = buffer.duration.as_millis() as u64,
            "scheduled buffer"
        );
        Ok(scheduled)
    }

    /// Cancel everything scheduled or playing and restart the cursor at the
    /// device clock. Returns the number of buffers cancelled.
    pub fn flush_all(&self) -> usize {
        let mut state = self.lock();

        let flushed = state.active.len();
        for (token, _) in state.active.drain() {
            self.output.cancel(token);
        }
        state.next_start = self.output.now();

        if flushed > 0 {
            debug!(flushed, "flushed playback");
        }
        flushed
    }

    /// Forget a buffer the device finished playing.
    ///
    /// Returns false for tokens that were already cancelled or unknown.
    pub fn on_finished(&self, token: PlaybackToken) -> bool {
        self.lock().active.remove(&token).is_some()
    }

    pub fn active_len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().active.is_empty()
    }

    pub fn next_start(&self) -> DeviceTime {
        self.lock().next_start
    }

    /// Active buffers in start order.
    pub fn active(&self) -> Vec<ScheduledPlayback> {
        let mut active: Vec<_> = self.lock().active.values().copied().collect();
        active.sort_by_key(|s| s.start);
        active
    }
}
