//! Mock audio backend for testing.
//!
//! The mock output has a manual clock: time only moves when the test calls
//! [`MockAudioBackend::advance`], which also fires completions for buffers
//! whose interval has fully elapsed. The mock input delivers frames only when
//! the test pushes them.

use crate::audio::device::{
    AudioBackend, CompletionCallback, FrameCallback, InputConfig, InputHandle, OutputConfig,
    OutputHandle,
};
use crate::audio::types::{CaptureFrame, DeviceTime, PlaybackBuffer, PlaybackToken};
use crate::error::{Result, VoiceError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A schedule call observed by the mock output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledCall {
    pub token: PlaybackToken,
    pub start: DeviceTime,
    pub duration: Duration,
}

impl ScheduledCall {
    pub fn end(&self) -> DeviceTime {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFailure {
    PermissionDenied,
    Unavailable,
}

#[derive(Default)]
struct MockState {
    clock: Mutex<Duration>,
    open_delay: Mutex<Duration>,
    input_failure: Mutex<Option<InputFailure>>,
    output_failure: AtomicBool,
    schedule_failure: AtomicBool,
    frame_callback: Mutex<Option<FrameCallback>>,
    capturing: AtomicBool,
    input_rate: AtomicU32,
    frame_sequence: AtomicU64,
    completion: Mutex<Option<CompletionCallback>>,
    schedules: Mutex<Vec<ScheduledCall>>,
    live: Mutex<BTreeMap<PlaybackToken, ScheduledCall>>,
    cancelled: Mutex<Vec<PlaybackToken>>,
    next_token: AtomicU64,
    input_opens: AtomicUsize,
    input_closes: AtomicUsize,
    output_opens: AtomicUsize,
    output_closes: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock implementation of [`AudioBackend`]. Clones share state.
#[derive(Clone, Default)]
pub struct MockAudioBackend {
    state: Arc<MockState>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening the microphone fails with `PermissionDenied`.
    pub fn with_permission_denied(self) -> Self {
        *lock(&self.state.input_failure) = Some(InputFailure::PermissionDenied);
        self
    }

    /// Opening the microphone fails with `DeviceUnavailable`.
    pub fn with_input_unavailable(self) -> Self {
        *lock(&self.state.input_failure) = Some(InputFailure::Unavailable);
        self
    }

    /// Opening the speaker fails with `DeviceUnavailable`.
    pub fn with_output_unavailable(self) -> Self {
        self.state.output_failure.store(true, Ordering::SeqCst);
        self
    }

    /// Start the device clock at `t` instead of zero.
    pub fn with_clock_at(self, t: Duration) -> Self {
        *lock(&self.state.clock) = t;
        self
    }

    /// Make opening the microphone take `delay`, like a slow permission
    /// prompt.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        *lock(&self.state.open_delay) = delay;
        self
    }

    /// Make every `schedule` call fail.
    pub fn set_schedule_failure(&self, fail: bool) {
        self.state.schedule_failure.store(fail, Ordering::SeqCst);
    }

    /// Deliver one frame the way the device thread would.
    ///
    /// Returns false if no input is capturing.
    pub fn push_frame(&self, samples: Vec<f32>) -> bool {
        if !self.state.capturing.load(Ordering::SeqCst) {
            return false;
        }
        self.push_frame_unchecked(samples)
    }

    /// Deliver a frame even after the input was stopped, simulating a
    /// callback that raced teardown.
    pub fn push_frame_unchecked(&self, samples: Vec<f32>) -> bool {
        let sequence = self.state.frame_sequence.fetch_add(1, Ordering::SeqCst);
        let mut callback = lock(&self.state.frame_callback);
        match callback.as_mut() {
            Some(cb) => {
                let rate = self.state.input_rate.load(Ordering::SeqCst);
                cb(CaptureFrame::new(samples, rate, sequence));
                true
            }
            None => false,
        }
    }

    /// Advance the output clock, firing completions for elapsed buffers.
    pub fn advance(&self, by: Duration) {
        let now = {
            let mut clock = lock(&self.state.clock);
            *clock += by;
            *clock
        };

        let finished: Vec<PlaybackToken> = {
            let mut live = lock(&self.state.live);
            let done: Vec<PlaybackToken> = live
                .values()
                .filter(|call| call.end() <= now)
                .map(|call| call.token)
                .collect();
            for token in &done {
                live.remove(token);
            }
            done
        };

        let callback = lock(&self.state.completion).clone();
        if let Some(cb) = callback {
            for token in finished {
                cb(token);
            }
        }
    }

    pub fn now(&self) -> Duration {
        *lock(&self.state.clock)
    }

    /// Every schedule call so far, in call order.
    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        lock(&self.state.schedules).clone()
    }

    /// Every cancel call for a live buffer, in call order.
    pub fn cancelled(&self) -> Vec<PlaybackToken> {
        lock(&self.state.cancelled).clone()
    }

    /// Buffers scheduled and neither finished nor cancelled.
    pub fn live_count(&self) -> usize {
        lock(&self.state.live).len()
    }

    pub fn is_capturing(&self) -> bool {
        self.state.capturing.load(Ordering::SeqCst)
    }

    pub fn input_open_count(&self) -> usize {
        self.state.input_opens.load(Ordering::SeqCst)
    }

    pub fn input_close_count(&self) -> usize {
        self.state.input_closes.load(Ordering::SeqCst)
    }

    pub fn output_open_count(&self) -> usize {
        self.state.output_opens.load(Ordering::SeqCst)
    }

    pub fn output_close_count(&self) -> usize {
        self.state.output_closes.load(Ordering::SeqCst)
    }
}

impl AudioBackend for MockAudioBackend {
    fn open_input(
        &self,
        config: &InputConfig,
        on_frame: FrameCallback,
    ) -> Result<Box<dyn InputHandle>> {
        let delay = *lock(&self.state.open_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match *lock(&self.state.input_failure) {
            Some(InputFailure::PermissionDenied) => {
                return Err(VoiceError::PermissionDenied {
                    message: "mock microphone permission denied".to_string(),
                });
            }
            Some(InputFailure::Unavailable) => {
                return Err(VoiceError::DeviceUnavailable {
                    device: config.device.clone().unwrap_or_else(|| "default".to_string()),
                });
            }
            None => {}
        }

        *lock(&self.state.frame_callback) = Some(on_frame);
        self.state
            .input_rate
            .store(config.sample_rate, Ordering::SeqCst);
        self.state.capturing.store(true, Ordering::SeqCst);
        self.state.input_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockInput {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn open_output(
        &self,
        config: &OutputConfig,
        on_finished: CompletionCallback,
    ) -> Result<Arc<dyn OutputHandle>> {
        if self.state.output_failure.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceUnavailable {
                device: config.device.clone().unwrap_or_else(|| "default".to_string()),
            });
        }

        *lock(&self.state.completion) = Some(on_finished);
        self.state.output_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockOutput {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockInput {
    state: Arc<MockState>,
    closed: bool,
}

impl InputHandle for MockInput {
    fn stop(&mut self) -> Result<()> {
        self.state.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stop()?;
        if !self.closed {
            self.closed = true;
            self.state.input_closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockOutput {
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl OutputHandle for MockOutput {
    fn now(&self) -> DeviceTime {
        *lock(&self.state.clock)
    }

    fn schedule(&self, buffer: &PlaybackBuffer, start: DeviceTime) -> Result<PlaybackToken> {
        if self.closed.load(Ordering::SeqCst) || self.state.schedule_failure.load(Ordering::SeqCst)
        {
            return Err(VoiceError::DeviceUnavailable {
                device: "mock output".to_string(),
            });
        }

        let token = PlaybackToken(self.state.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        let call = ScheduledCall {
            token,
            start,
            duration: buffer.duration,
        };
        lock(&self.state.schedules).push(call);
        lock(&self.state.live).insert(token, call);
        Ok(token)
    }

    fn cancel(&self, token: PlaybackToken) {
        if lock(&self.state.live).remove(&token).is_some() {
            lock(&self.state.cancelled).push(token);
        }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.state.live).clear();
            self.state.output_closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
