//! Audio device abstraction used by the session engine.
//!
//! Implementations are swappable (cpal hardware vs. mock). Device callbacks
//! never touch session state directly: they hand frames and completions to
//! the closures given at open time, which forward them onto the session's
//! event channel.

use crate::audio::types::{CaptureFrame, DeviceTime, PlaybackBuffer, PlaybackToken};
use crate::error::Result;
use std::sync::Arc;

/// Receives every capture frame, in capture order. Runs on the device thread.
pub type FrameCallback = Box<dyn FnMut(CaptureFrame) + Send>;

/// Notified when a scheduled buffer has finished playing. Not called for
/// cancelled buffers.
pub type CompletionCallback = Arc<dyn Fn(PlaybackToken) + Send + Sync>;

/// Parameters for opening the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct InputConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per delivered frame.
    pub frame_size: usize,
}

/// Parameters for opening the speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub device: Option<String>,
    /// Rate of the buffers that will be scheduled. The device resamples.
    pub sample_rate: u32,
}

/// Factory for device handles.
pub trait AudioBackend: Send + Sync {
    /// Open the microphone and start pushing frames to `on_frame`.
    ///
    /// Requests microphone permission where the platform requires it.
    /// Returns `PermissionDenied` or `DeviceUnavailable`.
    fn open_input(
        &self,
        config: &InputConfig,
        on_frame: FrameCallback,
    ) -> Result<Box<dyn InputHandle>>;

    /// Open the speaker. Returns `DeviceUnavailable` on failure.
    fn open_output(
        &self,
        config: &OutputConfig,
        on_finished: CompletionCallback,
    ) -> Result<Arc<dyn OutputHandle>>;
}

/// An open microphone.
pub trait InputHandle: Send {
    /// Stop producing frames. Idempotent.
    fn stop(&mut self) -> Result<()>;

    /// Release the device. Idempotent; implies `stop`.
    fn close(&mut self) -> Result<()>;
}

/// An open speaker with its own clock.
pub trait OutputHandle: Send + Sync {
    /// Current position of the device clock. Monotonic.
    fn now(&self) -> DeviceTime;

    /// Play `buffer` starting at `start` on the device clock.
    fn schedule(&self, buffer: &PlaybackBuffer, start: DeviceTime) -> Result<PlaybackToken>;

    /// Stop a scheduled or playing buffer immediately. Unknown tokens are ignored.
    fn cancel(&self, token: PlaybackToken);

    /// Release the device. Idempotent.
    fn close(&self) -> Result<()>;
}
