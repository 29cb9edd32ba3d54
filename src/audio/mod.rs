//! Audio devices: capture, playback, and the helpers between them.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod convert;
pub mod device;
pub mod level;
pub mod mixer;
pub mod mock;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod types;

pub use device::{
    AudioBackend, CompletionCallback, FrameCallback, InputConfig, InputHandle, OutputConfig,
    OutputHandle,
};
pub use types::{CaptureFrame, DeviceTime, PlaybackBuffer, PlaybackToken};
