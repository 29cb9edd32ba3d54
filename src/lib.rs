//! voicelink - Real-time voice sessions with a remote speech endpoint
//!
//! Captures the microphone, streams PCM frames to the endpoint, and plays
//! streamed responses back gaplessly with barge-in support.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

// Composition root - needs hardware audio and the network transport
#[cfg(all(feature = "cpal-audio", feature = "websocket", feature = "cli"))]
pub mod app;

// Device seam
pub use audio::{AudioBackend, CaptureFrame, InputHandle, OutputHandle, PlaybackBuffer, PlaybackToken};

// Codec
pub use codec::{EncodedFrame, FrameEncoder, ResponseChunk, decode_chunk};

// Transport seam
pub use transport::{ConnectivityProbe, Connector, SessionTransport, TransportEvent};

// Orchestration
pub use playback::{InterruptSource, InterruptionController, PlaybackScheduler};
pub use session::{SessionLifecycleManager, SessionState, SessionStats, SessionStatus};

// Error handling
pub use error::{Result, VoiceError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
