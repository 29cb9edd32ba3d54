//! Error types for voicelink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio device unavailable: {device}")]
    DeviceUnavailable { device: String },

    // Endpoint errors
    #[error("No internet connection")]
    Offline,

    #[error("Endpoint unreachable: {message}")]
    NetworkUnreachable { message: String },

    #[error("Endpoint rejected credentials: {message}")]
    AuthRejected { message: String },

    #[error("Connection error: {message}")]
    Transport { message: String },

    // Codec errors
    #[error("Failed to decode audio chunk: {message}")]
    DecodeFailure { message: String },

    #[error("Failed to encode audio frame: {message}")]
    EncodeFailure { message: String },

    #[error("Wire message error: {0}")]
    Json(#[from] serde_json::Error),

    // Session errors
    #[error("A session is still shutting down")]
    SessionBusy,

    #[error("Session start was cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VoiceError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Per-chunk codec errors are recovered locally; everything that stops
    /// devices or the endpoint from working is fatal.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied { .. }
                | VoiceError::DeviceUnavailable { .. }
                | VoiceError::Offline
                | VoiceError::NetworkUnreachable { .. }
                | VoiceError::AuthRejected { .. }
                | VoiceError::Transport { .. }
        )
    }

    /// Short human-readable text for a status display.
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::Offline => "No internet connection".to_string(),
            VoiceError::PermissionDenied { .. } => {
                "Microphone access denied. Check permissions.".to_string()
            }
            VoiceError::DeviceUnavailable { .. } => {
                "Audio device unavailable. Check your microphone and speakers.".to_string()
            }
            VoiceError::NetworkUnreachable { .. } | VoiceError::AuthRejected { .. } => {
                "Failed to connect. Check network/permissions.".to_string()
            }
            VoiceError::Transport { .. } => "Connection error. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
