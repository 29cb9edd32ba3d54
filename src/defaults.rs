//! Default configuration constants for voicelink.
//!
//! Shared between the config file types, the CLI and the session engine so
//! the wire contract with the endpoint is defined in one place.

/// Microphone sample rate in Hz expected by the endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Samples per capture frame.
///
/// 4096 samples at 16 kHz is one frame every 256 ms.
pub const FRAME_SIZE: usize = 4096;

/// Sample rate of audio returned by the endpoint when the MIME type omits it.
pub const RESPONSE_SAMPLE_RATE: u32 = 24000;

/// Channel count of returned audio.
pub const RESPONSE_CHANNELS: u16 = 1;

/// Realtime websocket endpoint.
pub const ENDPOINT_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for live sessions.
pub const MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used for responses.
pub const VOICE: &str = "Kore";

/// Environment variable holding the endpoint API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Upper bound on establishing the endpoint connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Instruction scoping the assistant's behaviour.
pub const SYSTEM_INSTRUCTION: &str = "You are an expert supply chain consultant. Help the user find manufacturers, distributors, and suppliers. Be professional, concise, and helpful. If asked about location, assume the user is looking for local businesses.";

/// Build the MIME tag for 16-bit little-endian PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}
