//! PCM framing between audio devices and the wire.
//!
//! Outbound: float capture frames become little-endian 16-bit PCM tagged with
//! a MIME type. Inbound: base64 PCM chunks from the endpoint become playback
//! buffers. Both directions are pure functions of their input.

use crate::audio::types::{CaptureFrame, PlaybackBuffer};
use crate::defaults;
use crate::error::{Result, VoiceError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// One capture frame in wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub mime_type: String,
    /// Little-endian signed 16-bit mono PCM.
    pub data: Vec<u8>,
    pub sequence: u64,
}

impl EncodedFrame {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// Converts capture frames into the PCM wire format.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    mime_type: String,
}

impl FrameEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: defaults::pcm_mime_type(sample_rate),
        }
    }

    /// Clamp to [-1, 1], scale to i16, serialize little-endian.
    pub fn encode(&self, frame: &CaptureFrame) -> EncodedFrame {
        EncodedFrame {
            mime_type: self.mime_type.clone(),
            data: encode_pcm16(&frame.samples),
            sequence: frame.sequence,
        }
    }
}

/// Float samples to little-endian PCM16. NaN encodes as silence.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Audio received from the endpoint, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    /// Base64 PCM16 little-endian.
    pub data: String,
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ResponseChunk {
    /// Build a chunk from an inline-data part, reading `rate=` and
    /// `channels=` parameters from the MIME type when present.
    pub fn from_inline(data: String, mime_type: String, default_rate: u32) -> Self {
        let mut sample_rate = default_rate;
        let mut channels = defaults::RESPONSE_CHANNELS;
        for param in mime_type.split(';').skip(1) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rate" => {
                    if let Ok(rate) = value.trim().parse() {
                        sample_rate = rate;
                    }
                }
                "channels" => {
                    if let Ok(n) = value.trim().parse() {
                        channels = n;
                    }
                }
                _ => {}
            }
        }
        Self {
            data,
            mime_type,
            sample_rate,
            channels,
        }
    }
}

/// Decode one response chunk. Every malformed input is a `DecodeFailure`.
pub fn decode_chunk(chunk: &ResponseChunk) -> Result<PlaybackBuffer> {
    if chunk.sample_rate == 0 || chunk.channels == 0 {
        return Err(decode_failure(format!(
            "invalid format: {} Hz, {} channels",
            chunk.sample_rate, chunk.channels
        )));
    }

    let bytes = STANDARD
        .decode(chunk.data.trim())
        .map_err(|e| decode_failure(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(decode_failure("empty chunk".to_string()));
    }

    let frame_bytes = 2 * chunk.channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(decode_failure(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            bytes.len(),
            chunk.channels
        )));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer::new(samples, chunk.sample_rate, chunk.channels))
}

fn decode_failure(message: String) -> VoiceError {
    VoiceError::DecodeFailure { message }
}
