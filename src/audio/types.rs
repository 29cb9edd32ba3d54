//! Data types that flow between audio devices and the session engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Position on an output device's monotonic clock, measured from device open.
pub type DeviceTime = Duration;

/// A block of raw mono microphone samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Samples in [-1.0, 1.0] (not enforced; the encoder clamps).
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl CaptureFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Returns the duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Decoded response audio ready for the output device.
///
/// Samples are interleaved when `channels > 1`. The sample data is shared so
/// the device can hold it without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frames = samples.len() / channels.max(1) as usize;
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(frames as f64 / sample_rate as f64)
        };
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            duration,
        }
    }

    /// Silent mono buffer of the given length, mostly useful in tests.
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        let mut buffer = Self::new(vec![0.0; len], sample_rate, 1);
        buffer.duration = duration;
        buffer
    }
}

/// Handle to a buffer scheduled on an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackToken(pub u64);

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
