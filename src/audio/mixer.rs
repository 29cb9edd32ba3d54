//! Sample-clock mixer behind the hardware output.
//!
//! The device clock is the number of frames rendered so far, so "now" only
//! advances when the hardware actually pulls audio. Scheduled buffers are
//! keyed by token, so cancelling is a single removal and cancelling twice is
//! harmless.

use crate::audio::types::{DeviceTime, PlaybackToken};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct Voice {
    token: PlaybackToken,
    start: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mixes mono voices at the device rate into interleaved output.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    position: u64,
    voices: Vec<Voice>,
    next_token: u64,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1) as usize,
            position: 0,
            voices: Vec::new(),
            next_token: 1,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device clock: time represented by all rendered frames.
    pub fn now(&self) -> DeviceTime {
        self.frames_to_time(self.position)
    }

    /// Schedule mono samples (already at the device rate) over
    /// `[start, start + duration)`.
    ///
    /// The frame span comes from the rounded start and end times, so voices
    /// scheduled back to back tile exactly; `samples` is trimmed or padded
    /// with silence to fit. A start the clock has already passed plays from
    /// the current frame instead of losing its head.
    pub fn add(
        &mut self,
        mut samples: Vec<f32>,
        start: DeviceTime,
        duration: Duration,
    ) -> PlaybackToken {
        let first = self.time_to_frames(start);
        let span = self.time_to_frames(start + duration).saturating_sub(first);
        samples.resize(span as usize, 0.0);

        let first = if first < self.position {
            debug!(
                late_frames = self.position - first,
                "Voice scheduled behind the clock"
            );
            self.position
        } else {
            first
        };

        let token = PlaybackToken(self.next_token);
        self.next_token += 1;
        self.voices.push(Voice {
            token,
            start: first,
            samples,
        });
        token
    }

    /// Remove a voice. Returns false if the token was unknown or already done.
    pub fn remove(&mut self, token: PlaybackToken) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.token != token);
        self.voices.len() != before
    }

    /// Remove every voice.
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Fill `out` (interleaved) and advance the clock.
    ///
    /// Returns the tokens of voices that finished within this block.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<PlaybackToken> {
        let frames = out.len() / self.channels;

        for (i, frame) in out.chunks_exact_mut(self.channels).enumerate() {
            let t = self.position + i as u64;
            let mut sum = 0.0f32;
            for voice in &self.voices {
                if t >= voice.start && t < voice.end() {
                    sum += voice.samples[(t - voice.start) as usize];
                }
            }
            frame.fill(sum.clamp(-1.0, 1.0));
        }
        // Trailing samples that don't make a whole frame
        let tail = frames * self.channels;
        out[tail..].fill(0.0);

        self.position += frames as u64;

        let position = self.position;
        let mut finished = Vec::new();
        self.voices.retain(|v| {
            if v.end() <= position {
                finished.push(v.token);
                false
            } else {
                true
            }
        });
        finished
    }

    fn time_to_frames(&self, t: DeviceTime) -> u64 {
        (t.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    fn frames_to_time(&self, frames: u64) -> DeviceTime {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}
