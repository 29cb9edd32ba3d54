//! Speaker output using CPAL.
//!
//! The output stream runs continuously and pulls from a [`Mixer`]; the mixer's
//! rendered-frame count is the device clock used for scheduling.

use crate::audio::capture::{Direction, SendableStream, device_error, find_device};
use crate::audio::convert::{downmix, resample};
use crate::audio::device::{CompletionCallback, OutputConfig, OutputHandle};
use crate::audio::mixer::Mixer;
use crate::audio::types::{DeviceTime, PlaybackBuffer, PlaybackToken};
use crate::error::{Result, VoiceError};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct CpalOutput {
    stream: Mutex<Option<SendableStream>>,
    mixer: Arc<Mutex<Mixer>>,
    label: String,
}

impl CpalOutput {
    /// Open the speaker at its native config and start the render loop.
    pub fn open(config: &OutputConfig, on_finished: CompletionCallback) -> Result<Self> {
        use cpal::SampleFormat;

        let device = find_device(Direction::Output, config.device.as_deref())?;
        let label = device.name().unwrap_or_else(|_| "output".to_string());

        let default_config = device
            .default_output_config()
            .map_err(|e| device_error(&label, e))?;
        let rate = default_config.sample_rate().0;
        let channels = default_config.channels();
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        debug!(
            device = %label,
            rate,
            channels,
            source_rate = config.sample_rate,
            "opening output"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(rate, channels)));
        let err_callback = |err| warn!("Audio output stream error: {}", err);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => {
                let mixer = Arc::clone(&mixer);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let finished = match mixer.lock() {
                            Ok(mut m) => m.render(data),
                            Err(_) => {
                                data.fill(0.0);
                                return;
                            }
                        };
                        for token in finished {
                            on_finished(token);
                        }
                    },
                    err_callback,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mixer = Arc::clone(&mixer);
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        let finished = match mixer.lock() {
                            Ok(mut m) => m.render(&mut scratch),
                            Err(_) => {
                                data.fill(0);
                                return;
                            }
                        };
                        for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                            *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                        for token in finished {
                            on_finished(token);
                        }
                    },
                    err_callback,
                    None,
                )
            }
            fmt => {
                return Err(VoiceError::DeviceUnavailable {
                    device: format!("{}: unsupported output sample format {:?}", label, fmt),
                });
            }
        }
        .map_err(|e| device_error(&label, e))?;

        stream.play().map_err(|e| device_error(&label, e))?;

        Ok(Self {
            stream: Mutex::new(Some(SendableStream(stream))),
            mixer,
            label,
        })
    }
}

impl OutputHandle for CpalOutput {
    fn now(&self) -> DeviceTime {
        self.mixer.lock().map(|m| m.now()).unwrap_or_default()
    }

    fn schedule(&self, buffer: &PlaybackBuffer, start: DeviceTime) -> Result<PlaybackToken> {
        let device_rate = self
            .mixer
            .lock()
            .map(|m| m.sample_rate())
            .map_err(|_| VoiceError::DeviceUnavailable {
                device: self.label.clone(),
            })?;

        // Convert outside the lock so rendering never waits on resampling
        let mono = downmix(&buffer.samples, buffer.channels as usize);
        let samples = resample(&mono, buffer.sample_rate, device_rate);

        // The render callback may pass `start` meanwhile; the mixer clamps it
        let mut mixer = self.mixer.lock().map_err(|_| VoiceError::DeviceUnavailable {
            device: self.label.clone(),
        })?;
        Ok(mixer.add(samples, start, buffer.duration))
    }

    fn cancel(&self, token: PlaybackToken) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(token);
        }
    }

    fn close(&self) -> Result<()> {
        let stream = self
            .stream
            .lock()
            .map_err(|_| VoiceError::DeviceUnavailable {
                device: self.label.clone(),
            })?
            .take();
        if let Some(stream) = stream {
            stream.0.pause().map_err(|e| device_error(&self.label, e))?;
        }
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
        Ok(())
    }
}
