//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::convert::{FrameAssembler, downmix, i16_to_f32, resample};
use crate::audio::device::{
    AudioBackend, CompletionCallback, FrameCallback, InputConfig, InputHandle, OutputConfig,
    OutputHandle,
};
use crate::audio::playback::CpalOutput;
use crate::error::{Result, VoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA/JACK/PipeWire print harmless but confusing noise.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore fd 2. Safe as long as no
/// other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA messages that occur during backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice session.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Whether a backend error message means the OS refused microphone access.
fn is_permission_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["permission", "denied", "not authorized", "unauthorized", "eacces"]
        .iter()
        .any(|p| lower.contains(p))
}

/// Map a CPAL stream error onto the device error taxonomy.
pub(crate) fn device_error(device: &str, message: impl std::fmt::Display) -> VoiceError {
    let message = message.to_string();
    if is_permission_error(&message) {
        VoiceError::PermissionDenied { message }
    } else {
        VoiceError::DeviceUnavailable {
            device: format!("{}: {}", device, message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

fn device_names(direction: Direction) -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        };
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| VoiceError::DeviceUnavailable {
        device: format!("failed to enumerate devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// List usable microphones; preferred ones are marked "\[recommended\]".
pub fn list_input_devices() -> Result<Vec<String>> {
    device_names(Direction::Input)
}

/// List usable speakers; preferred ones are marked "\[recommended\]".
pub fn list_output_devices() -> Result<Vec<String>> {
    device_names(Direction::Output)
}

/// Find a device by exact name, or the best default (PipeWire/Pulse first).
pub(crate) fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        }
        .map_err(|e| VoiceError::DeviceUnavailable {
            device: format!("failed to enumerate devices: {}", e),
        })?;

        let mut preferred = None;
        for device in devices {
            let Ok(dev_name) = device.name() else {
                continue;
            };
            match name {
                Some(wanted) if dev_name == wanted => return Ok(device),
                None if preferred.is_none() && is_preferred_device(&dev_name) => {
                    preferred = Some(device)
                }
                _ => {}
            }
        }

        if let Some(wanted) = name {
            return Err(VoiceError::DeviceUnavailable {
                device: wanted.to_string(),
            });
        }

        preferred
            .or_else(|| match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            })
            .ok_or_else(|| VoiceError::DeviceUnavailable {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through a Mutex or a `&mut` owner and
/// its methods are called synchronously, never across threads unsafely.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Frame assembly shared by every stream attempt.
struct CaptureSink {
    assembler: FrameAssembler,
    on_frame: FrameCallback,
}

impl CaptureSink {
    fn deliver(&mut self, mono: &[f32]) {
        for frame in self.assembler.push(mono) {
            (self.on_frame)(frame);
        }
    }
}

/// Open microphone delivering fixed-size mono frames at the configured rate.
///
/// Tries the configured format first, then falls back to the device's native
/// config with software mixing and resampling.
pub struct CpalInput {
    device: cpal::Device,
    stream: Option<SendableStream>,
    sink: Arc<Mutex<CaptureSink>>,
    capturing: Arc<AtomicBool>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalInput {
    /// Open and start the microphone.
    pub fn open(config: &InputConfig, on_frame: FrameCallback) -> Result<Self> {
        let device = find_device(Direction::Input, config.device.as_deref())?;
        let mut input = Self {
            device,
            stream: None,
            sink: Arc::new(Mutex::new(CaptureSink {
                assembler: FrameAssembler::new(config.frame_size, config.sample_rate),
                on_frame,
            })),
            capturing: Arc::new(AtomicBool::new(true)),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate: config.sample_rate,
        };
        input.start()?;
        Ok(input)
    }

    fn device_label(&self) -> String {
        self.device.name().unwrap_or_else(|_| "input".to_string())
    }

    /// Build a data callback that converts `T` samples to mono at the target rate.
    fn data_callback<T, F>(
        &self,
        channels: usize,
        source_rate: u32,
        to_f32: F,
    ) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
    where
        T: Copy + Send + 'static,
        F: Fn(&[T]) -> Vec<f32> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        let capturing = Arc::clone(&self.capturing);
        let counter = Arc::clone(&self.callback_count);
        let target_rate = self.sample_rate;
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            counter.fetch_add(1, Ordering::Relaxed);
            if !capturing.load(Ordering::Relaxed) {
                return;
            }
            let mono = downmix(&to_f32(data), channels);
            let mono = resample(&mono, source_rate, target_rate);
            if let Ok(mut sink) = sink.lock() {
                sink.deliver(&mono);
            }
        }
    }

    /// Try f32 then i16 at the configured rate in mono.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| warn!("Audio input stream error: {}", err);

        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            self.data_callback(1, self.sample_rate, |d: &[f32]| d.to_vec()),
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            self.data_callback(1, self.sample_rate, |d: &[i16]| i16_to_f32(d)),
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Build a stream at the device's native config, converting in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| device_error(&self.device_label(), e))?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let err_callback = |err| warn!("Audio input stream error: {}", err);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    self.data_callback(native_channels, native_rate, |d: &[f32]| d.to_vec()),
                    err_callback,
                    None,
                )
                .map_err(|e| device_error(&self.device_label(), e)),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    self.data_callback(native_channels, native_rate, |d: &[i16]| i16_to_f32(d)),
                    err_callback,
                    None,
                )
                .map_err(|e| device_error(&self.device_label(), e)),
            fmt => Err(VoiceError::DeviceUnavailable {
                device: format!(
                    "{}: unsupported native sample format {:?}",
                    self.device_label(),
                    fmt
                ),
            }),
        }
    }

    fn start(&mut self) -> Result<()> {
        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| device_error(&self.device_label(), e))?;

        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(Duration::from_millis(200));

        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            debug!("preferred input config delivered no data, retrying with native config");
            drop(stream);
            if let Ok(mut sink) = self.sink.lock() {
                sink.assembler.reset();
            }
            let native = self.build_stream_native()?;
            native
                .play()
                .map_err(|e| device_error(&self.device_label(), e))?;
            native
        } else {
            stream
        };

        self.stream = Some(SendableStream(stream));
        Ok(())
    }
}

impl InputHandle for CpalInput {
    fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            stream
                .0
                .pause()
                .map_err(|e| device_error(&self.device_label(), e))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            stream
                .0
                .pause()
                .map_err(|e| device_error(&self.device_label(), e))?;
        }
        Ok(())
    }
}

/// Hardware [`AudioBackend`] backed by the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        config: &InputConfig,
        on_frame: FrameCallback,
    ) -> Result<Box<dyn InputHandle>> {
        Ok(Box::new(CpalInput::open(config, on_frame)?))
    }

    fn open_output(
        &self,
        config: &OutputConfig,
        on_finished: CompletionCallback,
    ) -> Result<Arc<dyn OutputHandle>> {
        Ok(Arc::new(CpalOutput::open(config, on_finished)?))
    }
}
