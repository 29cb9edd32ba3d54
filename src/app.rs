//! Live voice session from the terminal.
//!
//! Wires the hardware audio backend, the WebSocket endpoint and the session
//! manager together, then renders status until Ctrl+C or the session ends.

use crate::audio::capture::{CpalBackend, suppress_audio_warnings};
use crate::config::Config;
use crate::error::{Result, VoiceError};
use crate::session::{SessionLifecycleManager, SessionState, SessionStats, SessionStatus};
use crate::transport::{ConnectivityProbe, DnsProbe, StaticProbe, WebSocketConnector};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Command-line overrides for a live session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub quiet: bool,
    /// 0 = status line, 1+ = status line with level meter and stats
    pub verbosity: u8,
}

impl SessionOptions {
    /// Apply CLI overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref d) = self.input_device {
            config.audio.input_device = Some(d.clone());
        }
        if let Some(ref d) = self.output_device {
            config.audio.output_device = Some(d.clone());
        }
        if let Some(ref v) = self.voice {
            config.endpoint.voice = v.clone();
        }
        if let Some(ref m) = self.model {
            config.endpoint.model = m.clone();
        }
        if let Some(t) = self.connect_timeout {
            // Whole seconds, rounded up so short timeouts stay non-zero.
            config.endpoint.connect_timeout_secs = t.as_millis().div_ceil(1000) as u64;
        }
    }
}

/// Run one live session until Ctrl+C or until the endpoint ends it.
///
/// # Arguments
/// * `config` - Base configuration (file + environment)
/// * `options` - CLI overrides and display settings
pub async fn run_session_command(mut config: Config, options: SessionOptions) -> Result<()> {
    // Suppress noisy JACK/ALSA warnings before audio init
    suppress_audio_warnings();

    options.apply(&mut config);
    config.validate()?;
    info!(
        version = %crate::version_string(),
        model = %config.endpoint.model,
        voice = %config.endpoint.voice,
        "Starting voicelink"
    );

    let probe: Arc<dyn ConnectivityProbe> = match config.endpoint.host() {
        Some(host) => Arc::new(DnsProbe::new(host)),
        None => Arc::new(StaticProbe(true)),
    };
    let connector = Arc::new(WebSocketConnector::new(config.audio.response_sample_rate));
    let manager = Arc::new(SessionLifecycleManager::new(
        config,
        Arc::new(CpalBackend),
        connector,
        probe,
    )?);

    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_task = {
        let manager = Arc::clone(&manager);
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
                manager.stop();
            }
        })
    };

    if !options.quiet {
        eprintln!("{}", "Connecting...".dimmed());
    }

    match manager.start().await {
        Ok(()) => {}
        Err(VoiceError::Cancelled) => {
            signal_task.abort();
            return Ok(());
        }
        Err(e) => {
            signal_task.abort();
            if !options.quiet {
                eprintln!("{}", e.user_message().red());
            }
            return Err(e);
        }
    }

    let final_status = monitor(&manager, &options).await;
    signal_task.abort();

    if !options.quiet {
        eprintln!();
        if interrupted.load(Ordering::SeqCst) {
            eprintln!("{}", "Session stopped.".dimmed());
        } else if let Some(ref reason) = final_status.error {
            eprintln!("{}", reason.red());
        } else {
            eprintln!("{}", "Session ended by endpoint.".dimmed());
        }
        if options.verbosity >= 1 {
            eprintln!("{}", format_stats(&manager.stats()).dimmed());
        }
    }

    match final_status.error {
        Some(reason) if !interrupted.load(Ordering::SeqCst) => Err(VoiceError::Other(reason)),
        _ => Ok(()),
    }
}

/// Render status changes until the session returns to idle.
async fn monitor(manager: &SessionLifecycleManager, options: &SessionOptions) -> SessionStatus {
    let mut status_rx = manager.subscribe_status();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut last_line = String::new();

    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let status = status_rx.borrow_and_update().clone();
        if status.state == SessionState::Idle {
            return status;
        }

        if !options.quiet {
            let line = if options.verbosity >= 1 && status.is_active() {
                format!("{}  {}", render_meter(manager.volume()), status)
            } else {
                status.to_string()
            };
            if line != last_line {
                // \r overwrites the line, \x1b[K clears the rest
                eprint!("\r{}\x1b[K", line);
                io::stderr().flush().ok();
                last_line = line;
            }
        }
    }

    manager.status()
}

/// Level meter for the capture volume.
pub fn render_meter(level: f32) -> String {
    const BAR_WIDTH: usize = 30;

    // Log scale: map level 0.001-0.5 to 0-30 bars
    let log_level = if level > 0.001 {
        ((level.log10() + 3.0) / 2.7 * BAR_WIDTH as f32).clamp(0.0, BAR_WIDTH as f32)
    } else {
        0.0
    };
    let filled = log_level as usize;

    let bar: String = (0..BAR_WIDTH)
        .map(|i| if i < filled { '█' } else { '░' })
        .collect();
    format!("[{}] {:.3}", bar, level)
}

pub fn format_stats(stats: &SessionStats) -> String {
    format!(
        "frames sent: {}, dropped before open: {}, chunks played: {}, decode failures: {}, interruptions: {}",
        stats.frames_sent,
        stats.frames_dropped,
        stats.chunks_scheduled,
        stats.decode_failures,
        stats.interruptions
    )
}
