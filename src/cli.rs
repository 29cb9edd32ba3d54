//! Command-line interface for voicelink
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a realtime voice assistant from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "voicelink",
    version,
    about = "Talk to a realtime voice assistant from the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: start a live session)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: level meter + info logs, -vv: debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Microphone to capture from (see `voicelink devices`)
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Speaker to play responses on
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Prebuilt voice for responses (default: Kore)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Endpoint model name
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Give up connecting after this long. Examples: 10s, 1m, 1500ms
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub connect_timeout: Option<Duration>,
}

/// Parse a timeout string.
///
/// Bare numbers are seconds; anything else goes through `humantime`.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration (file + environment + defaults)
    Show,
}
