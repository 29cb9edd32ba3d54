use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use voicelink::app::{SessionOptions, run_session_command};
use voicelink::audio::capture::{list_input_devices, list_output_devices};
use voicelink::cli::{Cli, Commands, ConfigAction};
use voicelink::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            let options = SessionOptions {
                input_device: cli.input_device,
                output_device: cli.output_device,
                voice: cli.voice,
                model: cli.model,
                connect_timeout: cli.connect_timeout,
                quiet: cli.quiet,
                verbosity: cli.verbose,
            };
            run_session_command(config, options).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voicelink",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Route `tracing` output to stderr.
///
/// `RUST_LOG` wins when set; otherwise `-v` raises the level.
fn init_logging(quiet: bool, verbosity: u8) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("voicelink={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voicelink/config.toml)
/// 3. Built-in defaults
///
/// Environment overrides apply on top of either.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("Input devices:");
    if inputs.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    println!("Output devices:");
    if outputs.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
            if !config_path.exists() {
                eprintln!("{}", "(file does not exist, defaults in use)".dimmed());
            }
        }
        ConfigAction::Show => {
            let mut config = Config::load_or_default(&config_path)?.with_env_overrides();
            if config.endpoint.api_key.is_some() {
                config.endpoint.api_key = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
