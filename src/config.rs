use crate::defaults;
use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub endpoint: EndpointConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub frame_size: usize,
    pub response_sample_rate: u32,
}

/// Remote completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Inline key. Prefer `api_key_env` so the key stays out of the file.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            response_sample_rate: defaults::RESPONSE_SAMPLE_RATE,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: defaults::ENDPOINT_URL.to_string(),
            model: defaults::MODEL.to_string(),
            voice: defaults::VOICE.to_string(),
            system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
            api_key: None,
            api_key_env: defaults::API_KEY_ENV.to_string(),
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
        }
    }
}

impl EndpointConfig {
    /// Resolve the API key: inline value first, then the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Host part of the endpoint URL, used for the reachability probe.
    pub fn host(&self) -> Option<&str> {
        let rest = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        let authority = rest.split(['/', '?']).next()?;
        let host = authority.rsplit_once(':').map_or(authority, |(h, _)| h);
        (!host.is_empty()).then_some(host)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| VoiceError::ConfigParse {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoiceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOICELINK_MODEL → endpoint.model
    /// - VOICELINK_VOICE → endpoint.voice
    /// - VOICELINK_API_KEY → endpoint.api_key
    /// - VOICELINK_INPUT_DEVICE → audio.input_device
    /// - VOICELINK_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("VOICELINK_MODEL")
            && !model.is_empty()
        {
            self.endpoint.model = model;
        }

        if let Ok(voice) = std::env::var("VOICELINK_VOICE")
            && !voice.is_empty()
        {
            self.endpoint.voice = voice;
        }

        if let Ok(key) = std::env::var("VOICELINK_API_KEY")
            && !key.is_empty()
        {
            self.endpoint.api_key = Some(key);
        }

        if let Ok(device) = std::env::var("VOICELINK_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("VOICELINK_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be positive"));
        }
        if self.audio.response_sample_rate == 0 {
            return Err(invalid("audio.response_sample_rate", "must be positive"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be positive"));
        }
        if !self.endpoint.url.starts_with("ws://") && !self.endpoint.url.starts_with("wss://") {
            return Err(invalid("endpoint.url", "must be a ws:// or wss:// URL"));
        }
        if self.endpoint.model.trim().is_empty() {
            return Err(invalid("endpoint.model", "must not be empty"));
        }
        if self.endpoint.connect_timeout_secs == 0 {
            return Err(invalid("endpoint.connect_timeout_secs", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voicelink/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicelink")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> VoiceError {
    VoiceError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Serializes tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: only used with ENV_LOCK held.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voicelink_env() {
        for key in [
            "VOICELINK_MODEL",
            "VOICELINK_VOICE",
            "VOICELINK_API_KEY",
            "VOICELINK_INPUT_DEVICE",
            "VOICELINK_OUTPUT_DEVICE",
        ] {
            remove_env(key);
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.output_device, None);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.response_sample_rate, 24000);

        assert_eq!(config.endpoint.voice, "Kore");
        assert_eq!(config.endpoint.api_key, None);
        assert_eq!(config.endpoint.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.endpoint.connect_timeout_secs, 10);
        assert!(config.endpoint.url.starts_with("wss://"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            input_device = "hw:0,0"
            output_device = "pulse"
            frame_size = 2048

            [endpoint]
            url = "ws://localhost:9000/live"
            model = "test-model"
            voice = "Puck"
            system_instruction = "Be brief."
            connect_timeout_secs = 3
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.endpoint.url, "ws://localhost:9000/live");
        assert_eq!(config.endpoint.model, "test-model");
        assert_eq!(config.endpoint.voice, "Puck");
        assert_eq!(config.endpoint.system_instruction, "Be brief.");
        assert_eq!(config.endpoint.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[endpoint]\nvoice = \"Charon\"\n")
            .unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.endpoint.voice, "Charon");
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.endpoint.model, defaults::MODEL);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio\nframe_size = ").unwrap();

        let result = Config::load(temp_file.path());
        assert!(matches!(result, Err(VoiceError::ConfigParse { .. })));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing = Path::new("/tmp/nonexistent_voicelink_config_12345.toml");
        let config = Config::load_or_default(missing).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[endpoint\nvoice = ").unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voicelink_env();

        set_env("VOICELINK_MODEL", "other-model");
        set_env("VOICELINK_VOICE", "Puck");
        set_env("VOICELINK_API_KEY", "secret");
        set_env("VOICELINK_INPUT_DEVICE", "hw:1,0");
        set_env("VOICELINK_OUTPUT_DEVICE", "pulse");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.endpoint.model, "other-model");
        assert_eq!(config.endpoint.voice, "Puck");
        assert_eq!(config.endpoint.api_key, Some("secret".to_string()));
        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));

        clear_voicelink_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voicelink_env();

        set_env("VOICELINK_VOICE", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.endpoint.voice, "Kore");

        clear_voicelink_env();
    }

    #[test]
    fn test_resolve_api_key_prefers_inline() {
        let _lock = ENV_LOCK.lock().unwrap();
        set_env("VOICELINK_TEST_KEY", "from-env");

        let mut endpoint = EndpointConfig {
            api_key_env: "VOICELINK_TEST_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(endpoint.resolve_api_key(), Some("from-env".to_string()));

        endpoint.api_key = Some("inline".to_string());
        assert_eq!(endpoint.resolve_api_key(), Some("inline".to_string()));

        endpoint.api_key = Some(String::new());
        assert_eq!(endpoint.resolve_api_key(), Some("from-env".to_string()));

        remove_env("VOICELINK_TEST_KEY");
        endpoint.api_key = None;
        assert_eq!(endpoint.resolve_api_key(), None);
    }

    #[test]
    fn test_endpoint_host() {
        let endpoint = EndpointConfig::default();
        assert_eq!(endpoint.host(), Some("generativelanguage.googleapis.com"));

        let local = EndpointConfig {
            url: "ws://127.0.0.1:9000/live?x=1".to_string(),
            ..Default::default()
        };
        assert_eq!(local.host(), Some("127.0.0.1"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(matches!(
            config.validate(),
            Err(VoiceError::ConfigInvalidValue { key, .. }) if key == "audio.frame_size"
        ));

        let mut config = Config::default();
        config.endpoint.url = "https://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.endpoint.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("voicelink"));
        assert!(path_str.ends_with("config.toml"));
    }
}
