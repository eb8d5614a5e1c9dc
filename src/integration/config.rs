//! Configuration for the whole device
//!
//! Loaded once from TOML at startup and handed to each component by
//! reference. The `[audio]` section has no defaults; everything else does.

use crate::speech::tts::VoiceProfile;
use crate::{LyraError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_FALLBACK_PHRASE: &str = "Sorry, I didn't catch that. Try again.";

/// Top-level configuration document
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Capture format; required
    pub audio: AudioConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub voice: VoiceProfile,

    /// Speech-to-text service
    #[serde(default)]
    pub recognizer: Option<EndpointConfig>,

    /// Text-to-speech service
    #[serde(default)]
    pub synthesizer: Option<EndpointConfig>,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Recording sample rate in Hz
    pub sample_rate: u32,

    /// Recording channel count
    pub channels: u16,

    /// Samples per capture chunk
    pub chunk_size: usize,

    /// Recording auto-stops after this many seconds
    pub max_recording_secs: f64,

    /// Format assumed for headerless PCM handed to playback (defaults to `sample_rate`)
    #[serde(default)]
    pub playback_sample_rate: Option<u32>,

    /// Input device name; the system default when unset
    #[serde(default)]
    pub input_device: Option<String>,

    /// Output device name; the system default when unset
    #[serde(default)]
    pub output_device: Option<String>,
}

impl AudioConfig {
    pub fn max_recording(&self) -> Duration {
        seconds(self.max_recording_secs)
    }

    pub fn playback_rate(&self) -> u32 {
        self.playback_sample_rate.unwrap_or(self.sample_rate)
    }
}

/// Watchdog and request ceilings, in seconds
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per HTTP request
    pub request_secs: f64,

    /// Whole Processing stage
    pub processing_secs: f64,

    /// Whole Speaking stage
    pub playback_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30.0,
            processing_secs: 45.0,
            playback_secs: 60.0,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        seconds(self.request_secs)
    }

    pub fn processing(&self) -> Duration {
        seconds(self.processing_secs)
    }

    pub fn playback(&self) -> Duration {
        seconds(self.playback_secs)
    }
}

/// Seconds as a Duration; values `validate` rejects map to zero or `Duration::MAX`
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
}

/// A strictly positive number of seconds that fits in a Duration
fn valid_seconds(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Longest chunk the capture collector will wait for
const MAX_CHUNK_SECS: usize = 10;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Location and credentials of an HTTP backend
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub endpoint: String,

    /// Literal API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            api_key_env: None,
        }
    }

    /// Resolve the API key, preferring the literal value
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| LyraError::Config(format!("Environment variable {} is not set", var))),
            None => Ok(None),
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(LyraError::Config(format!(
                "[{}] endpoint must be an http(s) URL, got {:?}",
                section, self.endpoint
            )));
        }
        Ok(())
    }
}

/// Language model backend selection
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum GeneratorConfig {
    Remote(RemoteGeneratorConfig),
    Stub(StubGeneratorConfig),
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Stub(StubGeneratorConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RemoteGeneratorConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Replaces the built-in coach prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Name the coach addresses the user by
    #[serde(default)]
    pub listener_name: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

impl RemoteGeneratorConfig {
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            api_key_env: self.api_key_env.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StubMode {
    /// Always answer with `text`
    Fixed,
    /// Repeat the user's words back
    #[default]
    Echo,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StubGeneratorConfig {
    #[serde(default)]
    pub mode: StubMode,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Spoken whenever a cycle fails
    pub fallback_phrase: String,

    /// Pause in the Error state before returning to Idle
    pub recovery_delay_ms: u64,

    /// Send recent turns along with each request
    pub conversation_context: bool,

    pub max_context_turns: usize,

    /// Capacity of the observer event channel
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fallback_phrase: DEFAULT_FALLBACK_PHRASE.to_string(),
            recovery_delay_ms: 1000,
            conversation_context: false,
            max_context_turns: 6,
            event_buffer: 100,
        }
    }
}

impl OrchestratorConfig {
    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

impl Config {
    /// Configuration with defaults everywhere except the audio format
    pub fn new(audio: AudioConfig) -> Self {
        Self {
            audio,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            voice: VoiceProfile::default(),
            recognizer: None,
            synthesizer: None,
            generator: GeneratorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LyraError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| LyraError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(LyraError::Config(msg));

        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return fail("audio.sample_rate must be greater than 0".into());
        }
        if audio.channels == 0 {
            return fail("audio.channels must be greater than 0".into());
        }
        if audio.chunk_size == 0 {
            return fail("audio.chunk_size must be greater than 0".into());
        }
        let samples_per_sec = audio.sample_rate as usize * audio.channels as usize;
        if audio.chunk_size > samples_per_sec.saturating_mul(MAX_CHUNK_SECS) {
            return fail(format!(
                "audio.chunk_size must be at most {} seconds of audio ({} samples)",
                MAX_CHUNK_SECS,
                samples_per_sec.saturating_mul(MAX_CHUNK_SECS)
            ));
        }
        if !valid_seconds(audio.max_recording_secs) {
            return fail("audio.max_recording_secs must be a positive number of seconds".into());
        }
        if audio.playback_sample_rate == Some(0) {
            return fail("audio.playback_sample_rate must be greater than 0".into());
        }

        for (name, secs) in [
            ("request_secs", self.timeouts.request_secs),
            ("processing_secs", self.timeouts.processing_secs),
            ("playback_secs", self.timeouts.playback_secs),
        ] {
            if !valid_seconds(secs) {
                return fail(format!("timeouts.{} must be a positive number of seconds", name));
            }
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".into());
        }
        if !(retry.backoff_factor.is_finite() && retry.backoff_factor > 1.0) {
            return fail("retry.backoff_factor must be greater than 1".into());
        }
        if retry.initial_delay_ms == 0 || retry.max_delay_ms < retry.initial_delay_ms {
            return fail("retry delays must satisfy 0 < initial_delay_ms <= max_delay_ms".into());
        }

        self.voice.validate()?;

        if let Some(recognizer) = &self.recognizer {
            recognizer.validate("recognizer")?;
        }
        if let Some(synthesizer) = &self.synthesizer {
            synthesizer.validate("synthesizer")?;
        }

        match &self.generator {
            GeneratorConfig::Remote(remote) => {
                remote.endpoint_config().validate("generator")?;
                if remote.model.trim().is_empty() {
                    return fail("generator.model must not be empty".into());
                }
            }
            GeneratorConfig::Stub(stub) => {
                let has_text = stub.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false);
                if stub.mode == StubMode::Fixed && !has_text {
                    return fail("generator.text is required for the fixed stub".into());
                }
            }
        }

        if self.orchestrator.fallback_phrase.trim().is_empty() {
            return fail("orchestrator.fallback_phrase must not be empty".into());
        }
        if self.orchestrator.event_buffer == 0 {
            return fail("orchestrator.event_buffer must be greater than 0".into());
        }

        Ok(())
    }

    /// Speech-to-text endpoint, required to run against real services
    pub fn require_recognizer(&self) -> Result<&EndpointConfig> {
        self.recognizer
            .as_ref()
            .ok_or_else(|| LyraError::Config("missing [recognizer] section".into()))
    }

    /// Text-to-speech endpoint, required to run against real services
    pub fn require_synthesizer(&self) -> Result<&EndpointConfig> {
        self.synthesizer
            .as_ref()
            .ok_or_else(|| LyraError::Config("missing [synthesizer] section".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [audio]
        sample_rate = 16000
        channels = 1
        chunk_size = 1024
        max_recording_secs = 30
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.timeouts.processing(), Duration::from_secs(45));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.orchestrator.fallback_phrase, DEFAULT_FALLBACK_PHRASE);
        assert_eq!(config.generator, GeneratorConfig::Stub(StubGeneratorConfig::default()));
        assert!(config.recognizer.is_none());
    }

    #[test]
    fn test_missing_audio_section_fails() {
        let err = Config::from_toml_str("[retry]\nmax_attempts = 2\n").unwrap_err();
        assert!(matches!(err, LyraError::Config(ref m) if m.contains("audio")), "{err}");
    }

    #[test]
    fn test_missing_audio_field_fails() {
        let text = "[audio]\nsample_rate = 16000\nchannels = 1\nchunk_size = 1024\n";
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("max_recording_secs"), "{err}");
    }

    #[test]
    fn test_full_config() {
        let text = format!(
            r#"{MINIMAL}
            [timeouts]
            processing_secs = 20

            [retry]
            max_attempts = 4
            backoff_factor = 1.5

            [voice]
            language_code = "en-GB"
            voice_id = "en-GB-Neural2-A"

            [recognizer]
            endpoint = "https://stt.example.com/v1/recognize"
            api_key_env = "LYRA_STT_KEY"

            [synthesizer]
            endpoint = "https://tts.example.com/v1/synthesize"
            api_key = "secret"

            [generator]
            backend = "remote"
            endpoint = "https://llm.example.com/v1/chat/completions"
            model = "coach-small"

            [orchestrator]
            conversation_context = true
            recovery_delay_ms = 250
            "#
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(config.timeouts.processing_secs, 20.0);
        assert_eq!(config.timeouts.request_secs, 30.0);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.voice.language_code, "en-GB");
        assert_eq!(
            config.require_synthesizer().unwrap().resolve_api_key().unwrap(),
            Some("secret".to_string())
        );
        match &config.generator {
            GeneratorConfig::Remote(remote) => {
                assert_eq!(remote.model, "coach-small");
                assert_eq!(remote.max_tokens, 512);
            }
            other => panic!("unexpected generator {other:?}"),
        }
        assert!(config.orchestrator.conversation_context);
        assert_eq!(config.orchestrator.recovery_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.retry.backoff_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.audio.channels = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.generator = GeneratorConfig::Stub(StubGeneratorConfig {
            mode: StubMode::Fixed,
            text: None,
        });
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.recognizer = Some(EndpointConfig::new("ftp://nope"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.timeouts.processing_secs = 1e30;
        assert!(matches!(config.validate(), Err(LyraError::Config(msg)) if msg.contains("processing_secs")));
        assert_eq!(config.timeouts.processing(), Duration::MAX);

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.audio.max_recording_secs = f64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.timeouts.playback_secs = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.timeouts.playback(), Duration::ZERO);
    }

    #[test]
    fn test_chunk_size_is_bounded() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        let per_sec = config.audio.sample_rate as usize * config.audio.channels as usize;

        config.audio.chunk_size = per_sec * 4;
        assert!(config.validate().is_ok());

        config.audio.chunk_size = per_sec * 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_env_key() {
        let endpoint = EndpointConfig {
            endpoint: "https://x".into(),
            api_key: None,
            api_key_env: Some("LYRA_TEST_KEY_THAT_IS_NOT_SET".into()),
        };
        assert!(endpoint.resolve_api_key().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyra.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(Config::load(&path).is_ok());
        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}
