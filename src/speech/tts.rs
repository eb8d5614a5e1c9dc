//! Text-to-speech
//!
//! [`SpeechSynthesizer`] wraps a [`SynthesisBackend`] with retry and
//! empty-result checks. The HTTP backend posts JSON and expects WAV (or raw
//! 16-bit PCM) back.

use crate::audio::buffer::AudioBuffer;
use crate::audio::wav::{decode_wav, is_wav};
use crate::component::{BackendError, ComponentError, ComponentResult};
use crate::integration::config::EndpointConfig;
use crate::utils::retry::{call_with_retry, within_budget, CancelToken, RetryPolicy};
use crate::{LyraError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Voice used for every reply
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VoiceProfile {
    /// BCP-47 language code, also used as the recognition hint
    pub language_code: String,

    /// Backend-specific voice name; the backend default when unset
    pub voice_id: Option<String>,

    /// 1.0 is normal speed
    pub speaking_rate: f32,

    /// Gain in decibels relative to the backend's normal output
    pub volume_gain_db: f32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            language_code: "en-US".to_string(),
            voice_id: None,
            speaking_rate: 1.0,
            volume_gain_db: 0.0,
        }
    }
}

impl VoiceProfile {
    pub fn validate(&self) -> Result<()> {
        if self.language_code.trim().is_empty() {
            return Err(LyraError::Config("voice.language_code must not be empty".into()));
        }
        if !(0.25..=4.0).contains(&self.speaking_rate) {
            return Err(LyraError::Config(
                "voice.speaking_rate must be between 0.25 and 4.0".into(),
            ));
        }
        if !(-96.0..=16.0).contains(&self.volume_gain_db) {
            return Err(LyraError::Config(
                "voice.volume_gain_db must be between -96 and 16".into(),
            ));
        }
        Ok(())
    }
}

/// A service that turns text into audio
pub trait SynthesisBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `timeout` is the caller's remaining budget; the call must not outlive it
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        timeout: Option<Duration>,
    ) -> std::result::Result<AudioBuffer, BackendError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    language_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
    speaking_rate: f32,
    volume_gain_db: f32,
    sample_rate: u32,
}

/// Synthesis over HTTP
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    sample_rate: u32,
    request_timeout: Duration,
}

impl HttpSynthesizer {
    /// `sample_rate` is requested from the service and assumed for headerless replies
    pub fn new(config: &EndpointConfig, request_timeout: Duration, sample_rate: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LyraError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key()?,
            sample_rate,
            request_timeout,
        })
    }
}

impl SynthesisBackend for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        timeout: Option<Duration>,
    ) -> std::result::Result<AudioBuffer, BackendError> {
        let body = SynthesisRequest {
            text,
            language_code: &voice.language_code,
            voice_id: voice.voice_id.as_deref(),
            speaking_rate: voice.speaking_rate,
            volume_gain_db: voice.volume_gain_db,
            sample_rate: self.sample_rate,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(within_budget(self.request_timeout, timeout))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        let bytes = response.bytes()?;
        debug!(bytes = bytes.len(), "received synthesized audio");
        if bytes.is_empty() {
            return Err(BackendError::Empty);
        }

        if is_wav(&bytes) {
            decode_wav(&bytes).map_err(|e| BackendError::Malformed(e.to_string()))
        } else {
            AudioBuffer::new(bytes.to_vec(), self.sample_rate, 1, crate::audio::SampleFormat::I16)
                .map_err(|e| BackendError::Malformed(e.to_string()))
        }
    }
}

/// Retrying wrapper around a synthesis backend
#[derive(Clone)]
pub struct SpeechSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    voice: VoiceProfile,
    policy: RetryPolicy,
}

impl SpeechSynthesizer {
    pub fn new(backend: Arc<dyn SynthesisBackend>, voice: VoiceProfile, policy: RetryPolicy) -> Self {
        Self {
            backend,
            voice,
            policy,
        }
    }

    pub fn voice(&self) -> &VoiceProfile {
        &self.voice
    }

    /// Synthesize `text` with the configured voice
    ///
    /// Blank text is rejected without calling the backend.
    pub fn synthesize(&self, text: &str, cancel: &CancelToken) -> ComponentResult<AudioBuffer> {
        if text.trim().is_empty() {
            warn!(stage = "synthesis", "empty result: refusing to synthesize blank text");
            let mut result = ComponentResult::failure(ComponentError::empty("synthesis input"), Duration::ZERO);
            result.attempts = 0;
            return result;
        }

        let started = Instant::now();
        let result = call_with_retry("synthesis", &self.policy, cancel, |attempt, budget| {
            debug!(backend = self.backend.name(), attempt, chars = text.len(), "synthesizing");
            self.backend.synthesize(text, &self.voice, budget)
        })
        .and_then_check(|audio| audio.is_empty().then(|| ComponentError::empty("synthesized audio")));

        match &result.outcome {
            Ok(audio) => info!(
                stage = "synthesis",
                elapsed_ms = started.elapsed().as_millis() as u64,
                attempts = result.attempts,
                "synthesized {}",
                audio
            ),
            Err(e) => warn!(stage = "synthesis", class = %e.class, "synthesis failed: {}", e.message),
        }
        result
    }
}
