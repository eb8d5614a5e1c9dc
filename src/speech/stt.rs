//! Speech-to-text

use crate::audio::buffer::AudioBuffer;
use crate::audio::wav::encode_wav;
use crate::component::{BackendError, ComponentError, ComponentResult};
use crate::integration::config::EndpointConfig;
use crate::utils::retry::{call_with_retry, within_budget, CancelToken, RetryPolicy};
use crate::{LyraError, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Result of transcription
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TranscriptionResult {
    /// Transcribed text
    pub text: String,

    /// Confidence score in [0, 1]
    #[serde(default)]
    pub confidence: f32,

    /// Other readings, best first
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl TranscriptionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn is_high_confidence(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// First alternative, or the main text when there are none
    pub fn best_alternative(&self) -> &str {
        self.alternatives.first().map(String::as_str).unwrap_or(&self.text)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A service that turns speech into text
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `timeout` is the caller's remaining budget; the call must not outlive it
    fn recognize(
        &self,
        audio: &AudioBuffer,
        language_hint: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<TranscriptionResult, BackendError>;
}

/// Recognition over HTTP: the recording is posted as a WAV body
pub struct HttpRecognizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpRecognizer {
    pub fn new(config: &EndpointConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LyraError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key()?,
            request_timeout,
        })
    }
}

impl RecognitionBackend for HttpRecognizer {
    fn name(&self) -> &str {
        "http"
    }

    fn recognize(
        &self,
        audio: &AudioBuffer,
        language_hint: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<TranscriptionResult, BackendError> {
        let wav = encode_wav(audio).map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        debug!(audio_bytes = wav.len(), "starting transcription");

        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("language", language_hint)])
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .timeout(within_budget(self.request_timeout, timeout))
            .body(wav);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        let mut result: TranscriptionResult = response
            .json()
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        result.confidence = result.confidence.clamp(0.0, 1.0);
        Ok(result)
    }
}

/// Retrying wrapper around a recognition backend
#[derive(Clone)]
pub struct SpeechRecognizer {
    backend: Arc<dyn RecognitionBackend>,
    language_hint: String,
    policy: RetryPolicy,
}

impl SpeechRecognizer {
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        language_hint: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            language_hint: language_hint.into(),
            policy,
        }
    }

    /// Transcribe a recording
    ///
    /// An empty recording or a blank transcription is an `EmptyResult`
    /// failure, never a success with empty text.
    pub fn recognize(&self, audio: &AudioBuffer, cancel: &CancelToken) -> ComponentResult<TranscriptionResult> {
        if audio.is_empty() {
            warn!(stage = "recognition", "empty result: recording contains no audio");
            let mut result = ComponentResult::failure(ComponentError::empty("recording"), Duration::ZERO);
            result.attempts = 0;
            return result;
        }

        let started = Instant::now();
        let result = call_with_retry("recognition", &self.policy, cancel, |attempt, budget| {
            debug!(backend = self.backend.name(), attempt, "recognizing {}", audio);
            self.backend.recognize(audio, &self.language_hint, budget)
        })
        .and_then_check(|t| t.is_blank().then(|| ComponentError::empty("transcription")));

        match &result.outcome {
            Ok(transcription) => {
                info!(
                    stage = "recognition",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    attempts = result.attempts,
                    confidence = transcription.confidence,
                    "transcribed: {:?}",
                    transcription.text
                );
                if !transcription.is_high_confidence(DEFAULT_CONFIDENCE_THRESHOLD) {
                    debug!(
                        best_alternative = transcription.best_alternative(),
                        "low confidence transcription"
                    );
                }
            }
            Err(e) if e.class == crate::component::ErrorClass::EmptyResult => {
                warn!(stage = "recognition", "empty result: {}", e.message)
            }
            Err(e) => warn!(stage = "recognition", class = %e.class, "recognition failed: {}", e.message),
        }
        result
    }
}
