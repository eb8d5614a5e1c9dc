//! Scripted backends for recognition, synthesis and generation

use crate::audio::buffer::AudioBuffer;
use crate::component::BackendError;
use crate::llm::generator::{GenerationRequest, LanguageModel};
use crate::speech::stt::{RecognitionBackend, TranscriptionResult};
use crate::speech::tts::{SynthesisBackend, VoiceProfile};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

type BackendResult<T> = std::result::Result<T, BackendError>;

/// Recognizer that answers every request the same way
pub struct ScriptedRecognizer {
    reply: BackendResult<TranscriptionResult>,
    calls: AtomicUsize,
    last_language: Mutex<Option<String>>,
    last_audio: Mutex<Option<AudioBuffer>>,
}

impl ScriptedRecognizer {
    pub fn always(text: impl Into<String>) -> Self {
        Self::reply(Ok(TranscriptionResult::new(text, 0.95)))
    }

    pub fn failing(error: BackendError) -> Self {
        Self::reply(Err(error))
    }

    fn reply(reply: BackendResult<TranscriptionResult>) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            last_language: Mutex::new(None),
            last_audio: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_language(&self) -> Option<String> {
        self.last_language.lock().clone()
    }

    pub fn last_audio(&self) -> Option<AudioBuffer> {
        self.last_audio.lock().clone()
    }
}

impl RecognitionBackend for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(
        &self,
        audio: &AudioBuffer,
        language_hint: &str,
        _timeout: Option<Duration>,
    ) -> BackendResult<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_language.lock() = Some(language_hint.to_string());
        *self.last_audio.lock() = Some(audio.clone());
        self.reply.clone()
    }
}

/// Synthesizer returning silence of a fixed length
pub struct ScriptedSynthesizer {
    seconds: f64,
    sample_rate: u32,
    failures: Mutex<(u32, Option<BackendError>)>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    /// `seconds` of 16 kHz mono for every request
    pub fn seconds(seconds: f64) -> Self {
        Self {
            seconds,
            sample_rate: 16000,
            failures: Mutex::new((0, None)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `count` requests with `error`
    pub fn fail_first(self, count: u32, error: BackendError) -> Self {
        *self.failures.lock() = (count, Some(error));
        self
    }

    /// Fail every request with `error`
    pub fn failing(error: BackendError) -> Self {
        Self::seconds(0.0).fail_first(u32::MAX, error)
    }

    /// Texts received, including failed attempts
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl SynthesisBackend for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn synthesize(&self, text: &str, _voice: &VoiceProfile, _timeout: Option<Duration>) -> BackendResult<AudioBuffer> {
        self.requests.lock().push(text.to_string());

        {
            let mut failures = self.failures.lock();
            if failures.0 > 0 {
                failures.0 -= 1;
                if let Some(error) = &failures.1 {
                    return Err(error.clone());
                }
            }
        }

        AudioBuffer::silence(Duration::from_secs_f64(self.seconds), self.sample_rate, 1)
            .map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

/// Language model that always fails, recording when each call arrived
pub struct FailingLanguageModel {
    error: BackendError,
    calls: Mutex<Vec<Instant>>,
}

impl FailingLanguageModel {
    pub fn new(error: BackendError) -> Self {
        Self {
            error,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A connection reset on every call
    pub fn transient() -> Self {
        Self::new(BackendError::Network("connection reset by peer".into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Gaps between consecutive calls
    pub fn call_gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

impl LanguageModel for FailingLanguageModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn generate(&self, _request: &GenerationRequest, _timeout: Option<Duration>) -> BackendResult<String> {
        self.calls.lock().push(Instant::now());
        Err(self.error.clone())
    }
}

/// Language model that blocks until released, `hang` elapses or the
/// caller's budget runs out
///
/// Stands in for a service that accepts the connection and never answers,
/// behind a client that honours its request timeout.
pub struct HangingLanguageModel {
    hang: Duration,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl HangingLanguageModel {
    pub fn new(hang: Duration) -> Self {
        let (release_tx, release_rx) = bounded(16);
        Self {
            hang,
            release_tx,
            release_rx,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Let one blocked call return early
    pub fn release(&self) {
        let _ = self.release_tx.try_send(());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently blocked inside `generate`
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most calls ever blocked at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl LanguageModel for HangingLanguageModel {
    fn name(&self) -> &str {
        "hanging"
    }

    fn generate(&self, _request: &GenerationRequest, timeout: Option<Duration>) -> BackendResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let wait = timeout.map_or(self.hang, |t| t.min(self.hang));
        let _ = self.release_rx.recv_timeout(wait);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Err(BackendError::Timeout(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_first_then_succeed() {
        let synth = ScriptedSynthesizer::seconds(0.25).fail_first(1, BackendError::Network("reset".into()));
        let voice = VoiceProfile::default();

        assert!(synth.synthesize("hi", &voice, None).is_err());
        let audio = synth.synthesize("hi", &voice, None).unwrap();
        assert_eq!(audio.frames(), 4000);
        assert_eq!(synth.requests().len(), 2);
    }

    #[test]
    fn test_hanging_model_can_be_released() {
        let model = HangingLanguageModel::new(Duration::from_secs(30));
        model.release();

        let started = Instant::now();
        assert!(model.generate(&GenerationRequest::new("hi"), None).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(model.calls(), 1);
        assert_eq!(model.in_flight(), 0);
    }

    #[test]
    fn test_hanging_model_honours_timeout() {
        let model = HangingLanguageModel::new(Duration::from_secs(30));
        let started = Instant::now();
        let request = GenerationRequest::new("hi");
        assert!(model.generate(&request, Some(Duration::from_millis(30))).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(model.peak_in_flight(), 1);
    }

    #[test]
    fn test_failing_model_records_gaps() {
        let model = FailingLanguageModel::transient();
        for _ in 0..3 {
            let _ = model.generate(&GenerationRequest::new("hi"), None);
        }
        assert_eq!(model.calls(), 3);
        assert_eq!(model.call_gaps().len(), 2);
    }
}
