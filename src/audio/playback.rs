//! Bounded speech playback
//!
//! Every [`PlaybackSource`] shape is normalized to one [`AudioBuffer`] before
//! the output device opens. [`AudioPlayback::wait`] stops the device once the
//! timeout passes and releases it on every path, so a stuck speaker cannot
//! hold the cycle open.

use super::buffer::AudioBuffer;
use super::device::OutputDevice;
use super::preprocessor::StreamFormat;
use super::wav::{decode_wav, is_wav, read_wav};
use crate::component::{ComponentError, ComponentResult};
use crate::{LyraError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Anything outside this crate that can hand over playable audio
pub trait AudioSource: Send {
    fn audio_data(&self) -> Result<AudioBuffer>;

    /// Short label for logs
    fn label(&self) -> String {
        "external source".to_string()
    }
}

/// The shapes playable audio arrives in
pub enum PlaybackSource {
    /// WAV file contents, or raw int16 PCM in the default playback format
    Bytes(Vec<u8>),
    Buffer(AudioBuffer),
    File(PathBuf),
    Wrapped(Box<dyn AudioSource>),
}

/// What is known about a source before it is decoded
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    pub shape: &'static str,
    pub byte_len: Option<usize>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub duration: Option<Duration>,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shape)?;
        if let Some(bytes) = self.byte_len {
            write!(f, " {} bytes", bytes)?;
        }
        if let (Some(rate), Some(channels)) = (self.sample_rate, self.channels) {
            write!(f, " {}Hz {}ch", rate, channels)?;
        }
        if let Some(duration) = self.duration {
            write!(f, " {:.2}s", duration.as_secs_f64())?;
        }
        Ok(())
    }
}

impl PlaybackSource {
    /// Turn any source shape into a buffer
    ///
    /// `raw_format` applies to headerless byte input.
    pub fn normalize(self, raw_format: StreamFormat) -> Result<AudioBuffer> {
        match self {
            PlaybackSource::Bytes(bytes) if is_wav(&bytes) => decode_wav(&bytes),
            PlaybackSource::Bytes(bytes) => AudioBuffer::new(
                bytes,
                raw_format.sample_rate,
                raw_format.channels,
                super::buffer::SampleFormat::I16,
            ),
            PlaybackSource::Buffer(buffer) => Ok(buffer),
            PlaybackSource::File(path) => read_wav(&path),
            PlaybackSource::Wrapped(source) => source.audio_data(),
        }
    }

    pub fn describe(&self) -> SourceInfo {
        match self {
            PlaybackSource::Bytes(bytes) => {
                // Header fields are only trusted once decoded
                let decoded = is_wav(bytes).then(|| decode_wav(bytes).ok()).flatten();
                SourceInfo {
                    shape: if is_wav(bytes) { "wav bytes" } else { "raw bytes" },
                    byte_len: Some(bytes.len()),
                    sample_rate: decoded.as_ref().map(AudioBuffer::sample_rate),
                    channels: decoded.as_ref().map(AudioBuffer::channels),
                    duration: decoded.as_ref().map(AudioBuffer::duration),
                }
            }
            PlaybackSource::Buffer(buffer) => SourceInfo {
                shape: "buffer",
                byte_len: Some(buffer.byte_len()),
                sample_rate: Some(buffer.sample_rate()),
                channels: Some(buffer.channels()),
                duration: Some(buffer.duration()),
            },
            PlaybackSource::File(path) => {
                let spec = hound::WavReader::open(path).ok().map(|r| (r.spec(), r.duration()));
                SourceInfo {
                    shape: "file",
                    byte_len: std::fs::metadata(path).ok().map(|m| m.len() as usize),
                    sample_rate: spec.map(|(s, _)| s.sample_rate),
                    channels: spec.map(|(s, _)| s.channels),
                    duration: spec.map(|(s, frames)| {
                        Duration::from_secs_f64(frames as f64 / s.sample_rate.max(1) as f64)
                    }),
                }
            }
            PlaybackSource::Wrapped(_) => SourceInfo {
                shape: "wrapped",
                byte_len: None,
                sample_rate: None,
                channels: None,
                duration: None,
            },
        }
    }
}

impl fmt::Debug for PlaybackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            PlaybackSource::Buffer(buffer) => write!(f, "Buffer({})", buffer),
            PlaybackSource::File(path) => write!(f, "File({:?})", path),
            PlaybackSource::Wrapped(source) => write!(f, "Wrapped({})", source.label()),
        }
    }
}

impl From<AudioBuffer> for PlaybackSource {
    fn from(buffer: AudioBuffer) -> Self {
        PlaybackSource::Buffer(buffer)
    }
}

impl From<Vec<u8>> for PlaybackSource {
    fn from(bytes: Vec<u8>) -> Self {
        PlaybackSource::Bytes(bytes)
    }
}

impl From<PathBuf> for PlaybackSource {
    fn from(path: PathBuf) -> Self {
        PlaybackSource::File(path)
    }
}

impl From<Box<dyn AudioSource>> for PlaybackSource {
    fn from(source: Box<dyn AudioSource>) -> Self {
        PlaybackSource::Wrapped(source)
    }
}

/// How a bounded playback ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Forcibly stopped at the deadline
    TimedOut,
}

pub struct AudioPlayback {
    device: Box<dyn OutputDevice>,
    raw_format: StreamFormat,
    done: Option<Receiver<()>>,
    started_at: Option<Instant>,
}

impl AudioPlayback {
    pub fn new(device: Box<dyn OutputDevice>, raw_format: StreamFormat) -> Self {
        Self {
            device,
            raw_format,
            done: None,
            started_at: None,
        }
    }

    /// Start playing without waiting
    pub fn play(&mut self, source: impl Into<PlaybackSource>) -> Result<()> {
        let source = source.into();
        let info = source.describe();
        let buffer = source.normalize(self.raw_format)?;

        if self.device.is_open() {
            warn!("Playback already active, stopping it first");
            self.stop()?;
        }

        let (done_tx, done_rx) = bounded(1);
        if buffer.is_empty() {
            debug!("Empty buffer, nothing to play");
            let _ = done_tx.send(());
        } else {
            self.device
                .start(&buffer, done_tx)
                .map_err(|e| LyraError::Playback(e.to_string()))?;
        }

        self.done = Some(done_rx);
        self.started_at = Some(Instant::now());
        info!(source = %info, device = %self.device.name(), "Playback started: {}", buffer);
        Ok(())
    }

    /// Wait for the current playback, stopping it at `timeout`
    pub fn wait(&mut self, timeout: Duration) -> Result<PlaybackOutcome> {
        let done = match self.done.take() {
            Some(done) => done,
            None => return Err(LyraError::Playback("nothing is playing".into())),
        };

        let outcome = match done.recv_timeout(timeout) {
            Ok(()) => Ok(PlaybackOutcome::Completed),
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Playback timed out, stopping");
                Ok(PlaybackOutcome::TimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(LyraError::Playback("output device ended without finishing".into()))
            }
        };

        // The device handle is released on every path before returning
        self.stop()?;
        outcome
    }

    /// Play `source` and block until it finishes or `timeout` elapses
    pub fn play_and_wait(
        &mut self,
        source: impl Into<PlaybackSource>,
        timeout: Duration,
    ) -> Result<PlaybackOutcome> {
        self.play(source)?;
        self.wait(timeout)
    }

    /// [`play_and_wait`](Self::play_and_wait) reported as a [`ComponentResult`]
    pub fn play_to_completion(
        &mut self,
        source: impl Into<PlaybackSource>,
        timeout: Duration,
    ) -> ComponentResult<PlaybackOutcome> {
        let started = Instant::now();
        match self.play_and_wait(source, timeout) {
            Ok(outcome) => ComponentResult::success(outcome, started.elapsed()),
            Err(e) => ComponentResult::failure(ComponentError::from(e), started.elapsed()),
        }
    }

    /// Halt playback and release the device
    pub fn stop(&mut self) -> Result<()> {
        self.done = None;
        if let Some(started) = self.started_at.take() {
            debug!(played_ms = started.elapsed().as_millis() as u64, "Playback released");
        }
        self.device.stop()
    }

    pub fn is_active(&self) -> bool {
        self.device.is_open()
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        let _ = self.device.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{encode_wav, write_wav};
    use crate::component::ErrorClass;
    use crate::testing::SimulatedSpeaker;

    fn raw() -> StreamFormat {
        StreamFormat::new(16000, 1)
    }

    fn secs(seconds: f64) -> AudioBuffer {
        AudioBuffer::silence(Duration::from_secs_f64(seconds), 16000, 1).unwrap()
    }

    struct Fixture(AudioBuffer);

    impl AudioSource for Fixture {
        fn audio_data(&self) -> Result<AudioBuffer> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_every_shape_normalizes() {
        let buffer = secs(0.05);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        write_wav(&path, &buffer).unwrap();

        let shapes: Vec<PlaybackSource> = vec![
            buffer.clone().into(),
            encode_wav(&buffer).unwrap().into(),
            buffer.data().to_vec().into(),
            path.into(),
            PlaybackSource::Wrapped(Box::new(Fixture(buffer.clone()))),
        ];

        for shape in shapes {
            let normalized = shape.normalize(raw()).unwrap();
            assert_eq!(normalized, buffer);
        }
    }

    #[test]
    fn test_describe() {
        let info = PlaybackSource::from(secs(2.0)).describe();
        assert_eq!(info.shape, "buffer");
        assert_eq!(info.byte_len, Some(64000));
        assert_eq!(info.duration, Some(Duration::from_secs(2)));

        let wav = PlaybackSource::from(encode_wav(&secs(0.5)).unwrap()).describe();
        assert_eq!(wav.shape, "wav bytes");
        assert_eq!(wav.sample_rate, Some(16000));
    }

    #[test]
    fn test_play_completes() {
        let speaker = SimulatedSpeaker::new();
        let monitor = speaker.monitor();
        let mut playback = AudioPlayback::new(Box::new(speaker), raw());

        let outcome = playback.play_and_wait(secs(0.05), Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(monitor.open_handles(), 0);
        assert_eq!(monitor.played().len(), 1);
    }

    #[test]
    fn test_timeout_releases_device() {
        let speaker = SimulatedSpeaker::new();
        let monitor = speaker.monitor();
        let mut playback = AudioPlayback::new(Box::new(speaker), raw());

        let started = Instant::now();
        let outcome = playback.play_and_wait(secs(5.0), Duration::from_millis(100)).unwrap();
        assert_eq!(outcome, PlaybackOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(monitor.open_handles(), 0);
        assert!(!playback.is_active());
    }

    #[test]
    fn test_empty_buffer_completes_immediately() {
        let speaker = SimulatedSpeaker::new();
        let monitor = speaker.monitor();
        let mut playback = AudioPlayback::new(Box::new(speaker), raw());

        let outcome = playback.play_and_wait(secs(0.0), Duration::from_millis(10)).unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert!(monitor.played().is_empty());
    }

    #[test]
    fn test_failed_device_is_local_resource() {
        let speaker = SimulatedSpeaker::broken();
        let mut playback = AudioPlayback::new(Box::new(speaker), raw());

        let result = playback.play_to_completion(secs(0.1), Duration::from_secs(1));
        assert_eq!(result.error_class(), Some(ErrorClass::LocalResource));
    }

    #[test]
    fn test_missing_file_fails() {
        let mut playback = AudioPlayback::new(Box::new(SimulatedSpeaker::new()), raw());
        let result = playback.play(PathBuf::from("/nonexistent/clip.wav"));
        assert!(result.is_err());
    }
}
