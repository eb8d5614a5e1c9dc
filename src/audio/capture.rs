//! Push-to-talk recording
//!
//! While recording, a collector thread drains the device ring buffer into
//! fixed-size chunks. Once the configured maximum duration is reached it
//! stops accumulating and announces the limit on [`AudioCapture::limit_receiver`];
//! the owner then calls [`AudioCapture::stop`] to collect the partial buffer.

use super::buffer::AudioBuffer;
use super::device::InputDevice;
use super::preprocessor::{conform_samples, StreamFormat};
use super::ring::AudioRingBuffer;
use crate::integration::config::AudioConfig;
use crate::{LyraError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result of [`AudioCapture::start`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A duplicate start; the running recording is untouched
    AlreadyRecording,
}

struct Session {
    ring: AudioRingBuffer,
    stop: Arc<AtomicBool>,
    collector: JoinHandle<Vec<Box<[i16]>>>,
    started_at: Instant,
}

pub struct AudioCapture {
    device: Box<dyn InputDevice>,
    target: StreamFormat,
    chunk_size: usize,
    max_duration: Duration,
    recording: Arc<AtomicBool>,
    session: Option<Session>,
    limit_tx: Sender<()>,
    limit_rx: Receiver<()>,
}

impl AudioCapture {
    pub fn new(device: Box<dyn InputDevice>, config: &AudioConfig) -> Self {
        let (limit_tx, limit_rx) = bounded(1);
        Self {
            device,
            target: StreamFormat::new(config.sample_rate, config.channels),
            chunk_size: config.chunk_size.max(1),
            max_duration: config.max_recording(),
            recording: Arc::new(AtomicBool::new(false)),
            session: None,
            limit_tx,
            limit_rx,
        }
    }

    /// Begin recording
    ///
    /// Starting while already recording is a successful no-op.
    pub fn start(&mut self) -> Result<StartOutcome> {
        if self
            .recording
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Capture already recording; ignoring start");
            return Ok(StartOutcome::AlreadyRecording);
        }

        // A limit event left over from an earlier recording is stale
        while self.limit_rx.try_recv().is_ok() {}

        let source = self.device.format();
        let samples_per_sec = source.sample_rate as usize * source.channels as usize;
        let max_samples = (self.max_duration.as_secs_f64() * samples_per_sec as f64) as usize;
        // Two seconds of slack between the device callback and the collector,
        // and always room for two whole chunks
        let ring = AudioRingBuffer::new(ring_capacity(samples_per_sec, self.chunk_size));

        if let Err(e) = self.device.open(ring.clone()) {
            self.recording.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let collector = match spawn_collector(
            ring.clone(),
            Arc::clone(&stop),
            self.chunk_size,
            max_samples,
            self.limit_tx.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.device.close();
                self.recording.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.session = Some(Session {
            ring,
            stop,
            collector,
            started_at: Instant::now(),
        });

        info!(device = %self.device.name(), "Recording started");
        Ok(StartOutcome::Started)
    }

    /// Finish recording and return the captured audio
    ///
    /// Fails with [`LyraError::NothingToStop`] when no recording is running.
    pub fn stop(&mut self) -> Result<AudioBuffer> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Err(LyraError::NothingToStop),
        };

        let close_result = self.device.close();
        session.stop.store(true, Ordering::SeqCst);
        let joined = session.collector.join();
        self.recording.store(false, Ordering::SeqCst);

        close_result?;
        let chunks = joined.map_err(|_| LyraError::AudioDevice("Capture collector panicked".into()))?;

        if session.ring.overruns() > 0 {
            warn!(overruns = session.ring.overruns(), "Capture dropped samples");
        }

        let raw: Vec<i16> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let source = self.device.format();
        let samples = if raw.is_empty() {
            raw
        } else {
            conform_samples(&raw, source, self.target, true)?
        };
        let buffer = AudioBuffer::from_i16(&samples, self.target.sample_rate, self.target.channels)?;

        info!(
            held_ms = session.started_at.elapsed().as_millis() as u64,
            chunks = chunks.len(),
            "Recording stopped: {}",
            buffer
        );
        Ok(buffer)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Time since the current recording started
    pub fn elapsed(&self) -> Option<Duration> {
        self.session.as_ref().map(|s| s.started_at.elapsed())
    }

    /// Fires once per recording when the maximum duration is reached
    pub fn limit_receiver(&self) -> Receiver<()> {
        self.limit_rx.clone()
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    /// Whether the input device currently holds an OS handle
    pub fn device_open(&self) -> bool {
        self.device.is_open()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.stop();
        }
    }
}

fn ring_capacity(samples_per_sec: usize, chunk_size: usize) -> usize {
    (samples_per_sec * 2).max(chunk_size.saturating_mul(2))
}

fn spawn_collector(
    ring: AudioRingBuffer,
    stop: Arc<AtomicBool>,
    chunk_size: usize,
    max_samples: usize,
    limit_tx: Sender<()>,
) -> Result<JoinHandle<Vec<Box<[i16]>>>> {
    std::thread::Builder::new()
        .name("lyra-capture".into())
        .spawn(move || {
            let mut chunks: Vec<Box<[i16]>> = Vec::new();
            let mut collected = 0usize;
            let mut limited = false;

            loop {
                let stopping = stop.load(Ordering::SeqCst);

                if limited {
                    ring.clear();
                } else {
                    // Full chunks while running, the remainder once stopping
                    while ring.len() >= chunk_size || (stopping && !ring.is_empty()) {
                        let want = chunk_size.min(max_samples - collected);
                        let chunk = ring.read(want);
                        if chunk.is_empty() {
                            break;
                        }
                        collected += chunk.len();
                        chunks.push(chunk.into_boxed_slice());

                        if collected >= max_samples {
                            info!(samples = collected, "Maximum recording duration reached");
                            limited = true;
                            let _ = limit_tx.try_send(());
                            ring.clear();
                            break;
                        }
                    }
                }

                if stopping {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }

            chunks
        })
        .map_err(|e| LyraError::AudioDevice(format!("Failed to spawn capture thread: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticMicrophone;

    fn config(max_secs: f64) -> AudioConfig {
        AudioConfig {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            max_recording_secs: max_secs,
            playback_sample_rate: None,
            input_device: None,
            output_device: None,
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config(10.0));

        assert_eq!(capture.start().unwrap(), StartOutcome::Started);
        assert_eq!(capture.start().unwrap(), StartOutcome::AlreadyRecording);
        assert!(capture.is_recording());
        capture.stop().unwrap();
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_double_stop() {
        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config(10.0));

        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(capture.stop().is_ok());
        assert_eq!(capture.stop(), Err(LyraError::NothingToStop));
    }

    #[test]
    fn test_chunk_larger_than_two_seconds() {
        let mut config = config(10.0);
        config.chunk_size = 40_000;
        assert!(ring_capacity(16000, config.chunk_size) >= 80_000);

        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config);
        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(3000));
        let buffer = capture.stop().unwrap();

        // Nothing was overwritten while waiting for a full chunk
        assert!(buffer.duration_secs() > 2.7, "got {}", buffer);
    }

    #[test]
    fn test_stop_releases_device() {
        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config(10.0));

        capture.start().unwrap();
        assert!(capture.device_open());
        capture.stop().unwrap();
        assert!(!capture.device_open());
    }

    #[test]
    fn test_recording_has_duration() {
        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config(10.0));

        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let buffer = capture.stop().unwrap();
        assert_eq!(buffer.sample_rate(), 16000);
        assert!(buffer.duration_secs() > 0.1, "got {}", buffer);
    }

    #[test]
    fn test_max_duration_limit() {
        let mic = SyntheticMicrophone::tone(16000, 1);
        let mut capture = AudioCapture::new(Box::new(mic), &config(0.1));
        let limit = capture.limit_receiver();

        capture.start().unwrap();
        assert!(limit.recv_timeout(Duration::from_secs(2)).is_ok());
        std::thread::sleep(Duration::from_millis(50));

        let buffer = capture.stop().unwrap();
        assert_eq!(buffer.frames(), 1600);
    }

    #[test]
    fn test_device_failure_leaves_idle() {
        let mic = SyntheticMicrophone::unavailable();
        let mut capture = AudioCapture::new(Box::new(mic), &config(10.0));

        assert!(capture.start().is_err());
        assert!(!capture.is_recording());
        assert_eq!(capture.stop(), Err(LyraError::NothingToStop));
    }
}
