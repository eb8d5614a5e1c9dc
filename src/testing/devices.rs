//! Simulated audio devices

use crate::audio::buffer::AudioBuffer;
use crate::audio::device::{InputDevice, OutputDevice};
use crate::audio::preprocessor::StreamFormat;
use crate::audio::ring::AudioRingBuffer;
use crate::{LyraError, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MIC_TICK: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, PartialEq)]
enum Signal {
    Tone { frequency: f32, amplitude: f32 },
    Silence,
}

impl Signal {
    fn sample(&self, frame: u64, sample_rate: u32) -> i16 {
        match *self {
            Signal::Tone {
                frequency,
                amplitude,
            } => {
                let t = frame as f32 / sample_rate as f32;
                let value = (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude;
                (value * i16::MAX as f32) as i16
            }
            Signal::Silence => 0,
        }
    }
}

/// Microphone that produces a generated signal in real time while open
pub struct SyntheticMicrophone {
    format: StreamFormat,
    signal: Signal,
    available: bool,
    session: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SyntheticMicrophone {
    /// A 440 Hz tone at half scale
    pub fn tone(sample_rate: u32, channels: u16) -> Self {
        Self::with_signal(
            sample_rate,
            channels,
            Signal::Tone {
                frequency: 440.0,
                amplitude: 0.5,
            },
        )
    }

    pub fn silence(sample_rate: u32, channels: u16) -> Self {
        Self::with_signal(sample_rate, channels, Signal::Silence)
    }

    /// A microphone whose open always fails
    pub fn unavailable() -> Self {
        let mut mic = Self::silence(16000, 1);
        mic.available = false;
        mic
    }

    fn with_signal(sample_rate: u32, channels: u16, signal: Signal) -> Self {
        Self {
            format: StreamFormat::new(sample_rate, channels),
            signal,
            available: true,
            session: None,
        }
    }
}

impl InputDevice for SyntheticMicrophone {
    fn name(&self) -> String {
        match self.signal {
            Signal::Tone { .. } => "synthetic tone".to_string(),
            Signal::Silence => "synthetic silence".to_string(),
        }
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn open(&mut self, sink: AudioRingBuffer) -> Result<()> {
        if !self.available {
            return Err(LyraError::AudioDevice("synthetic microphone unavailable".into()));
        }
        if self.session.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let format = self.format;
        let signal = self.signal;

        let handle = std::thread::Builder::new()
            .name("lyra-synthetic-mic".into())
            .spawn(move || {
                let started = Instant::now();
                let mut produced = 0u64;
                while !thread_stop.load(Ordering::SeqCst) {
                    let due = (started.elapsed().as_secs_f64() * format.sample_rate as f64) as u64;
                    if due > produced {
                        let mut block = Vec::with_capacity(((due - produced) * format.channels as u64) as usize);
                        for frame in produced..due {
                            let value = signal.sample(frame, format.sample_rate);
                            block.extend(std::iter::repeat(value).take(format.channels as usize));
                        }
                        sink.write(&block);
                        produced = due;
                    }
                    std::thread::sleep(MIC_TICK);
                }
            })
            .map_err(|e| LyraError::AudioDevice(format!("Failed to spawn microphone: {}", e)))?;

        self.session = Some((stop, handle));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some((stop, handle)) = self.session.take() {
            stop.store(true, Ordering::SeqCst);
            handle
                .join()
                .map_err(|_| LyraError::AudioDevice("synthetic microphone panicked".into()))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for SyntheticMicrophone {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[derive(Default)]
struct SpeakerLog {
    open_handles: AtomicUsize,
    played: Mutex<Vec<AudioBuffer>>,
}

/// Read-only view of a [`SimulatedSpeaker`] that outlives the boxed device
#[derive(Clone)]
pub struct SpeakerMonitor {
    log: Arc<SpeakerLog>,
}

impl SpeakerMonitor {
    /// Handles opened and not yet released
    pub fn open_handles(&self) -> usize {
        self.log.open_handles.load(Ordering::SeqCst)
    }

    /// Every buffer handed to the speaker, in order
    pub fn played(&self) -> Vec<AudioBuffer> {
        self.log.played.lock().clone()
    }
}

/// Speaker that "plays" by waiting out the buffer duration
pub struct SimulatedSpeaker {
    log: Arc<SpeakerLog>,
    speed: f64,
    broken: bool,
    session: Option<(Sender<()>, JoinHandle<()>)>,
}

impl SimulatedSpeaker {
    pub fn new() -> Self {
        Self {
            log: Arc::new(SpeakerLog::default()),
            speed: 1.0,
            broken: false,
            session: None,
        }
    }

    /// A speaker whose every start fails
    pub fn broken() -> Self {
        let mut speaker = Self::new();
        speaker.broken = true;
        speaker
    }

    /// Play `factor` times faster than real time
    pub fn with_speed(mut self, factor: f64) -> Self {
        self.speed = if factor.is_finite() && factor > 0.0 { factor } else { 1.0 };
        self
    }

    pub fn monitor(&self) -> SpeakerMonitor {
        SpeakerMonitor {
            log: Arc::clone(&self.log),
        }
    }
}

impl Default for SimulatedSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for SimulatedSpeaker {
    fn name(&self) -> String {
        "simulated speaker".to_string()
    }

    fn start(&mut self, buffer: &AudioBuffer, done: Sender<()>) -> Result<()> {
        if self.broken {
            return Err(LyraError::AudioDevice("simulated speaker is broken".into()));
        }
        self.stop()?;

        let playout = buffer.duration().div_f64(self.speed);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("lyra-simulated-speaker".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(playout) {
                    let _ = done.send(());
                }
            })
            .map_err(|e| LyraError::AudioDevice(format!("Failed to spawn speaker: {}", e)))?;

        self.log.open_handles.fetch_add(1, Ordering::SeqCst);
        self.log.played.lock().push(buffer.clone());
        self.session = Some((stop_tx, handle));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some((stop_tx, handle)) = self.session.take() {
            let _ = stop_tx.send(());
            let joined = handle.join();
            self.log.open_handles.fetch_sub(1, Ordering::SeqCst);
            joined.map_err(|_| LyraError::AudioDevice("simulated speaker panicked".into()))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for SimulatedSpeaker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
