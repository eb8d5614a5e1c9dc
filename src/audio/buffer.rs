//! Immutable block of PCM audio plus its format metadata

use crate::{LyraError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// On-the-wire sample encoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    #[default]
    I16,
    /// 32-bit float little endian
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::I16 => write!(f, "int16"),
            SampleFormat::F32 => write!(f, "float32"),
        }
    }
}

/// Captured or synthesized audio
///
/// The sample bytes sit behind an `Arc`, so cloning a buffer to hand it to
/// another component is cheap and nothing can mutate it afterwards.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    data: Arc<[u8]>,
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    created_at: DateTime<Utc>,
}

impl AudioBuffer {
    /// Wrap raw interleaved sample bytes
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16, format: SampleFormat) -> Result<Self> {
        if sample_rate == 0 {
            return Err(LyraError::AudioFormat("sample rate must be > 0".into()));
        }
        if channels == 0 {
            return Err(LyraError::AudioFormat("channel count must be > 0".into()));
        }
        let frame_bytes = format.bytes_per_sample() * channels as usize;
        if data.len() % frame_bytes != 0 {
            return Err(LyraError::AudioFormat(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                frame_bytes
            )));
        }

        Ok(Self {
            data: data.into(),
            sample_rate,
            channels,
            format,
            created_at: Utc::now(),
        })
    }

    /// Build an int16 buffer from interleaved samples
    pub fn from_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Self> {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, sample_rate, channels, SampleFormat::I16)
    }

    /// Silent int16 buffer of the given length
    pub fn silence(duration: Duration, sample_rate: u32, channels: u16) -> Result<Self> {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self::from_i16(&vec![0; frames * channels as usize], sample_rate, channels)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.data.len() / (self.format.bytes_per_sample() * self.channels as usize)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Decode to interleaved int16 samples
    pub fn samples_i16(&self) -> Vec<i16> {
        match self.format {
            SampleFormat::I16 => self
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
            SampleFormat::F32 => f32_to_i16(&self.samples_f32()),
        }
    }

    /// Decode to interleaved float samples in [-1, 1]
    pub fn samples_f32(&self) -> Vec<f32> {
        match self.format {
            SampleFormat::I16 => i16_to_f32(&self.samples_i16()),
            SampleFormat::F32 => self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        }
    }
}

/// Buffers hold the same audio when their samples and format match
impl PartialEq for AudioBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.format == other.format
            && self.data == other.data
    }
}

impl fmt::Display for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}s {}Hz {}ch {} ({} bytes)",
            self.duration_secs(),
            self.sample_rate,
            self.channels,
            self.format,
            self.data.len()
        )
    }
}

pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}

pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_bytes() {
        // 16kHz mono int16: 32000 bytes per second
        let buffer = AudioBuffer::new(vec![0; 64000], 16000, 1, SampleFormat::I16).unwrap();
        assert_eq!(buffer.frames(), 32000);
        assert!((buffer.duration_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_partial_frames() {
        assert!(AudioBuffer::new(vec![0; 3], 16000, 1, SampleFormat::I16).is_err());
        assert!(AudioBuffer::new(vec![0; 6], 16000, 2, SampleFormat::I16).is_err());
        assert!(AudioBuffer::new(vec![0; 4], 0, 1, SampleFormat::I16).is_err());
    }

    #[test]
    fn test_i16_samples() {
        let samples = [0i16, 1000, -1000, i16::MAX];
        let buffer = AudioBuffer::from_i16(&samples, 24000, 1).unwrap();
        assert_eq!(buffer.byte_len(), 8);
        assert_eq!(buffer.samples_i16(), samples.to_vec());
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = AudioBuffer::silence(Duration::from_millis(100), 16000, 1).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let b = AudioBuffer::silence(Duration::from_millis(100), 16000, 1).unwrap();
        assert_ne!(a.created_at(), b.created_at());
        assert_eq!(a, b);
    }

    #[test]
    fn test_float_conversion_clamps() {
        let converted = f32_to_i16(&[2.0, -2.0, 0.0]);
        assert_eq!(converted, vec![i16::MAX, -i16::MAX, 0]);
    }
}
