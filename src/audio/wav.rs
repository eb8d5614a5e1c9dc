use super::buffer::{f32_to_i16, AudioBuffer, SampleFormat};
use crate::{LyraError, Result};
use hound::{WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info};

fn spec_for(buffer: &AudioBuffer) -> WavSpec {
    match buffer.format() {
        SampleFormat::I16 => WavSpec {
            channels: buffer.channels(),
            sample_rate: buffer.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        },
        SampleFormat::F32 => WavSpec {
            channels: buffer.channels(),
            sample_rate: buffer.sample_rate(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    }
}

fn write_samples<W: Write + Seek>(writer: &mut WavWriter<W>, buffer: &AudioBuffer) -> Result<()> {
    match buffer.format() {
        SampleFormat::I16 => {
            for sample in buffer.samples_i16() {
                writer.write_sample(sample)?;
            }
        }
        SampleFormat::F32 => {
            for sample in buffer.samples_f32() {
                writer.write_sample(sample)?;
            }
        }
    }
    Ok(())
}

/// Encode a buffer as an in-memory WAV file
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(buffer.byte_len() + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, spec_for(buffer))?;
        write_samples(&mut writer, buffer)?;
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Write a buffer to a WAV file
pub fn write_wav<P: AsRef<Path>>(path: P, buffer: &AudioBuffer) -> Result<()> {
    let mut writer = WavWriter::create(path.as_ref(), spec_for(buffer))?;
    write_samples(&mut writer, buffer)?;
    writer.finalize()?;

    info!("Wrote {} to WAV file: {:?}", buffer, path.as_ref());
    Ok(())
}

fn read_from<R: Read>(mut reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();

    debug!(
        "Reading WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let samples = reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>()?;
            AudioBuffer::from_i16(&samples, spec.sample_rate, spec.channels)
        }
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            let samples = reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            AudioBuffer::from_i16(&f32_to_i16(&samples), spec.sample_rate, spec.channels)
        }
        (hound::SampleFormat::Float, 32) => {
            let data = reader
                .samples::<f32>()
                .map(|s| s.map(f32::to_le_bytes))
                .collect::<std::result::Result<Vec<_>, _>>()?
                .concat();
            AudioBuffer::new(data, spec.sample_rate, spec.channels, SampleFormat::F32)
        }
        (format, bits) => Err(LyraError::AudioFormat(format!(
            "Unsupported WAV encoding: {:?} {} bits",
            format, bits
        ))),
    }
}

/// Decode an in-memory WAV file
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer> {
    read_from(WavReader::new(Cursor::new(bytes))?)
}

/// Read a WAV file into a buffer
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let buffer = read_from(WavReader::open(path.as_ref())?)?;
    info!("Read {} from WAV file: {:?}", buffer, path.as_ref());
    Ok(buffer)
}

/// Whether `bytes` start with a RIFF/WAVE header
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tone(rate: u32, secs: f32) -> AudioBuffer {
        let samples: Vec<i16> = (0..(rate as f32 * secs) as usize)
            .map(|i| ((i as f32 * 440.0 * 2.0 * std::f32::consts::PI / rate as f32).sin() * 8000.0) as i16)
            .collect();
        AudioBuffer::from_i16(&samples, rate, 1).unwrap()
    }

    #[test]
    fn test_wav_bytes() {
        let buffer = tone(16000, 0.25);
        let bytes = encode_wav(&buffer).unwrap();
        assert!(is_wav(&bytes));
        assert!(bytes.len() > buffer.byte_len());

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded, buffer);
    }

    #[test]
    fn test_wav_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let buffer = tone(24000, 0.1);

        write_wav(&path, &buffer).unwrap();
        let read = read_wav(&path).unwrap();
        assert_eq!(read.sample_rate(), 24000);
        assert_eq!(read.channels(), 1);
        assert_eq!(read.frames(), buffer.frames());
    }

    #[test]
    fn test_not_wav() {
        assert!(!is_wav(b"hello world!"));
        assert!(decode_wav(b"definitely not audio").is_err());
    }
}
