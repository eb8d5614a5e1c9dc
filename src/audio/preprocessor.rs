use super::buffer::{f32_to_i16, i16_to_f32, AudioBuffer};
use super::resampler::resample_audio;
use crate::Result;
use tracing::debug;

/// Sample rate and channel layout of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn of(buffer: &AudioBuffer) -> Self {
        Self::new(buffer.sample_rate(), buffer.channels())
    }
}

/// Change the channel count of interleaved audio
///
/// Downmixing averages all channels of a frame; upmixing copies the mono
/// signal to every output channel.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }

    let mono: Vec<f32> = if from == 1 {
        samples.to_vec()
    } else {
        samples
            .chunks(from)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    if to == 1 {
        return mono;
    }

    let mut output = Vec::with_capacity(mono.len() * to);
    for sample in mono {
        output.extend(std::iter::repeat(sample).take(to));
    }
    output
}

/// Apply a simple high-pass filter to remove DC offset
pub fn remove_dc_offset(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mean: f32 = samples.iter().sum::<f32>() / samples.len() as f32;
    samples.iter().map(|&s| s - mean).collect()
}

/// Convert raw int16 samples from one stream format to another
pub fn conform_samples(
    samples: &[i16],
    from: StreamFormat,
    to: StreamFormat,
    strip_dc: bool,
) -> Result<Vec<i16>> {
    if from == to && !strip_dc {
        return Ok(samples.to_vec());
    }

    let mut audio = remix(&i16_to_f32(samples), from.channels, to.channels);
    if strip_dc {
        audio = remove_dc_offset(&audio);
    }
    if from.sample_rate != to.sample_rate {
        audio = resample_audio(&audio, from.sample_rate, to.sample_rate, to.channels)?;
    }

    debug!(
        "Conformed {} samples {}Hz/{}ch -> {} samples {}Hz/{}ch",
        samples.len(),
        from.sample_rate,
        from.channels,
        audio.len(),
        to.sample_rate,
        to.channels
    );

    Ok(f32_to_i16(&audio))
}

/// Produce an int16 copy of `buffer` in the target format
///
/// Returns a clone when the buffer already matches.
pub fn conform_buffer(buffer: &AudioBuffer, to: StreamFormat) -> Result<AudioBuffer> {
    let from = StreamFormat::of(buffer);
    if from == to && buffer.format() == super::buffer::SampleFormat::I16 {
        return Ok(buffer.clone());
    }
    let samples = conform_samples(&buffer.samples_i16(), from, to, false)?;
    AudioBuffer::from_i16(&samples, to.sample_rate, to.channels)
}
