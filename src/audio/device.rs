//! Seams between the capture/playback logic and platform audio
//!
//! AudioCapture and AudioPlayback own exactly one device each. Real devices
//! live in `input`/`output` (cpal); deterministic ones in `crate::testing`.

use super::buffer::AudioBuffer;
use super::preprocessor::StreamFormat;
use super::ring::AudioRingBuffer;
use crate::Result;
use crossbeam_channel::Sender;
use std::fmt;

/// A microphone that pushes int16 samples into a ring buffer while open
pub trait InputDevice: Send {
    fn name(&self) -> String;

    /// Format of the samples written to the sink
    fn format(&self) -> StreamFormat;

    /// Start streaming interleaved samples into `sink`
    fn open(&mut self, sink: AudioRingBuffer) -> Result<()>;

    /// Stop streaming and release the OS handle before returning
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// A speaker that plays one buffer at a time
pub trait OutputDevice: Send {
    fn name(&self) -> String;

    /// Begin playing `buffer`; `done` receives one message after the last sample
    fn start(&mut self, buffer: &AudioBuffer, done: Sender<()>) -> Result<()>;

    /// Halt playback and release the OS handle before returning
    fn stop(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Entry in a device listing
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    pub default_format: Option<StreamFormat>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            DeviceDirection::Input => "input",
            DeviceDirection::Output => "output",
        };
        write!(f, "[{}] {}", direction, self.name)?;
        if let Some(format) = self.default_format {
            write!(f, " ({} Hz, {} ch)", format.sample_rate, format.channels)?;
        }
        if self.is_default {
            write!(f, " *default*")?;
        }
        Ok(())
    }
}
