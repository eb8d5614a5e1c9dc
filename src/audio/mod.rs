pub mod buffer;
pub mod capture;
pub mod device;
#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod playback;
pub mod preprocessor;
pub mod resampler;
pub mod ring;
pub mod wav;

pub use buffer::{AudioBuffer, SampleFormat};
pub use capture::{AudioCapture, StartOutcome};
pub use device::{DeviceDirection, DeviceInfo, InputDevice, OutputDevice};
#[cfg(feature = "audio-io")]
pub use input::{list_devices, CpalMicrophone};
#[cfg(feature = "audio-io")]
pub use output::CpalSpeaker;
pub use playback::{AudioPlayback, AudioSource, PlaybackOutcome, PlaybackSource, SourceInfo};
pub use preprocessor::StreamFormat;
pub use resampler::AudioResampler;
pub use ring::AudioRingBuffer;
pub use wav::{decode_wav, encode_wav, read_wav, write_wav};
