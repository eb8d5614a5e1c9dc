use super::device::{DeviceDirection, DeviceInfo, InputDevice};
use super::preprocessor::StreamFormat;
use super::ring::AudioRingBuffer;
use crate::{LyraError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Resolve an input device by name, or the default one
pub(crate) fn find_input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| LyraError::AudioDevice("No input device available".into())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| LyraError::AudioDevice(format!("Failed to enumerate inputs: {}", e)))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| LyraError::AudioDevice(format!("Input device not found: {}", wanted))),
    }
}

/// Microphone backed by cpal
///
/// cpal streams cannot move between threads, so each open session builds
/// its stream on a dedicated thread and parks there until closed.
pub struct CpalMicrophone {
    device_name: Option<String>,
    name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    session: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CpalMicrophone {
    /// Create a microphone for the named device, or the default input
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_input_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| LyraError::AudioDevice(format!("Failed to get input config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        info!(
            "Using input device: {} ({} Hz, {} ch, {:?})",
            name, config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            name,
            config,
            sample_format,
            session: None,
        })
    }
}

impl InputDevice for CpalMicrophone {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn format(&self) -> StreamFormat {
        StreamFormat::new(self.config.sample_rate.0, self.config.channels)
    }

    fn open(&mut self, sink: AudioRingBuffer) -> Result<()> {
        if self.session.is_some() {
            warn!("Input device already open");
            return Ok(());
        }

        let device_name = self.device_name.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("lyra-mic".into())
            .spawn(move || {
                let stream = find_input_device(device_name.as_deref()).and_then(|device| {
                    let stream = match sample_format {
                        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, sink),
                        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, sink),
                        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, sink),
                        SampleFormat::I32 => build_input_stream::<i32>(&device, &config, sink),
                        other => Err(LyraError::AudioDevice(format!(
                            "Unsupported input sample format: {:?}",
                            other
                        ))),
                    }?;
                    stream.play().map_err(|e| {
                        LyraError::AudioDevice(format!("Failed to start input stream: {}", e))
                    })?;
                    Ok(stream)
                });

                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Park until closed or the owner goes away
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| LyraError::AudioDevice(format!("Failed to spawn input thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| LyraError::AudioDevice("Input thread exited during startup".into()))
            .and_then(|r| r);

        match ready {
            Ok(()) => {
                self.session = Some((stop_tx, handle));
                info!("Opened input stream");
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some((stop_tx, handle)) = self.session.take() {
            let _ = stop_tx.send(());
            handle
                .join()
                .map_err(|_| LyraError::AudioDevice("Input thread panicked".into()))?;
            info!("Closed input stream");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

/// Device samples as int16, whatever the device's native format
fn to_i16<T>(data: &[T]) -> Vec<i16>
where
    T: Sample,
    i16: FromSample<T>,
{
    data.iter().map(|&s| i16::from_sample(s)).collect()
}

fn build_input_stream<T>(device: &Device, config: &StreamConfig, sink: AudioRingBuffer) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| sink.write(&to_i16(data)),
            |err| error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| LyraError::AudioDevice(format!("Failed to build input stream: {}", e)))
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// List every input and output device on the default host
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();

    let inputs = host
        .input_devices()
        .map_err(|e| LyraError::AudioDevice(format!("Failed to enumerate inputs: {}", e)))?;
    for device in inputs {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        devices.push(DeviceInfo {
            is_default: default_in.as_deref() == Some(name.as_str()),
            default_format: device
                .default_input_config()
                .ok()
                .map(|c| StreamFormat::new(c.sample_rate().0, c.channels())),
            direction: DeviceDirection::Input,
            name,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|e| LyraError::AudioDevice(format!("Failed to enumerate outputs: {}", e)))?;
    for device in outputs {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        devices.push(DeviceInfo {
            is_default: default_out.as_deref() == Some(name.as_str()),
            default_format: device
                .default_output_config()
                .ok()
                .map(|c| StreamFormat::new(c.sample_rate().0, c.channels())),
            direction: DeviceDirection::Output,
            name,
        });
    }

    Ok(devices)
}
