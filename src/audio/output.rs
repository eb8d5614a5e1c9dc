use super::buffer::AudioBuffer;
use super::device::OutputDevice;
use super::preprocessor::{conform_buffer, StreamFormat};
use crate::{LyraError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

fn find_output_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| LyraError::AudioDevice("No output device available".into())),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| LyraError::AudioDevice(format!("Failed to enumerate outputs: {}", e)))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| LyraError::AudioDevice(format!("Output device not found: {}", wanted))),
    }
}

/// Samples queued for the output callback
struct Cursor {
    samples: Vec<f32>,
    position: usize,
}

impl Cursor {
    /// Fill `data` with the next samples, padding with silence
    ///
    /// Returns true once every queued sample has been handed out.
    fn fill<T>(&mut self, data: &mut [T]) -> bool
    where
        T: Sample + FromSample<f32>,
    {
        let start = self.position;
        let count = (self.samples.len() - start).min(data.len());
        for (out, &sample) in data.iter_mut().zip(&self.samples[start..start + count]) {
            *out = T::from_sample(sample);
        }
        data[count..].fill(T::EQUILIBRIUM);
        self.position += count;
        self.position >= self.samples.len()
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    cursor: Arc<Mutex<Cursor>>,
    finished: Arc<AtomicBool>,
    done: Sender<()>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if cursor.lock().fill(data) && !finished.swap(true, Ordering::SeqCst) {
                    let _ = done.try_send(());
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| LyraError::AudioDevice(format!("Failed to build output stream: {}", e)))
}

/// Speaker backed by cpal
///
/// Buffers are converted to the device's native rate and channel count
/// before playback starts.
pub struct CpalSpeaker {
    device_name: Option<String>,
    name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    session: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CpalSpeaker {
    /// Create a speaker for the named device, or the default output
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_output_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| LyraError::AudioDevice(format!("Failed to get output config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        info!(
            "Using output device: {} ({} Hz, {} ch, {:?})",
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

    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.config.sample_rate.0, self.config.channels)
    }
}

impl OutputDevice for CpalSpeaker {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn start(&mut self, buffer: &AudioBuffer, done: Sender<()>) -> Result<()> {
        if self.session.is_some() {
            warn!("Output device busy, stopping previous playback");
            self.stop()?;
        }

        let conformed = conform_buffer(buffer, self.format())?;
        debug!("Playing {} as {}", buffer, conformed);

        let cursor = Arc::new(Mutex::new(Cursor {
            samples: conformed.samples_f32(),
            position: 0,
        }));
        let finished = Arc::new(AtomicBool::new(false));

        let device_name = self.device_name.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("lyra-speaker".into())
            .spawn(move || {
                let stream = find_output_device(device_name.as_deref()).and_then(|device| {
                    let stream = match sample_format {
                        SampleFormat::F32 => {
                            build_output_stream::<f32>(&device, &config, cursor, finished, done)
                        }
                        SampleFormat::I16 => {
                            build_output_stream::<i16>(&device, &config, cursor, finished, done)
                        }
                        SampleFormat::U16 => {
                            build_output_stream::<u16>(&device, &config, cursor, finished, done)
                        }
                        SampleFormat::I32 => {
                            build_output_stream::<i32>(&device, &config, cursor, finished, done)
                        }
                        other => Err(LyraError::AudioDevice(format!(
                            "Unsupported output sample format: {:?}",
                            other
                        ))),
                    }?;
                    stream.play().map_err(|e| {
                        LyraError::AudioDevice(format!("Failed to start output stream: {}", e))
                    })?;
                    Ok(stream)
                });

                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| LyraError::AudioDevice(format!("Failed to spawn output thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| LyraError::AudioDevice("Output thread exited during startup".into()))
            .and_then(|r| r);

        match ready {
            Ok(()) => {
                self.session = Some((stop_tx, handle));
                info!("Started audio playback");
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some((stop_tx, handle)) = self.session.take() {
            let _ = stop_tx.send(());
            handle
                .join()
                .map_err(|_| LyraError::AudioDevice("Output thread panicked".into()))?;
            info!("Stopped audio playback");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
