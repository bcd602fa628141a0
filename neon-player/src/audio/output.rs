//! Audio output using cpal
//!
//! A cpal stream is not `Send`, so it lives on a dedicated thread for its
//! whole life. The decode worker of each playback session owns a ring buffer
//! producer; the matching consumer is installed into [`OutputSink`] and
//! drained by the device callback.

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer};
use ringbuf::HeapCons;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// State shared between the device callback and decode workers
pub struct OutputSink {
    consumer: Mutex<Option<HeapCons<f32>>>,
    played_frames: AtomicU64,
    paused: AtomicBool,
    error_flag: AtomicBool,
    volume: Arc<Mutex<f32>>,
    sample_rate: u32,
    channels: u16,
}

impl OutputSink {
    fn new(volume: Arc<Mutex<f32>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            consumer: Mutex::new(None),
            played_frames: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            error_flag: AtomicBool::new(false),
            volume,
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Route a new session's samples to the device, discarding the old queue
    pub fn install(&self, consumer: HeapCons<f32>) {
        let mut slot = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(consumer);
        self.played_frames.store(0, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    /// Disconnect the current session, the device plays silence
    pub fn uninstall(&self) {
        let mut slot = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// Drop queued samples and restart the played-frame count (after a seek)
    pub fn flush(&self) {
        let mut slot = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(consumer) = slot.as_mut() {
            consumer.clear();
        }
        self.played_frames.store(0, Ordering::Release);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Milliseconds of audio handed to the device since the last install or flush
    pub fn played_ms(&self) -> u64 {
        self.played_frames.load(Ordering::Acquire) * 1000 / u64::from(self.sample_rate.max(1))
    }

    /// Clear and return the stream error flag
    pub fn take_error(&self) -> bool {
        self.error_flag.swap(false, Ordering::AcqRel)
    }

    /// Fill a device buffer from the installed consumer
    ///
    /// Never blocks: if a worker holds the slot the buffer is silent.
    fn fill<T>(&self, data: &mut [T], scratch: &mut Vec<f32>)
    where
        T: SizedSample + FromSample<f32>,
    {
        let silence = T::from_sample(0.0f32);

        if self.paused.load(Ordering::Acquire) {
            data.fill(silence);
            return;
        }

        let Ok(mut slot) = self.consumer.try_lock() else {
            data.fill(silence);
            return;
        };
        let Some(consumer) = slot.as_mut() else {
            data.fill(silence);
            return;
        };

        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }

        let channels = self.channels.max(1) as usize;
        let available = consumer.occupied_len().min(data.len()) / channels * channels;
        let read = consumer.pop_slice(&mut scratch[..available]);
        drop(slot);

        let gain = self.volume.lock().map(|v| *v).unwrap_or(1.0);
        for (out, sample) in data.iter_mut().zip(&scratch[..read]) {
            *out = T::from_sample((sample * gain).clamp(-1.0, 1.0));
        }
        data[read..].fill(silence);

        self.played_frames
            .fetch_add((read / channels) as u64, Ordering::AcqRel);
    }
}

/// Output device handle
///
/// Dropping it stops the stream and joins the thread that owns it.
pub struct AudioOutput {
    sink: Arc<OutputSink>,
    device_name: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Check that an output device can be found, without opening a stream
    pub fn probe(device_name: Option<&str>) -> Result<String> {
        let device = find_device(device_name)?;
        Ok(device.name().unwrap_or_else(|_| "Unknown".to_string()))
    }

    /// Open the device and start a silent stream on its own thread
    ///
    /// `volume` is shared with the owning player; the callback reads it on
    /// every buffer.
    pub fn open(device_name: Option<String>, volume: Arc<Mutex<f32>>) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(Arc<OutputSink>, String)>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("neon-audio-out".to_string())
            .spawn(move || match start_stream(device_name.as_deref(), volume) {
                Ok((stream, sink, name)) => {
                    let _ = ready_tx.send(Ok((sink, name)));
                    // Park until the handle is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let (sink, device_name) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Audio thread exited during startup".to_string()))??;

        Ok(Self {
            sink,
            device_name,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn sink(&self) -> Arc<OutputSink> {
        Arc::clone(&self.sink)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Requested device by name, falling back to the default device
fn find_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }

        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
}

/// Get the best supported configuration for playback.
///
/// Prefers 44.1kHz stereo f32, otherwise whatever the device defaults to.
fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported_configs = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported_configs.find(|config| {
        config.channels() == 2
            && config.min_sample_rate().0 <= 44100
            && config.max_sample_rate().0 >= 44100
            && config.sample_format() == SampleFormat::F32
    });

    if let Some(supported_config) = preferred {
        let sample_format = supported_config.sample_format();
        let config = supported_config
            .with_sample_rate(cpal::SampleRate(44100))
            .config();
        return Ok((config, sample_format));
    }

    let supported_config = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;

    let sample_format = supported_config.sample_format();
    Ok((supported_config.config(), sample_format))
}

fn start_stream(
    device_name: Option<&str>,
    volume: Arc<Mutex<f32>>,
) -> Result<(Stream, Arc<OutputSink>, String)> {
    let device = find_device(device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let (config, sample_format) = get_best_config(&device)?;

    info!(
        "Using audio device {}: sample_rate={}, channels={}, format={:?}",
        name, config.sample_rate.0, config.channels, sample_format
    );

    let sink = Arc::new(OutputSink::new(volume, config.sample_rate.0, config.channels));

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&sink))?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&sink))?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&sink))?,
        sample_format => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                sample_format
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    info!("Audio stream started");
    Ok((stream, sink, name))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, sink: Arc<OutputSink>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let error_sink = Arc::clone(&sink);
    let mut scratch = vec![0.0f32; 8192];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                sink.fill(data, &mut scratch);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_sink.error_flag.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
