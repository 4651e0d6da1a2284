//! Click playback engine
//!
//! Runs a cpal output stream on a dedicated thread (cpal streams are not
//! `Send`). Clicks travel to the audio callback through a lock-free ring
//! buffer together with their start instant, and the callback starts each
//! one on the sample that will be heard at that instant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use super::click::ClickCache;
use super::device::{find_output_device, DeviceId};
use super::error::AudioError;
use crate::output::{DeviceError, Effect, OutputDevice};

/// Click device configuration
#[derive(Debug, Clone)]
pub struct ClickDeviceConfig {
    /// Output device (None = system default)
    pub device: Option<DeviceId>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Clicks that may wait for the callback at once
    pub queue_capacity: usize,
}

impl Default for ClickDeviceConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            channels: 2,
            queue_capacity: 64,
        }
    }
}

/// A click waiting for (or in) playback
struct Voice {
    start: Instant,
    samples: Arc<[f32]>,
    position: usize,
}

struct Running {
    producer: HeapProd<Voice>,
    clicks: ClickCache,
    // Dropping the sender stops the stream thread
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Audio output device playing scheduled clicks
pub struct ClickDevice {
    config: ClickDeviceConfig,
    name: String,
    running: Mutex<Option<Running>>,
    lost: Arc<AtomicBool>,
}

impl ClickDevice {
    pub fn new(config: ClickDeviceConfig) -> Self {
        let name = config
            .device
            .as_ref()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| "default output".to_string());
        Self {
            config,
            name,
            running: Mutex::new(None),
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the stream is open
    pub fn is_open(&self) -> bool {
        self.running.lock().is_some()
    }

    fn start_stream(&self) -> Result<Running, AudioError> {
        let rb = HeapRb::<Voice>::new(self.config.queue_capacity.max(1));
        let (producer, consumer) = rb.split();

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let config = self.config.clone();
        let lost = self.lost.clone();

        let thread = std::thread::Builder::new()
            .name("click-output".into())
            .spawn(move || {
                let stream = match build_stream(&config, consumer, lost) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until the device is closed
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Click output stream closed");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Running {
                producer,
                clicks: ClickCache::new(self.config.sample_rate),
                stop_tx,
                thread,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamError(
                    "click output thread exited".to_string(),
                ))
            }
        }
    }
}

impl Default for ClickDevice {
    fn default() -> Self {
        Self::new(ClickDeviceConfig::default())
    }
}

fn build_stream(
    config: &ClickDeviceConfig,
    mut consumer: HeapCons<Voice>,
    lost: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_output_device(config.device.as_ref()).ok_or_else(|| {
        AudioError::DeviceNotFound(
            config
                .device
                .as_ref()
                .map(|id| id.0.clone())
                .unwrap_or_else(|| "No default output device".into()),
        )
    })?;

    let device_name = device.name().unwrap_or_default();
    info!("Starting click output on device: {}", device_name);

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let channels = config.channels.max(1) as usize;
    let sample_rate = config.sample_rate as f64;
    let mut voices: Vec<Voice> = Vec::with_capacity(config.queue_capacity);

    let err_fn = move |err: cpal::StreamError| {
        error!("Click output stream error: {:?}", err);
        if let cpal::StreamError::DeviceNotAvailable = err {
            warn!("Output device disconnected");
            lost.store(true, Ordering::SeqCst);
        }
    };

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                while let Some(voice) = consumer.try_pop() {
                    voices.push(voice);
                }

                // Samples written now are heard after the output latency
                let timestamp = info.timestamp();
                let latency = timestamp
                    .playback
                    .duration_since(&timestamp.callback)
                    .unwrap_or(Duration::ZERO);
                let heard_at = Instant::now() + latency;

                data.fill(0.0);
                let frames = data.len() / channels;

                for voice in voices.iter_mut() {
                    let delay = voice.start.saturating_duration_since(heard_at);
                    let first = (delay.as_secs_f64() * sample_rate) as usize;
                    for frame in first..frames {
                        let Some(&sample) = voice.samples.get(voice.position) else {
                            break;
                        };
                        voice.position += 1;
                        for out in &mut data[frame * channels..(frame + 1) * channels] {
                            *out += sample;
                        }
                    }
                }

                voices.retain(|voice| voice.position < voice.samples.len());
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    debug!("Click output started with config: {:?}", stream_config);
    Ok(stream)
}

impl OutputDevice for ClickDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), DeviceError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        self.lost.store(false, Ordering::SeqCst);
        *running = Some(self.start_stream()?);
        Ok(())
    }

    fn prepare(&self, _at: tokio::time::Instant) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(DeviceError::Lost(format!("{} disconnected", self.name)));
        }
        Ok(())
    }

    fn render(&self, effect: &Effect) -> Result<(), DeviceError> {
        let Effect::Click {
            frequency,
            gain,
            duration,
            at,
        } = effect
        else {
            return Err(DeviceError::Dropped(format!(
                "{} only plays clicks",
                self.name
            )));
        };

        if self.lost.load(Ordering::SeqCst) {
            return Err(DeviceError::Lost(format!("{} disconnected", self.name)));
        }

        let mut running = self.running.lock();
        let Some(running) = running.as_mut() else {
            return Err(DeviceError::Unavailable(format!("{} is not open", self.name)));
        };

        let voice = Voice {
            start: at.into_std(),
            samples: running.clicks.get(*frequency, *gain, *duration),
            position: 0,
        };

        running
            .producer
            .try_push(voice)
            .map_err(|_| DeviceError::Dropped("click queue full".to_string()))
    }

    fn close(&self) {
        if let Some(running) = self.running.lock().take() {
            drop(running.stop_tx);
            if running.thread.join().is_err() {
                warn!("Click output thread panicked");
            }
            info!("Click output stopped");
        }
    }
}

impl Drop for ClickDevice {
    fn drop(&mut self) {
        self.close();
    }
}
