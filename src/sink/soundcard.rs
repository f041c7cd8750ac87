//! Soundcard output through cpal.
//!
//! cpal streams are callback driven and their handles are not `Send`, so
//! the stream lives on a dedicated audio thread that parks after starting
//! playback. The synthesis thread hands sample buffers over a small
//! bounded channel; the send blocks once the channel is full, which is
//! what paces synthesis in real time.

use std::collections::VecDeque;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::SampleRate;
use crate::error::SinkError;
use crate::sink::{AudioSink, SinkConfig, SinkKind};

/// Number of periods buffered between the synthesis thread and the audio
/// callback. Latency for keyed input is roughly this many periods.
const CHANNEL_PERIODS: usize = 4;

/// Soundcard sink backed by the host's native audio API.
pub struct SoundcardSink {
    device_name: Option<String>,
    samples_tx: Option<Sender<Vec<i16>>>,
    shutdown_tx: Option<Sender<()>>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl SoundcardSink {
    /// A sink for the named output device, or the default output device.
    pub fn new(device: Option<&str>) -> Self {
        SoundcardSink {
            device_name: device.map(str::to_owned),
            samples_tx: None,
            shutdown_tx: None,
            audio_thread: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, SinkError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_output_device()
                .ok_or_else(|| SinkError::Open("no default output device".into())),
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| SinkError::Open(format!("listing output devices: {e}")))?;
                devices
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| SinkError::Open(format!("no output device named {name}")))
            }
        }
    }

    /// First rate from `rates` the device supports, preferring f32 sample
    /// format, falling back to i16.
    fn negotiate(
        device: &cpal::Device,
        rates: &[SampleRate],
    ) -> Result<(StreamConfig, SampleFormat), SinkError> {
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| SinkError::Open(format!("querying output configs: {e}")))?
            .collect();

        for format in [SampleFormat::F32, SampleFormat::I16] {
            for &rate in rates {
                let supported = ranges.iter().find(|r| {
                    r.sample_format() == format
                        && r.min_sample_rate().0 <= rate
                        && rate <= r.max_sample_rate().0
                });
                if let Some(range) = supported {
                    let config = StreamConfig {
                        channels: range.channels(),
                        sample_rate: cpal::SampleRate(rate),
                        buffer_size: BufferSize::Default,
                    };
                    return Ok((config, format));
                }
            }
        }
        Err(SinkError::Open(
            "device accepts none of the offered sample rates".into(),
        ))
    }
}

/// Pulls mono samples out of the channel and fans them out over the
/// device's channels. Missing data plays as silence.
struct CallbackFeed {
    rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
}

impl CallbackFeed {
    fn next_sample(&mut self) -> i16 {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return sample;
            }
            match self.rx.try_recv() {
                Ok(buffer) => self.pending.extend(buffer),
                Err(_) => return 0,
            }
        }
    }

    fn fill<T, F>(&mut self, data: &mut [T], channels: usize, convert: F)
    where
        F: Fn(i16) -> T,
        T: Copy,
    {
        for frame in data.chunks_mut(channels) {
            let value = convert(self.next_sample());
            for out in frame.iter_mut() {
                *out = value;
            }
        }
    }
}

fn stream_error_callback(err: cpal::StreamError) {
    tracing::error!("audio stream error: {err}");
}

impl AudioSink for SoundcardSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Samples
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        let device = self.find_device()?;
        let (config, format) = Self::negotiate(&device, rates)?;
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let (samples_tx, samples_rx) = bounded::<Vec<i16>>(CHANNEL_PERIODS);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        // The cpal stream handle is not Send; build it on the thread that
        // will keep it alive and park there until shutdown.
        let audio_thread = thread::Builder::new()
            .name("cwave-audio".into())
            .spawn(move || {
                let mut feed = CallbackFeed {
                    rx: samples_rx,
                    pending: VecDeque::new(),
                };
                let built = match format {
                    SampleFormat::F32 => device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            feed.fill(data, channels, |s| s as f32 / 32_768.0);
                        },
                        stream_error_callback,
                        None,
                    ),
                    SampleFormat::I16 => device.build_output_stream(
                        &config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            feed.fill(data, channels, |s| s);
                        },
                        stream_error_callback,
                        None,
                    ),
                    other => {
                        let _ = ready_tx.send(Err(format!("unsupported sample format {other:?}")));
                        return;
                    }
                };

                let stream = match built {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("building output stream: {e}")));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("starting output stream: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Parked; the stream plays from its callback. Any message
                // or a disconnect ends playback.
                let _ = shutdown_rx.recv();
            })
            .map_err(|e| SinkError::Open(format!("spawning audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = audio_thread.join();
                return Err(SinkError::Open(message));
            }
            Err(_) => {
                let _ = audio_thread.join();
                return Err(SinkError::Open("audio thread died during setup".into()));
            }
        }

        self.samples_tx = Some(samples_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.audio_thread = Some(audio_thread);

        Ok(SinkConfig {
            sample_rate,
            period_frames: (sample_rate / 100) as usize,
        })
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let tx = self
            .samples_tx
            .as_ref()
            .ok_or_else(|| SinkError::Write("soundcard sink is not open".into()))?;
        tx.send(samples.to_vec())
            .map_err(|_| SinkError::Write("audio thread is gone".into()))
    }

    fn close(&mut self) {
        self.samples_tx = None;
        self.shutdown_tx = None; // disconnects shutdown_rx, unparking the thread
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SoundcardSink {
    fn drop(&mut self) {
        self.close();
    }
}
