//! PulseAudio output through the synchronous "simple" API.
//!
//! `pa_simple_write` blocks until the server has taken the data, which is
//! exactly the back-pressure contract the generator expects, so this
//! backend needs no thread of its own.

use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;

use crate::common::SampleRate;
use crate::error::SinkError;
use crate::sink::{AudioSink, SinkConfig, SinkKind};

/// PulseAudio sink.
pub struct PulseSink {
    device: Option<String>,
    connection: Option<Simple>,
}

impl PulseSink {
    /// A sink for the named Pulse sink, or the server's default.
    pub fn new(device: Option<&str>) -> Self {
        PulseSink {
            device: device.map(str::to_owned),
            connection: None,
        }
    }
}

impl AudioSink for PulseSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Samples
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        let mut last_error = None;
        for &rate in rates {
            let spec = Spec {
                format: Format::S16NE,
                channels: 1,
                rate,
            };
            if !spec.is_valid() {
                continue;
            }
            match Simple::new(
                None,
                "cwave",
                Direction::Playback,
                self.device.as_deref(),
                "cw tones",
                &spec,
                None,
                None,
            ) {
                Ok(connection) => {
                    self.connection = Some(connection);
                    return Ok(SinkConfig {
                        sample_rate: rate,
                        period_frames: (rate / 100) as usize,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(SinkError::Open(match last_error {
            Some(e) => format!("pulseaudio: {e}"),
            None => "pulseaudio: no usable sample rate".into(),
        }))
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| SinkError::Write("pulseaudio sink is not open".into()))?;

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        connection
            .write(&bytes)
            .map_err(|e| SinkError::Write(format!("pulseaudio write: {e}")))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.drain() {
                tracing::warn!("pulseaudio drain on close: {e}");
            }
        }
    }
}
