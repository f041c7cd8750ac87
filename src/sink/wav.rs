//! Offline rendering into a WAV file.
//!
//! This sink accepts samples as fast as the synthesis loop can produce
//! them; nothing paces the generator, so a queue of tones renders much
//! faster than real time. Useful for tests and for producing practice
//! recordings.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::common::SampleRate;
use crate::error::SinkError;
use crate::sink::{AudioSink, SinkConfig, SinkKind};

/// Sink writing 16-bit mono PCM into a WAV file.
pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavSink {
    /// A sink that will create (or overwrite) the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        WavSink {
            path: path.as_ref().to_owned(),
            writer: None,
        }
    }
}

impl AudioSink for WavSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Samples
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        let sample_rate = *rates.first().unwrap_or(&44_100);
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| SinkError::Open(format!("{}: {e}", self.path.display())))?;
        self.writer = Some(writer);
        Ok(SinkConfig {
            sample_rate,
            period_frames: (sample_rate / 100) as usize,
        })
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Write("wav sink is not open".into()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SinkError::Write(format!("wav write: {e}")))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                tracing::warn!("finalizing {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        self.close();
    }
}
