//! Helpers shared by the integration tests.

use std::sync::{Arc, Mutex};

use cwave::{AudioSink, SampleRate, SinkConfig, SinkError, SinkKind};

/// A sample sink that records everything it is given and never blocks,
/// so a queue of tones renders as fast as the synthesis thread can go.
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<i16>>>,
    sample_rate: SampleRate,
}

impl CaptureSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<i16>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        (
            CaptureSink {
                samples: samples.clone(),
                sample_rate: 0,
            },
            samples,
        )
    }
}

impl AudioSink for CaptureSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Samples
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        self.sample_rate = *rates.first().unwrap_or(&44_100);
        Ok(SinkConfig {
            sample_rate: self.sample_rate,
            period_frames: (self.sample_rate / 100) as usize,
        })
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        self.samples.lock().unwrap().extend_from_slice(samples);
        Ok(())
    }

    fn close(&mut self) {}
}
