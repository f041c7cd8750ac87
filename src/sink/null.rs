//! A sink that produces no sound and paces tones with sleeps.

use std::thread;
use std::time::Duration;

use crate::common::SampleRate;
use crate::constants::QUANTUM_LEN;
use crate::error::SinkError;
use crate::sink::{AudioSink, SinkConfig, SinkKind};
use crate::tone::Tone;

/// Silent sink. Useful for tests, for keying practice where only the
/// receiver side matters, and as the fallback when no audio system is
/// available.
#[derive(Debug, Default)]
pub struct NullSink {
    sample_rate: SampleRate,
}

impl NullSink {
    /// A new, unopened null sink.
    pub fn new() -> Self {
        NullSink::default()
    }
}

impl AudioSink for NullSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Tones
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        // Everything is acceptable when nothing is played.
        let sample_rate = *rates.first().unwrap_or(&44_100);
        self.sample_rate = sample_rate;
        Ok(SinkConfig {
            sample_rate,
            period_frames: (sample_rate / 100) as usize,
        })
    }

    fn write_tone(&mut self, tone: &Tone) -> Result<(), SinkError> {
        let duration = if tone.is_forever {
            QUANTUM_LEN
        } else {
            tone.duration
        };
        thread::sleep(Duration::from_micros(duration as u64));
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SUPPORTED_SAMPLE_RATES;
    use crate::tone::SlopeMode;
    use std::time::Instant;

    #[test]
    fn accepts_first_offered_rate() {
        let mut sink = NullSink::new();
        let config = sink.open(&SUPPORTED_SAMPLE_RATES).unwrap();
        assert_eq!(config.sample_rate, 44_100);
    }

    #[test]
    fn sleeps_through_a_tone() {
        let mut sink = NullSink::new();
        sink.open(&SUPPORTED_SAMPLE_RATES).unwrap();
        let tone = Tone::new(800, 20_000, SlopeMode::Standard);
        let start = Instant::now();
        sink.write_tone(&tone).unwrap();
        assert!(start.elapsed() >= Duration::from_micros(20_000));
    }

    #[test]
    fn forever_tone_only_sleeps_one_quantum() {
        let mut sink = NullSink::new();
        sink.open(&SUPPORTED_SAMPLE_RATES).unwrap();
        let mut tone = Tone::new(800, 60_000_000, SlopeMode::NoSlopes);
        tone.is_forever = true;
        let start = Instant::now();
        sink.write_tone(&tone).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
