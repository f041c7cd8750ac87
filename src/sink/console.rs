//! PC-speaker beep through the Linux console.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

use crate::common::SampleRate;
use crate::constants::QUANTUM_LEN;
use crate::error::SinkError;
use crate::sink::{AudioSink, SinkConfig, SinkKind};
use crate::tone::Tone;

/// Start/stop-tone ioctl of the Linux console driver.
const KIOCSOUND: libc::c_ulong = 0x4B2F;
/// Timer chip clock driving the speaker; the ioctl takes a divisor of it.
const CLOCK_TICK_RATE: u32 = 1_193_180;

const DEFAULT_DEVICE: &str = "/dev/console";

/// Beeper sink. The console cannot shape amplitude, so slopes and volume
/// are ignored; tones are square waves at the requested frequency.
pub struct ConsoleSink {
    device: String,
    file: Option<File>,
}

impl ConsoleSink {
    /// A sink for the given console device, `/dev/console` by default.
    pub fn new(device: Option<&str>) -> Self {
        ConsoleSink {
            device: device.unwrap_or(DEFAULT_DEVICE).to_owned(),
            file: None,
        }
    }

    fn ioctl_sound(&self, divisor: u32) -> Result<(), SinkError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| SinkError::Write("console device is not open".into()))?;
        let rv = unsafe { libc::ioctl(file.as_raw_fd(), KIOCSOUND, divisor as libc::c_ulong) };
        if rv < 0 {
            return Err(SinkError::Write(format!(
                "KIOCSOUND ioctl on {} failed",
                self.device
            )));
        }
        Ok(())
    }
}

impl AudioSink for ConsoleSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Tones
    }

    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.device)
            .map_err(|e| SinkError::Open(format!("{}: {e}", self.device)))?;
        self.file = Some(file);

        // The beeper has no PCM path; the rate is nominal.
        let sample_rate = *rates.first().unwrap_or(&44_100);
        Ok(SinkConfig {
            sample_rate,
            period_frames: (sample_rate / 100) as usize,
        })
    }

    fn write_tone(&mut self, tone: &Tone) -> Result<(), SinkError> {
        let divisor = if tone.frequency > 0 {
            CLOCK_TICK_RATE / tone.frequency
        } else {
            0 // stops the beep
        };
        self.ioctl_sound(divisor)?;

        let duration = if tone.is_forever {
            QUANTUM_LEN
        } else {
            tone.duration
        };
        thread::sleep(Duration::from_micros(duration as u64));
        Ok(())
    }

    fn silence(&mut self) -> Result<(), SinkError> {
        if self.file.is_some() {
            self.ioctl_sound(0)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.file.is_some() {
            let _ = self.ioctl_sound(0);
        }
        self.file = None;
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.close();
    }
}
