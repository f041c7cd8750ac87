//! Audio sinks the generator renders into.
//!
//! A sink is opened once, accepts data for the lifetime of a generator and
//! is closed on shutdown. Sinks come in two capability classes. Sample
//! sinks consume fixed-size buffers of signed 16-bit native-endian mono
//! PCM; their internal buffering is what paces the synthesis loop in real
//! time. Tone sinks have no PCM path at all and consume whole tones (the
//! null sink sleeps through them, the console sink drives the PC speaker).
//!
//! Backends are chosen at build time through cargo features; there is no
//! runtime plugin loading.

use crate::common::SampleRate;
use crate::error::SinkError;
use crate::tone::Tone;

#[cfg(all(target_os = "linux", feature = "console"))]
mod console;
mod null;
#[cfg(feature = "pulseaudio")]
mod pulse;
#[cfg(feature = "playback")]
mod soundcard;
#[cfg(feature = "wav_output")]
mod wav;

#[cfg(all(target_os = "linux", feature = "console"))]
pub use console::ConsoleSink;
pub use null::NullSink;
#[cfg(feature = "pulseaudio")]
pub use pulse::PulseSink;
#[cfg(feature = "playback")]
pub use soundcard::SoundcardSink;
#[cfg(feature = "wav_output")]
pub use wav::WavSink;

/// Capability class of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// The sink consumes PCM sample buffers.
    Samples,
    /// The sink consumes whole tones and does its own timing.
    Tones,
}

/// What an opened sink agreed to.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// The first sample rate the device accepted from the offered list.
    pub sample_rate: SampleRate,
    /// Period size in frames; the generator sizes its sample buffer to
    /// this. Nominal for tone sinks.
    pub period_frames: usize,
}

/// An audio output consumed by the generator.
///
/// `open` is called once, before the synthesis thread exists. The write
/// methods and `close` are called only from the synthesis thread. A write
/// blocks until the sink has accepted the data; that back-pressure is the
/// engine's only source of real-time pacing.
pub trait AudioSink: Send {
    /// Which capability class this sink belongs to.
    fn kind(&self) -> SinkKind;

    /// Open the device and negotiate a sample rate: the first entry of
    /// `rates` the device accepts wins.
    fn open(&mut self, rates: &[SampleRate]) -> Result<SinkConfig, SinkError>;

    /// Push one period of samples. Only called on [`SinkKind::Samples`]
    /// sinks. An [`SinkError::Underrun`] is recoverable; the generator
    /// logs it and continues.
    fn write_samples(&mut self, _samples: &[i16]) -> Result<(), SinkError> {
        Ok(())
    }

    /// Play one whole tone. Only called on [`SinkKind::Tones`] sinks; a
    /// forever tone is delivered repeatedly, one quantum at a time.
    fn write_tone(&mut self, _tone: &Tone) -> Result<(), SinkError> {
        Ok(())
    }

    /// Immediately stop any sound the sink can produce on its own.
    fn silence(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release the device. Called at generator shutdown.
    fn close(&mut self);
}

/// The audio systems a generator can be created for. Which variants exist
/// depends on enabled features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AudioSystem {
    /// No sound; tones are timed with sleeps.
    Null,
    /// Linux console PC-speaker beep.
    #[cfg(all(target_os = "linux", feature = "console"))]
    Console,
    /// Soundcard output through cpal (covers ALSA, OSS emulation and
    /// every other host API cpal supports).
    #[cfg(feature = "playback")]
    Soundcard,
    /// PulseAudio through the synchronous simple API.
    #[cfg(feature = "pulseaudio")]
    PulseAudio,
}

/// Build the sink for `system`. `device` overrides the backend's default
/// device where the backend has a notion of one.
#[allow(unused_variables)] // device is unused when only the null backend is compiled
pub fn sink_for(system: AudioSystem, device: Option<&str>) -> Box<dyn AudioSink> {
    match system {
        AudioSystem::Null => Box::new(NullSink::new()),
        #[cfg(all(target_os = "linux", feature = "console"))]
        AudioSystem::Console => Box::new(ConsoleSink::new(device)),
        #[cfg(feature = "playback")]
        AudioSystem::Soundcard => Box::new(SoundcardSink::new(device)),
        #[cfg(feature = "pulseaudio")]
        AudioSystem::PulseAudio => Box::new(PulseSink::new(device)),
    }
}
