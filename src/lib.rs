//! Morse code as audio, both directions.
//!
//! `cwave` generates International Morse code as shaped sine tones pushed
//! to an audio sink, and decodes timestamped key events back into
//! characters. The pieces, wired the way a typical trainer uses them:
//!
//! - [`Generator`]: owns a bounded [`ToneQueue`] and a synthesis thread
//!   that renders queued tones into 16-bit mono PCM.
//! - [`Key`]: straight key and iambic keyer state machines. A key drives
//!   a registered generator (to make sound) and a registered receiver (to
//!   make timestamps).
//! - [`Receiver`]: classifies mark/space lengths into dots, dashes and
//!   the gaps between characters and words, with optional adaptive speed
//!   tracking.
//!
//! # Sending
//!
//! ```no_run
//! use cwave::{AudioSystem, Generator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut generator = Generator::new(AudioSystem::Null, None)?;
//! generator.start()?;
//! generator.enqueue_string("CQ CQ DE N0CALL")?;
//! generator.wait_for_queue_level(0);
//! generator.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Receiving
//!
//! ```
//! use cwave::Receiver;
//!
//! let receiver = Receiver::new();
//! receiver.set_speed(20).unwrap();
//! receiver.set_noise_spike_threshold(0);
//!
//! // One dot at 20 WPM: 60 ms, timestamps in microseconds.
//! receiver.mark_begin(Some(0)).unwrap();
//! receiver.mark_end(Some(60_000)).unwrap();
//!
//! // Poll once the inter-character gap has passed.
//! let polled = receiver.poll_character(Some(260_000)).unwrap();
//! assert_eq!(polled.character, 'E');
//! ```
//!
//! Audio backends are compile-time features: `playback` (cpal, the
//! default), `pulseaudio`, `console` (Linux PC speaker), `wav_output`,
//! and the always-available null sink.

pub mod constants;
pub mod data;
pub mod sink;

mod common;
mod error;
mod generator;
mod key;
mod receiver;
mod tone;
mod tone_queue;

pub use common::{now, SampleRate, Timestamp};
pub use error::{Error, SinkError};
pub use generator::{Generator, SlopeShape};
pub use key::{Key, KeyValue, KeyingCallback};
pub use receiver::{PolledCharacter, PolledRepresentation, Receiver, Statistics};
pub use sink::{AudioSink, AudioSystem, SinkConfig, SinkKind};
pub use tone::{SlopeMode, Tone};
pub use tone_queue::{LowWaterCallback, ToneQueue};
