//! Numeric limits and initial values for every tunable parameter.
//!
//! All durations are in microseconds unless a name says otherwise. The dot
//! calibration constant ties speed in words per minute to the length of a
//! single dot: sending the word "PARIS " at S WPM takes exactly 60/S
//! seconds, and PARIS comprises 50 dot units.

/// Lowest supported sending/receiving speed \[WPM\].
pub const SPEED_MIN: u32 = 4;
/// Highest supported sending/receiving speed \[WPM\].
pub const SPEED_MAX: u32 = 60;
/// Initial speed of a generator or receiver \[WPM\].
pub const SPEED_INITIAL: u32 = 12;

/// Lowest tone frequency. Zero is a valid frequency: it means silence.
pub const FREQUENCY_MIN: u32 = 0;
/// Highest tone frequency \[Hz\].
pub const FREQUENCY_MAX: u32 = 4000;
/// Initial tone frequency \[Hz\].
pub const FREQUENCY_INITIAL: u32 = 800;

/// Lowest volume \[%\].
pub const VOLUME_MIN: u32 = 0;
/// Highest volume \[%\].
pub const VOLUME_MAX: u32 = 100;
/// Initial volume \[%\].
pub const VOLUME_INITIAL: u32 = 70;

/// Absolute amplitude range that 100 % volume maps to (2^15).
pub const VOLUME_RANGE: i32 = 1 << 15;

/// Lowest extra inter-character gap \[units of one dot\].
pub const GAP_MIN: u32 = 0;
/// Highest extra inter-character gap \[units of one dot\].
pub const GAP_MAX: u32 = 60;
/// Initial extra inter-character gap.
pub const GAP_INITIAL: u32 = 0;

/// Lowest dot/dash weighting. 50 is neutral.
pub const WEIGHTING_MIN: u32 = 20;
/// Highest dot/dash weighting.
pub const WEIGHTING_MAX: u32 = 80;
/// Initial dot/dash weighting.
pub const WEIGHTING_INITIAL: u32 = 50;

/// Lowest receiver tolerance \[%\].
pub const TOLERANCE_MIN: u32 = 0;
/// Highest receiver tolerance \[%\].
pub const TOLERANCE_MAX: u32 = 90;
/// Initial receiver tolerance \[%\].
pub const TOLERANCE_INITIAL: u32 = 50;

/// Microsecond-WPM product calibrating the length of one dot:
/// `dot_us = DOT_CALIBRATION / speed_wpm`.
pub const DOT_CALIBRATION: u64 = 1_200_000;

/// Initial length of a tone's rising/falling slope \[µs\].
pub const SLOPE_LEN_INITIAL: u32 = 5000;

/// Shortest period of time used for idle waits and as the redelivery
/// length of a "forever" tone \[µs\].
pub const QUANTUM_LEN: u32 = 100;

/// Initial receiver noise-spike threshold: marks shorter than this are
/// discarded as noise \[µs\]. Half a dot at the highest supported speed.
pub const NOISE_THRESHOLD_INITIAL: u32 = (DOT_CALIBRATION as u32 / SPEED_MAX) / 2;

/// Whether a freshly created receiver tracks speed adaptively.
pub const ADAPTIVE_MODE_INITIAL: bool = false;

/// Number of tones a tone queue will accept.
pub const TONE_QUEUE_CAPACITY: usize = 3000;
/// Queue length at which character enqueues start failing with
/// [`Error::WouldBlock`](crate::Error::WouldBlock).
pub const TONE_QUEUE_HIGH_WATER_MARK: usize = 2900;

/// Number of marks a receiver can accumulate for a single character.
pub const REPRESENTATION_CAPACITY: usize = 256;
/// Number of slots in the receiver's timing-statistics ring.
pub const STATISTICS_CAPACITY: usize = 256;
/// Number of samples in each of the receiver's dot/dash moving averages.
pub const AVERAGING_LEN: usize = 4;

/// Sample rates offered to an audio sink, in order of preference. The
/// first rate the sink accepts is used for the whole session.
pub const SUPPORTED_SAMPLE_RATES: [u32; 7] = [44100, 48000, 32000, 22050, 16000, 11025, 8000];
