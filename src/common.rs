use std::time::Instant;

/// Stream sample rate (samples per second, mono).
pub type SampleRate = u32;

/// A point in time, in microseconds on the library's monotonic clock.
///
/// Key events and receiver marks are stamped with these. Callers that
/// already have externally timed events (a serial keyer line, a test) pass
/// their own values; only differences between timestamps matter.
pub type Timestamp = u64;

lazy_static::lazy_static! {
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// Current time on the library's monotonic clock.
pub fn now() -> Timestamp {
    CLOCK_EPOCH.elapsed().as_micros() as Timestamp
}

/// Length of the interval between two timestamps, saturating at zero when
/// events arrive out of order.
pub(crate) fn interval(earlier: Timestamp, later: Timestamp) -> u32 {
    later.saturating_sub(earlier).min(u32::MAX as u64) as u32
}
