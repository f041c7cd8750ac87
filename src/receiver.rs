//! The receiver: classifying timestamped key events into characters.
//!
//! Clients (or a registered [`Key`](crate::Key)) feed mark-begin and
//! mark-end events; the receiver measures the mark, classifies it as a
//! dot or a dash, and accumulates a representation. Spaces are not
//! events: the client polls, and the receiver decides from the elapsed
//! time whether the character is finished or a word boundary has passed.
//!
//! In adaptive mode every classified mark feeds a moving average of dot
//! and dash lengths, from which the speed estimate is continuously
//! re-derived.

use std::sync::{Arc, Mutex};

use crate::common::{interval, now, Timestamp};
use crate::constants::{
    ADAPTIVE_MODE_INITIAL, AVERAGING_LEN, DOT_CALIBRATION, GAP_INITIAL, GAP_MAX, GAP_MIN,
    NOISE_THRESHOLD_INITIAL, REPRESENTATION_CAPACITY, SPEED_INITIAL, SPEED_MAX, SPEED_MIN,
    STATISTICS_CAPACITY, TOLERANCE_INITIAL, TOLERANCE_MAX, TOLERANCE_MIN,
};
use crate::data;
use crate::Error;

/// Phase of the receive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing happening.
    Idle,
    /// Inside a mark, between begin and end.
    Mark,
    /// Between marks of one character.
    ImarkSpace,
    /// The inter-character gap was recognized by a poll.
    EocGap,
    /// The inter-word gap was recognized by a poll.
    EowGap,
    /// Like `EocGap`, with a sticky error (unrecognized mark or full
    /// buffer).
    EocGapErr,
    /// Like `EowGap`, with a sticky error.
    EowGapErr,
}

/// What a timing statistic measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatKind {
    None,
    Dot,
    Dash,
    ImarkSpace,
    IcharSpace,
}

#[derive(Debug, Clone, Copy)]
struct StatEntry {
    kind: StatKind,
    /// Observed length minus ideal length \[µs\].
    delta: i64,
}

/// Standard deviations of observed lengths from their ideals \[µs\].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub dot_sd: f64,
    pub dash_sd: f64,
    pub inter_mark_space_sd: f64,
    pub inter_character_space_sd: f64,
}

/// Fixed-window moving average of mark lengths, for adaptive tracking.
struct Averaging {
    buffer: [u32; AVERAGING_LEN],
    cursor: usize,
    sum: u64,
    average: u32,
}

impl Averaging {
    fn reset(&mut self, initial: u32) {
        self.buffer = [initial; AVERAGING_LEN];
        self.sum = initial as u64 * AVERAGING_LEN as u64;
        self.average = initial;
        self.cursor = 0;
    }

    fn update(&mut self, mark_len: u32) {
        self.sum -= self.buffer[self.cursor] as u64;
        self.sum += mark_len as u64;
        self.average = (self.sum / AVERAGING_LEN as u64) as u32;
        self.buffer[self.cursor] = mark_len;
        self.cursor = (self.cursor + 1) % AVERAGING_LEN;
    }
}

/// Mark and space length windows derived from speed, tolerance and gap.
#[derive(Debug, Clone, Copy, Default)]
struct Ranges {
    dot_ideal: u32,
    dot_min: u32,
    dot_max: u32,
    dash_ideal: u32,
    dash_min: u32,
    dash_max: u32,
    eom_ideal: u32,
    #[allow(dead_code)] // kept for symmetry; classification uses the dot window
    eom_min: u32,
    #[allow(dead_code)]
    eom_max: u32,
    eoc_ideal: u32,
    eoc_min: u32,
    eoc_max: u32,
    additional_delay: u32,
    adjustment_delay: u32,
}

struct RecState {
    phase: Phase,
    speed: f32,
    tolerance: u32,
    gap: u32,
    noise_spike_threshold: u32,
    adaptive: bool,
    /// Boundary between dot and dash in adaptive mode; always,
    /// effectively, two ideal dot lengths \[µs\].
    adaptive_speed_threshold: u32,

    mark_start: Timestamp,
    mark_end: Timestamp,

    representation: String,
    pending_inter_word_space: bool,

    statistics: [StatEntry; STATISTICS_CAPACITY],
    statistics_cursor: usize,

    dot_averaging: Averaging,
    dash_averaging: Averaging,

    ranges: Ranges,
    in_sync: bool,
}

/// Successful result of [`Receiver::poll_representation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledRepresentation {
    /// The accumulated dots and dashes.
    pub representation: String,
    /// Whether the silence has already grown to an inter-word gap.
    pub is_end_of_word: bool,
    /// Whether a sticky error (unrecognized mark, full buffer) occurred
    /// while this representation was being accumulated.
    pub is_error: bool,
}

/// Successful result of [`Receiver::poll_character`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolledCharacter {
    /// The received character.
    pub character: char,
    /// Whether the silence has already grown to an inter-word gap.
    pub is_end_of_word: bool,
    /// Whether a sticky error occurred while receiving this character.
    pub is_error: bool,
}

pub(crate) struct RecInner {
    state: Mutex<RecState>,
}

/// Morse receiver.
///
/// Cheap to clone; clones share the same receiver. A clone is what a
/// [`Key`](crate::Key) holds on to (weakly) after
/// [`register_receiver`](crate::Key::register_receiver).
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<RecInner>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    /// A new receiver: idle, fixed-speed mode at the initial speed.
    pub fn new() -> Self {
        let mut state = RecState {
            phase: Phase::Idle,
            speed: SPEED_INITIAL as f32,
            tolerance: TOLERANCE_INITIAL,
            gap: GAP_INITIAL,
            noise_spike_threshold: NOISE_THRESHOLD_INITIAL,
            adaptive: ADAPTIVE_MODE_INITIAL,
            adaptive_speed_threshold: 2 * (DOT_CALIBRATION as u32 / SPEED_INITIAL),
            mark_start: 0,
            mark_end: 0,
            representation: String::with_capacity(REPRESENTATION_CAPACITY),
            pending_inter_word_space: false,
            statistics: [StatEntry {
                kind: StatKind::None,
                delta: 0,
            }; STATISTICS_CAPACITY],
            statistics_cursor: 0,
            dot_averaging: Averaging {
                buffer: [0; AVERAGING_LEN],
                cursor: 0,
                sum: 0,
                average: 0,
            },
            dash_averaging: Averaging {
                buffer: [0; AVERAGING_LEN],
                cursor: 0,
                sum: 0,
                average: 0,
            },
            ranges: Ranges::default(),
            in_sync: false,
        };
        state.sync_parameters();

        Receiver {
            inner: Arc::new(RecInner {
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn inner_handle(&self) -> &Arc<RecInner> {
        &self.inner
    }

    // --- parameters ---------------------------------------------------

    /// Set the receiving speed \[WPM\]. Fails with
    /// [`Error::InvalidState`] in adaptive mode, where speed is derived
    /// from the incoming code instead.
    pub fn set_speed(&self, speed: u32) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        if state.adaptive {
            return Err(Error::InvalidState(
                "speed is tracked adaptively, not settable",
            ));
        }
        if !(SPEED_MIN..=SPEED_MAX).contains(&speed) {
            return Err(Error::InvalidArgument("speed out of range"));
        }
        if (speed as f32 - state.speed).abs() >= 0.5 {
            state.speed = speed as f32;
            state.in_sync = false;
            state.sync_parameters();
        }
        Ok(())
    }

    /// Current speed \[WPM\]. A float: in adaptive mode the tracked speed
    /// is fractional.
    pub fn speed(&self) -> f32 {
        self.inner.state.lock().unwrap().speed
    }

    /// Set the classification tolerance \[%\].
    pub fn set_tolerance(&self, tolerance: u32) -> Result<(), Error> {
        if !(TOLERANCE_MIN..=TOLERANCE_MAX).contains(&tolerance) {
            return Err(Error::InvalidArgument("tolerance out of range"));
        }
        let mut state = self.inner.state.lock().unwrap();
        if tolerance != state.tolerance {
            state.tolerance = tolerance;
            state.in_sync = false;
            state.sync_parameters();
        }
        Ok(())
    }

    /// Current tolerance \[%\].
    pub fn tolerance(&self) -> u32 {
        self.inner.state.lock().unwrap().tolerance
    }

    /// Set the extra inter-character gap the sender is known to use
    /// \[dots\]; widens the end-of-character window.
    pub fn set_gap(&self, gap: u32) -> Result<(), Error> {
        #[allow(clippy::absurd_extreme_comparisons)]
        if gap < GAP_MIN || gap > GAP_MAX {
            return Err(Error::InvalidArgument("gap out of range"));
        }
        let mut state = self.inner.state.lock().unwrap();
        if gap != state.gap {
            state.gap = gap;
            state.in_sync = false;
            state.sync_parameters();
        }
        Ok(())
    }

    /// Current gap \[dots\].
    pub fn gap(&self) -> u32 {
        self.inner.state.lock().unwrap().gap
    }

    /// Set the noise-spike threshold \[µs\]: marks no longer than this
    /// are rejected as noise. Zero disables the filter.
    pub fn set_noise_spike_threshold(&self, threshold: u32) {
        self.inner.state.lock().unwrap().noise_spike_threshold = threshold;
    }

    /// Current noise-spike threshold \[µs\].
    pub fn noise_spike_threshold(&self) -> u32 {
        self.inner.state.lock().unwrap().noise_spike_threshold
    }

    /// Track the sender's speed from the incoming marks. The averages
    /// are seeded from the current ideal dot/dash lengths.
    pub fn enable_adaptive_mode(&self) {
        self.inner.state.lock().unwrap().set_adaptive(true);
    }

    /// Classify against the fixed configured speed.
    pub fn disable_adaptive_mode(&self) {
        self.inner.state.lock().unwrap().set_adaptive(false);
    }

    /// Whether adaptive tracking is on.
    pub fn is_adaptive_mode(&self) -> bool {
        self.inner.state.lock().unwrap().adaptive
    }

    // --- events -------------------------------------------------------

    /// Report the start of a mark (key down). `None` timestamps the
    /// event now.
    pub fn mark_begin(&self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        self.inner.mark_begin_at(timestamp)
    }

    /// Report the end of a mark (key up). `None` timestamps the event
    /// now.
    ///
    /// This is where classification happens; see the error kinds for the
    /// ways it can refuse.
    pub fn mark_end(&self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        self.inner.mark_end_at(timestamp)
    }

    /// Append an externally classified dot or dash, as if a mark ending
    /// at `timestamp` had just been received.
    pub fn add_mark(&self, timestamp: Option<Timestamp>, mark: char) -> Result<(), Error> {
        if mark != data::DOT && mark != data::DASH {
            return Err(Error::InvalidArgument("mark is neither dot nor dash"));
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.phase != Phase::Idle && state.phase != Phase::ImarkSpace {
            return Err(Error::InvalidState("receiver is not between marks"));
        }
        state.mark_end = timestamp.unwrap_or_else(now);
        state.append_mark(mark)
    }

    // --- polls --------------------------------------------------------

    /// Poll for the representation accumulated so far.
    ///
    /// Succeeds once the silence since the last mark is long enough to
    /// close the character, and upgrades to end-of-word when it grows
    /// past the end-of-character window. Fails with [`Error::WouldBlock`]
    /// while still inside the character and [`Error::InvalidState`] when
    /// there is nothing to poll.
    pub fn poll_representation(
        &self,
        timestamp: Option<Timestamp>,
    ) -> Result<PolledRepresentation, Error> {
        self.inner.state.lock().unwrap().poll_representation(timestamp)
    }

    /// Poll for a received character: [`poll_representation`] composed
    /// with the lookup table. Fails with [`Error::NotFound`] when the
    /// representation maps to no character.
    ///
    /// After a successful delivery the receiver keeps watching the
    /// silence, so the very next poll can upgrade the end-of-character
    /// into an end-of-word without any caller-side bookkeeping.
    ///
    /// [`poll_representation`]: Receiver::poll_representation
    pub fn poll_character(
        &self,
        timestamp: Option<Timestamp>,
    ) -> Result<PolledCharacter, Error> {
        let mut state = self.inner.state.lock().unwrap();
        let polled = state.poll_representation(timestamp)?;

        let character = data::representation_to_character(&polled.representation)
            .ok_or(Error::NotFound)?;

        if !polled.is_end_of_word {
            state.pending_inter_word_space = true;
        }
        Ok(PolledCharacter {
            character,
            is_end_of_word: polled.is_end_of_word,
            is_error: polled.is_error,
        })
    }

    /// Whether the receiver is waiting to see if the current silence
    /// becomes an inter-word space.
    pub fn is_pending_inter_word_space(&self) -> bool {
        self.inner.state.lock().unwrap().pending_inter_word_space
    }

    // --- resets and introspection ------------------------------------

    /// Drop the accumulated representation and return to idle. Leaves
    /// parameters and statistics alone.
    pub fn reset_state(&self) {
        self.inner.state.lock().unwrap().reset_state();
    }

    /// Return every tunable (speed, tolerance, gap, adaptive flag, noise
    /// threshold) to its initial value.
    pub fn reset_parameters(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.speed = SPEED_INITIAL as f32;
        state.tolerance = TOLERANCE_INITIAL;
        state.gap = GAP_INITIAL;
        state.adaptive = ADAPTIVE_MODE_INITIAL;
        state.noise_spike_threshold = NOISE_THRESHOLD_INITIAL;
        state.in_sync = false;
        state.sync_parameters();
    }

    /// Clear the timing-statistics ring.
    pub fn reset_statistics(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.statistics = [StatEntry {
            kind: StatKind::None,
            delta: 0,
        }; STATISTICS_CAPACITY];
        state.statistics_cursor = 0;
    }

    /// Standard deviations of mark and space lengths from their ideals.
    pub fn statistics(&self) -> Statistics {
        let state = self.inner.state.lock().unwrap();
        Statistics {
            dot_sd: state.stddev(StatKind::Dot),
            dash_sd: state.stddev(StatKind::Dash),
            inter_mark_space_sd: state.stddev(StatKind::ImarkSpace),
            inter_character_space_sd: state.stddev(StatKind::IcharSpace),
        }
    }

    /// Number of marks accumulated for the current character.
    pub fn buffer_length(&self) -> usize {
        self.inner.state.lock().unwrap().representation.len()
    }

    /// Capacity of the representation buffer.
    pub fn buffer_capacity(&self) -> usize {
        REPRESENTATION_CAPACITY
    }
}

impl RecInner {
    pub(crate) fn mark_begin_at(&self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        self.state.lock().unwrap().mark_begin(timestamp)
    }

    pub(crate) fn mark_end_at(&self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        self.state.lock().unwrap().mark_end(timestamp)
    }

    pub(crate) fn sync_parameters(&self) {
        self.state.lock().unwrap().sync_parameters();
    }
}

impl RecState {
    /// Recompute the length windows if a parameter changed.
    ///
    /// In adaptive mode the speed is re-derived from the threshold (two
    /// averaged dot lengths); in fixed mode the threshold is re-derived
    /// from the speed. The unit length is taken from the speed as it was
    /// on entry, matching the original library's order of operations.
    fn sync_parameters(&mut self) {
        if self.in_sync {
            return;
        }

        let unit = (DOT_CALIBRATION as f32 / self.speed) as u32;

        if self.adaptive {
            self.speed = DOT_CALIBRATION as f32 / (self.adaptive_speed_threshold as f32 / 2.0);
        } else {
            self.adaptive_speed_threshold = 2 * unit;
        }

        let r = &mut self.ranges;
        r.dot_ideal = unit;
        r.dash_ideal = 3 * unit;
        r.eom_ideal = unit;
        r.eoc_ideal = 3 * unit;
        r.additional_delay = self.gap * unit;
        r.adjustment_delay = (7 * r.additional_delay) / 3;

        if self.adaptive {
            r.dot_min = 0;
            r.dot_max = 2 * r.dot_ideal;
            // Any mark longer than two dots is a dash.
            r.dash_min = r.dot_max;
            r.dash_max = u32::MAX;
            r.eom_min = r.dot_min;
            r.eom_max = r.dot_max;
            r.eoc_min = r.eom_max;
            r.eoc_max = 5 * r.dot_ideal;
        } else {
            let tolerance = (r.dot_ideal * self.tolerance) / 100;
            r.dot_min = r.dot_ideal - tolerance;
            r.dot_max = r.dot_ideal + tolerance;
            r.dash_min = r.dash_ideal - tolerance;
            r.dash_max = r.dash_ideal + tolerance;
            r.eom_min = r.dot_min;
            r.eom_max = r.dot_max;
            r.eoc_min = r.dash_min;
            r.eoc_max = r.dash_max + r.additional_delay + r.adjustment_delay;
        }

        tracing::debug!(
            speed = self.speed,
            dot_min = r.dot_min,
            dot_max = r.dot_max,
            dash_min = r.dash_min,
            dash_max = r.dash_max,
            eoc_min = r.eoc_min,
            eoc_max = r.eoc_max,
            threshold = self.adaptive_speed_threshold,
            "receiver timings synchronized"
        );
        self.in_sync = true;
    }

    fn set_adaptive(&mut self, adaptive: bool) {
        if self.adaptive == adaptive {
            return;
        }
        self.adaptive = adaptive;
        self.in_sync = false;
        self.sync_parameters();

        if self.adaptive {
            // Seed the averages at the current speed so tracking starts
            // from a sane estimate rather than from zero.
            let dot_ideal = self.ranges.dot_ideal;
            let dash_ideal = self.ranges.dash_ideal;
            self.dot_averaging.reset(dot_ideal);
            self.dash_averaging.reset(dash_ideal);
        }
    }

    fn mark_begin(&mut self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        if self.pending_inter_word_space {
            // The awaited inter-word space did not materialize; what we
            // saw was just an inter-character space. Start over.
            self.reset_state();
        }

        if self.phase != Phase::Idle && self.phase != Phase::ImarkSpace {
            return Err(Error::InvalidState(
                "mark can only begin when idle or between marks",
            ));
        }

        let timestamp = timestamp.unwrap_or_else(now);

        if self.phase == Phase::ImarkSpace {
            let space_len = interval(self.mark_end, timestamp);
            self.update_stats(StatKind::ImarkSpace, space_len);
        }

        self.mark_start = timestamp;
        self.phase = Phase::Mark;
        Ok(())
    }

    fn mark_end(&mut self, timestamp: Option<Timestamp>) -> Result<(), Error> {
        if self.phase != Phase::Mark {
            return Err(Error::InvalidState("no mark has begun"));
        }

        let timestamp = timestamp.unwrap_or_else(now);
        let mark_len = interval(self.mark_start, timestamp);

        if self.noise_spike_threshold > 0 && mark_len <= self.noise_spike_threshold {
            // Noise: roll back to the state before the matching
            // mark_begin. The end-of-mark timestamp keeps its previous
            // value, so space measurements still run from the last real
            // mark.
            self.phase = if self.representation.is_empty() {
                Phase::Idle
            } else {
                Phase::ImarkSpace
            };
            tracing::debug!(mark_len, "mark rejected as noise spike");
            return Err(Error::Noise);
        }

        self.mark_end = timestamp;
        self.sync_parameters();

        let mark = if mark_len >= self.ranges.dot_min && mark_len <= self.ranges.dot_max {
            data::DOT
        } else if mark_len >= self.ranges.dash_min && mark_len <= self.ranges.dash_max {
            data::DASH
        } else {
            // Not recognizable. Pick the error state by treating the
            // length as if it were a space beyond the character.
            tracing::debug!(
                mark_len,
                dot_min = self.ranges.dot_min,
                dot_max = self.ranges.dot_max,
                dash_min = self.ranges.dash_min,
                dash_max = self.ranges.dash_max,
                "unrecognized mark"
            );
            self.phase = if mark_len > self.ranges.eoc_max {
                Phase::EowGapErr
            } else {
                Phase::EocGapErr
            };
            return Err(Error::NotFound);
        };

        if self.adaptive {
            self.update_averages(mark_len, mark);
        }

        // Statistics go in after the averaging update: on a speed slope
        // the smoothed ideals lag the observed lengths, and this order
        // at least measures against the fresher ideal.
        self.update_stats(
            if mark == data::DOT {
                StatKind::Dot
            } else {
                StatKind::Dash
            },
            mark_len,
        );

        self.append_mark(mark)
    }

    /// Push a classified mark into the representation buffer and settle
    /// the next phase.
    fn append_mark(&mut self, mark: char) -> Result<(), Error> {
        self.representation.push(mark);

        if self.representation.len() == REPRESENTATION_CAPACITY {
            self.phase = Phase::EocGapErr;
            tracing::debug!("representation buffer full");
            return Err(Error::BufferFull);
        }

        self.phase = Phase::ImarkSpace;
        Ok(())
    }

    fn poll_representation(
        &mut self,
        timestamp: Option<Timestamp>,
    ) -> Result<PolledRepresentation, Error> {
        match self.phase {
            Phase::EowGap | Phase::EowGapErr => {
                // Settled: the same representation comes back until the
                // next mark begins.
                return Ok(self.poll_eow());
            }
            Phase::Idle | Phase::Mark => {
                return Err(Error::InvalidState(
                    "nothing to poll: no finished marks buffered",
                ));
            }
            Phase::ImarkSpace | Phase::EocGap | Phase::EocGapErr => {}
        }

        let timestamp = timestamp.unwrap_or_else(now);
        let space_len = interval(self.mark_end, timestamp);
        self.sync_parameters();

        if space_len >= self.ranges.eoc_min && space_len <= self.ranges.eoc_max {
            Ok(self.poll_eoc(space_len))
        } else if space_len > self.ranges.eoc_max {
            Ok(self.poll_eow())
        } else {
            Err(Error::WouldBlock("still inside a character"))
        }
    }

    fn poll_eoc(&mut self, space_len: u32) -> PolledRepresentation {
        if self.phase == Phase::ImarkSpace {
            self.update_stats(StatKind::IcharSpace, space_len);
            self.phase = Phase::EocGap;
        }

        PolledRepresentation {
            representation: self.representation.clone(),
            is_end_of_word: false,
            is_error: self.phase == Phase::EocGapErr,
        }
    }

    fn poll_eow(&mut self) -> PolledRepresentation {
        self.phase = match self.phase {
            Phase::ImarkSpace | Phase::EocGap | Phase::EowGap => Phase::EowGap,
            Phase::EocGapErr | Phase::EowGapErr => Phase::EowGapErr,
            phase => phase,
        };

        PolledRepresentation {
            representation: self.representation.clone(),
            is_end_of_word: true,
            is_error: self.phase == Phase::EowGapErr,
        }
    }

    fn reset_state(&mut self) {
        self.representation.clear();
        self.pending_inter_word_space = false;
        self.phase = Phase::Idle;
    }

    /// Feed a classified mark into its moving average and re-derive the
    /// speed estimate; out-of-range estimates clamp the speed and drop
    /// the tracker back onto it.
    fn update_averages(&mut self, mark_len: u32, mark: char) {
        match mark {
            data::DOT => self.dot_averaging.update(mark_len),
            data::DASH => self.dash_averaging.update(mark_len),
            _ => return,
        }

        let avg_dot = self.dot_averaging.average as i64;
        let avg_dash = self.dash_averaging.average as i64;
        self.adaptive_speed_threshold = ((avg_dash - avg_dot) / 2 + avg_dot).max(1) as u32;

        self.in_sync = false;
        self.sync_parameters();

        if self.speed < SPEED_MIN as f32 || self.speed > SPEED_MAX as f32 {
            self.speed = if self.speed < SPEED_MIN as f32 {
                SPEED_MIN as f32
            } else {
                SPEED_MAX as f32
            };

            // The clamp bypassed the threshold, so resynchronize once in
            // fixed mode to rebuild everything from the clamped speed,
            // then once more in adaptive mode to restore the threshold.
            self.adaptive = false;
            self.in_sync = false;
            self.sync_parameters();

            self.adaptive = true;
            self.in_sync = false;
            self.sync_parameters();
        }
    }

    fn update_stats(&mut self, kind: StatKind, len: u32) {
        self.sync_parameters();

        let ideal = match kind {
            StatKind::Dot => self.ranges.dot_ideal,
            StatKind::Dash => self.ranges.dash_ideal,
            StatKind::ImarkSpace => self.ranges.eom_ideal,
            StatKind::IcharSpace => self.ranges.eoc_ideal,
            StatKind::None => len,
        };

        self.statistics[self.statistics_cursor] = StatEntry {
            kind,
            delta: len as i64 - ideal as i64,
        };
        self.statistics_cursor = (self.statistics_cursor + 1) % STATISTICS_CAPACITY;
    }

    /// Standard deviation of deltas recorded for `kind`. A cleared ring
    /// refills from slot zero, so the scan can stop at the first empty
    /// slot.
    fn stddev(&self, kind: StatKind) -> f64 {
        let mut sum_of_squares = 0.0;
        let mut count = 0u32;
        for entry in &self.statistics {
            if entry.kind == kind {
                sum_of_squares += (entry.delta * entry.delta) as f64;
                count += 1;
            } else if entry.kind == StatKind::None {
                break;
            }
        }
        if count > 0 {
            (sum_of_squares / count as f64).sqrt()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Receiver at a fixed speed with the noise filter off, for tests
    /// that feed exact timings.
    fn fixed_receiver(speed: u32) -> Receiver {
        let rec = Receiver::new();
        rec.set_speed(speed).unwrap();
        rec.set_noise_spike_threshold(0);
        rec
    }

    #[test]
    fn dot_and_dash_classification_at_fixed_speed() {
        let rec = fixed_receiver(60); // dot 20 ms, dash 60 ms

        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(20_000)).unwrap();
        rec.mark_begin(Some(40_000)).unwrap();
        rec.mark_end(Some(100_000)).unwrap();

        // 'A' = dot dash; the end-of-character gap is 3 dots.
        let polled = rec.poll_representation(Some(100_000 + 60_000)).unwrap();
        assert_eq!(polled.representation, ".-");
        assert!(!polled.is_end_of_word);
        assert!(!polled.is_error);
    }

    #[test]
    fn character_poll_maps_representation() {
        let rec = fixed_receiver(20); // dot 60 ms
        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(60_000)).unwrap();

        let polled = rec.poll_character(Some(60_000 + 180_000)).unwrap();
        assert_eq!(polled.character, 'E');
        assert!(!polled.is_end_of_word);
        assert!(rec.is_pending_inter_word_space());
    }

    #[test]
    fn poll_too_early_would_block() {
        let rec = fixed_receiver(20);
        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(60_000)).unwrap();

        // One dot length into the space: still inside the character.
        assert!(matches!(
            rec.poll_representation(Some(60_000 + 60_000)),
            Err(Error::WouldBlock(_))
        ));
    }

    #[test]
    fn poll_in_idle_is_invalid() {
        let rec = fixed_receiver(20);
        assert!(matches!(
            rec.poll_representation(Some(0)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn eoc_upgrades_to_eow() {
        let rec = fixed_receiver(20);
        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(60_000)).unwrap();

        let eoc = rec.poll_representation(Some(60_000 + 200_000)).unwrap();
        assert!(!eoc.is_end_of_word);

        // Well past seven units of silence.
        let eow = rec.poll_representation(Some(60_000 + 600_000)).unwrap();
        assert!(eow.is_end_of_word);
        assert_eq!(eow.representation, ".");
    }

    #[test]
    fn pending_inter_word_space_clears_on_next_mark() {
        let rec = fixed_receiver(20);
        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(60_000)).unwrap();
        let polled = rec.poll_character(Some(60_000 + 200_000)).unwrap();
        assert_eq!(polled.character, 'E');
        assert!(rec.is_pending_inter_word_space());

        // Next mark arrives: the pending space was only inter-character.
        rec.mark_begin(Some(400_000)).unwrap();
        assert!(!rec.is_pending_inter_word_space());
        assert_eq!(rec.buffer_length(), 0);
    }

    #[test]
    fn noise_spike_is_rolled_back() {
        let rec = Receiver::new();
        rec.set_speed(20).unwrap();
        rec.set_noise_spike_threshold(10_000);

        rec.mark_begin(Some(0)).unwrap();
        assert!(matches!(rec.mark_end(Some(5_000)), Err(Error::Noise)));
        assert_eq!(rec.buffer_length(), 0);

        // Receiver is back to idle and accepts a fresh mark.
        rec.mark_begin(Some(100_000)).unwrap();
        rec.mark_end(Some(160_000)).unwrap();
        assert_eq!(rec.buffer_length(), 1);
    }

    #[test]
    fn noise_spike_mid_character_returns_to_imark_space() {
        let rec = Receiver::new();
        rec.set_speed(20).unwrap();
        rec.set_noise_spike_threshold(10_000);

        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(60_000)).unwrap();
        rec.mark_begin(Some(120_000)).unwrap();
        assert!(matches!(rec.mark_end(Some(125_000)), Err(Error::Noise)));

        // Still mid-character; the next real mark continues the buffer.
        rec.mark_begin(Some(180_000)).unwrap();
        rec.mark_end(Some(240_000)).unwrap();
        assert_eq!(rec.buffer_length(), 2);
    }

    #[test]
    fn unrecognized_mark_sets_error_state() {
        let rec = fixed_receiver(20); // dot 60 ms ± 50 %, dash 180 ms ± 30 ms

        rec.mark_begin(Some(0)).unwrap();
        // 120 ms: too long for a dot, too short for a dash.
        assert!(matches!(rec.mark_end(Some(120_000)), Err(Error::NotFound)));

        let polled = rec.poll_representation(Some(10_000_000)).unwrap();
        assert!(polled.is_error);
        assert!(polled.is_end_of_word);
    }

    #[test]
    fn buffer_overflow_forces_error_state() {
        let rec = fixed_receiver(60); // dot 20 ms
        let mut t = 0u64;
        for i in 0..REPRESENTATION_CAPACITY {
            rec.mark_begin(Some(t)).unwrap();
            let result = rec.mark_end(Some(t + 20_000));
            if i < REPRESENTATION_CAPACITY - 1 {
                result.unwrap();
            } else {
                assert!(matches!(result, Err(Error::BufferFull)));
            }
            t += 40_000;
        }

        let polled = rec.poll_representation(Some(t + 10_000_000)).unwrap();
        assert!(polled.is_error);
        assert_eq!(polled.representation.len(), REPRESENTATION_CAPACITY);
    }

    #[test]
    fn adaptive_tracking_follows_slower_sender() {
        let rec = Receiver::new();
        rec.set_speed(20).unwrap();
        rec.set_noise_spike_threshold(0);
        rec.enable_adaptive_mode();

        // A dot of 20 ms (fast) then a dash of 180 ms; averages move off
        // their 20 WPM seeds.
        rec.mark_begin(Some(0)).unwrap();
        rec.mark_end(Some(20_000)).unwrap();
        rec.mark_begin(Some(60_000)).unwrap();
        rec.mark_end(Some(240_000)).unwrap();

        // avg_dot = (20000 + 3*60000)/4 = 50000,
        // avg_dash = 180000 (unchanged), threshold = 115000,
        // speed = 1200000 / 57500 WPM.
        approx::assert_abs_diff_eq!(rec.speed(), 1_200_000.0 / 57_500.0, epsilon = 0.01);
    }

    #[test]
    fn adaptive_mode_rejects_set_speed() {
        let rec = Receiver::new();
        rec.enable_adaptive_mode();
        assert!(matches!(rec.set_speed(20), Err(Error::InvalidState(_))));
    }

    #[test]
    fn set_speed_twice_is_idempotent() {
        let rec = fixed_receiver(31);
        rec.set_speed(31).unwrap();
        assert_eq!(rec.speed(), 31.0);
    }

    #[test]
    fn statistics_track_deviation() {
        let rec = fixed_receiver(20); // ideal dot 60 ms

        let mut t = 0u64;
        for _ in 0..4 {
            rec.mark_begin(Some(t)).unwrap();
            rec.mark_end(Some(t + 66_000)).unwrap(); // 6 ms long each time
            t += 200_000;
            let _ = rec.poll_representation(Some(t));
            rec.reset_state();
        }

        let stats = rec.statistics();
        approx::assert_abs_diff_eq!(stats.dot_sd, 6000.0, epsilon = 1.0);
        assert_eq!(stats.dash_sd, 0.0);

        rec.reset_statistics();
        assert_eq!(rec.statistics().dot_sd, 0.0);
    }

    #[test]
    fn reset_parameters_restores_initials_including_gap() {
        let rec = Receiver::new();
        rec.set_tolerance(20).unwrap();
        rec.set_gap(5).unwrap();
        rec.set_noise_spike_threshold(0);
        rec.enable_adaptive_mode();

        rec.reset_parameters();
        assert_eq!(rec.speed(), SPEED_INITIAL as f32);
        assert_eq!(rec.tolerance(), TOLERANCE_INITIAL);
        assert_eq!(rec.gap(), GAP_INITIAL);
        assert_eq!(rec.noise_spike_threshold(), NOISE_THRESHOLD_INITIAL);
        assert!(!rec.is_adaptive_mode());
    }

    #[test]
    fn add_mark_behaves_like_mark_end() {
        let rec = fixed_receiver(20);
        rec.add_mark(Some(0), data::DOT).unwrap();
        rec.add_mark(Some(120_000), data::DASH).unwrap();

        let polled = rec.poll_character(Some(120_000 + 200_000)).unwrap();
        assert_eq!(polled.character, 'A');
    }

    #[test]
    fn add_mark_rejects_garbage() {
        let rec = fixed_receiver(20);
        assert!(matches!(
            rec.add_mark(Some(0), 'x'),
            Err(Error::InvalidArgument(_))
        ));
    }
}
