//! Tone generation: timing parameters, envelope shaping and the
//! synthesis thread.
//!
//! A generator owns a [`ToneQueue`] and an [`AudioSink`]. Client calls
//! enqueue tones; the synthesis thread dequeues them, renders shaped sine
//! samples and pushes buffers to the sink. The sink's own buffering is
//! what paces the loop in real time, so the generator doubles as a timer:
//! an attached iambic keyer is clocked by the completion of the tones it
//! enqueued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crate::common::SampleRate;
use crate::constants::{
    DOT_CALIBRATION, FREQUENCY_INITIAL, FREQUENCY_MAX, FREQUENCY_MIN, GAP_INITIAL, GAP_MAX,
    GAP_MIN, QUANTUM_LEN, SLOPE_LEN_INITIAL, SPEED_INITIAL, SPEED_MAX, SPEED_MIN,
    SUPPORTED_SAMPLE_RATES, TONE_QUEUE_HIGH_WATER_MARK, VOLUME_INITIAL, VOLUME_MAX, VOLUME_MIN,
    VOLUME_RANGE, WEIGHTING_INITIAL, WEIGHTING_MAX, WEIGHTING_MIN,
};
use crate::data;
use crate::error::SinkError;
use crate::key::{KeyInner, KeyValue};
use crate::sink::{sink_for, AudioSink, AudioSystem, SinkKind};
use crate::tone::{SlopeMode, Tone};
use crate::tone_queue::ToneQueue;
use crate::Error;

/// Shape of the amplitude ramp at a tone's edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeShape {
    /// Straight line from zero to full amplitude.
    Linear,
    /// Quarter period of a sine.
    Sine,
    /// Raised cosine, the gentlest of the shapes on the spectrum.
    RaisedCosine,
    /// No ramp at all; forces slope length zero.
    Rectangular,
}

/// A symbol the keyer asks the generator to play and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeySymbol {
    Dot,
    Dash,
    /// One inter-mark space of silence.
    Space,
}

/// Timings derived from speed, gap and weighting, in microseconds.
///
/// The end-of-character and end-of-word values are the *additional*
/// silence enqueued on top of what precedes them: a full inter-character
/// space is `eom + eoc` and a full inter-word space is `eom + eoc + eow`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Timings {
    dot: u32,
    dash: u32,
    eom: u32,
    eoc: u32,
    eow: u32,
    additional: u32,
    adjustment: u32,
}

struct Params {
    speed: u32,
    frequency: u32,
    volume_percent: u32,
    volume_abs: i32,
    gap: u32,
    weighting: u32,
    quantum_len: u32,
    slope_shape: SlopeShape,
    slope_len: u32,
    /// Precomputed rising-edge amplitudes; read backwards for the falling
    /// edge. Length is the slope length in samples.
    slope_amplitudes: Vec<f32>,
    timings: Timings,
    in_sync: bool,
}

impl Params {
    fn new(sample_rate: SampleRate) -> Self {
        let mut params = Params {
            speed: SPEED_INITIAL,
            frequency: FREQUENCY_INITIAL,
            volume_percent: VOLUME_INITIAL,
            volume_abs: (VOLUME_INITIAL as i32 * VOLUME_RANGE) / 100,
            gap: GAP_INITIAL,
            weighting: WEIGHTING_INITIAL,
            quantum_len: QUANTUM_LEN,
            slope_shape: SlopeShape::RaisedCosine,
            slope_len: SLOPE_LEN_INITIAL,
            slope_amplitudes: Vec::new(),
            timings: Timings::default(),
            in_sync: false,
        };
        params.recalculate_slopes(sample_rate);
        params
    }

    /// Recompute the derived timings if a parameter changed since the
    /// last synchronization.
    ///
    /// The dot takes the weighting shift; the end-of-mark space gives
    /// 28/22 of it back, because PARIS has 22 units of marks and 28 of
    /// spaces and the calibration must survive any weighting.
    fn sync(&mut self) {
        if self.in_sync {
            return;
        }

        let unit = (DOT_CALIBRATION / self.speed as u64) as i64;
        let weighting = (2 * (self.weighting as i64 - 50) * unit) / 100;

        let dot = unit + weighting;
        let dash = 3 * dot;
        let eom = unit - (28 * weighting) / 22;
        let eoc = 3 * unit - eom;
        let eow = 7 * unit - eoc;
        let additional = self.gap as i64 * unit;
        let adjustment = (7 * additional) / 3;

        self.timings = Timings {
            dot: dot as u32,
            dash: dash as u32,
            eom: eom as u32,
            eoc: eoc as u32,
            eow: eow as u32,
            additional: additional as u32,
            adjustment: adjustment as u32,
        };
        self.in_sync = true;

        tracing::debug!(
            speed = self.speed,
            dot = self.timings.dot,
            dash = self.timings.dash,
            eom = self.timings.eom,
            eoc = self.timings.eoc,
            eow = self.timings.eow,
            "generator timings synchronized"
        );
    }

    fn set_tone_slope(
        &mut self,
        shape: Option<SlopeShape>,
        len: Option<u32>,
        sample_rate: SampleRate,
    ) -> Result<(), Error> {
        if shape == Some(SlopeShape::Rectangular) && len.is_some_and(|l| l > 0) {
            return Err(Error::InvalidArgument(
                "rectangular slopes cannot have a non-zero length",
            ));
        }

        if let Some(shape) = shape {
            self.slope_shape = shape;
        }
        if let Some(len) = len {
            self.slope_len = len;
        }
        if self.slope_shape == SlopeShape::Rectangular {
            self.slope_len = 0;
        }

        self.recalculate_slopes(sample_rate);
        Ok(())
    }

    /// Rebuild the slope amplitude table. Must run whenever volume,
    /// sample rate or slope shape/length changes.
    fn recalculate_slopes(&mut self, sample_rate: SampleRate) {
        let n = ((sample_rate as u64 / 100) * self.slope_len as u64 / 10_000) as usize;
        let volume = self.volume_abs as f32;

        self.slope_amplitudes = (0..n)
            .map(|i| match self.slope_shape {
                SlopeShape::Linear => volume * i as f32 / n as f32,
                SlopeShape::Sine => {
                    let radian = i as f32 * (std::f32::consts::PI / 2.0) / n as f32;
                    radian.sin() * volume
                }
                SlopeShape::RaisedCosine => {
                    let radian = i as f32 * std::f32::consts::PI / n as f32;
                    (1.0 - (1.0 + radian.cos()) / 2.0) * volume
                }
                // n == 0 for rectangular slopes; the loop body never runs.
                SlopeShape::Rectangular => 0.0,
            })
            .collect();
    }
}

pub(crate) struct GenInner {
    pub(crate) queue: ToneQueue,
    run: AtomicBool,
    params: Mutex<Params>,
    sink: Mutex<Box<dyn AudioSink>>,
    sink_kind: SinkKind,
    sample_rate: SampleRate,
    buffer_n_samples: usize,
    /// Enqueue a forever silent tone after the falling slope of a
    /// straight-key space. Some sound systems need the continued writes;
    /// defaults to on for sample sinks, off for tone sinks.
    hold_silence_after_space: AtomicBool,
    pub(crate) key: Mutex<Weak<KeyInner>>,
}

/// Morse tone generator bound to one audio sink.
///
/// Created stopped; [`start`](Generator::start) spawns the synthesis
/// thread and [`stop`](Generator::stop) drains, silences and joins it.
/// Enqueue operations are safe to call from any thread.
pub struct Generator {
    inner: Arc<GenInner>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Generator {
    /// Create a generator for the given audio system, with the system's
    /// default device or the one named in `device`.
    pub fn new(system: AudioSystem, device: Option<&str>) -> Result<Generator, SinkError> {
        Generator::with_sink(sink_for(system, device))
    }

    /// Create a generator around an already constructed sink. This is how
    /// custom sinks (a WAV renderer, a capture sink in tests) are wired
    /// in.
    pub fn with_sink(mut sink: Box<dyn AudioSink>) -> Result<Generator, SinkError> {
        let config = sink.open(&SUPPORTED_SAMPLE_RATES)?;
        let sink_kind = sink.kind();

        let inner = Arc::new(GenInner {
            queue: ToneQueue::new(),
            run: AtomicBool::new(false),
            params: Mutex::new(Params::new(config.sample_rate)),
            sink: Mutex::new(sink),
            sink_kind,
            sample_rate: config.sample_rate,
            buffer_n_samples: config.period_frames.max(1),
            hold_silence_after_space: AtomicBool::new(sink_kind == SinkKind::Samples),
            key: Mutex::new(Weak::new()),
        });
        Ok(Generator {
            inner,
            thread: None,
        })
    }

    /// Spawn the synthesis thread.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.thread.is_some() {
            return Err(Error::InvalidState("generator is already started"));
        }
        self.inner.run.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("cwave-gen".into())
            .spawn(move || synthesis_loop(&inner))
            .expect("failed to spawn synthesis thread");
        self.thread = Some(handle);
        Ok(())
    }

    /// Drain the queue, silence the sink and join the synthesis thread.
    ///
    /// If an iambic paddle is still held closed, the keyer is reset to
    /// idle rather than left mid-element.
    pub fn stop(&mut self) {
        self.inner.queue.flush();

        if self.thread.is_some() {
            // One quantum of silence takes a held key up before shutdown.
            // The timeout covers a synthesis thread that already exited
            // on a fatal sink error.
            let _ = self.inner.queue.enqueue(Tone::silence(
                self.inner.params.lock().unwrap().quantum_len,
            ));
            self.inner
                .queue
                .wait_for_level_timeout(0, std::time::Duration::from_millis(500));
        }

        self.inner.run.store(false, Ordering::SeqCst);
        self.inner.queue.kick_dequeue();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("synthesis thread panicked");
            }
        }

        // With the synthesis thread gone nothing clocks the keyer; a
        // paddle still held closed would leave it stuck mid-element.
        if let Some(key) = self.inner.key.lock().unwrap().upgrade() {
            key.reset_keyer_graph();
        }
        self.inner.queue.flush();

        let _ = self.inner.sink.lock().unwrap().silence();
    }

    /// Whether the synthesis thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Shared internals, for the key module's non-owning registration.
    pub(crate) fn inner_handle(&self) -> &Arc<GenInner> {
        &self.inner
    }

    /// The sample rate negotiated with the sink.
    pub fn sample_rate(&self) -> SampleRate {
        self.inner.sample_rate
    }

    /// The generator's tone queue. Enqueue operations go through the
    /// generator; the queue handle gives access to waits, flushes, the
    /// low-water callback and direct tone-level access.
    pub fn tone_queue(&self) -> &ToneQueue {
        &self.inner.queue
    }

    // --- parameters ---------------------------------------------------

    /// Set the sending speed \[WPM\].
    pub fn set_speed(&self, speed: u32) -> Result<(), Error> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&speed) {
            return Err(Error::InvalidArgument("speed out of range"));
        }
        let mut params = self.inner.params.lock().unwrap();
        if speed != params.speed {
            params.speed = speed;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the tone frequency \[Hz\].
    pub fn set_frequency(&self, frequency: u32) -> Result<(), Error> {
        #[allow(clippy::absurd_extreme_comparisons)]
        if frequency < FREQUENCY_MIN || frequency > FREQUENCY_MAX {
            return Err(Error::InvalidArgument("frequency out of range"));
        }
        self.inner.params.lock().unwrap().frequency = frequency;
        Ok(())
    }

    /// Set the volume \[%\]. Takes effect from the next rendered buffer.
    pub fn set_volume(&self, volume: u32) -> Result<(), Error> {
        #[allow(clippy::absurd_extreme_comparisons)]
        if volume < VOLUME_MIN || volume > VOLUME_MAX {
            return Err(Error::InvalidArgument("volume out of range"));
        }
        let mut params = self.inner.params.lock().unwrap();
        params.volume_percent = volume;
        params.volume_abs = (volume as i32 * VOLUME_RANGE) / 100;
        params.recalculate_slopes(self.inner.sample_rate);
        Ok(())
    }

    /// Set the Farnsworth gap \[dots\] added to inter-character spaces.
    pub fn set_gap(&self, gap: u32) -> Result<(), Error> {
        #[allow(clippy::absurd_extreme_comparisons)]
        if gap < GAP_MIN || gap > GAP_MAX {
            return Err(Error::InvalidArgument("gap out of range"));
        }
        let mut params = self.inner.params.lock().unwrap();
        if gap != params.gap {
            params.gap = gap;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the dot/dash weighting; 50 is neutral.
    pub fn set_weighting(&self, weighting: u32) -> Result<(), Error> {
        if !(WEIGHTING_MIN..=WEIGHTING_MAX).contains(&weighting) {
            return Err(Error::InvalidArgument("weighting out of range"));
        }
        let mut params = self.inner.params.lock().unwrap();
        if weighting != params.weighting {
            params.weighting = weighting;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Change the slope shape and/or length \[µs\]. `None` keeps the
    /// current value. Requesting a rectangular shape forces the length to
    /// zero; requesting a rectangular shape together with a non-zero
    /// length is an error.
    pub fn set_tone_slope(&self, shape: Option<SlopeShape>, len: Option<u32>) -> Result<(), Error> {
        self.inner
            .params
            .lock()
            .unwrap()
            .set_tone_slope(shape, len, self.inner.sample_rate)
    }

    /// Keep writing a forever silent tone after a straight-key space on
    /// this sink. See the type-level docs of [`Generator`].
    pub fn set_hold_silence_after_space(&self, hold: bool) {
        self.inner
            .hold_silence_after_space
            .store(hold, Ordering::SeqCst);
    }

    /// Current sending speed \[WPM\].
    pub fn speed(&self) -> u32 {
        self.inner.params.lock().unwrap().speed
    }

    /// Current tone frequency \[Hz\].
    pub fn frequency(&self) -> u32 {
        self.inner.params.lock().unwrap().frequency
    }

    /// Current volume \[%\].
    pub fn volume(&self) -> u32 {
        self.inner.params.lock().unwrap().volume_percent
    }

    /// Current Farnsworth gap \[dots\].
    pub fn gap(&self) -> u32 {
        self.inner.params.lock().unwrap().gap
    }

    /// Current weighting.
    pub fn weighting(&self) -> u32 {
        self.inner.params.lock().unwrap().weighting
    }

    /// Current slope shape and length \[µs\].
    pub fn tone_slope(&self) -> (SlopeShape, u32) {
        let params = self.inner.params.lock().unwrap();
        (params.slope_shape, params.slope_len)
    }

    // --- queue convenience --------------------------------------------

    /// Number of tones waiting to be played.
    pub fn queue_length(&self) -> usize {
        self.inner.queue.length()
    }

    /// Whether the tone queue is full.
    pub fn queue_is_full(&self) -> bool {
        self.inner.queue.is_full()
    }

    /// Drop all queued tones.
    pub fn flush_queue(&self) {
        self.inner.queue.flush();
    }

    /// Block until one tone has been dequeued.
    pub fn wait_for_tone(&self) {
        self.inner.queue.wait_for_tone();
    }

    /// Block until the queue holds at most `level` tones.
    pub fn wait_for_queue_level(&self, level: usize) {
        self.inner.queue.wait_for_level(level);
    }

    /// Register the queue's low-water callback. See
    /// [`ToneQueue::register_low_water_callback`].
    pub fn register_low_water_callback<F>(&self, callback: F, level: usize) -> Result<(), Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.queue.register_low_water_callback(callback, level)
    }

    // --- send path ----------------------------------------------------

    /// Enqueue one character, followed by an inter-character space.
    ///
    /// A space character enqueues an inter-word space; backspace (0x08)
    /// removes the most recent not-yet-played character from the queue.
    pub fn enqueue_character(&self, c: char) -> Result<(), Error> {
        if c == '\u{8}' {
            self.inner.queue.backspace();
            return Ok(());
        }
        if !data::character_is_valid(c) {
            return Err(Error::NotFound);
        }
        self.inner.enqueue_valid_character(c)
    }

    /// Enqueue one character without the trailing inter-character space
    /// (the last inter-mark space is still enqueued).
    pub fn enqueue_character_no_ics(&self, c: char) -> Result<(), Error> {
        if !data::character_is_valid(c) {
            return Err(Error::NotFound);
        }
        self.inner.enqueue_valid_character_partial(c)
    }

    /// Enqueue every character of `s`. Fails without touching the queue
    /// when `s` contains an unsupported character.
    pub fn enqueue_string(&self, s: &str) -> Result<(), Error> {
        if !data::string_is_valid(s) {
            return Err(Error::NotFound);
        }
        for c in s.chars() {
            self.inner.enqueue_valid_character(c)?;
        }
        Ok(())
    }

    /// Enqueue a raw representation (a string of `.` and `-`), followed
    /// by an inter-character space. The representation does not need to
    /// map to a character.
    pub fn enqueue_representation(&self, representation: &str) -> Result<(), Error> {
        self.enqueue_representation_no_ics(representation)?;
        let mut params = self.inner.params.lock().unwrap();
        self.inner.enqueue_eoc_space(&mut params)
    }

    /// Enqueue a raw representation without the trailing inter-character
    /// space.
    pub fn enqueue_representation_no_ics(&self, representation: &str) -> Result<(), Error> {
        if !data::representation_is_valid(representation) {
            return Err(Error::InvalidArgument("malformed representation"));
        }
        let mut params = self.inner.params.lock().unwrap();
        self.inner
            .enqueue_representation_marks(&mut params, representation)
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::warn!("generator dropped without stop(), stopping now");
            self.stop();
        }
        self.inner.sink.lock().unwrap().close();
    }
}

impl GenInner {
    fn enqueue_valid_character(&self, c: char) -> Result<(), Error> {
        self.enqueue_valid_character_partial(c)?;
        if c == ' ' {
            // The word space already carries all the silence it needs.
            return Ok(());
        }
        let mut params = self.params.lock().unwrap();
        self.enqueue_eoc_space(&mut params)
    }

    fn enqueue_valid_character_partial(&self, c: char) -> Result<(), Error> {
        let mut params = self.params.lock().unwrap();
        if c == ' ' {
            return self.enqueue_eow_space(&mut params);
        }
        let representation = data::character_to_representation(c).ok_or(Error::NotFound)?;
        self.enqueue_representation_marks(&mut params, representation)
    }

    /// Enqueue the marks of a representation, each followed by an
    /// inter-mark space; the first mark carries the `is_first` flag for
    /// backspace. The exact tone count is not predicted; refusing above
    /// the high-water mark keeps the queue comfortably clear of full.
    fn enqueue_representation_marks(
        &self,
        params: &mut Params,
        representation: &str,
    ) -> Result<(), Error> {
        if self.queue.length() >= TONE_QUEUE_HIGH_WATER_MARK {
            return Err(Error::WouldBlock("tone queue is above high water mark"));
        }
        for (i, mark) in representation.chars().enumerate() {
            self.enqueue_mark(params, mark, i == 0)?;
        }
        Ok(())
    }

    /// One dot or dash with standard slopes, then its inter-mark space.
    fn enqueue_mark(&self, params: &mut Params, mark: char, is_first: bool) -> Result<(), Error> {
        params.sync();
        let duration = match mark {
            data::DOT => params.timings.dot,
            data::DASH => params.timings.dash,
            _ => return Err(Error::InvalidArgument("mark is neither dot nor dash")),
        };

        let mut tone = Tone::new(params.frequency, duration, SlopeMode::Standard);
        tone.is_first = is_first;
        self.queue.enqueue(tone)?;

        self.queue.enqueue(Tone::silence(params.timings.eom))
    }

    /// The 2 units of silence that, together with the preceding
    /// inter-mark space, make a full inter-character space; the
    /// Farnsworth gap rides on top.
    fn enqueue_eoc_space(&self, params: &mut Params) -> Result<(), Error> {
        params.sync();
        self.queue.enqueue(Tone::silence(
            params.timings.eoc + params.timings.additional,
        ))
    }

    /// The remainder of an inter-word space, split into two tones plus
    /// the Farnsworth adjustment.
    ///
    /// The split is mandatory. A client that registered a low-water
    /// callback at level 1 must observe a 2 → 1 length transition even
    /// when a lone space is enqueued; a single tone would make the only
    /// possible transition 1 → 0 and the callback would never fire.
    fn enqueue_eow_space(&self, params: &mut Params) -> Result<(), Error> {
        params.sync();
        let half = params.timings.eow / 2;
        self.queue.enqueue(Tone::silence(half))?;
        self.queue.enqueue(Tone::silence(params.timings.eow - half))?;
        self.queue.enqueue(Tone::silence(params.timings.adjustment))
    }

    /// Straight key closed: a rising slope into a forever tone that keeps
    /// sounding until the key opens.
    pub(crate) fn enqueue_begin_mark(&self) -> Result<(), Error> {
        let mut params = self.params.lock().unwrap();
        params.sync();

        let rising = Tone::new(params.frequency, params.slope_len, SlopeMode::RisingOnly);
        if let Err(e) = self.queue.enqueue(rising) {
            // Transient; the forever tone below is the one that matters.
            tracing::debug!("enqueueing rising slope failed: {e}");
        }

        let mut plateau = Tone::new(params.frequency, params.quantum_len, SlopeMode::NoSlopes);
        plateau.is_forever = true;
        self.queue.enqueue(plateau)
    }

    /// Straight key opened: fall to silence. On sample sinks a forever
    /// silent tone may follow so the sink keeps receiving writes.
    pub(crate) fn enqueue_begin_space(&self) -> Result<(), Error> {
        let mut params = self.params.lock().unwrap();
        params.sync();

        if self.sink_kind == SinkKind::Tones {
            // A beeper or the null sink just needs to go quiet.
            return self.queue.enqueue(Tone::silence(params.quantum_len));
        }

        let falling = Tone::new(params.frequency, params.slope_len, SlopeMode::FallingOnly);
        self.queue.enqueue(falling)?;

        if self.hold_silence_after_space.load(Ordering::SeqCst) {
            let mut hold = Tone::silence(params.quantum_len);
            hold.is_forever = true;
            self.queue.enqueue(hold)?;
        }
        Ok(())
    }

    /// One keyer symbol, with no trailing inter-mark space; the keyer
    /// decides about spaces itself, one state transition at a time.
    pub(crate) fn enqueue_symbol(&self, symbol: KeySymbol) -> Result<(), Error> {
        let mut params = self.params.lock().unwrap();
        params.sync();
        let tone = match symbol {
            KeySymbol::Dot => Tone::new(params.frequency, params.timings.dot, SlopeMode::Standard),
            KeySymbol::Dash => {
                Tone::new(params.frequency, params.timings.dash, SlopeMode::Standard)
            }
            KeySymbol::Space => Tone::silence(params.timings.eom),
        };
        self.queue.enqueue(tone)
    }

    pub(crate) fn sync_parameters(&self) {
        self.params.lock().unwrap().sync();
    }
}

// --- synthesis thread -----------------------------------------------

/// Amplitude of the sample the tone's iterator points at: slope table
/// forwards on the rising edge, constant volume on the plateau, slope
/// table backwards on the falling edge. Silence is amplitude zero
/// regardless of envelope.
fn amplitude(params: &Params, tone: &Tone) -> i32 {
    if tone.frequency == 0 {
        return 0;
    }

    // The tone's slope sample counts were derived from the slope length
    // as it was at dequeue time; a concurrent parameter change may have
    // resized the table since. Out-of-table samples play at full volume.
    let table = &params.slope_amplitudes;
    let i = tone.sample_iterator;
    if i < tone.rising_slope_n_samples {
        table.get(i as usize).map_or(params.volume_abs, |a| *a as i32)
    } else if i < tone.n_samples.saturating_sub(tone.falling_slope_n_samples) {
        params.volume_abs
    } else {
        let j = tone.n_samples - i - 1;
        table.get(j as usize).map_or(params.volume_abs, |a| *a as i32)
    }
}

/// Render state owned by the synthesis thread.
struct Renderer {
    buffer: Vec<i16>,
    /// Index of the next buffer cell to fill.
    sub_start: usize,
    /// Phase of the first sample of the next fragment, kept reduced to
    /// [0, 2π) so precision cannot drift into audible clicks.
    phase_offset: f64,
    sample_rate: SampleRate,
}

impl Renderer {
    /// Fill buffer cells with the tone's samples, pushing the buffer to
    /// the sink every time it fills up. Returns `false` on a fatal sink
    /// error.
    fn render(&mut self, inner: &GenInner, tone: &mut Tone) -> bool {
        let mut samples_to_write = tone.n_samples;

        while samples_to_write > 0 {
            let free = (self.buffer.len() - self.sub_start) as u64;
            let n = free.min(samples_to_write);

            {
                let params = inner.params.lock().unwrap();
                let mut t = 0u64;
                for cell in &mut self.buffer[self.sub_start..self.sub_start + n as usize] {
                    let phase = std::f64::consts::TAU * tone.frequency as f64 * t as f64
                        / self.sample_rate as f64
                        + self.phase_offset;
                    let value = amplitude(&params, tone) as f64 * phase.sin();
                    *cell = value.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                    tone.sample_iterator += 1;
                    t += 1;
                }
                let phase = std::f64::consts::TAU * tone.frequency as f64 * t as f64
                    / self.sample_rate as f64
                    + self.phase_offset;
                self.phase_offset = phase.rem_euclid(std::f64::consts::TAU);
            }

            self.sub_start += n as usize;
            samples_to_write -= n;

            if self.sub_start == self.buffer.len() {
                match inner.sink.lock().unwrap().write_samples(&self.buffer) {
                    Ok(()) => {}
                    Err(SinkError::Underrun) => {
                        tracing::warn!("audio sink underrun, continuing");
                    }
                    Err(e) => {
                        tracing::error!("audio sink write failed: {e}");
                        return false;
                    }
                }
                self.sub_start = 0;
            }
        }
        true
    }
}

/// Thread body: dequeue tones, render them, clock the keyer.
fn synthesis_loop(inner: &GenInner) {
    let mut renderer = Renderer {
        buffer: vec![0; inner.buffer_n_samples],
        sub_start: 0,
        phase_offset: 0.0,
        sample_rate: inner.sample_rate,
    };
    let mut dequeued_prev = false;

    while inner.run.load(Ordering::SeqCst) {
        let dequeued = inner.queue.dequeue();
        let dequeued_now = dequeued.is_some();

        let mut tone = match dequeued {
            Some(tone) => tone,
            None if !dequeued_prev => {
                // The queue has been drained for a while; suspend until
                // an enqueue (or stop) kicks the dequeue condition.
                inner
                    .queue
                    .wait_for_enqueue(|| !inner.run.load(Ordering::SeqCst));
                continue;
            }
            None => {
                // Queue just went empty: pad the partially filled buffer
                // with silence so it can be pushed out.
                Tone::padding((inner.buffer_n_samples - renderer.sub_start) as u64)
            }
        };

        if let Some(key) = inner.key.lock().unwrap().upgrade() {
            let value = if dequeued_now && tone.frequency > 0 {
                KeyValue::Closed
            } else {
                KeyValue::Open
            };
            key.set_value_tracked(value);
            key.increment_timer(tone.duration);
        }

        let ok = match inner.sink_kind {
            SinkKind::Tones => {
                if dequeued_now {
                    match inner.sink.lock().unwrap().write_tone(&tone) {
                        Ok(()) => true,
                        Err(SinkError::Underrun) => {
                            tracing::warn!("audio sink underrun, continuing");
                            true
                        }
                        Err(e) => {
                            tracing::error!("audio sink write failed: {e}");
                            false
                        }
                    }
                } else {
                    true // nothing to pad on a tone sink
                }
            }
            SinkKind::Samples => {
                if dequeued_now {
                    let (slope_len, quantum_len) = {
                        let params = inner.params.lock().unwrap();
                        (params.slope_len, params.quantum_len)
                    };
                    if tone.is_forever {
                        // A forever tone is played one quantum per
                        // redelivery, however long it claims to be.
                        tone.duration = quantum_len;
                    }
                    tone.calculate_samples(inner.sample_rate, slope_len);
                }
                renderer.render(inner, &mut tone)
            }
        };
        dequeued_prev = dequeued_now;

        if let Some(key) = inner.key.lock().unwrap().upgrade() {
            if !key.update_keyer_graph() {
                // The hook was busy; give it one more chance, as a paddle
                // event may have been updating the graph concurrently.
                thread::sleep(std::time::Duration::from_millis(1));
                key.update_keyer_graph();
            }
        }

        // Wake poll-driven clients (wait_for_tone, the keyer waits) only
        // after the keyer graph has settled, so a waiter that wakes on
        // this tone observes the state the tone produced.
        inner.queue.notify_tone_played();

        if !ok {
            tracing::error!("synthesis loop exiting on sink failure");
            break;
        }
    }

    // Let blocked waiters observe the shutdown.
    inner.queue.notify_tone_played();
}
