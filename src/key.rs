//! Keys: the straight key, the iambic keyer and the tone-queue key.
//!
//! A key turns physical or simulated events into sound (through a
//! registered generator) and into timestamps (through a registered
//! receiver). The iambic keyer is a nine-state machine clocked by the
//! generator: every time a tone the keyer enqueued finishes playing, the
//! generator calls the keyer's graph-update hook, which ends the current
//! element or picks the next one from the paddle latches.
//!
//! ```text
//!          +-----------> IN_DOT_[A|B] ---------> AFTER_DOT_[A|B]
//!          |                                        |
//!  IDLE ---+              +-------------------------+
//!          |              v
//!          +-----------> IN_DASH_[A|B] --------> AFTER_DASH_[A|B]
//!                         ^                         |
//!                         +-------------------------+
//! ```
//!
//! The `_B` states carry the Curtis mode-B latch: with both paddles
//! squeezed, releasing them still emits one opposite element.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::common::{now, Timestamp};
use crate::generator::{GenInner, Generator, KeySymbol};
use crate::receiver::{RecInner, Receiver};
use crate::Error;

/// Electrical value of a key: open circuit (silence) or closed circuit
/// (tone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValue {
    /// Key contact open, no tone.
    Open,
    /// Key contact closed, tone sounding.
    Closed,
}

/// Callback fired on every change of key value.
pub type KeyingCallback = Box<dyn FnMut(Timestamp, KeyValue) + Send>;

/// Graph state of the iambic keyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphState {
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

impl GraphState {
    fn is_in_mark(self) -> bool {
        matches!(
            self,
            GraphState::InDotA | GraphState::InDotB | GraphState::InDashA | GraphState::InDashB
        )
    }

    fn is_after_mark(self) -> bool {
        matches!(
            self,
            GraphState::AfterDotA
                | GraphState::AfterDotB
                | GraphState::AfterDashA
                | GraphState::AfterDashB
        )
    }
}

struct KeyState {
    /// Straight-key value.
    sk_value: KeyValue,
    /// Iambic-keyer value.
    ik_value: KeyValue,
    /// Tone-queue key value, tracked by the synthesis loop as tones play.
    tk_value: KeyValue,
    /// Timestamp of the last state change. Advanced by the generator as
    /// tones complete, so keyer-driven events carry audio-accurate times.
    timer: Timestamp,

    graph_state: GraphState,
    dot_paddle: bool,
    dash_paddle: bool,
    dot_latch: bool,
    dash_latch: bool,
    curtis_mode_b: bool,
    curtis_b_latch: bool,
}

/// The action a graph transition decided on, applied after the state
/// lock is released.
struct ValueChange {
    value: KeyValue,
    symbol: KeySymbol,
}

pub(crate) struct KeyInner {
    state: Mutex<KeyState>,
    /// Re-entrancy guard of the graph-update hook: it is invoked from the
    /// synthesis thread and from paddle events on the client thread.
    ik_lock: AtomicBool,
    gen: Mutex<Weak<GenInner>>,
    rec: Mutex<Weak<RecInner>>,
    callback: Mutex<Option<KeyingCallback>>,
}

/// A Morse key, usable as a straight key or as an iambic keyer.
///
/// Generator and receiver are optional, non-owning registrations: a key
/// with no generator makes no sound, a key with no receiver produces no
/// decoded text, and a key outliving either keeps working.
pub struct Key {
    inner: Arc<KeyInner>,
}

impl Default for Key {
    fn default() -> Self {
        Self::new()
    }
}

impl Key {
    /// A new key: open, idle, Curtis mode A.
    pub fn new() -> Self {
        Key {
            inner: Arc::new(KeyInner {
                state: Mutex::new(KeyState {
                    sk_value: KeyValue::Open,
                    ik_value: KeyValue::Open,
                    tk_value: KeyValue::Open,
                    timer: 0,
                    graph_state: GraphState::Idle,
                    dot_paddle: false,
                    dash_paddle: false,
                    dot_latch: false,
                    dash_latch: false,
                    curtis_mode_b: false,
                    curtis_b_latch: false,
                }),
                ik_lock: AtomicBool::new(false),
                gen: Mutex::new(Weak::new()),
                rec: Mutex::new(Weak::new()),
                callback: Mutex::new(None),
            }),
        }
    }

    /// Attach a generator: key events will make sound, and the generator
    /// will clock the iambic keyer.
    pub fn register_generator(&self, generator: &Generator) {
        *self.inner.gen.lock().unwrap() = Arc::downgrade(generator.inner_handle());
        *generator.inner_handle().key.lock().unwrap() = Arc::downgrade(&self.inner);
    }

    /// Attach a receiver: key events will be reported as mark begin/end
    /// with their timestamps.
    pub fn register_receiver(&self, receiver: &Receiver) {
        *self.inner.rec.lock().unwrap() = Arc::downgrade(receiver.inner_handle());
    }

    /// Register a callback fired synchronously on every change of key
    /// value, with the timestamp of the change. The callback must not
    /// block and must not take tone-queue locks.
    pub fn register_keying_callback<F>(&self, callback: F)
    where
        F: FnMut(Timestamp, KeyValue) + Send + 'static,
    {
        *self.inner.callback.lock().unwrap() = Some(Box::new(callback));
    }

    // --- straight key -------------------------------------------------

    /// Report a straight-key state change. No-op transitions (the same
    /// value twice) are ignored.
    pub fn sk_notify_event(&self, value: KeyValue) -> Result<(), Error> {
        self.inner.sk_set_value(value)
    }

    /// Current straight-key value.
    pub fn sk_value(&self) -> KeyValue {
        self.inner.state.lock().unwrap().sk_value
    }

    // --- iambic keyer -------------------------------------------------

    /// In Curtis mode B, squeezing both paddles and releasing them emits
    /// one extra opposite element. The default is mode A.
    pub fn ik_enable_curtis_mode_b(&self) {
        self.inner.state.lock().unwrap().curtis_mode_b = true;
    }

    /// Return to Curtis mode A.
    pub fn ik_disable_curtis_mode_b(&self) {
        self.inner.state.lock().unwrap().curtis_mode_b = false;
    }

    /// Whether Curtis mode B is enabled.
    pub fn ik_curtis_mode_b(&self) -> bool {
        self.inner.state.lock().unwrap().curtis_mode_b
    }

    /// Report the state of both paddles; `true` is pressed (closed).
    ///
    /// Latches are set on any open→closed transition, so a paddle tapped
    /// and released during an element still gets its element sent. If the
    /// keyer is idle, this kicks the state machine into motion.
    pub fn ik_notify_paddle_event(&self, dot: bool, dash: bool) -> Result<(), Error> {
        self.inner.notify_paddle_event(dot, dash)
    }

    /// Report a dot-paddle change; the dash paddle keeps its state.
    pub fn ik_notify_dot_paddle_event(&self, dot: bool) -> Result<(), Error> {
        let dash = self.inner.state.lock().unwrap().dash_paddle;
        self.inner.notify_paddle_event(dot, dash)
    }

    /// Report a dash-paddle change; the dot paddle keeps its state.
    pub fn ik_notify_dash_paddle_event(&self, dash: bool) -> Result<(), Error> {
        let dot = self.inner.state.lock().unwrap().dot_paddle;
        self.inner.notify_paddle_event(dot, dash)
    }

    /// Current paddle states, `(dot, dash)`.
    pub fn ik_paddles(&self) -> (bool, bool) {
        let state = self.inner.state.lock().unwrap();
        (state.dot_paddle, state.dash_paddle)
    }

    /// Current paddle latches, `(dot, dash)`.
    pub fn ik_paddle_latches(&self) -> (bool, bool) {
        let state = self.inner.state.lock().unwrap();
        (state.dot_latch, state.dash_latch)
    }

    /// Whether the keyer is currently sending.
    pub fn ik_is_busy(&self) -> bool {
        self.inner.state.lock().unwrap().graph_state != GraphState::Idle
    }

    /// Block until the end of the element (dot or dash) being sent.
    /// Requires a registered, started generator.
    pub fn ik_wait_for_element(&self) -> Result<(), Error> {
        let gen = self
            .inner
            .gen
            .lock()
            .unwrap()
            .upgrade()
            .ok_or(Error::InvalidState("no generator registered"))?;

        // First catch the keyer between marks (or already idle)...
        loop {
            let graph = self.inner.state.lock().unwrap().graph_state;
            if graph == GraphState::Idle || graph.is_after_mark() {
                break;
            }
            gen.queue
                .wait_for_tone_timeout(std::time::Duration::from_millis(10));
        }
        // ...then wait for it to enter the next mark or go idle, which is
        // the end of the element we started in.
        loop {
            let graph = self.inner.state.lock().unwrap().graph_state;
            if graph == GraphState::Idle || graph.is_in_mark() {
                break;
            }
            gen.queue
                .wait_for_tone_timeout(std::time::Duration::from_millis(10));
        }
        Ok(())
    }

    /// Block until the keyer goes idle. Fails with
    /// [`Error::InvalidState`] while a paddle is held closed, because the
    /// keyer would never finish.
    pub fn ik_wait_for_keyer(&self) -> Result<(), Error> {
        let gen = self
            .inner
            .gen
            .lock()
            .unwrap()
            .upgrade()
            .ok_or(Error::InvalidState("no generator registered"))?;

        {
            let state = self.inner.state.lock().unwrap();
            if state.dot_paddle || state.dash_paddle {
                return Err(Error::InvalidState("a paddle is still closed"));
            }
        }
        loop {
            if self.inner.state.lock().unwrap().graph_state == GraphState::Idle {
                return Ok(());
            }
            gen.queue
                .wait_for_tone_timeout(std::time::Duration::from_millis(10));
        }
    }

    /// Current tone-queue key value: closed while a frequency tone is
    /// playing, open during silence.
    pub fn tk_value(&self) -> KeyValue {
        self.inner.state.lock().unwrap().tk_value
    }
}

impl KeyInner {
    fn fire_callback(&self, timestamp: Timestamp, value: KeyValue) {
        if let Some(callback) = self.callback.lock().unwrap().as_mut() {
            callback(timestamp, value);
        }
    }

    fn notify_receiver(&self, timestamp: Timestamp, value: KeyValue) {
        if let Some(rec) = self.rec.lock().unwrap().upgrade() {
            let result = match value {
                KeyValue::Closed => rec.mark_begin_at(Some(timestamp)),
                KeyValue::Open => rec.mark_end_at(Some(timestamp)),
            };
            if let Err(e) = result {
                tracing::debug!("receiver did not accept key event: {e}");
            }
        }
    }

    /// Straight-key state change: record the time, fire the callback,
    /// inform the receiver, drive the generator. A missing generator
    /// means "no audio", not an error.
    fn sk_set_value(&self, value: KeyValue) -> Result<(), Error> {
        let timestamp = now();
        {
            let mut state = self.state.lock().unwrap();
            if state.sk_value == value {
                return Ok(());
            }
            tracing::debug!(?value, "straight key");
            state.sk_value = value;
            state.timer = timestamp;
        }

        self.fire_callback(timestamp, value);
        self.notify_receiver(timestamp, value);

        if let Some(gen) = self.gen.lock().unwrap().upgrade() {
            match value {
                KeyValue::Closed => gen.enqueue_begin_mark()?,
                KeyValue::Open => gen.enqueue_begin_space()?,
            }
        }
        Ok(())
    }

    /// Apply a keyer-decided value change: callback, receiver, and the
    /// symbol tone whose completion will clock the next transition.
    fn ik_apply(&self, change: ValueChange) {
        let timestamp = self.state.lock().unwrap().timer;
        self.fire_callback(timestamp, change.value);
        self.notify_receiver(timestamp, change.value);

        if let Some(gen) = self.gen.lock().unwrap().upgrade() {
            if let Err(e) = gen.enqueue_symbol(change.symbol) {
                tracing::warn!("keyer could not enqueue symbol: {e}");
            }
        }
    }

    fn notify_paddle_event(&self, dot: bool, dash: bool) -> Result<(), Error> {
        let kick = {
            let mut state = self.state.lock().unwrap();
            state.dot_paddle = dot;
            state.dash_paddle = dash;

            // Latch any closure, so a paddle tapped during an element is
            // still honored when the element ends.
            if dot {
                state.dot_latch = true;
            }
            if dash {
                state.dash_latch = true;
            }
            if state.curtis_mode_b && dot && dash {
                state.curtis_b_latch = true;
            }
            tracing::debug!(
                dot,
                dash,
                dot_latch = state.dot_latch,
                dash_latch = state.dash_latch,
                curtis_b_latch = state.curtis_b_latch,
                "paddle event"
            );

            if state.graph_state == GraphState::Idle && (dot || dash) {
                state.timer = now();
                // Pretend to be in the opposite after-state, so the
                // update hook makes the correct first transition.
                state.graph_state = match (dot, state.curtis_b_latch) {
                    (true, true) => GraphState::AfterDashB,
                    (true, false) => GraphState::AfterDashA,
                    (false, true) => GraphState::AfterDotB,
                    (false, false) => GraphState::AfterDotA,
                };
                true
            } else {
                false
            }
        };

        if kick && !self.update_keyer_graph() {
            // The hook was held by the synthesis thread; try once more.
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.update_keyer_graph();
        }
        Ok(())
    }

    /// The keyer's clock tick: called by the generator after each
    /// enqueued symbol finishes, and once to kick an idle keyer.
    ///
    /// Returns `false` when the hook was already running on another
    /// thread and nothing was done.
    pub(crate) fn update_keyer_graph(&self) -> bool {
        if self
            .ik_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if let Some(gen) = self.gen.lock().unwrap().upgrade() {
            gen.sync_parameters();
        }
        if let Some(rec) = self.rec.lock().unwrap().upgrade() {
            rec.sync_parameters();
        }

        let change = {
            let mut state = self.state.lock().unwrap();
            let old_state = state.graph_state;
            let change = Self::transition(&mut state);
            if state.graph_state != old_state {
                tracing::debug!(from = ?old_state, to = ?state.graph_state, "keyer graph");
            }
            change
        };

        if let Some(change) = change {
            self.ik_apply(change);
        }

        self.ik_lock.store(false, Ordering::SeqCst);
        true
    }

    /// One step of the graph. Mutates the graph state and the latches,
    /// and reports the value change to apply, if any.
    fn transition(state: &mut KeyState) -> Option<ValueChange> {
        use GraphState::*;

        match state.graph_state {
            Idle => None,

            InDotA | InDotB => {
                // End of dot: open the key for the after-dot space.
                state.ik_value = KeyValue::Open;
                state.graph_state = if state.graph_state == InDotA {
                    AfterDotA
                } else {
                    AfterDotB
                };
                Some(ValueChange {
                    value: KeyValue::Open,
                    symbol: KeySymbol::Space,
                })
            }

            InDashA | InDashB => {
                state.ik_value = KeyValue::Open;
                state.graph_state = if state.graph_state == InDashA {
                    AfterDashA
                } else {
                    AfterDashB
                };
                Some(ValueChange {
                    value: KeyValue::Open,
                    symbol: KeySymbol::Space,
                })
            }

            AfterDotA | AfterDotB => {
                if !state.dot_paddle {
                    state.dot_latch = false;
                }

                if state.graph_state == AfterDotB {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = InDashA;
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dash,
                    })
                } else if state.dash_latch {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = if state.curtis_b_latch {
                        state.curtis_b_latch = false;
                        InDashB
                    } else {
                        InDashA
                    };
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dash,
                    })
                } else if state.dot_latch {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = InDotA;
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dot,
                    })
                } else {
                    state.graph_state = Idle;
                    None
                }
            }

            AfterDashA | AfterDashB => {
                if !state.dash_paddle {
                    state.dash_latch = false;
                }

                if state.graph_state == AfterDashB {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = InDotA;
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dot,
                    })
                } else if state.dot_latch {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = if state.curtis_b_latch {
                        state.curtis_b_latch = false;
                        InDotB
                    } else {
                        InDotA
                    };
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dot,
                    })
                } else if state.dash_latch {
                    state.ik_value = KeyValue::Closed;
                    state.graph_state = InDashA;
                    Some(ValueChange {
                        value: KeyValue::Closed,
                        symbol: KeySymbol::Dash,
                    })
                } else {
                    state.graph_state = Idle;
                    None
                }
            }
        }
    }

    /// Tone-queue key: the synthesis loop reports closed for frequency
    /// tones, open for silence. Successive identical values (a redelivered
    /// forever tone) are filtered to a single edge.
    pub(crate) fn set_value_tracked(&self, value: KeyValue) {
        let timestamp = {
            let mut state = self.state.lock().unwrap();
            if state.tk_value == value {
                return;
            }
            state.tk_value = value;
            state.timer
        };
        self.fire_callback(timestamp, value);
    }

    /// Advance the keyer's virtual clock by a completed tone's length.
    pub(crate) fn increment_timer(&self, delta: u32) {
        self.state.lock().unwrap().timer += delta as Timestamp;
    }

    /// Force the keyer back to idle; used when the generator stops while
    /// a paddle is held closed.
    pub(crate) fn reset_keyer_graph(&self) {
        let mut state = self.state.lock().unwrap();
        state.graph_state = GraphState::Idle;
        state.ik_value = KeyValue::Open;
        state.dot_paddle = false;
        state.dash_paddle = false;
        state.dot_latch = false;
        state.dash_latch = false;
        state.curtis_b_latch = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_key_is_open_and_idle() {
        let key = Key::new();
        assert_eq!(key.sk_value(), KeyValue::Open);
        assert_eq!(key.tk_value(), KeyValue::Open);
        assert!(!key.ik_is_busy());
        assert!(!key.ik_curtis_mode_b());
    }

    #[test]
    fn straight_key_without_generator_still_tracks_value() {
        let key = Key::new();
        key.sk_notify_event(KeyValue::Closed).unwrap();
        assert_eq!(key.sk_value(), KeyValue::Closed);
        key.sk_notify_event(KeyValue::Open).unwrap();
        assert_eq!(key.sk_value(), KeyValue::Open);
    }

    #[test]
    fn straight_key_filters_duplicate_events() {
        let key = Key::new();
        let edges = Arc::new(Mutex::new(Vec::new()));
        let edges_in_callback = edges.clone();
        key.register_keying_callback(move |_, value| {
            edges_in_callback.lock().unwrap().push(value);
        });

        key.sk_notify_event(KeyValue::Closed).unwrap();
        key.sk_notify_event(KeyValue::Closed).unwrap();
        key.sk_notify_event(KeyValue::Open).unwrap();

        assert_eq!(
            *edges.lock().unwrap(),
            vec![KeyValue::Closed, KeyValue::Open]
        );
    }

    #[test]
    fn paddle_latches_follow_closures() {
        let key = Key::new();
        // No generator: the keyer cannot run its graph, but latches are
        // still recorded.
        key.ik_notify_paddle_event(true, false).unwrap();
        assert_eq!(key.ik_paddles(), (true, false));
        let (dot_latch, _) = key.ik_paddle_latches();
        assert!(dot_latch);
    }

    #[test]
    fn curtis_b_latch_needs_mode_b() {
        let key = Key::new();
        key.ik_notify_paddle_event(true, true).unwrap();
        assert!(!key.inner.state.lock().unwrap().curtis_b_latch);

        let key = Key::new();
        key.ik_enable_curtis_mode_b();
        key.ik_notify_paddle_event(true, true).unwrap();
        assert!(key.inner.state.lock().unwrap().curtis_b_latch);
    }

    #[test]
    fn reset_returns_keyer_to_idle() {
        let key = Key::new();
        key.ik_notify_paddle_event(true, false).unwrap();
        key.inner.reset_keyer_graph();
        assert!(!key.ik_is_busy());
        assert_eq!(key.ik_paddles(), (false, false));
        assert_eq!(key.ik_paddle_latches(), (false, false));
    }
}
