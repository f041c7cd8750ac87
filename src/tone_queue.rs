//! Bounded queue of tones between the client and the synthesis thread.
//!
//! The queue is a fixed-capacity circular buffer protected by one mutex
//! and two condition variables. "Dequeue may proceed" is signalled (there
//! is exactly one consumer, the synthesis thread); "length changed" is
//! broadcast (any number of clients may be blocked in
//! [`wait_for_level`](ToneQueue::wait_for_level) or
//! [`wait_for_tone`](ToneQueue::wait_for_tone)). The two are deliberately
//! separate and must not be merged.

use std::sync::{Condvar, Mutex};

use crate::constants::{FREQUENCY_MAX, FREQUENCY_MIN, TONE_QUEUE_CAPACITY};
use crate::tone::Tone;
use crate::Error;

/// Whether the queue has tones to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Busy,
}

/// Callback invoked when the queue length drops to the registered level.
pub type LowWaterCallback = Box<dyn FnMut() + Send>;

struct Inner {
    tones: Vec<Tone>,
    /// Index of the next tone to dequeue.
    head: usize,
    /// Index of the next free slot; incremented after a tone is written.
    tail: usize,
    len: usize,
    state: QueueState,
    /// Level at which the low-water callback fires, if one is registered.
    low_water_mark: Option<usize>,
}

impl Inner {
    fn next_index(&self, index: usize) -> usize {
        if index == self.tones.len() - 1 {
            0
        } else {
            index + 1
        }
    }

    fn prev_index(&self, index: usize) -> usize {
        if index == 0 {
            self.tones.len() - 1
        } else {
            index - 1
        }
    }
}

/// Bounded FIFO of [`Tone`]s with producer/consumer synchronization.
pub struct ToneQueue {
    inner: Mutex<Inner>,
    /// Signalled when an enqueue flips the queue from idle to busy, and by
    /// [`kick_dequeue`](ToneQueue::kick_dequeue) at shutdown.
    dequeue_cond: Condvar,
    /// Broadcast whenever the queue length changes or a tone finished
    /// playing.
    length_cond: Condvar,
    low_water_callback: Mutex<Option<LowWaterCallback>>,
}

impl Default for ToneQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneQueue {
    /// An empty queue with the standard capacity.
    pub fn new() -> Self {
        ToneQueue {
            inner: Mutex::new(Inner {
                tones: vec![Tone::silence(0); TONE_QUEUE_CAPACITY],
                head: 0,
                tail: 0,
                len: 0,
                state: QueueState::Idle,
                low_water_mark: None,
            }),
            dequeue_cond: Condvar::new(),
            length_cond: Condvar::new(),
            low_water_callback: Mutex::new(None),
        }
    }

    /// Add a tone at the tail of the queue.
    ///
    /// A tone with `duration == 0` is accepted and dropped: it would not
    /// be played anyway. Fails with [`Error::InvalidArgument`] for a
    /// frequency outside the supported range, and with
    /// [`Error::WouldBlock`] when the queue is full.
    pub fn enqueue(&self, tone: Tone) -> Result<(), Error> {
        #[allow(clippy::absurd_extreme_comparisons)]
        if tone.frequency < FREQUENCY_MIN || tone.frequency > FREQUENCY_MAX {
            return Err(Error::InvalidArgument("tone frequency out of range"));
        }
        if tone.duration == 0 {
            return Ok(());
        }

        let mut q = self.inner.lock().unwrap();
        if q.len == q.tones.len() {
            tracing::debug!("tone queue is full, rejecting tone");
            return Err(Error::WouldBlock("tone queue is full"));
        }

        let tail = q.tail;
        q.tones[tail] = tone;
        q.tail = q.next_index(tail);
        q.len += 1;
        self.length_cond.notify_all();

        if q.state == QueueState::Idle {
            q.state = QueueState::Busy;
            // One consumer, so signal rather than broadcast.
            self.dequeue_cond.notify_one();
        }
        Ok(())
    }

    /// Take the tone at the head of the queue.
    ///
    /// Returns `None` when the queue is idle. A forever tone that is the
    /// last tone in the queue is returned without being removed; it keeps
    /// coming back until a successor is enqueued behind it. If removing a
    /// tone makes the length cross the registered low-water mark, the
    /// callback runs after the queue's lock has been released.
    pub fn dequeue(&self) -> Option<Tone> {
        let (tone, call_callback) = {
            let mut q = self.inner.lock().unwrap();
            if q.state == QueueState::Idle {
                return None;
            }
            debug_assert!(q.len > 0, "busy queue with zero length");

            let (tone, call_callback) = self.dequeue_under_lock(&mut q);
            if q.len == 0 {
                q.state = QueueState::Idle;
                debug_assert_eq!(q.head, q.tail);
            }
            (tone, call_callback)
        };

        if call_callback {
            if let Some(callback) = self.low_water_callback.lock().unwrap().as_mut() {
                callback();
            }
        }
        Some(tone)
    }

    /// Remove the head tone, with the forever-tone exception, and decide
    /// whether the low-water callback is due.
    fn dequeue_under_lock(&self, q: &mut Inner) -> (Tone, bool) {
        let tone = q.tones[q.head];

        if tone.is_forever && q.len == 1 {
            // Keep redelivering the forever tone until client code
            // enqueues the next tone. Never fires the low-water callback:
            // it would fire on every redelivery.
            return (tone, false);
        }

        let len_before = q.len;
        q.head = q.next_index(q.head);
        q.len -= 1;
        self.length_cond.notify_all();

        let call_callback = match q.low_water_mark {
            Some(mark) => len_before > mark && q.len <= mark,
            None => false,
        };
        (tone, call_callback)
    }

    /// Number of tones currently queued.
    pub fn length(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    /// Maximum number of tones the queue will hold.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().tones.len()
    }

    /// Whether an enqueue would fail right now.
    pub fn is_full(&self) -> bool {
        let q = self.inner.lock().unwrap();
        q.len == q.tones.len()
    }

    /// Whether the queue has tones to play.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().unwrap().state == QueueState::Busy
    }

    /// Drop every queued tone and return the queue to idle.
    pub fn flush(&self) {
        let mut q = self.inner.lock().unwrap();
        q.head = 0;
        q.tail = 0;
        q.len = 0;
        q.state = QueueState::Idle;
        self.length_cond.notify_all();
    }

    /// Block the caller until the queue length is at or below `level`.
    ///
    /// The generator must be running, otherwise the length will never
    /// drop and this blocks forever.
    pub fn wait_for_level(&self, level: usize) {
        let mut q = self.inner.lock().unwrap();
        while q.len > level {
            q = self.length_cond.wait(q).unwrap();
        }
    }

    /// Block the caller until one tone has been dequeued (a single edge on
    /// the length-changed condition).
    pub fn wait_for_tone(&self) {
        let q = self.inner.lock().unwrap();
        let _q = self.length_cond.wait(q).unwrap();
    }

    /// Register `callback` to run whenever a dequeue makes the length drop
    /// from above `level` to at or below it. The callback runs on the
    /// synthesis thread with no queue lock held; it must not block.
    ///
    /// Fails with [`Error::InvalidArgument`] when `level` is not below the
    /// queue capacity.
    pub fn register_low_water_callback<F>(&self, callback: F, level: usize) -> Result<(), Error>
    where
        F: FnMut() + Send + 'static,
    {
        {
            let q = self.inner.lock().unwrap();
            if level >= q.tones.len() {
                return Err(Error::InvalidArgument("low water level >= queue capacity"));
            }
        }
        *self.low_water_callback.lock().unwrap() = Some(Box::new(callback));
        self.inner.lock().unwrap().low_water_mark = Some(level);
        Ok(())
    }

    /// Drop the most recently enqueued character, if none of its tones
    /// have been dequeued yet.
    ///
    /// Scans from the tail backwards for the nearest tone flagged as the
    /// first mark of a character and truncates the queue to just before
    /// it. Does nothing when no such tone is queued, which means the
    /// character already started playing.
    pub fn backspace(&self) {
        let mut q = self.inner.lock().unwrap();

        let mut len = q.len;
        let mut index = q.tail;
        let mut found = false;
        while len > 0 {
            len -= 1;
            index = q.prev_index(index);
            if q.tones[index].is_first {
                found = true;
                break;
            }
        }

        if found {
            q.len = len;
            q.tail = index;
        }
    }

    /// Wait until an enqueue makes the queue busy, or `cancelled` returns
    /// true after [`kick_dequeue`](ToneQueue::kick_dequeue) was called.
    /// Called only by the synthesis thread after it drains the queue.
    pub(crate) fn wait_for_enqueue<F>(&self, cancelled: F)
    where
        F: Fn() -> bool,
    {
        let mut q = self.inner.lock().unwrap();
        while q.state == QueueState::Idle && !cancelled() {
            q = self.dequeue_cond.wait(q).unwrap();
        }
    }

    /// One edge on the length-changed condition, or `timeout`, whichever
    /// comes first. The keyer's wait loops re-check their predicate on a
    /// bounded cadence, which closes the check-then-wait window against
    /// the final broadcast of a drained queue.
    pub(crate) fn wait_for_tone_timeout(&self, timeout: std::time::Duration) {
        let q = self.inner.lock().unwrap();
        let _ = self.length_cond.wait_timeout(q, timeout).unwrap();
    }

    /// Like [`wait_for_level`](ToneQueue::wait_for_level) but gives up
    /// after `timeout`; returns whether the level was reached. Used at
    /// shutdown, where the synthesis thread may already be gone.
    pub(crate) fn wait_for_level_timeout(
        &self,
        level: usize,
        timeout: std::time::Duration,
    ) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut q = self.inner.lock().unwrap();
        while q.len > level {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .length_cond
                .wait_timeout(q, deadline - now)
                .unwrap();
            q = guard;
        }
        true
    }

    /// Wake the synthesis thread out of
    /// [`wait_for_enqueue`](ToneQueue::wait_for_enqueue) at shutdown.
    pub(crate) fn kick_dequeue(&self) {
        let _q = self.inner.lock().unwrap();
        self.dequeue_cond.notify_one();
    }

    /// Wake everyone blocked on the length-changed condition. The
    /// synthesis thread calls this after a tone has been rendered, so
    /// that [`wait_for_tone`](ToneQueue::wait_for_tone) observes played
    /// tones and not only enqueues.
    pub(crate) fn notify_tone_played(&self) {
        let _q = self.inner.lock().unwrap();
        self.length_cond.notify_all();
    }
}
