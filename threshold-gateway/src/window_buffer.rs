//! Per-second event counts over a trailing window.
//!
//! The buffer is a fixed ring of `window_secs` slots, each counting the events
//! seen in one whole second, plus a running sum of all slots. A cursor marks the
//! slot for the most recent second. As time moves forward the cursor advances and
//! the slots it passes over are vacated, so that a reused slot only ever counts
//! the second it currently stands for. Memory use depends only on the window
//! length, never on the event volume.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Forward jumps longer than this are logged as suspicious, since every event
/// timestamped before the new cursor will then be dropped as stale.
const SUSPICIOUS_JUMP_SECS: i64 = 24 * 60 * 60;

/// Where an event landed in the window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// The event was counted in the slot with this index.
    Counted(usize),
    /// The event is older than the whole window and was dropped.
    Stale,
}

/// A ring of per-second counters with a running sum.
///
/// Invariant: `sum` always equals the total of all buckets.
#[derive(Clone, Debug)]
pub struct WindowBuffer {
    buckets: Box<[u64]>,
    sum: u64,
    /// Index of the slot for `current_second`
    current: usize,
    /// Unix second that the `current` slot stands for
    current_second: i64,
}

impl WindowBuffer {
    /// Create an empty buffer spanning `window_secs` seconds, with its cursor at `now`.
    ///
    /// # Panics
    /// Panics if `window_secs` is 0. Callers validate configuration first.
    pub fn new(window_secs: usize, now: DateTime<Utc>) -> Self {
        assert!(window_secs > 0, "WindowBuffer window must be > 0");
        Self {
            buckets: vec![0; window_secs].into_boxed_slice(),
            sum: 0,
            current: 0,
            current_second: now.timestamp(),
        }
    }

    /// Length of the window in seconds (also the number of slots).
    pub fn window_secs(&self) -> usize {
        self.buckets.len()
    }

    /// Number of events currently counted in the window.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// The raw slot counts, in ring order (not time order).
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Index of the slot for the most recent second.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The unix second the cursor currently stands for.
    pub fn current_second(&self) -> i64 {
        self.current_second
    }

    /// Find the slot for an event timestamp, moving the window forward if needed.
    ///
    /// Sub-second precision is discarded. An event up to `window_secs - 1` seconds
    /// behind the cursor maps to its historical slot without moving the cursor.
    /// Anything older is [`Placement::Stale`] and leaves the buffer untouched.
    /// An event ahead of the cursor rotates the window so its second becomes the
    /// current one.
    ///
    /// This does not count the event; see [`WindowBuffer::record`].
    pub fn place(&mut self, ts: DateTime<Utc>) -> Placement {
        let event_second = ts.timestamp();
        let distance = event_second.saturating_sub(self.current_second);
        let len = self.buckets.len() as i64;

        if distance <= -len {
            return Placement::Stale;
        }

        if distance > 0 {
            if distance > len && distance > SUSPICIOUS_JUMP_SECS {
                warn!(
                    from = self.current_second,
                    to = event_second,
                    "Window jumped {distance} seconds ahead, check the event source's timestamps"
                );
            }
            self.rotate(distance);
            self.current_second = event_second;
            return Placement::Counted(self.current);
        }

        Placement::Counted(self.offset(distance))
    }

    /// Place an event and count it. Returns false if the event was stale.
    pub fn record(&mut self, ts: DateTime<Utc>) -> bool {
        match self.place(ts) {
            Placement::Counted(idx) => {
                self.buckets[idx] += 1;
                self.sum += 1;
                true
            }
            Placement::Stale => false,
        }
    }

    /// Zero every slot and the running sum. The cursor is left where it is.
    pub fn reset(&mut self) {
        self.buckets.fill(0);
        self.sum = 0;
    }

    /// Index of the slot `distance` seconds away from the cursor, in either direction,
    /// wrapping around the ring.
    fn offset(&self, distance: i64) -> usize {
        let len = self.buckets.len() as i64;
        (self.current as i64 + distance % len).rem_euclid(len) as usize
    }

    /// Advance the cursor by `steps` seconds, vacating every slot it moves onto.
    ///
    /// The slots after the old cursor, up to and including the new one, now stand
    /// for seconds that have not been seen yet, so their old counts leave the sum.
    fn rotate(&mut self, steps: i64) {
        let len = self.buckets.len();
        if steps >= len as i64 {
            if self.sum > 0 {
                debug!(steps, window_secs = len, "Whole window went stale, resetting");
            }
            self.reset();
            self.current = self.offset(steps);
            return;
        }

        for _ in 0..steps {
            self.current = self.offset(1);
            self.sum -= self.buckets[self.current];
            self.buckets[self.current] = 0;
        }
    }
}
