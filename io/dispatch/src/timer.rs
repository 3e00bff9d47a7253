//! Monotonic timer heap.
//!
//! A min-heap of timer entries keyed by next deadline, with insertion order
//! breaking ties so timers scheduled for the same instant fire FIFO. The
//! dispatcher reschedules repeating timers at `deadline + interval` rather
//! than `now + interval`, so a late or slow iteration produces catch-up
//! firings instead of schedule drift.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// One scheduled timer.
pub(crate) struct TimerEntry<Cb> {
    /// Absolute deadline of the next firing.
    pub(crate) deadline: Instant,
    /// Repeat interval used when the callback asks to be rescheduled.
    pub(crate) interval: Duration,
    /// The callback; returns true to reschedule.
    pub(crate) cb: Cb,
    seq: u64,
}

impl<Cb> PartialEq for TimerEntry<Cb> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<Cb> Eq for TimerEntry<Cb> {}

impl<Cb> PartialOrd for TimerEntry<Cb> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Cb> Ord for TimerEntry<Cb> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so the earliest deadline, and
        // within a deadline the earliest insertion, sits on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of timer entries.
pub(crate) struct TimerHeap<Cb> {
    heap: BinaryHeap<TimerEntry<Cb>>,
    seq: u64,
}

impl<Cb> TimerHeap<Cb> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Schedule `cb` to fire at `deadline`, repeating every `interval` while
    /// the callback keeps returning true.
    pub(crate) fn schedule(&mut self, deadline: Instant, interval: Duration, cb: Cb) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            interval,
            cb,
            seq,
        });
    }

    /// Deadline of the earliest entry, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop the earliest entry if its deadline is at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerEntry<Cb>> {
        if self.heap.peek()?.deadline <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
