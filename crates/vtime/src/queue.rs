//! Time-ordered queue of pending wake-ups.
//!
//! Entries come out in ascending wake time. Entries that share a wake time
//! come out in submission order.

use crate::time::VirtualTime;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One outstanding sleep request.
#[derive(Debug)]
pub struct PendingWake<W> {
    /// Absolute virtual time at which the sleeper should resume.
    pub when: VirtualTime,
    /// Submission sequence number, used to break ties.
    pub seq: u64,
    /// Completion handle to signal on release.
    pub handle: W,
}

impl<W> PendingWake<W> {
    const fn key(&self) -> (VirtualTime, u64) {
        (self.when, self.seq)
    }
}

impl<W> PartialEq for PendingWake<W> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<W> Eq for PendingWake<W> {}

impl<W> PartialOrd for PendingWake<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for PendingWake<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap yields the earliest entry.
        other.key().cmp(&self.key())
    }
}

/// Ordered multiset of pending wake-ups.
#[derive(Debug)]
pub struct TimerQueue<W> {
    heap: BinaryHeap<PendingWake<W>>,
    next_seq: u64,
}

impl<W> Default for TimerQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> TimerQueue<W> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Inserts a wake-up and returns its submission sequence number.
    pub fn push(&mut self, when: VirtualTime, handle: W) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PendingWake { when, seq, handle });
        seq
    }

    /// Removes and returns the earliest wake-up.
    pub fn pop(&mut self) -> Option<PendingWake<W>> {
        self.heap.pop()
    }

    /// Returns the `(when, seq)` key of the earliest wake-up without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<(VirtualTime, u64)> {
        self.heap.peek().map(PendingWake::key)
    }

    /// Number of pending wake-ups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes every entry in release order.
    pub fn drain(&mut self) -> Vec<PendingWake<W>> {
        let mut entries = std::mem::take(&mut self.heap).into_sorted_vec();
        // `into_sorted_vec` is ascending by `Ord`, which is reversed here.
        entries.reverse();
        entries
    }
}
