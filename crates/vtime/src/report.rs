//! Observable coordinator state: snapshots, counters and the release log.

use crate::time::VirtualTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time view of the coordinator's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current virtual time.
    pub now: VirtualTime,
    /// Live tasks, including the initial ones.
    pub active: usize,
    /// Live tasks parked on a sleep or another tracked blocking operation.
    pub blocked: usize,
    /// Sleeps accepted but not yet released.
    pub pending: usize,
}

impl Snapshot {
    /// Returns true if every live task is blocked.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        self.active > 0 && self.blocked == self.active
    }
}

/// Running totals kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Requests processed, of any kind.
    pub requests: u64,
    /// Sleep requests accepted.
    pub sleeps: u64,
    /// Sleepers released.
    pub releases: u64,
    /// `now` queries answered.
    pub now_queries: u64,
    /// Episodes where the system was quiescent with an empty timer queue.
    pub stalls: u64,
    /// Largest timer queue depth observed.
    pub max_pending: usize,
}

/// A single release from the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Submission sequence number of the released sleep.
    pub seq: u64,
    /// Clock value the release advanced to.
    pub at: VirtualTime,
    /// Live tasks at the instant of release.
    pub active: usize,
    /// Blocked tasks at the instant of release, before the sleeper was unblocked.
    pub blocked: usize,
}

/// Final state returned when the coordinator shuts down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Virtual time at shutdown.
    pub now: VirtualTime,
    /// Live tasks at shutdown.
    pub active: usize,
    /// Blocked tasks at shutdown.
    pub blocked: usize,
    /// Sleeps that were never released.
    pub pending: usize,
    /// Running totals.
    pub stats: Stats,
    /// Release log, empty unless recording was enabled.
    pub releases: Vec<Release>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "now={} active={} blocked={} pending={} requests={} sleeps={} releases={} stalls={}",
            self.now,
            self.active,
            self.blocked,
            self.pending,
            self.stats.requests,
            self.stats.sleeps,
            self.stats.releases,
            self.stats.stalls
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiescence_requires_a_live_task() {
        let idle = Snapshot {
            now: VirtualTime::ZERO,
            active: 0,
            blocked: 0,
            pending: 0,
        };
        assert!(!idle.is_quiescent());

        let parked = Snapshot {
            active: 2,
            blocked: 2,
            ..idle
        };
        assert!(parked.is_quiescent());
    }

    #[test]
    fn report_display() {
        let report = Report {
            now: VirtualTime::from_nanos(150),
            active: 1,
            stats: Stats {
                requests: 9,
                sleeps: 3,
                releases: 3,
                ..Stats::default()
            },
            ..Report::default()
        };
        insta::assert_snapshot!(
            report.to_string(),
            @"now=t+150ns active=1 blocked=0 pending=0 requests=9 sleeps=3 releases=3 stalls=0"
        );
    }
}
