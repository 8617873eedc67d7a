//! Coordinator bookkeeping as a synchronous state machine.
//!
//! [`Scheduler`] owns the clock, the liveness counters and the timer queue.
//! It knows nothing about channels: the coordinator loop feeds it one request
//! at a time and asks it to [`advance`](Scheduler::advance) only once the
//! request stream is drained.

use crate::config::CoordinatorConfig;
use crate::error::Violation;
use crate::queue::{PendingWake, TimerQueue};
use crate::report::{Release, Report, Snapshot, Stats};
use crate::time::VirtualTime;
use std::time::Duration;

/// Outcome of a quiescence check.
#[derive(Debug)]
pub enum Advance<W> {
    /// Some live task is not blocked; the clock must not move.
    Busy,
    /// No live tasks.
    Idle,
    /// Every live task is blocked but nothing is waiting on the clock.
    Stalled {
        /// True for the first check of a new stall episode.
        fresh: bool,
    },
    /// The earliest sleeper was released and the clock moved to its wake time.
    Released(PendingWake<W>),
}

/// Clock, counters and pending wake-ups of one coordinator.
#[derive(Debug)]
pub struct Scheduler<W> {
    now: VirtualTime,
    active: usize,
    blocked: usize,
    queue: TimerQueue<W>,
    stats: Stats,
    releases: Option<Vec<Release>>,
    stalled: bool,
}

impl<W> Scheduler<W> {
    /// Creates a scheduler in its initial state.
    #[must_use]
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            now: config.epoch,
            active: config.initial_tasks,
            blocked: 0,
            queue: TimerQueue::new(),
            stats: Stats::default(),
            releases: config.record_releases.then(Vec::new),
            stalled: false,
        }
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> VirtualTime {
        self.now
    }

    /// Current counters and queue depth.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            now: self.now,
            active: self.active,
            blocked: self.blocked,
            pending: self.queue.len(),
        }
    }

    /// Running totals.
    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Counts one processed request.
    pub fn count_request(&mut self) {
        self.stats.requests += 1;
    }

    /// Counts one answered `now` query. Counters are untouched.
    pub fn count_now_query(&mut self) {
        self.stats.now_queries += 1;
    }

    /// Accepts a sleep: enqueues its wake-up and marks the caller blocked.
    ///
    /// Returns the absolute wake time.
    pub fn accept_sleep(&mut self, duration: Duration, handle: W) -> VirtualTime {
        let when = self.now.saturating_add(duration);
        self.queue.push(when, handle);
        self.blocked += 1;
        self.stats.sleeps += 1;
        self.stats.max_pending = self.stats.max_pending.max(self.queue.len());
        when
    }

    /// Registers a new live task.
    pub fn task_started(&mut self) {
        self.active += 1;
    }

    /// Unregisters a live task.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::TaskEndedWithoutActive`] if no task is registered.
    pub fn task_ended(&mut self) -> Result<(), Violation> {
        self.active = self
            .active
            .checked_sub(1)
            .ok_or(Violation::TaskEndedWithoutActive)?;
        Ok(())
    }

    /// Marks a task as blocked on a non-timer operation.
    pub fn block_begin(&mut self) {
        self.blocked += 1;
    }

    /// Marks a task as unblocked from a non-timer operation.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::BlockEndWithoutBlocked`] if no task is blocked.
    pub fn block_end(&mut self) -> Result<(), Violation> {
        self.blocked = self
            .blocked
            .checked_sub(1)
            .ok_or(Violation::BlockEndWithoutBlocked)?;
        Ok(())
    }

    /// Runs the quiescence check, releasing at most one sleeper.
    ///
    /// Callers must only invoke this when no further requests are queued.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::ClockWentBackwards`] if the earliest wake lies
    /// before the current clock. The queue is left untouched in that case.
    pub fn advance(&mut self) -> Result<Advance<W>, Violation> {
        if self.active == 0 {
            self.stalled = false;
            return Ok(Advance::Idle);
        }
        if self.blocked < self.active {
            self.stalled = false;
            return Ok(Advance::Busy);
        }

        let Some((wake, _)) = self.queue.peek() else {
            let fresh = !self.stalled;
            if fresh {
                self.stalled = true;
                self.stats.stalls += 1;
            }
            return Ok(Advance::Stalled { fresh });
        };
        if wake < self.now {
            return Err(Violation::ClockWentBackwards {
                now: self.now,
                wake,
            });
        }

        let Some(entry) = self.queue.pop() else {
            return Ok(Advance::Stalled { fresh: false });
        };
        if let Some(log) = self.releases.as_mut() {
            log.push(Release {
                seq: entry.seq,
                at: entry.when,
                active: self.active,
                blocked: self.blocked,
            });
        }
        self.blocked -= 1;
        self.now = entry.when;
        self.stalled = false;
        self.stats.releases += 1;
        Ok(Advance::Released(entry))
    }

    /// Tears the scheduler down into a final report plus the sleepers that
    /// were never released, in release order.
    pub fn finish(mut self) -> (Report, Vec<PendingWake<W>>) {
        let pending = self.queue.drain();
        let report = Report {
            now: self.now,
            active: self.active,
            blocked: self.blocked,
            pending: pending.len(),
            stats: self.stats,
            releases: self.releases.unwrap_or_default(),
        };
        (report, pending)
    }
}
