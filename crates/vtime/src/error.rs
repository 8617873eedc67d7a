//! Error types for the virtual-time coordinator.

use crate::time::VirtualTime;
use std::time::Duration;
use thiserror::Error;

/// Bookkeeping corruption detected by the coordinator.
///
/// Any of these means a caller broke the pairing contract (or the queue is
/// buggy). The coordinator stops on the first one: further clock advancement
/// would be unsound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// `task_ended` arrived while no task was registered.
    #[error("task ended with no active tasks")]
    TaskEndedWithoutActive,

    /// `block_end` arrived while no task was blocked.
    #[error("block ended with no blocked tasks")]
    BlockEndWithoutBlocked,

    /// The earliest pending wake lies before the current clock.
    #[error("clock would move backwards from {now} to {wake}")]
    ClockWentBackwards {
        /// Clock value at the time of the release.
        now: VirtualTime,
        /// Wake time of the popped sleeper.
        wake: VirtualTime,
    },
}

/// Errors that can occur while talking to or running the coordinator.
#[derive(Debug, Error)]
pub enum Error {
    /// The coordinator halted on corrupted bookkeeping.
    #[error("invariant violated: {0}")]
    Invariant(#[from] Violation),

    /// Every live task stayed blocked with an empty timer queue.
    #[error("no progress possible: {blocked}/{active} tasks blocked with no pending wake for {waited:?}")]
    NoProgress {
        /// Live tasks at the time of the stall.
        active: usize,
        /// Blocked tasks at the time of the stall.
        blocked: usize,
        /// Real time spent waiting for an out-of-band release.
        waited: Duration,
    },

    /// The coordinator is no longer running.
    #[error("coordinator has stopped")]
    Halted,

    /// An OS thread for a registered task could not be created.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The coordinator task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
