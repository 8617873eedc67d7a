//! Coordinator configuration.

use crate::time::VirtualTime;
use std::time::Duration;

/// Configuration for a coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Tasks considered alive before any `task_started` call.
    ///
    /// The default of one accounts for the task that creates the coordinator.
    pub initial_tasks: usize,
    /// Clock value at start.
    pub epoch: VirtualTime,
    /// Real time to wait for an out-of-band release while stalled.
    ///
    /// `None` waits indefinitely.
    pub stall_timeout: Option<Duration>,
    /// Whether to keep a log of every release in the final report.
    pub record_releases: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_tasks: 1,
            epoch: VirtualTime::ZERO,
            stall_timeout: None,
            record_releases: false,
        }
    }

    /// Sets the number of tasks alive at start.
    #[must_use]
    pub const fn with_initial_tasks(mut self, tasks: usize) -> Self {
        self.initial_tasks = tasks;
        self
    }

    /// Sets the starting clock value.
    #[must_use]
    pub const fn with_epoch(mut self, epoch: VirtualTime) -> Self {
        self.epoch = epoch;
        self
    }

    /// Halts with [`crate::Error::NoProgress`] after stalling this long.
    #[must_use]
    pub const fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Enables the release log.
    #[must_use]
    pub const fn with_release_log(mut self) -> Self {
        self.record_releases = true;
        self
    }
}
