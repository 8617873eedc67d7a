//! Deterministic virtual clock for concurrent programs under test.
//!
//! This crate provides:
//! - A time-ordered timer queue with FIFO tie-breaking
//! - A single coordinator task that owns the clock and advances it only
//!   when every live task is blocked
//! - A [`Clock`] handle with the bracketing calls instrumented code makes
//!   at every spawn and blocking site
//!
//! Timed waits resolve instantly in real time, in the same order and at
//! the same notional instants they would under a real clock.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vtime::{Coordinator, CoordinatorConfig};
//!
//! # async fn demo() -> vtime::Result<()> {
//! let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());
//!
//! let worker_clock = clock.clone();
//! let worker = clock.spawn(async move {
//!     worker_clock.sleep(Duration::from_secs(3600)).await
//! })?;
//!
//! worker.join().await??;
//! assert_eq!(clock.now().await?.as_duration(), Duration::from_secs(3600));
//!
//! let report = coordinator.shutdown().await?;
//! assert_eq!(report.stats.releases, 1);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod time;

pub use clock::{BlockGuard, Clock, TaskGuard, TaskHandle};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{Error, Result, Violation};
pub use queue::{PendingWake, TimerQueue};
pub use report::{Release, Report, Snapshot, Stats};
pub use scheduler::{Advance, Scheduler};
pub use time::VirtualTime;
