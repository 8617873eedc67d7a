//! Error types for simulation runs.

use thiserror::Error;

/// Errors that can occur while running a simulated workload.
#[derive(Debug, Error)]
pub enum Error {
    /// The coordinator or an instrumented task failed.
    #[error(transparent)]
    Clock(#[from] vtime::Error),

    /// The tokio runtime for the run could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// The run did not finish within its real-time budget.
    #[error("run did not finish within {0:?}")]
    TimedOut(std::time::Duration),

    /// The run finished but violated an expected property.
    #[error("invariant failed: {0}")]
    Invariant(String),
}

/// Result type alias for simulation operations.
pub type Result<T> = std::result::Result<T, Error>;
