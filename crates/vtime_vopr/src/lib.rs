//! Deterministic simulation testing for the `vtime` coordinator.
//!
//! This crate provides:
//! - Seeded synthetic workloads: trees of tasks that spawn and sleep
//! - An execution layer that runs a workload on either tokio flavor and
//!   records what every task observed
//! - Invariant checks over those observations and the release log
//! - Named scenarios, a harness to run them, and long campaigns
//!
//! # Determinism
//!
//! Release times depend only on the workload. The same seed therefore
//! produces the same release trace on a single-threaded runtime and on a
//! work-stealing pool, and [`RunOutcome::fingerprint`] is equal across both.
//!
//! # Example
//!
//! ```rust,no_run
//! use vtime_vopr::{Scenario, SimConfig, Simulation};
//!
//! let sim = Simulation::new(SimConfig::default().with_seed(42));
//! let result = sim.run_scenario(&Scenario::StaggeredSleepers);
//! assert!(result.passed);
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod campaigns;
pub mod error;
pub mod execution;
pub mod generators;
pub mod harness;
pub mod simulation;
pub mod synthetic;

pub use campaigns::{run_long_haul_campaign, run_workload_campaign, CampaignResult};
pub use error::{Error, Result};
pub use execution::{
    run_checked, run_workload, run_workload_within, Observation, RunOutcome, RuntimeFlavor,
};
pub use harness::{SimConfig, Simulation};
pub use simulation::{Scenario, SimResult, SimSummary};
pub use synthetic::{SyntheticWorkload, TaskPlan, Workload, WorkloadConfig};
