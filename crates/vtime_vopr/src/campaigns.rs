//! Simulation campaigns.
//!
//! Long batches of generated workloads run back to back, each checked
//! against every invariant. Campaigns report how much virtual time they
//! covered next to the real time it took.

#![allow(clippy::cast_possible_truncation)] // elapsed ms won't exceed u64

use crate::execution::{run_workload, RuntimeFlavor};
use crate::synthetic::{SyntheticWorkload, WorkloadConfig};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vtime::CoordinatorConfig;

/// Results from a campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignResult {
    /// Campaign name.
    pub name: String,
    /// Total iterations executed.
    pub iterations: usize,
    /// Sleeps released across all iterations.
    pub sleeps: usize,
    /// Virtual time covered, summed over iterations.
    pub simulated_seconds: u64,
    /// Real elapsed time.
    pub real_elapsed_ms: u64,
    /// Number of failures detected.
    pub failures: usize,
    /// Failure details.
    pub failure_details: Vec<String>,
    /// Whether all invariants held.
    pub all_passed: bool,
}

impl CampaignResult {
    /// Builds a result from what the campaign measured. It passes only if
    /// `failures` is empty.
    #[must_use]
    pub fn new(
        name: &str,
        iterations: usize,
        sleeps: usize,
        simulated_seconds: u64,
        real_elapsed_ms: u64,
        failures: Vec<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            iterations,
            sleeps,
            simulated_seconds,
            real_elapsed_ms,
            failures: failures.len(),
            all_passed: failures.is_empty(),
            failure_details: failures,
        }
    }

    /// Virtual seconds covered per real second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compression(&self) -> f64 {
        if self.real_elapsed_ms == 0 {
            return 0.0;
        }
        self.simulated_seconds as f64 * 1000.0 / self.real_elapsed_ms as f64
    }
}

/// Runs `iterations` generated workloads, seeds `seed`, `seed + 1`, and so on.
///
/// Each run gets a fresh coordinator. A run that errors or breaks an
/// invariant is recorded as a failure and the campaign moves on. Sleeps and
/// virtual time count every run that completed, clean or not.
#[must_use]
pub fn run_workload_campaign(
    seed: u64,
    iterations: usize,
    workload: &WorkloadConfig,
    flavor: RuntimeFlavor,
    coordinator: &CoordinatorConfig,
) -> CampaignResult {
    let start = Instant::now();
    let mut failures = Vec::new();
    let mut sleeps = 0;
    let mut simulated = Duration::ZERO;

    for i in 0..iterations {
        let run_seed = seed.wrapping_add(i as u64);
        let plan = SyntheticWorkload::new(workload.clone().with_seed(run_seed)).generate();

        match run_workload(&plan, flavor, coordinator.clone()) {
            Ok(outcome) => {
                sleeps += outcome.report.releases.len();
                simulated = simulated.saturating_add(outcome.report.now.as_duration());
                let violations = outcome.check_invariants(&plan, coordinator.initial_tasks);
                if violations.is_empty() {
                    debug!(
                        "seed {} reached {} in {:?}",
                        run_seed, outcome.report.now, outcome.real_elapsed
                    );
                } else {
                    warn!("seed {} broke {} invariant(s)", run_seed, violations.len());
                    failures.extend(violations.into_iter().map(|v| format!("seed {run_seed}: {v}")));
                }
            }
            Err(e) => {
                warn!("seed {} failed: {}", run_seed, e);
                failures.push(format!("seed {run_seed}: {e}"));
            }
        }
    }

    let elapsed = start.elapsed().as_millis() as u64;
    info!(
        "Workload campaign: {} iterations, {} failures, {:?} simulated in {}ms",
        iterations,
        failures.len(),
        simulated,
        elapsed
    );

    CampaignResult::new(
        "workload_campaign",
        iterations,
        sleeps,
        simulated.as_secs(),
        elapsed,
        failures,
    )
}

/// Runs a campaign of day-granular sleeps spanning up to a year each.
#[must_use]
pub fn run_long_haul_campaign(seed: u64, iterations: usize, flavor: RuntimeFlavor) -> CampaignResult {
    let mut result = run_workload_campaign(
        seed,
        iterations,
        &WorkloadConfig::long_haul(),
        flavor,
        &CoordinatorConfig::default(),
    );
    result.name = "long_haul_campaign".to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtime::VirtualTime;

    #[test]
    fn workload_campaign_passes() {
        let result = run_workload_campaign(
            7,
            5,
            &WorkloadConfig::default(),
            RuntimeFlavor::CurrentThread,
            &CoordinatorConfig::default(),
        );
        assert!(result.all_passed, "{:?}", result.failure_details);
        assert_eq!(result.iterations, 5);
        assert_eq!(result.failures, 0);
    }

    #[test]
    fn long_haul_campaign_covers_months_quickly() {
        let result = run_long_haul_campaign(1, 3, RuntimeFlavor::MultiThread { workers: 2 });
        assert!(result.all_passed, "{:?}", result.failure_details);
        assert_eq!(result.name, "long_haul_campaign");
        // Any generated sleep is at least one day.
        if result.sleeps > 0 {
            assert!(result.simulated_seconds >= 24 * 3600);
        }
        assert!(result.real_elapsed_ms < 30_000);
    }

    #[test]
    fn failing_campaign_keeps_its_measurements() {
        // Starting the clock at one second puts every run off its horizon.
        let coordinator =
            CoordinatorConfig::default().with_epoch(VirtualTime::from(Duration::from_secs(1)));
        let result = run_workload_campaign(
            3,
            4,
            &WorkloadConfig::default(),
            RuntimeFlavor::CurrentThread,
            &coordinator,
        );
        assert!(!result.all_passed);
        assert_eq!(result.failures, result.failure_details.len());
        assert!(result.failures >= 4);
        assert!(result.simulated_seconds >= 4);
    }

    #[test]
    fn clean_result_passes() {
        let result = CampaignResult::new("x", 3, 10, 60, 0, Vec::new());
        assert!(result.all_passed);
        assert_eq!(result.failures, 0);
        assert!(result.compression().abs() < f64::EPSILON);
    }
}
