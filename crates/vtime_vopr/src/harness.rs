//! Deterministic simulation harness.
//!
//! Runs scenarios against fresh coordinators, each on its own tokio
//! runtime, and turns their outcomes into [`SimResult`]s.

use crate::error::Result;
use crate::execution::{block_on_within, run_workload_within, RunOutcome, RuntimeFlavor};
use crate::simulation::{Scenario, SimResult};
use crate::synthetic::{SyntheticWorkload, TaskPlan, Workload, WorkloadConfig};
use std::time::Duration;
use vtime::{Coordinator, CoordinatorConfig, Error as ClockError, Violation};

const YEAR: Duration = Duration::from_secs(365 * 24 * 3600);

/// Configuration for the simulation.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for generated workloads.
    pub seed: u64,
    /// Number of generated workloads per random scenario.
    pub iterations: usize,
    /// Runtime the instrumented tasks run on.
    pub flavor: RuntimeFlavor,
    /// Shape of generated workloads.
    pub workload: WorkloadConfig,
    /// Whether to rerun random workloads on another flavor and compare fingerprints.
    pub verify_determinism: bool,
    /// Real-time budget for a single run. A run that overruns it fails.
    pub timeout: Duration,
    /// Real-time grace before a stall becomes a no-progress failure.
    pub stall_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            iterations: 10,
            flavor: RuntimeFlavor::CurrentThread,
            workload: WorkloadConfig::default(),
            verify_determinism: true,
            timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_millis(50),
        }
    }
}

impl SimConfig {
    /// Creates a new config with the given seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the number of iterations.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the runtime flavor.
    #[must_use]
    pub const fn with_flavor(mut self, flavor: RuntimeFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Sets the workload shape.
    #[must_use]
    pub fn with_workload(mut self, workload: WorkloadConfig) -> Self {
        self.workload = workload;
        self
    }

    /// Sets the real-time budget for a single run.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables cross-flavor determinism verification.
    #[must_use]
    pub const fn without_determinism_check(mut self) -> Self {
        self.verify_determinism = false;
        self
    }
}

/// Simulation harness for deterministic testing.
pub struct Simulation {
    config: SimConfig,
}

impl Simulation {
    /// Creates a new simulation with the given configuration.
    #[must_use]
    pub const fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// The built-in scenario set.
    #[must_use]
    pub fn standard_scenarios(&self) -> Vec<Scenario> {
        vec![
            Scenario::StaggeredSleepers,
            Scenario::SequentialSleeps,
            Scenario::SimultaneousZeroSleeps,
            Scenario::long_sleeps(200),
            Scenario::random_workload(self.config.workload.clone().with_seed(self.config.seed)),
            Scenario::random_workload(WorkloadConfig::dense_ties().with_seed(self.config.seed)),
            Scenario::NoProgress,
            Scenario::BookkeepingCorruption,
        ]
    }

    /// Runs a scenario and returns the result.
    pub fn run_scenario(&self, scenario: &Scenario) -> SimResult {
        let name = scenario.name();
        let result = match scenario {
            Scenario::StaggeredSleepers => self.test_staggered_sleepers(),
            Scenario::SequentialSleeps => self.test_sequential_sleeps(),
            Scenario::SimultaneousZeroSleeps => self.test_simultaneous_zero_sleeps(),
            Scenario::LongSleeps { count } => self.test_long_sleeps(*count),
            Scenario::RandomWorkload { config } => self.test_random_workload(config),
            Scenario::NoProgress => self.test_no_progress(),
            Scenario::BookkeepingCorruption => self.test_bookkeeping_corruption(),
        };

        result.unwrap_or_else(|e| SimResult::fail(name, format!("Run failed: {e}")))
    }

    /// Runs all scenarios and returns their results.
    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<SimResult> {
        scenarios.iter().map(|s| self.run_scenario(s)).collect()
    }

    /// Verifies that the same seed yields the same release trace on both
    /// runtime flavors.
    pub fn verify_determinism(&self) -> bool {
        if !self.config.verify_determinism {
            return true;
        }

        let workload =
            SyntheticWorkload::new(self.config.workload.clone().with_seed(self.config.seed))
                .generate();
        let flavors = [
            RuntimeFlavor::CurrentThread,
            RuntimeFlavor::MultiThread { workers: 4 },
        ];

        let fingerprints: Result<Vec<u64>> = flavors
            .iter()
            .map(|flavor| {
                self.run_checked(&workload, *flavor)
                    .map(|outcome| outcome.fingerprint())
            })
            .collect();

        matches!(fingerprints.as_deref(), Ok([a, b]) if a == b)
    }

    fn run(&self, workload: &Workload, flavor: RuntimeFlavor) -> Result<RunOutcome> {
        run_workload_within(workload, flavor, CoordinatorConfig::default(), self.config.timeout)
    }

    fn run_checked(&self, workload: &Workload, flavor: RuntimeFlavor) -> Result<RunOutcome> {
        self.run(workload, flavor)?.into_checked(workload, 1)
    }

    fn expect_wakes(
        &self,
        name: &'static str,
        workload: &Workload,
        expected: &[(usize, Duration)],
    ) -> Result<SimResult> {
        let outcome = self.run_checked(workload, self.config.flavor)?;

        let mut seen: Vec<(usize, Duration)> = outcome
            .observations
            .iter()
            .map(|o| (o.task, o.after.as_duration()))
            .collect();
        // Wake order between tasks is only observable on one thread.
        let mut expected = expected.to_vec();
        if self.config.flavor != RuntimeFlavor::CurrentThread {
            seen.sort_unstable();
            expected.sort_unstable();
        }

        if seen == expected {
            Ok(SimResult::pass(name, format!("Woke as expected: {seen:?}")))
        } else {
            Ok(SimResult::fail(name, "Unexpected wake order")
                .with_diagnostics([format!("expected {expected:?}"), format!("observed {seen:?}")]))
        }
    }

    fn test_staggered_sleepers(&self) -> Result<SimResult> {
        let ms = Duration::from_millis;
        let workload = Workload::new(vec![
            TaskPlan::sleeping(vec![ms(100)]),
            TaskPlan::sleeping(vec![ms(50)]),
            TaskPlan::sleeping(vec![ms(50)]),
        ]);
        self.expect_wakes(
            "staggered_sleepers",
            &workload,
            &[(1, ms(50)), (2, ms(50)), (0, ms(100))],
        )
    }

    fn test_sequential_sleeps(&self) -> Result<SimResult> {
        let ms = Duration::from_millis;
        let workload = Workload::new(vec![TaskPlan::sleeping(vec![ms(10), ms(5)])]);
        self.expect_wakes("sequential_sleeps", &workload, &[(0, ms(10)), (0, ms(15))])
    }

    fn test_simultaneous_zero_sleeps(&self) -> Result<SimResult> {
        let workload = Workload::new(vec![
            TaskPlan::sleeping(vec![Duration::ZERO]),
            TaskPlan::sleeping(vec![Duration::ZERO]),
        ]);
        self.expect_wakes(
            "simultaneous_zero_sleeps",
            &workload,
            &[(0, Duration::ZERO), (1, Duration::ZERO)],
        )
    }

    fn test_long_sleeps(&self, count: usize) -> Result<SimResult> {
        let workload = Workload::new(
            (1..=count)
                .map(|i| TaskPlan::sleeping(vec![YEAR * u32::try_from(i).unwrap_or(u32::MAX)]))
                .collect(),
        );
        let outcome = self.run_checked(&workload, self.config.flavor)?;
        let years = outcome.report.now.as_duration().as_secs() / YEAR.as_secs();
        Ok(SimResult::pass(
            "long_sleeps",
            format!(
                "{count} sleepers covered {years} virtual years in {:?}",
                outcome.real_elapsed
            ),
        ))
    }

    fn test_random_workload(&self, config: &WorkloadConfig) -> Result<SimResult> {
        let mut failures = Vec::new();
        let mut sleeps = 0;

        for i in 0..self.config.iterations {
            let seed = config.seed.wrapping_add(i as u64);
            let workload = SyntheticWorkload::new(config.clone().with_seed(seed)).generate();
            sleeps += workload.sleep_count();

            let outcome = self.run(&workload, self.config.flavor)?;
            let violations = outcome.check_invariants(&workload, 1);
            failures.extend(violations.into_iter().map(|v| format!("seed {seed}: {v}")));

            if self.config.verify_determinism {
                let other = match self.config.flavor {
                    RuntimeFlavor::CurrentThread => RuntimeFlavor::MultiThread { workers: 4 },
                    RuntimeFlavor::MultiThread { .. } => RuntimeFlavor::CurrentThread,
                };
                let rerun = self.run(&workload, other)?;
                if rerun.fingerprint() != outcome.fingerprint() {
                    failures.push(format!("seed {seed}: release trace differs on {other:?}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(SimResult::pass(
                "random_workload",
                format!("{} workloads, {sleeps} sleeps, all invariants held", self.config.iterations),
            ))
        } else {
            Ok(
                SimResult::fail("random_workload", format!("{} violation(s)", failures.len()))
                    .with_diagnostics(failures),
            )
        }
    }

    fn test_no_progress(&self) -> Result<SimResult> {
        let config = CoordinatorConfig::default().with_stall_timeout(self.config.stall_timeout);
        let runtime = self.config.flavor.build()?;
        let outcome = block_on_within(&runtime, Some(self.config.timeout), async move {
            let (clock, coordinator) = Coordinator::start(config);
            // The initial task parks on something that can never complete.
            let _parked = clock.enter_blocking()?;
            coordinator.wait().await
        })?;

        Ok(match outcome {
            Err(ClockError::NoProgress { active, blocked, .. }) => SimResult::pass(
                "no_progress",
                format!("Stall reported with {blocked}/{active} tasks blocked"),
            ),
            Err(e) => SimResult::fail("no_progress", format!("Wrong error: {e}")),
            Ok(report) => SimResult::fail(
                "no_progress",
                format!("Coordinator exited cleanly: {report}"),
            ),
        })
    }

    fn test_bookkeeping_corruption(&self) -> Result<SimResult> {
        let runtime = self.config.flavor.build()?;
        let outcome = block_on_within(&runtime, Some(self.config.timeout), async {
            let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());
            clock.block_end()?;
            let halted = coordinator.wait().await;
            let after = clock.now().await;
            Ok::<_, ClockError>((halted, after))
        })??;

        Ok(match outcome {
            (Err(ClockError::Invariant(Violation::BlockEndWithoutBlocked)), Err(ClockError::Halted)) => {
                SimResult::pass("bookkeeping_corruption", "Coordinator halted on unmatched block end")
            }
            (halted, after) => SimResult::fail(
                "bookkeeping_corruption",
                format!("Expected halt, got {halted:?} then {after:?}"),
            ),
        })
    }
}
