//! Running workloads under a virtual clock and checking what they observed.

use crate::error::{Error, Result};
use crate::synthetic::{TaskPlan, Workload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;
use vtime::{Clock, Coordinator, CoordinatorConfig, Report, TaskHandle, VirtualTime};
use xxhash_rust::xxh64::xxh64;

/// Which tokio scheduler the instrumented tasks run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuntimeFlavor {
    /// Single-threaded, cooperatively scheduled.
    #[default]
    CurrentThread,
    /// Work-stealing pool with the given number of workers.
    MultiThread {
        /// Worker thread count.
        workers: usize,
    },
}

impl RuntimeFlavor {
    /// Builds a runtime of this flavor.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created.
    pub fn build(self) -> Result<Runtime> {
        let runtime = match self {
            Self::CurrentThread => Builder::new_current_thread().enable_all().build()?,
            Self::MultiThread { workers } => Builder::new_multi_thread()
                .worker_threads(workers.max(1))
                .enable_all()
                .build()?,
        };
        Ok(runtime)
    }
}

/// What one task saw around one sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Task identifier, assigned in spawn order.
    pub task: usize,
    /// Index of the sleep within the task.
    pub step: usize,
    /// Clock read just before the sleep.
    pub before: VirtualTime,
    /// Requested sleep length.
    pub duration: Duration,
    /// Clock read just after waking.
    pub after: VirtualTime,
    /// Other tasks that were running when this one woke.
    pub running: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Coordinator report, with the release log.
    pub report: Report,
    /// Observations in the order tasks woke.
    pub observations: Vec<Observation>,
    /// Real time the run took.
    pub real_elapsed: Duration,
}

impl RunOutcome {
    /// Hash of the release times.
    ///
    /// Release times depend only on the workload, so this is stable across
    /// runtime flavors and thread interleavings.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let bytes: Vec<u8> = self
            .report
            .releases
            .iter()
            .flat_map(|release| release.at.as_nanos().to_le_bytes())
            .collect();
        xxh64(&bytes, 0)
    }

    /// Checks every property a correct run must satisfy.
    ///
    /// Returns one message per violation; empty means the run was clean.
    #[must_use]
    pub fn check_invariants(&self, workload: &Workload, initial_tasks: usize) -> Vec<String> {
        let mut violations = Vec::new();

        for obs in &self.observations {
            let expected = obs.before.saturating_add(obs.duration);
            if obs.after != expected {
                violations.push(format!(
                    "task {} step {}: woke at {} but expected {}",
                    obs.task, obs.step, obs.after, expected
                ));
            }
        }

        let mut last_seen: BTreeMap<usize, VirtualTime> = BTreeMap::new();
        for obs in &self.observations {
            if let Some(previous) = last_seen.insert(obs.task, obs.after) {
                if obs.before < previous {
                    violations.push(format!(
                        "task {}: clock went from {} back to {}",
                        obs.task, previous, obs.before
                    ));
                }
            }
        }

        for pair in self.report.releases.windows(2) {
            if (pair[0].at, pair[0].seq) >= (pair[1].at, pair[1].seq) {
                violations.push(format!(
                    "release #{} at {} came before #{} at {}",
                    pair[0].seq, pair[0].at, pair[1].seq, pair[1].at
                ));
            }
        }

        for obs in &self.observations {
            if obs.running != 0 {
                violations.push(format!(
                    "task {} step {}: woke at {} while {} other task(s) were running",
                    obs.task, obs.step, obs.after, obs.running
                ));
            }
        }

        let expected_sleeps = workload.sleep_count();
        if self.report.releases.len() != expected_sleeps {
            violations.push(format!(
                "{} releases for {} sleeps",
                self.report.releases.len(),
                expected_sleeps
            ));
        }
        if self.observations.len() != expected_sleeps {
            violations.push(format!(
                "{} observations for {} sleeps",
                self.observations.len(),
                expected_sleeps
            ));
        }

        let horizon = VirtualTime::from(workload.horizon());
        if self.report.now != horizon {
            violations.push(format!(
                "final clock {} differs from workload horizon {}",
                self.report.now, horizon
            ));
        }

        let final_counters = (self.report.active, self.report.blocked, self.report.pending);
        if final_counters != (initial_tasks, 0, 0) {
            violations.push(format!(
                "final active/blocked/pending = {final_counters:?}, expected ({initial_tasks}, 0, 0)"
            ));
        }

        violations
    }

    /// Returns the outcome if every invariant holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] listing every violation.
    pub fn into_checked(self, workload: &Workload, initial_tasks: usize) -> Result<Self> {
        let violations = self.check_invariants(workload, initial_tasks);
        if violations.is_empty() {
            Ok(self)
        } else {
            Err(Error::Invariant(violations.join("; ")))
        }
    }
}

/// Shared by every task of one run.
///
/// `running` counts tasks between resuming and their next sleep, join or
/// exit, independently of the coordinator's own counters.
#[derive(Clone, Default)]
struct Recorder {
    next_task: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    observations: Arc<Mutex<Vec<Observation>>>,
}

impl Recorder {
    fn assign_task(&self) -> usize {
        self.next_task.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns how many other tasks were running.
    fn start_running(&self) -> usize {
        self.running.fetch_add(1, Ordering::SeqCst)
    }

    fn stop_running(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn observe(&self, observation: Observation) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observation);
    }

    fn take(&self) -> Vec<Observation> {
        std::mem::take(
            &mut *self
                .observations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

/// Drives `future` to completion on `runtime`, giving up after `limit` of
/// real time.
pub(crate) fn block_on_within<F: Future>(
    runtime: &Runtime,
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output> {
    match limit {
        None => Ok(runtime.block_on(future)),
        Some(limit) => runtime
            .block_on(async { tokio::time::timeout(limit, future).await })
            .map_err(|_| Error::TimedOut(limit)),
    }
}

/// Runs `workload` under a fresh coordinator on a runtime of the given flavor.
///
/// The release log is always enabled.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built or any task or the
/// coordinator fails.
pub fn run_workload(
    workload: &Workload,
    flavor: RuntimeFlavor,
    config: CoordinatorConfig,
) -> Result<RunOutcome> {
    execute(workload, flavor, config, None)
}

/// Like [`run_workload`], but fails with [`Error::TimedOut`] if the run takes
/// longer than `limit` of real time.
///
/// # Errors
///
/// Returns an error if the run fails or overruns.
pub fn run_workload_within(
    workload: &Workload,
    flavor: RuntimeFlavor,
    config: CoordinatorConfig,
    limit: Duration,
) -> Result<RunOutcome> {
    execute(workload, flavor, config, Some(limit))
}

/// Runs `workload` and fails unless every invariant holds.
///
/// # Errors
///
/// Returns [`Error::Invariant`] listing every violation, or any run error.
pub fn run_checked(
    workload: &Workload,
    flavor: RuntimeFlavor,
    config: CoordinatorConfig,
) -> Result<RunOutcome> {
    let initial_tasks = config.initial_tasks;
    run_workload(workload, flavor, config)?.into_checked(workload, initial_tasks)
}

fn execute(
    workload: &Workload,
    flavor: RuntimeFlavor,
    config: CoordinatorConfig,
    limit: Option<Duration>,
) -> Result<RunOutcome> {
    let runtime = flavor.build()?;
    let started = Instant::now();
    let recorder = Recorder::default();

    let report = block_on_within(&runtime, limit, async {
        let (clock, coordinator) = Coordinator::start(config.with_release_log());
        recorder.start_running();

        let mut roots = Vec::with_capacity(workload.roots.len());
        for plan in &workload.roots {
            roots.push(spawn_plan(&clock, plan.clone(), recorder.clone())?);
        }
        for root in roots {
            recorder.stop_running();
            root.join().await??;
            recorder.start_running();
        }

        coordinator.shutdown().await
    })??;

    let real_elapsed = started.elapsed();
    debug!(
        "Ran {} tasks / {} sleeps to {} in {:?}",
        workload.task_count(),
        workload.sleep_count(),
        report.now,
        real_elapsed
    );

    Ok(RunOutcome {
        report,
        observations: recorder.take(),
        real_elapsed,
    })
}

fn spawn_plan(
    clock: &Clock,
    plan: TaskPlan,
    recorder: Recorder,
) -> vtime::Result<TaskHandle<vtime::Result<()>>> {
    let task = recorder.assign_task();
    let clock_in_task = clock.clone();

    recorder.start_running();
    clock.spawn(async move {
        let clock = clock_in_task;

        let mut children = Vec::with_capacity(plan.children.len());
        for child in plan.children {
            children.push(spawn_plan(&clock, child, recorder.clone())?);
        }

        for (step, duration) in plan.sleeps.into_iter().enumerate() {
            let before = clock.now().await?;
            recorder.stop_running();
            clock.sleep(duration).await?;
            let running = recorder.start_running();
            let after = clock.now().await?;
            recorder.observe(Observation {
                task,
                step,
                before,
                duration,
                after,
                running,
            });
        }

        for child in children {
            recorder.stop_running();
            child.join().await??;
            recorder.start_running();
        }
        recorder.stop_running();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn leaf_tasks_observe_exact_wake_times() {
        let workload = Workload::new(vec![
            TaskPlan::sleeping(vec![ms(100)]),
            TaskPlan::sleeping(vec![ms(50)]),
            TaskPlan::sleeping(vec![ms(50)]),
        ]);

        let outcome =
            run_checked(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default())
                .unwrap();

        let order: Vec<_> = outcome
            .observations
            .iter()
            .map(|o| (o.task, o.after))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, VirtualTime::from(ms(50))),
                (2, VirtualTime::from(ms(50))),
                (0, VirtualTime::from(ms(100))),
            ]
        );
    }

    #[test]
    fn children_start_at_their_parents_spawn_time() {
        let workload = Workload::new(vec![TaskPlan {
            sleeps: vec![ms(10), ms(10)],
            children: vec![TaskPlan::sleeping(vec![ms(15)])],
        }]);

        let outcome =
            run_checked(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default())
                .unwrap();

        let child = outcome
            .observations
            .iter()
            .find(|o| o.task == 1)
            .unwrap();
        assert_eq!(child.before, VirtualTime::ZERO);
        assert_eq!(child.after, VirtualTime::from(ms(15)));
        assert_eq!(outcome.report.now, VirtualTime::from(ms(20)));
    }

    #[test]
    fn fingerprint_is_stable_across_flavors() {
        let workload = Workload::new(vec![
            TaskPlan {
                sleeps: vec![ms(3), ms(0), ms(7)],
                children: vec![TaskPlan::sleeping(vec![ms(1), ms(1)])],
            },
            TaskPlan::sleeping(vec![ms(2), ms(8)]),
            TaskPlan::sleeping(vec![ms(10)]),
        ]);

        let single =
            run_checked(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default())
                .unwrap();
        let multi = run_checked(
            &workload,
            RuntimeFlavor::MultiThread { workers: 4 },
            CoordinatorConfig::default(),
        )
        .unwrap();

        assert_eq!(single.fingerprint(), multi.fingerprint());
    }

    #[test]
    fn tampered_outcome_is_caught() {
        let workload = Workload::new(vec![TaskPlan::sleeping(vec![ms(5)])]);
        let mut outcome =
            run_workload(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default())
                .unwrap();
        assert!(outcome.check_invariants(&workload, 1).is_empty());

        outcome.observations[0].after = VirtualTime::from(ms(4));
        outcome.observations[0].running = 1;
        let violations = outcome.check_invariants(&workload, 1);
        assert_eq!(violations.len(), 2, "{violations:?}");
    }

    #[test]
    fn running_count_sees_work_the_coordinator_does_not() {
        let runtime = RuntimeFlavor::CurrentThread.build().unwrap();
        let seen = runtime.block_on(async {
            // The caller is not registered, so the clock moves while it runs.
            let (clock, coordinator) =
                Coordinator::start(CoordinatorConfig::default().with_initial_tasks(0));
            let recorder = Recorder::default();
            recorder.start_running();

            let (tx, rx) = tokio::sync::oneshot::channel();
            let clock_in_task = clock.clone();
            let in_task = recorder.clone();
            recorder.start_running();
            let _sleeper = clock
                .spawn(async move {
                    in_task.stop_running();
                    clock_in_task.sleep(ms(5)).await?;
                    let _ = tx.send(in_task.start_running());
                    Ok::<_, vtime::Error>(())
                })
                .unwrap();

            let seen = rx.await.unwrap();
            coordinator.shutdown().await.unwrap();
            seen
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn overrunning_runs_time_out() {
        let runtime = RuntimeFlavor::CurrentThread.build().unwrap();
        let result = block_on_within(&runtime, Some(ms(20)), std::future::pending::<()>());
        assert!(matches!(result, Err(Error::TimedOut(limit)) if limit == ms(20)));

        let result = block_on_within(&runtime, Some(ms(20)), async { 3 });
        assert!(matches!(result, Ok(3)));
    }
}
