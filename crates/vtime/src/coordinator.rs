//! The coordinator event loop.
//!
//! One tokio task owns a [`Scheduler`] and drains a FIFO request channel.
//! Every mutation of the clock, the counters and the timer queue happens
//! inside that task, so none of it needs a lock.

use crate::clock::Clock;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result, Violation};
use crate::report::{Report, Snapshot};
use crate::scheduler::{Advance, Scheduler};
use crate::time::VirtualTime;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// A message from a caller to the coordinator.
#[derive(Debug)]
pub(crate) enum Request {
    Sleep {
        duration: Duration,
        wake: oneshot::Sender<()>,
    },
    Now {
        reply: oneshot::Sender<VirtualTime>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    TaskStarted,
    TaskEnded,
    BlockBegin,
    BlockEnd,
    Shutdown,
}

/// Handle to a running coordinator.
///
/// Dropping it detaches the loop, which then stops once every [`Clock`] is gone.
#[derive(Debug)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Request>,
    task: JoinHandle<Result<Report>>,
}

impl Coordinator {
    /// Starts a coordinator on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: CoordinatorConfig) -> (Clock, Self) {
        Self::start_on(&Handle::current(), config)
    }

    /// Starts a coordinator on the given runtime.
    ///
    /// Useful when the instrumented program runs on plain OS threads.
    pub fn start_on(runtime: &Handle, config: CoordinatorConfig) -> (Clock, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop::new(&config, rx);
        let task = runtime.spawn(event_loop.run());
        (Clock::new(tx.clone()), Self { tx, task })
    }

    /// Asks the loop to stop and returns its final report.
    ///
    /// Sleepers still in the queue are dropped; their `sleep` calls fail
    /// with [`Error::Halted`].
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the loop if it halted on its own.
    pub async fn shutdown(self) -> Result<Report> {
        // A closed channel means the loop already stopped; the join below says why.
        let _ = self.tx.send(Request::Shutdown);
        self.task.await?
    }

    /// Waits for the loop to stop without asking it to.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the loop, if any.
    pub async fn wait(self) -> Result<Report> {
        drop(self.tx);
        self.task.await?
    }
}

struct EventLoop {
    scheduler: Scheduler<oneshot::Sender<()>>,
    rx: mpsc::UnboundedReceiver<Request>,
    stall_timeout: Option<Duration>,
    stalled: bool,
}

impl EventLoop {
    fn new(config: &CoordinatorConfig, rx: mpsc::UnboundedReceiver<Request>) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            rx,
            stall_timeout: config.stall_timeout,
            stalled: false,
        }
    }

    async fn run(mut self) -> Result<Report> {
        info!(
            "Virtual clock started at {} with {} live task(s)",
            self.scheduler.now(),
            self.scheduler.snapshot().active
        );

        let mut queued = None;
        loop {
            let request = match queued.take() {
                Some(request) => request,
                None => match self.recv().await? {
                    Some(request) => request,
                    None => break,
                },
            };

            match self.apply(request) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(violation) => return Err(self.halt(violation)),
            }

            // Another request already waiting means some task is still
            // making progress; skip the quiescence check.
            match self.rx.try_recv() {
                Ok(next) => {
                    queued = Some(next);
                    continue;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }

            if let Err(violation) = self.settle() {
                return Err(self.halt(violation));
            }
        }

        Ok(self.finish())
    }

    async fn recv(&mut self) -> Result<Option<Request>> {
        let Some(limit) = self.stall_timeout.filter(|_| self.stalled) else {
            return Ok(self.rx.recv().await);
        };

        if let Ok(request) = tokio::time::timeout(limit, self.rx.recv()).await {
            return Ok(request);
        }

        let snap = self.scheduler.snapshot();
        error!(
            "No progress possible: {}/{} tasks blocked at {} with an empty timer queue",
            snap.blocked, snap.active, snap.now
        );
        Err(Error::NoProgress {
            active: snap.active,
            blocked: snap.blocked,
            waited: limit,
        })
    }

    fn apply(&mut self, request: Request) -> std::result::Result<ControlFlow<()>, Violation> {
        self.scheduler.count_request();
        trace!("Request: {:?}", request);

        match request {
            Request::Sleep { duration, wake } => {
                let when = self.scheduler.accept_sleep(duration, wake);
                trace!("Sleep for {:?} until {}", duration, when);
            }
            Request::Now { reply } => {
                self.scheduler.count_now_query();
                let _ = reply.send(self.scheduler.now());
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.snapshot());
            }
            Request::TaskStarted => self.scheduler.task_started(),
            Request::TaskEnded => self.scheduler.task_ended()?,
            Request::BlockBegin => self.scheduler.block_begin(),
            Request::BlockEnd => self.scheduler.block_end()?,
            Request::Shutdown => {
                info!("Shutdown requested");
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn settle(&mut self) -> std::result::Result<(), Violation> {
        loop {
            match self.scheduler.advance()? {
                Advance::Released(entry) => {
                    self.stalled = false;
                    if entry.handle.send(()).is_ok() {
                        debug!("Released sleeper #{} at {}", entry.seq, entry.when);
                        return Ok(());
                    }
                    // Nobody will send a request on its behalf.
                    debug!("Sleeper #{} stopped waiting before release", entry.seq);
                }
                Advance::Stalled { fresh } => {
                    self.stalled = true;
                    if fresh {
                        let snap = self.scheduler.snapshot();
                        warn!(
                            "All {} live task(s) blocked at {} with no pending wake",
                            snap.active, snap.now
                        );
                    }
                    return Ok(());
                }
                Advance::Busy | Advance::Idle => {
                    self.stalled = false;
                    return Ok(());
                }
            }
        }
    }

    fn halt(&self, violation: Violation) -> Error {
        let snap = self.scheduler.snapshot();
        error!(
            "Virtual clock halted at {}: {} (active={}, blocked={}, pending={})",
            snap.now, violation, snap.active, snap.blocked, snap.pending
        );
        Error::Invariant(violation)
    }

    fn finish(self) -> Report {
        let (report, pending) = self.scheduler.finish();
        if !pending.is_empty() {
            warn!("Dropping {} unreleased sleeper(s)", pending.len());
        }
        info!("Virtual clock stopped: {}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TaskHandle;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    type Log = Arc<Mutex<Vec<(&'static str, VirtualTime)>>>;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn at(n: u64) -> VirtualTime {
        VirtualTime::from(ms(n))
    }

    fn sleeper(clock: &Clock, log: &Log, name: &'static str, nap: Duration) -> TaskHandle<Result<()>> {
        let clock_in_task = clock.clone();
        let log = Arc::clone(log);
        clock
            .spawn(async move {
                clock_in_task.sleep(nap).await?;
                let now = clock_in_task.now().await?;
                log.lock().unwrap().push((name, now));
                Ok(())
            })
            .unwrap()
    }

    async fn join_all(handles: Vec<TaskHandle<Result<()>>>) {
        for handle in handles {
            handle.join().await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn staggered_sleepers_wake_in_virtual_order() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());
        let log = Log::default();

        let handles = vec![
            sleeper(&clock, &log, "A", ms(100)),
            sleeper(&clock, &log, "B", ms(50)),
            sleeper(&clock, &log, "C", ms(50)),
        ];
        join_all(handles).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![("B", at(50)), ("C", at(50)), ("A", at(100))]
        );

        let report = coordinator.shutdown().await.unwrap();
        assert_eq!(report.now, at(100));
        assert_eq!(report.active, 1);
        assert_eq!(report.blocked, 0);
        assert_eq!(report.stats.releases, 3);
    }

    #[tokio::test]
    async fn sequential_sleeps_accumulate() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());

        let mut seen = vec![clock.now().await.unwrap()];
        clock.sleep(ms(10)).await.unwrap();
        seen.push(clock.now().await.unwrap());
        clock.sleep(ms(5)).await.unwrap();
        seen.push(clock.now().await.unwrap());

        assert_eq!(seen, vec![at(0), at(10), at(15)]);
        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn zero_sleeps_release_in_submission_order_without_advancing() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());
        let log = Log::default();

        let handles = vec![
            sleeper(&clock, &log, "first", Duration::ZERO),
            sleeper(&clock, &log, "second", Duration::ZERO),
        ];
        join_all(handles).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", VirtualTime::ZERO), ("second", VirtualTime::ZERO)]
        );
        assert_eq!(clock.now().await.unwrap(), VirtualTime::ZERO);
        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn huge_sleeps_cost_no_real_time() {
        const YEAR: Duration = Duration::from_secs(365 * 24 * 3600);
        let started = std::time::Instant::now();
        let (clock, coordinator) =
            Coordinator::start(CoordinatorConfig::default().with_release_log());

        let handles: Vec<_> = (1..=200u32)
            .map(|i| {
                let clock_in_task = clock.clone();
                clock
                    .spawn(async move {
                        clock_in_task.sleep(YEAR * i).await?;
                        clock_in_task.sleep(YEAR).await
                    })
                    .unwrap()
            })
            .collect();
        join_all(handles).await;

        let report = coordinator.shutdown().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.now, VirtualTime::from(YEAR * 201));
        assert_eq!(report.releases.len(), 400);
        for pair in report.releases.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
        assert!(report.releases.iter().all(|r| r.blocked == r.active));
    }

    #[tokio::test]
    async fn counters_follow_bracketing_calls() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());
        let gate = Arc::new(Semaphore::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let clock_in_task = clock.clone();
                let gate = Arc::clone(&gate);
                clock
                    .spawn(async move {
                        let permit = clock_in_task.blocking(gate.acquire()).await?;
                        permit.map_err(|_| Error::Halted)?.forget();
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();
        tokio::task::yield_now().await;

        let snap = clock.snapshot().await.unwrap();
        assert_eq!((snap.active, snap.blocked, snap.pending), (4, 3, 0));

        // Queries do not count as blocking.
        clock.now().await.unwrap();
        assert_eq!(clock.snapshot().await.unwrap().blocked, 3);

        gate.add_permits(3);
        join_all(handles).await;

        let snap = clock.snapshot().await.unwrap();
        assert_eq!((snap.active, snap.blocked), (1, 0));
        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unmatched_task_end_halts_the_coordinator() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());

        clock.task_ended().unwrap();
        clock.task_ended().unwrap();

        let err = coordinator.wait().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(Violation::TaskEndedWithoutActive)
        ));
        assert!(matches!(clock.now().await, Err(Error::Halted)));
    }

    #[tokio::test]
    async fn unmatched_block_end_halts_the_coordinator() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());

        clock.block_end().unwrap();

        let err = coordinator.wait().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(Violation::BlockEndWithoutBlocked)
        ));
    }

    #[tokio::test]
    async fn persistent_stall_surfaces_no_progress() {
        let config = CoordinatorConfig::default().with_stall_timeout(ms(50));
        let (clock, coordinator) = Coordinator::start(config);

        // Blocked on something the coordinator cannot release.
        let _guard = clock.enter_blocking().unwrap();

        match coordinator.wait().await {
            Err(Error::NoProgress {
                active,
                blocked,
                waited,
            }) => {
                assert_eq!((active, blocked), (1, 1));
                assert_eq!(waited, ms(50));
            }
            other => panic!("expected NoProgress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_stall_is_not_fatal() {
        let config = CoordinatorConfig::default().with_stall_timeout(Duration::from_secs(5));
        let (clock, coordinator) = Coordinator::start(config);

        let guard = clock.enter_blocking().unwrap();
        tokio::task::yield_now().await;
        drop(guard);
        clock.sleep(ms(1)).await.unwrap();

        let report = coordinator.shutdown().await.unwrap();
        assert_eq!(report.stats.stalls, 1);
        assert_eq!(report.now, at(1));
    }

    #[tokio::test]
    async fn abandoned_sleeps_do_not_hold_up_later_ones() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());

        for nap in [ms(10), ms(11)] {
            tokio::select! {
                biased;
                _ = clock.sleep(nap) => panic!("sleep completed without a release"),
                () = std::future::ready(()) => {}
            }
        }

        let woke = tokio::time::timeout(Duration::from_secs(2), clock.sleep(ms(20))).await;
        assert!(matches!(woke, Ok(Ok(()))), "later sleeper was never released");
        assert_eq!(clock.now().await.unwrap(), at(20));

        let report = coordinator.shutdown().await.unwrap();
        assert_eq!((report.active, report.blocked, report.pending), (1, 0, 0));
        assert_eq!(report.stats.releases, 3);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalls_are_reported_at_warn() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            runtime.block_on(async {
                let config = CoordinatorConfig::default().with_stall_timeout(ms(20));
                let (clock, coordinator) = Coordinator::start(config);
                let _guard = clock.enter_blocking().unwrap();
                assert!(matches!(coordinator.wait().await, Err(Error::NoProgress { .. })));
            });
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("WARN") && logs.contains("blocked at t+0ns with no pending wake"),
            "{logs}"
        );
    }

    #[tokio::test]
    async fn shutdown_drops_pending_sleepers() {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default());

        let clock_in_task = clock.clone();
        let handle = clock
            .spawn(async move { clock_in_task.sleep(ms(10)).await })
            .unwrap();
        tokio::task::yield_now().await;

        // The initial task never blocks, so the sleeper cannot be released.
        let report = coordinator.shutdown().await.unwrap();
        assert_eq!((report.active, report.blocked, report.pending), (2, 1, 1));
        assert_eq!(report.now, VirtualTime::ZERO);

        assert!(matches!(handle.join().await.unwrap(), Err(Error::Halted)));
        assert!(matches!(clock.sleep(ms(1)).await, Err(Error::Halted)));
    }

    #[tokio::test]
    async fn independent_coordinators_do_not_interfere() {
        let (fast, fast_coordinator) = Coordinator::start(CoordinatorConfig::default());
        let (slow, slow_coordinator) = Coordinator::start(
            CoordinatorConfig::default().with_epoch(VirtualTime::from(ms(1000))),
        );

        fast.sleep(ms(1)).await.unwrap();
        slow.sleep(ms(500)).await.unwrap();

        assert_eq!(fast.now().await.unwrap(), at(1));
        assert_eq!(slow.now().await.unwrap(), at(1500));

        fast_coordinator.shutdown().await.unwrap();
        slow_coordinator.shutdown().await.unwrap();
    }

    #[test]
    fn threads_share_one_virtual_clock() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (clock, coordinator) = Coordinator::start_on(runtime.handle(), CoordinatorConfig::default());

        clock.sleep_blocking(ms(10)).unwrap();
        assert_eq!(clock.now_blocking().unwrap(), at(10));

        let spawn = |nap: Duration| {
            let clock_in_thread = clock.clone();
            clock
                .spawn_thread(move || {
                    clock_in_thread.sleep_blocking(nap)?;
                    clock_in_thread.now_blocking()
                })
                .unwrap()
        };
        let short = spawn(ms(5));
        let long = spawn(ms(20));

        let woke_short = {
            let _blocked = clock.enter_blocking().unwrap();
            short.join().unwrap().unwrap()
        };
        let woke_long = {
            let _blocked = clock.enter_blocking().unwrap();
            long.join().unwrap().unwrap()
        };

        assert_eq!(woke_short, at(15));
        assert_eq!(woke_long, at(30));

        let report = runtime.block_on(coordinator.shutdown()).unwrap();
        assert_eq!(report.active, 1);
        assert_eq!(report.blocked, 0);
    }
}
