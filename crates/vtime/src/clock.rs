//! The caller-side API.
//!
//! Every instrumented program talks to its coordinator through a [`Clock`].
//! The liveness calls must be paired exactly: one `task_ended` per
//! `task_started` and one `block_end` per `block_begin`, on every exit path.
//! [`TaskGuard`] and [`BlockGuard`] make that pairing hold across early
//! returns and panics.
//!
//! Joining a task spawned with [`Clock::spawn`] goes through
//! [`TaskHandle::join`]. The exiting task ends its joiner's block before it
//! ends itself, so the clock cannot move between the two.

use crate::coordinator::Request;
use crate::error::{Error, Result};
use crate::report::Snapshot;
use crate::time::VirtualTime;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to a coordinator's virtual clock.
///
/// Cloning is cheap; all clones feed the same ordered request stream.
#[derive(Debug, Clone)]
pub struct Clock {
    tx: mpsc::UnboundedSender<Request>,
}

impl Clock {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<Request>) -> Self {
        Self { tx }
    }

    fn send(&self, request: Request) -> Result<()> {
        self.tx.send(request).map_err(|_| Error::Halted)
    }

    /// Suspends the calling task until `duration` of virtual time has passed.
    ///
    /// The caller counts as blocked from the moment the request is accepted.
    /// Dropping the returned future does not withdraw the sleep: the caller
    /// stays counted as blocked until its wake time comes up, and that
    /// release is then skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator stops before the release.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let (wake, woken) = oneshot::channel();
        self.send(Request::Sleep { duration, wake })?;
        woken.await.map_err(|_| Error::Halted)
    }

    /// Blocking variant of [`sleep`](Self::sleep) for plain OS threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator stops before the release.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn sleep_blocking(&self, duration: Duration) -> Result<()> {
        let (wake, woken) = oneshot::channel();
        self.send(Request::Sleep { duration, wake })?;
        woken.blocking_recv().map_err(|_| Error::Halted)
    }

    /// Sleeps until the clock reaches `deadline`. Returns at once if it already has.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator stops.
    pub async fn sleep_until(&self, deadline: VirtualTime) -> Result<()> {
        // The clock cannot move between the two requests: this task is live
        // and not blocked.
        let now = self.now().await?;
        self.sleep(deadline.duration_since(now)).await
    }

    /// Returns the current virtual time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub async fn now(&self) -> Result<VirtualTime> {
        let (reply, answer) = oneshot::channel();
        self.send(Request::Now { reply })?;
        answer.await.map_err(|_| Error::Halted)
    }

    /// Blocking variant of [`now`](Self::now) for plain OS threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn now_blocking(&self) -> Result<VirtualTime> {
        let (reply, answer) = oneshot::channel();
        self.send(Request::Now { reply })?;
        answer.blocking_recv().map_err(|_| Error::Halted)
    }

    /// Returns the coordinator's counters. Does not count as blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, answer) = oneshot::channel();
        self.send(Request::Snapshot { reply })?;
        answer.await.map_err(|_| Error::Halted)
    }

    /// Announces a new concurrent task. Call before the task starts running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn task_started(&self) -> Result<()> {
        self.send(Request::TaskStarted)
    }

    /// Announces that a task has terminated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn task_ended(&self) -> Result<()> {
        self.send(Request::TaskEnded)
    }

    /// Announces that the caller is about to block on a non-timer operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn block_begin(&self) -> Result<()> {
        self.send(Request::BlockBegin)
    }

    /// Announces that the caller's non-timer blocking operation completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn block_end(&self) -> Result<()> {
        self.send(Request::BlockEnd)
    }

    /// Registers a task and returns a guard that ends it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn register_task(&self) -> Result<TaskGuard> {
        self.task_started()?;
        Ok(TaskGuard {
            clock: self.clone(),
            handoff: None,
        })
    }

    /// Marks the caller blocked until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub fn enter_blocking(&self) -> Result<BlockGuard> {
        self.block_begin()?;
        Ok(BlockGuard {
            clock: self.clone(),
        })
    }

    /// Awaits `future` with the caller marked blocked.
    ///
    /// Use for channel receives, locks and anything else that parks the task
    /// without involving the virtual clock. Join spawned tasks with
    /// [`TaskHandle::join`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    pub async fn blocking<F: Future>(&self, future: F) -> Result<F::Output> {
        let _blocked = self.enter_blocking()?;
        Ok(future.await)
    }

    /// Spawns a tokio task registered with the coordinator.
    ///
    /// Join it with [`TaskHandle::join`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handoff = Arc::new(Mutex::new(Handoff::default()));
        let mut guard = self.register_task()?;
        guard.handoff = Some(Arc::clone(&handoff));
        let inner = tokio::spawn(async move {
            let _task = guard;
            future.await
        });
        Ok(TaskHandle {
            inner,
            handoff,
            clock: self.clone(),
        })
    }

    /// Spawns an OS thread registered with the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Halted`] if the coordinator has stopped, or
    /// [`Error::Spawn`] if the thread could not be created.
    pub fn spawn_thread<F, T>(&self, f: F) -> Result<thread::JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.register_task()?;
        let handle = thread::Builder::new()
            .name("vtime-task".to_string())
            .spawn(move || {
                let _task = guard;
                f()
            })?;
        Ok(handle)
    }
}

/// Join state shared by a spawned task and its [`TaskHandle`].
#[derive(Debug, Default)]
struct Handoff {
    finished: bool,
    joiner_blocked: bool,
}

fn lock(handoff: &Mutex<Handoff>) -> MutexGuard<'_, Handoff> {
    handoff.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a task registered; sends `task_ended` when dropped.
///
/// For tasks from [`Clock::spawn`], a blocked joiner is unblocked first.
#[derive(Debug)]
#[must_use = "dropping the guard ends the task immediately"]
pub struct TaskGuard {
    clock: Clock,
    handoff: Option<Arc<Mutex<Handoff>>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(handoff) = &self.handoff {
            let mut state = lock(handoff);
            state.finished = true;
            if std::mem::take(&mut state.joiner_blocked) && self.clock.block_end().is_err() {
                trace!("Joiner unblock not delivered: coordinator stopped");
            }
        }
        if self.clock.task_ended().is_err() {
            trace!("Task end not delivered: coordinator stopped");
        }
    }
}

/// Handle to a task started with [`Clock::spawn`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    inner: JoinHandle<T>,
    handoff: Arc<Mutex<Handoff>>,
    clock: Clock,
}

impl<T> TaskHandle<T> {
    /// Waits for the task to finish, counted as blocked meanwhile.
    ///
    /// The task's exit unblocks the caller in the same breath as it ends, so
    /// the caller resumes at the virtual time the task finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if the task panicked or was aborted.
    pub async fn join(self) -> Result<T> {
        let _blocked = self.enter_join();
        Ok(self.inner.await?)
    }

    /// Returns true once the task has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn enter_join(&self) -> Option<JoinGuard> {
        let mut state = lock(&self.handoff);
        if state.finished {
            return None;
        }
        if self.clock.block_begin().is_err() {
            // Nothing left to account for.
            return None;
        }
        state.joiner_blocked = true;
        Some(JoinGuard {
            clock: self.clock.clone(),
            handoff: Arc::clone(&self.handoff),
        })
    }
}

/// Ends the joiner's block unless the exiting task already did.
struct JoinGuard {
    clock: Clock,
    handoff: Arc<Mutex<Handoff>>,
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.handoff);
        if std::mem::take(&mut state.joiner_blocked) && self.clock.block_end().is_err() {
            trace!("Block end not delivered: coordinator stopped");
        }
    }
}

/// Keeps the caller marked blocked; sends `block_end` when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard unblocks immediately"]
pub struct BlockGuard {
    clock: Clock,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if self.clock.block_end().is_err() {
            trace!("Block end not delivered: coordinator stopped");
        }
    }
}
