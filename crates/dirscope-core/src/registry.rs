/// Task registry — owns every running loader and aggregator.
///
/// Tasks are keyed by their [`TaskTarget`]: a tree node for loaders, the
/// single "current selection" slot for the aggregator. Every target belongs
/// to a [`ScopeId`] handed out by [`TaskRegistry::new_scope`], so several
/// consumers can share one registry without their node indices or selection
/// slots colliding. At most one task runs per target. Starting a second task for a busy target is rejected; the
/// caller must [`TaskRegistry::cancel`] the old one first.
///
/// # Teardown
///
/// `cancel` removes the task from the map, sets its cancel flag, then blocks
/// until the worker acknowledges by returning (bounded by `cancel_timeout`).
/// A worker that misses the deadline is detached with a warning and left to
/// finish on its own; its token is already cancelled, so it can deliver
/// nothing further.
///
/// All lifecycle operations (`start`, `cancel`, `cancel_all`) are serialised
/// by one gate, so no new task can start while a cancel is still waiting.
/// The task map itself sits behind a separate mutex that workers also take,
/// briefly, when they finish.
use crate::error::RegistryError;
use crate::model::NodeIndex;
use crate::scanner::CancelToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Identity of one task run. Strictly increasing per registry, starting at 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

/// Owner of a group of targets, typically one per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

/// What a task operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskTarget {
    /// Directory loader for one tree node.
    Node(ScopeId, NodeIndex),
    /// The size aggregator for the current selection.
    Selection(ScopeId),
}

impl TaskTarget {
    pub fn scope(self) -> ScopeId {
        match self {
            Self::Node(scope, _) | Self::Selection(scope) => scope,
        }
    }
}

/// How a task's run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
}

/// Kind of worker, used for the thread name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Load,
    Aggregate,
}

impl TaskKind {
    fn thread_name(self) -> &'static str {
        match self {
            Self::Load => "dirscope-loader",
            Self::Aggregate => "dirscope-sizer",
        }
    }
}

struct RunningTask {
    id: TaskId,
    token: CancelToken,
    done_rx: Receiver<TaskOutcome>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    running: HashMap<TaskTarget, RunningTask>,
    last_outcome: HashMap<TaskTarget, (TaskId, TaskOutcome)>,
}

pub struct TaskRegistry {
    inner: Arc<Mutex<Inner>>,
    lifecycle: Mutex<()>,
    next_id: AtomicU64,
    next_scope: AtomicU64,
    cancel_timeout: Duration,
}

impl TaskRegistry {
    pub fn new(cancel_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            lifecycle: Mutex::new(()),
            next_id: AtomicU64::new(0),
            next_scope: AtomicU64::new(0),
            cancel_timeout,
        }
    }

    pub fn cancel_timeout(&self) -> Duration {
        self.cancel_timeout
    }

    /// Issue a fresh scope for a new consumer.
    pub fn new_scope(&self) -> ScopeId {
        ScopeId(self.next_scope.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Start `work` on a named background thread for `target`.
    ///
    /// `work` receives the new task's id and cancel token and returns how it
    /// ended. A panic inside `work` is caught and recorded as
    /// [`TaskOutcome::Failed`].
    pub fn start<F>(
        &self,
        target: TaskTarget,
        kind: TaskKind,
        work: F,
    ) -> Result<TaskId, RegistryError>
    where
        F: FnOnce(TaskId, CancelToken) -> TaskOutcome + Send + 'static,
    {
        let _gate = self.lifecycle.lock();
        let mut inner = self.inner.lock();
        if inner.running.contains_key(&target) {
            return Err(RegistryError::AlreadyRunning { target });
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancelToken::new();
        let worker_token = token.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.inner);

        let thread = thread::Builder::new()
            .name(kind.thread_name().into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(id, worker_token)))
                    .unwrap_or_else(|_| {
                        error!("Task {id:?} for {target:?} panicked");
                        TaskOutcome::Failed
                    });
                finish(&shared, target, id, outcome);
                let _ = done_tx.send(outcome);
            })
            .map_err(RegistryError::Spawn)?;

        debug!("Started {kind:?} task {id:?} for {target:?}");
        inner.running.insert(
            target,
            RunningTask {
                id,
                token,
                done_rx,
                thread,
            },
        );
        Ok(id)
    }

    /// Cancel the task running for `target` and wait for it to stop.
    ///
    /// Returns `false` if nothing was running for `target`.
    pub fn cancel(&self, target: TaskTarget) -> bool {
        let _gate = self.lifecycle.lock();
        let Some(task) = self.inner.lock().running.remove(&target) else {
            return false;
        };
        task.token.cancel();
        let deadline = Instant::now() + self.cancel_timeout;
        await_stop(target, task, deadline);
        true
    }

    /// Cancel every running task and wait for all of them.
    ///
    /// All flags are set first, then each worker is awaited against one
    /// shared deadline. Returns the number of tasks that were running.
    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true)
    }

    /// [`cancel_all`](Self::cancel_all) restricted to one scope. Tasks of
    /// other scopes keep running.
    pub fn cancel_scope(&self, scope: ScopeId) -> usize {
        self.cancel_where(|target| target.scope() == scope)
    }

    fn cancel_where(&self, matches: impl Fn(TaskTarget) -> bool) -> usize {
        let _gate = self.lifecycle.lock();
        let tasks: Vec<(TaskTarget, RunningTask)> = {
            let mut inner = self.inner.lock();
            let targets: Vec<TaskTarget> =
                inner.running.keys().copied().filter(|t| matches(*t)).collect();
            targets
                .into_iter()
                .filter_map(|t| inner.running.remove(&t).map(|task| (t, task)))
                .collect()
        };
        if tasks.is_empty() {
            return 0;
        }
        for (_, task) in &tasks {
            task.token.cancel();
        }

        let count = tasks.len();
        let deadline = Instant::now() + self.cancel_timeout;
        for (target, task) in tasks {
            await_stop(target, task, deadline);
        }
        info!("Cancelled {count} running task(s)");
        count
    }

    pub fn state(&self, target: TaskTarget) -> TaskState {
        if self.inner.lock().running.contains_key(&target) {
            TaskState::Running
        } else {
            TaskState::Idle
        }
    }

    pub fn is_running(&self, target: TaskTarget) -> bool {
        self.state(target) == TaskState::Running
    }

    /// Id of the task currently running for `target`, if any.
    pub fn running_task(&self, target: TaskTarget) -> Option<TaskId> {
        self.inner.lock().running.get(&target).map(|t| t.id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Running tasks that belong to `scope`.
    pub fn running_in_scope(&self, scope: ScopeId) -> usize {
        self.inner
            .lock()
            .running
            .keys()
            .filter(|t| t.scope() == scope)
            .count()
    }

    /// How the most recent finished task for `target` ended.
    pub fn last_outcome(&self, target: TaskTarget) -> Option<(TaskId, TaskOutcome)> {
        self.inner.lock().last_outcome.get(&target).copied()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_CANCEL_TIMEOUT_MS))
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Worker-side bookkeeping on exit: release the map slot (if it is still
/// ours) and record the outcome.
fn finish(inner: &Mutex<Inner>, target: TaskTarget, id: TaskId, outcome: TaskOutcome) {
    let mut inner = inner.lock();
    if inner.running.get(&target).is_some_and(|t| t.id == id) {
        inner.running.remove(&target);
    }
    let newer = inner
        .last_outcome
        .get(&target)
        .map_or(true, |(recorded, _)| *recorded <= id);
    if newer {
        inner.last_outcome.insert(target, (id, outcome));
    }
    debug!("Task {id:?} for {target:?} finished: {outcome:?}");
}

fn await_stop(target: TaskTarget, task: RunningTask, deadline: Instant) {
    let RunningTask {
        id,
        done_rx,
        thread,
        ..
    } = task;
    match done_rx.recv_deadline(deadline) {
        Ok(outcome) => {
            debug!("Task {id:?} for {target:?} acknowledged cancel: {outcome:?}");
            if thread.join().is_err() {
                warn!("Task {id:?} thread panicked after acknowledging");
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("Task {id:?} for {target:?} did not stop in time; detaching");
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("Task {id:?} for {target:?} exited without acknowledging");
            let _ = thread.join();
        }
    }
}
