//! Two-level task scheduler: stages are identified by an ordinal and run strictly in
//! ascending order, the tasks of a single stage run concurrently.
//!
//! Cancellation is cooperative, through a [`CancelToken`] that every task can check
//! between its suspension points.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use std::pin::Pin;
use std::fmt;

use tokio::sync::Notify;
use tokio::task::JoinSet;

use tracing::{debug, warn};

use crate::progress::{ProgressAggregator, ProgressSink, ProgressUpdater};


/// Type alias for errors returned by tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type TaskFuture = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;
type TaskOp = Box<dyn FnOnce(TaskContext) -> TaskFuture + Send>;

/// A cooperative cancellation flag, cancelling a token also cancels all its children.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelInner>>>,
}

impl CancelInner {

    fn cancel(&self) {

        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock().unwrap_or_else(|e| e.into_inner()));
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }

    }

}

impl CancelToken {

    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child token, cancelled when this token is, but that can be cancelled
    /// on its own without cancelling this one.
    pub fn child(&self) -> Self {

        let child = Self::new();

        let mut children = self.inner.children.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cancelled() {
            child.inner.cancelled.store(true, Ordering::Release);
        } else {
            children.retain(|c| c.strong_count() != 0);
            children.push(Arc::downgrade(&child.inner));
        }

        child

    }

    /// Request cancellation, this is idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until this token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Return a cancelled error if this token has been cancelled.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// State of a task, terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Waiting = 0,
    Executing = 1,
    Finished = 2,
    Failed = 3,
}

impl TaskState {

    fn from_u8(n: u8) -> Self {
        match n {
            0 => Self::Waiting,
            1 => Self::Executing,
            2 => Self::Finished,
            _ => Self::Failed,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

}

struct TaskShared {
    name: Arc<str>,
    ordinal: i32,
    state: AtomicU8,
    progress: ProgressUpdater,
}

impl TaskShared {

    /// Transition to the given state, ignored if the current state is terminal.
    fn transition(&self, state: TaskState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (!TaskState::from_u8(current).is_terminal()).then_some(state as u8)
        });
    }

}

/// A handle to observe a task pushed to a scheduler.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[inline]
    pub fn ordinal(&self) -> i32 {
        self.shared.ordinal
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Current progress of the task, in range 0 to 1.
    #[inline]
    pub fn progress(&self) -> f64 {
        self.shared.progress.get()
    }

}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name())
            .field("ordinal", &self.ordinal())
            .field("state", &self.state())
            .finish()
    }
}

/// The context given to a task operation when it's started.
pub struct TaskContext {
    name: Arc<str>,
    cancel: CancelToken,
    progress: ProgressUpdater,
}

impl TaskContext {

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token cancelled when the run is cancelled or when a sibling task fails.
    #[inline]
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    #[inline]
    pub fn progress(&self) -> &ProgressUpdater {
        &self.progress
    }

}

/// A named asynchronous operation, bound to a stage ordinal.
pub struct Task {
    ordinal: i32,
    name: Arc<str>,
    op: TaskOp,
}

impl Task {

    pub fn new<F, Fut, E>(ordinal: i32, name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            ordinal,
            name: Arc::from(name.into()),
            op: Box::new(move |ctx| -> TaskFuture {
                Box::pin(async move { op(ctx).await.map_err(Into::into) })
            }),
        }
    }

    #[inline]
    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The scheduler of tasks grouped in stages.
pub struct TaskScheduler {
    tasks: Vec<(Task, Arc<TaskShared>)>,
    cancel: CancelToken,
    aggregator: ProgressAggregator,
    report_interval: Duration,
}

impl TaskScheduler {

    /// Create a new scheduler, with its own cancel token and no total progress sink.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancel: CancelToken::new(),
            aggregator: ProgressAggregator::detached(),
            report_interval: Duration::from_millis(100),
        }
    }

    /// Report the total progress of all tasks, each task having the same weight, to
    /// the given sink. This must be called before any task is pushed.
    pub fn set_progress_sink(&mut self, sink: impl ProgressSink) -> &mut Self {
        debug_assert!(self.tasks.is_empty(), "progress sink must be set before pushing tasks");
        self.aggregator = ProgressAggregator::new(sink);
        self
    }

    pub fn set_report_interval(&mut self, interval: Duration) -> &mut Self {
        self.report_interval = interval;
        self
    }

    /// Use the given token for cancelling the whole run.
    pub fn set_cancel(&mut self, cancel: CancelToken) -> &mut Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Push a task to be run, returning a handle to observe it.
    pub fn push(&mut self, task: Task) -> TaskHandle {
        let shared = Arc::new(TaskShared {
            name: Arc::clone(&task.name),
            ordinal: task.ordinal,
            state: AtomicU8::new(TaskState::Waiting as u8),
            progress: self.aggregator.create_channel(0.0),
        });
        self.tasks.push((task, Arc::clone(&shared)));
        TaskHandle { shared }
    }

    /// Run all stages in ascending ordinal, returning the first error. Any negative
    /// ordinal fails before any task is run.
    pub async fn run(self) -> Result<()> {

        let Self { tasks, cancel, mut aggregator, report_interval } = self;

        if let Some((task, _)) = tasks.iter().find(|(task, _)| task.ordinal < 0) {
            return Err(Error::InvalidOrdinal {
                name: task.name.to_string(),
                ordinal: task.ordinal,
            });
        }

        // Now that we know the count, every task gets the same weight.
        let weight = 1.0 / tasks.len().max(1) as f64;
        let mut stages = BTreeMap::<i32, Vec<_>>::new();
        for (task, shared) in tasks {
            shared.progress.set_weight(weight);
            stages.entry(task.ordinal).or_default().push((task, shared));
        }

        aggregator.start(report_interval);

        for (ordinal, stage) in stages {

            let res = match cancel.check() {
                Ok(()) => {
                    debug!(ordinal, count = stage.len(), "running stage");
                    run_stage(&cancel, stage).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = res {
                aggregator.abandon().await;
                return Err(e);
            }

        }

        aggregator.stop().await;
        Ok(())

    }

}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Run all tasks of a single stage concurrently, the first failure cancels siblings
/// and all of them are awaited before returning it.
async fn run_stage(cancel: &CancelToken, stage: Vec<(Task, Arc<TaskShared>)>) -> Result<()> {

    let stage_cancel = cancel.child();
    // Tasks are owned by the set, dropping this future aborts all of them.
    let mut set = JoinSet::new();
    let mut running = HashMap::new();

    for (task, shared) in stage {

        let ctx = TaskContext {
            name: Arc::clone(&shared.name),
            cancel: stage_cancel.clone(),
            progress: shared.progress.clone(),
        };

        shared.transition(TaskState::Executing);
        let handle = set.spawn((task.op)(ctx));
        running.insert(handle.id(), shared);

    }

    let mut first_error = None;

    while let Some(joined) = set.join_next_with_id().await {

        let (id, res) = match joined {
            Ok((id, res)) => (id, Ok(res)),
            Err(e) => (e.id(), Err(e)),
        };

        let Some(shared) = running.remove(&id) else {
            continue;
        };

        let error = match res {
            Ok(Ok(())) => {
                shared.progress.set(1.0);
                shared.transition(TaskState::Finished);
                continue;
            }
            Ok(Err(source)) => Error::Failed { name: shared.name.to_string(), source },
            Err(e) if e.is_panic() => Error::Panicked { name: shared.name.to_string() },
            // Only happens if the runtime is shutting down.
            Err(_) => Error::Cancelled,
        };

        shared.transition(TaskState::Failed);

        if first_error.is_none() {
            warn!(task = %shared.name, error = %error, "task failed, cancelling siblings");
            stage_cancel.cancel();
            first_error = Some(error);
        }

    }

    match first_error {
        // Failures caused by an external cancellation are reported as such.
        Some(_) if cancel.is_cancelled() => Err(Error::Cancelled),
        Some(e) => Err(e),
        None => Ok(()),
    }

}

/// The scheduler could not run all of its tasks.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A task has a negative ordinal, nothing has been run.
    #[error("invalid ordinal {ordinal} for task: {name}")]
    InvalidOrdinal {
        name: String,
        ordinal: i32,
    },
    /// A task failed, its stage has been cancelled and no later stage was run.
    #[error("task failed: {name}: {source}")]
    Failed {
        name: String,
        #[source]
        source: BoxError,
    },
    /// A task panicked, this is handled like a failure.
    #[error("task panicked: {name}")]
    Panicked {
        name: String,
    },
    /// The run has been cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Type alias for a result with the task error type.
pub type Result<T> = std::result::Result<T, Error>;
