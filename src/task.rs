// ABOUTME: Task model, builder, lifecycle state machine and capability traits
// ABOUTME: Defines the unit of schedulable work with priority, dependencies, retry and hooks

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::retry::RetryPolicy;

/// Task lifecycle states.
///
/// `Pending → Running → {Success, Failed, Retrying, Cancelled}`, with
/// `Retrying → Running` after the backoff delay. Success, Failed and
/// Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Retrying, Running)
                | (Retrying, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A dependency declaration on another task, either by its id or by a
/// kind tag resolved against the task set before sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyRef {
    Id(String),
    Kind(String),
}

/// The body of a task. Receives the run-shared [`TaskContext`] and the
/// task's own cancellation token for cooperative shutdown checks.
#[async_trait]
pub trait Work: Send + Sync {
    async fn run(&self, context: TaskContext, cancel: CancellationToken)
        -> Result<Value, TaskError>;
}

struct NoopWork;

#[async_trait]
impl Work for NoopWork {
    async fn run(&self, _: TaskContext, _: CancellationToken) -> Result<Value, TaskError> {
        Ok(Value::Null)
    }
}

type WorkFn =
    Box<dyn Fn(TaskContext, CancellationToken) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

struct FnWork {
    f: WorkFn,
}

#[async_trait]
impl Work for FnWork {
    async fn run(
        &self,
        context: TaskContext,
        cancel: CancellationToken,
    ) -> Result<Value, TaskError> {
        (self.f)(context, cancel).await
    }
}

/// Side-effecting lifecycle callbacks supplied by the task author.
///
/// An error returned by a hook is logged and discarded by the scheduler;
/// it never affects the task's status.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    /// Fires when the task enters Running for the first time.
    async fn on_start(&self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Fires when the task re-enters Running via Retrying, with the retry
    /// number (1-based) and the error that triggered it.
    async fn on_retry(&self, _attempt: u32, _error: &TaskError) -> Result<(), TaskError> {
        Ok(())
    }

    async fn on_success(&self) -> Result<(), TaskError> {
        Ok(())
    }

    async fn on_failure(&self, _error: &TaskError) -> Result<(), TaskError> {
        Ok(())
    }

    async fn on_cancelled(&self) -> Result<(), TaskError> {
        Ok(())
    }
}

struct NoopHooks;

#[async_trait]
impl TaskHooks for NoopHooks {}

struct TaskRuntime {
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
    result: OnceLock<Value>,
    error: Mutex<Option<TaskError>>,
    attempts: AtomicU32,
    elapsed: Mutex<Duration>,
}

impl TaskRuntime {
    fn new() -> Self {
        let (status, _) = watch::channel(TaskStatus::Pending);
        Self {
            status,
            cancel: CancellationToken::new(),
            result: OnceLock::new(),
            error: Mutex::new(None),
            attempts: AtomicU32::new(0),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }
}

struct TaskInner {
    id: String,
    name: String,
    kind: Option<String>,
    priority: i32,
    timeout: Duration,
    start_delay: Duration,
    depends_on: Vec<DependencyRef>,
    retry: Option<Arc<dyn RetryPolicy>>,
    hooks: Arc<dyn TaskHooks>,
    work: Arc<dyn Work>,
    runtime: TaskRuntime,
}

/// The unit of schedulable work.
///
/// Cheaply cloneable; clones share the same underlying state, so callers
/// can keep one to [`cancel`](Task::cancel) or
/// [`await_completion`](Task::await_completion) the task, or inspect the
/// outcome after the run. A task is single-use: it belongs to at most one
/// scheduling run.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> Option<&str> {
        self.inner.kind.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// `Duration::ZERO` means the task never times out.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn start_delay(&self) -> Duration {
        self.inner.start_delay
    }

    pub fn depends_on(&self) -> &[DependencyRef] {
        &self.inner.depends_on
    }

    pub fn status(&self) -> TaskStatus {
        *self.inner.runtime.status.borrow()
    }

    /// Number of executions so far (1 initial + retries).
    pub fn attempts(&self) -> u32 {
        self.inner.runtime.attempts.load(Ordering::Relaxed)
    }

    /// Accumulated execution duration across all attempts.
    pub fn elapsed(&self) -> Duration {
        *self.inner.runtime.elapsed.lock().expect("elapsed lock poisoned")
    }

    /// The success value, present only after a Success terminal status.
    pub fn result(&self) -> Option<Value> {
        self.inner.runtime.result.get().cloned()
    }

    /// The terminating error, present only after a Failed terminal status.
    pub fn error(&self) -> Option<TaskError> {
        self.inner.runtime.error.lock().expect("error lock poisoned").clone()
    }

    /// Requests cancellation. Idempotent and callable at any time; an
    /// in-flight attempt is stopped at its next suspension point.
    pub fn cancel(&self) {
        self.inner.runtime.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.runtime.cancel.is_cancelled()
    }

    /// Suspends until the task reaches any terminal state and returns it.
    /// Does not error on failure; inspect the returned status instead.
    pub async fn await_completion(&self) -> TaskStatus {
        let mut rx = self.inner.runtime.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.inner.runtime.status.subscribe()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.runtime.cancel
    }

    pub(crate) fn work(&self) -> &Arc<dyn Work> {
        &self.inner.work
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn TaskHooks> {
        &self.inner.hooks
    }

    pub(crate) fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.inner.retry.as_ref()
    }

    /// Advances the state machine, publishing the new status to completion
    /// watchers. Illegal transitions are refused and logged.
    pub(crate) fn transition(&self, next: TaskStatus) -> bool {
        let mut accepted = false;
        self.inner.runtime.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                accepted = true;
                true
            } else {
                false
            }
        });

        if accepted {
            debug!("Task {} transitioned to {}", self.inner.id, next);
        } else {
            warn!(
                "Task {} refused transition {} -> {}",
                self.inner.id,
                self.status(),
                next
            );
        }
        accepted
    }

    pub(crate) fn record_attempt(&self) -> u32 {
        self.inner.runtime.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_elapsed(&self, duration: Duration) {
        *self.inner.runtime.elapsed.lock().expect("elapsed lock poisoned") += duration;
    }

    pub(crate) fn set_result(&self, value: Value) {
        // Set at most once, only on the successful terminal transition.
        let _ = self.inner.runtime.result.set(value);
    }

    pub(crate) fn set_error(&self, error: TaskError) {
        *self.inner.runtime.error.lock().expect("error lock poisoned") = Some(error);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Task`]. Only a name is required; the id defaults to a
/// fresh uuid and the body defaults to a no-op returning `Value::Null`.
pub struct TaskBuilder {
    id: Option<String>,
    name: String,
    kind: Option<String>,
    priority: i32,
    timeout: Duration,
    start_delay: Duration,
    depends_on: Vec<DependencyRef>,
    retry: Option<Arc<dyn RetryPolicy>>,
    hooks: Option<Arc<dyn TaskHooks>>,
    work: Option<Arc<dyn Work>>,
}

impl TaskBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: None,
            priority: 0,
            timeout: Duration::ZERO,
            start_delay: Duration::ZERO,
            depends_on: Vec::new(),
            retry: None,
            hooks: None,
            work: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Kind tag other tasks can reference with
    /// [`depends_on_kind`](TaskBuilder::depends_on_kind).
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Higher priority launches first among tasks whose dependencies are
    /// already satisfied.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Per-attempt timeout. `Duration::ZERO` (the default) is unbounded.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(DependencyRef::Id(id.into()));
        self
    }

    pub fn depends_on_kind(mut self, kind: impl Into<String>) -> Self {
        self.depends_on.push(DependencyRef::Kind(kind.into()));
        self
    }

    pub fn retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    pub fn hooks(mut self, hooks: impl TaskHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Sets the task body from an async closure.
    pub fn work<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.work = Some(Arc::new(FnWork {
            f: Box::new(move |context, cancel| Box::pin(f(context, cancel))),
        }));
        self
    }

    /// Sets the task body from a [`Work`] implementation.
    pub fn work_with(mut self, work: impl Work + 'static) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

    pub fn build(self) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name: self.name,
                kind: self.kind,
                priority: self.priority,
                timeout: self.timeout,
                start_delay: self.start_delay,
                depends_on: self.depends_on,
                retry: self.retry,
                hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
                work: self.work.unwrap_or_else(|| Arc::new(NoopWork)),
                runtime: TaskRuntime::new(),
            }),
        }
    }
}
