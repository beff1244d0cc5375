// ABOUTME: Orchestrator driving concurrent execution of a validated task graph
// ABOUTME: Enforces dependency awaits, timeouts, retries and cancellation, then aggregates results

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::TaskContext;
use crate::error::{SchedulerError, TaskError};
use crate::graph::DependencyGraph;
use crate::result::RunReport;
use crate::task::{Task, TaskStatus};
use serde_json::Value;

/// Executes task sets concurrently on the tokio runtime.
///
/// Every task in a run becomes its own tokio task; dependency ordering is
/// enforced only through completion-signal awaits, so unrelated branches
/// of the graph execute in parallel, bounded by the scheduler's
/// concurrency limit.
pub struct Scheduler {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs the task set with a fresh context and no external cancellation.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunReport, SchedulerError> {
        self.run_with(tasks, TaskContext::new(), CancellationToken::new())
            .await
    }

    /// Runs the task set against a caller-supplied context and run-level
    /// cancellation token.
    ///
    /// Configuration errors (cycle, missing dependency, duplicate id) are
    /// returned before any task starts. Task-level errors never surface
    /// here; they are captured in the report's failure map. A failed or
    /// cancelled dependency does not fail its dependents — dependents only
    /// await completion and may still run against a partial context. Only
    /// cancelling `cancel` (or the tasks themselves) stops execution.
    #[instrument(skip_all, fields(task_count = tasks.len()))]
    pub async fn run_with(
        &self,
        tasks: Vec<Task>,
        context: TaskContext,
        cancel: CancellationToken,
    ) -> Result<RunReport, SchedulerError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        let graph = DependencyGraph::build(&tasks)?;
        let order = graph.execution_order()?;

        info!(
            "Starting run {} with {} tasks ({} roots)",
            run_id,
            tasks.len(),
            graph.root_tasks().len()
        );
        debug!("Run {} seed order: {:?}", run_id, order);

        // Completion watchers downstream dependents will await.
        let watchers: HashMap<String, watch::Receiver<TaskStatus>> = tasks
            .iter()
            .map(|task| (task.id().to_string(), task.subscribe()))
            .collect();

        // Higher priority launches first; stable among equals.
        let mut launch = tasks.clone();
        launch.sort_by_key(|task| std::cmp::Reverse(task.priority()));

        let mut handles = Vec::with_capacity(launch.len());
        for task in launch {
            let dependencies: Vec<(String, watch::Receiver<TaskStatus>)> = graph
                .dependencies_of(task.id())
                .iter()
                .map(|dep| (dep.clone(), watchers[dep].clone()))
                .collect();

            handles.push(tokio::spawn(drive_task(
                task,
                dependencies,
                context.clone(),
                cancel.clone(),
                Arc::clone(&self.semaphore),
            )));
        }

        for handle in join_all(handles).await {
            if let Err(err) = handle {
                error!("Task driver join error: {}", err);
            }
        }

        let report = RunReport::collect(run_id, started_at, clock.elapsed(), &tasks);
        info!(
            "Run {} finished in {:?}: {} succeeded, {} failed, {} cancelled",
            report.run_id,
            report.elapsed,
            report.summary.successful_tasks,
            report.summary.failed_tasks,
            report.summary.cancelled_tasks
        );

        Ok(report)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Resolves when either the task's own token or the run token fires.
async fn cancel_signal(task: &CancellationToken, run: &CancellationToken) {
    tokio::select! {
        _ = task.cancelled() => {}
        _ = run.cancelled() => {}
    }
}

/// Drives one task from Pending to a terminal state.
async fn drive_task(
    task: Task,
    dependencies: Vec<(String, watch::Receiver<TaskStatus>)>,
    context: TaskContext,
    run_cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
) {
    // Await every dependency's completion signal before touching any
    // resource. This is an await-completion contract, not failure
    // propagation: a failed or cancelled dependency still releases its
    // dependents, which may read a partial context.
    for (dep_id, mut rx) in dependencies {
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                debug!(
                    "Task {} observed dependency {} complete as {}",
                    task.id(),
                    dep_id,
                    status
                );
                break;
            }
            tokio::select! {
                _ = cancel_signal(task.cancel_token(), &run_cancel) => {
                    finish_cancelled(&task).await;
                    return;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if task.is_cancelled() || run_cancel.is_cancelled() {
        finish_cancelled(&task).await;
        return;
    }

    let _permit = tokio::select! {
        _ = cancel_signal(task.cancel_token(), &run_cancel) => {
            finish_cancelled(&task).await;
            return;
        }
        permit = semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                finish_cancelled(&task).await;
                return;
            }
        },
    };

    if !task.start_delay().is_zero() {
        tokio::select! {
            _ = cancel_signal(task.cancel_token(), &run_cancel) => {
                finish_cancelled(&task).await;
                return;
            }
            _ = sleep(task.start_delay()) => {}
        }
    }

    loop {
        let attempt = task.record_attempt();
        if !task.transition(TaskStatus::Running) {
            return;
        }
        if attempt == 1 {
            if let Err(err) = task.hooks().on_start().await {
                warn!("Task {} start hook failed: {}", task.id(), err);
            }
        }

        let attempt_started = Instant::now();
        let outcome = run_attempt(&task, &context, &run_cancel).await;
        task.add_elapsed(attempt_started.elapsed());

        match outcome {
            Ok(value) => {
                task.set_result(value);
                task.transition(TaskStatus::Success);
                if let Err(err) = task.hooks().on_success().await {
                    warn!("Task {} success hook failed: {}", task.id(), err);
                }
                debug!("Task {} succeeded on attempt {}", task.id(), attempt);
                return;
            }
            Err(TaskError::Cancelled) => {
                finish_cancelled(&task).await;
                return;
            }
            Err(err) => {
                let retries_done = attempt - 1;
                let policy = task
                    .retry_policy()
                    .filter(|p| retries_done < p.max_retries() && p.should_retry(&err));

                match policy {
                    Some(policy) => {
                        let retry_number = retries_done + 1;
                        task.transition(TaskStatus::Retrying);
                        if let Err(hook_err) = task.hooks().on_retry(retry_number, &err).await {
                            warn!("Task {} retry hook failed: {}", task.id(), hook_err);
                        }

                        let delay = policy.delay(retry_number);
                        warn!(
                            "Task {} attempt {} failed: {}; retry {}/{} in {:?}",
                            task.id(),
                            attempt,
                            err,
                            retry_number,
                            policy.max_retries(),
                            delay
                        );

                        tokio::select! {
                            _ = cancel_signal(task.cancel_token(), &run_cancel) => {
                                finish_cancelled(&task).await;
                                return;
                            }
                            _ = sleep(delay) => {}
                        }
                    }
                    None => {
                        task.set_error(err.clone());
                        task.transition(TaskStatus::Failed);
                        if let Err(hook_err) = task.hooks().on_failure(&err).await {
                            warn!("Task {} failure hook failed: {}", task.id(), hook_err);
                        }
                        error!(
                            "Task {} failed after {} attempt(s): {}",
                            task.id(),
                            attempt,
                            err
                        );
                        return;
                    }
                }
            }
        }
    }
}

/// Runs a single attempt of the task body.
///
/// The body is spawned so a panic is caught at the task boundary and
/// converted into a failure instead of crashing the scheduler. The timeout
/// guard is scoped to this attempt only.
async fn run_attempt(
    task: &Task,
    context: &TaskContext,
    run_cancel: &CancellationToken,
) -> Result<Value, TaskError> {
    let work = Arc::clone(task.work());
    let attempt_context = context.clone();
    let attempt_cancel = task.cancel_token().clone();
    let mut handle =
        tokio::spawn(async move { work.run(attempt_context, attempt_cancel).await });
    let abort = handle.abort_handle();

    let join = if task.timeout().is_zero() {
        tokio::select! {
            _ = cancel_signal(task.cancel_token(), run_cancel) => {
                abort.abort();
                return Err(TaskError::Cancelled);
            }
            join = &mut handle => join,
        }
    } else {
        let limit = task.timeout();
        tokio::select! {
            _ = cancel_signal(task.cancel_token(), run_cancel) => {
                abort.abort();
                return Err(TaskError::Cancelled);
            }
            outcome = timeout(limit, &mut handle) => match outcome {
                Ok(join) => join,
                Err(_) => {
                    abort.abort();
                    return Err(TaskError::Timeout { timeout: limit });
                }
            },
        }
    };

    match join {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(TaskError::failed(format!("task panicked: {err}"))),
        Err(_) => Err(TaskError::Cancelled),
    }
}

async fn finish_cancelled(task: &Task) {
    if task.transition(TaskStatus::Cancelled) {
        if let Err(err) = task.hooks().on_cancelled().await {
            warn!("Task {} cancelled hook failed: {}", task.id(), err);
        }
        info!("Task {} cancelled", task.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_run() {
        let scheduler = Scheduler::new(4);
        let report = scheduler.run(Vec::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_task_starts() {
        let executions = Arc::new(AtomicU32::new(0));
        let body = {
            let executions = Arc::clone(&executions);
            move |_: TaskContext, _: CancellationToken| {
                let executions = Arc::clone(&executions);
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }
        };

        let tasks = vec![
            Task::builder("a").id("a").depends_on("b").work(body.clone()).build(),
            Task::builder("b").id("b").depends_on("a").work(body).build(),
        ];

        let scheduler = Scheduler::new(4);
        let err = scheduler.run(tasks).await.unwrap_err();

        assert!(matches!(err, SchedulerError::CircularDependency { .. }));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_enforced() {
        let scheduler = Scheduler::new(2);
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let tasks: Vec<Task> = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                Task::builder(format!("task_{i}"))
                    .id(format!("task_{i}"))
                    .work(move |_, _| {
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(30)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(Value::Null)
                        }
                    })
                    .build()
            })
            .collect();

        let report = scheduler.run(tasks).await.unwrap();

        assert!(report.is_success());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_in_body_becomes_failure() {
        let task = Task::builder("boom")
            .id("boom")
            .work(|_, _| async {
                let boom = true;
                if boom {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            })
            .build();

        let scheduler = Scheduler::new(1);
        let report = scheduler.run(vec![task]).await.unwrap();

        assert_eq!(report.summary.failed_tasks, 1);
        let err = report.failures.get("boom").unwrap();
        assert!(matches!(err, TaskError::Failed(msg) if msg.contains("panicked")));
    }
}
