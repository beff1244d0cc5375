// ABOUTME: Per-task and per-run execution result types and aggregation
// ABOUTME: Collects terminal task outcomes into the report returned by the scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TaskError;
use crate::task::{Task, TaskStatus};

/// Terminal outcome of one task in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    /// Executions performed (1 initial + retries).
    pub attempts: u32,
    /// Accumulated execution duration across all attempts.
    pub elapsed: Duration,
    pub error: Option<TaskError>,
    pub result: Option<Value>,
}

impl TaskReport {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            name: task.name().to_string(),
            status: task.status(),
            attempts: task.attempts(),
            elapsed: task.elapsed(),
            error: task.error(),
            result: task.result(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Aggregate outcome of one scheduling run.
///
/// The failure map contains exactly the tasks that ended Failed; cancelled
/// tasks are tracked separately and are not failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total wall-clock duration of the run.
    pub elapsed: Duration,
    pub tasks: Vec<TaskReport>,
    pub failures: HashMap<String, TaskError>,
    pub cancelled: Vec<String>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub success_rate: f64,
}

impl RunReport {
    pub(crate) fn collect(
        run_id: String,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        tasks: &[Task],
    ) -> Self {
        let reports: Vec<TaskReport> = tasks.iter().map(TaskReport::from_task).collect();

        let mut failures = HashMap::new();
        let mut cancelled = Vec::new();
        for report in &reports {
            match report.status {
                TaskStatus::Failed => {
                    let error = report
                        .error
                        .clone()
                        .unwrap_or_else(|| TaskError::failed("unknown failure"));
                    failures.insert(report.task_id.clone(), error);
                }
                TaskStatus::Cancelled => cancelled.push(report.task_id.clone()),
                _ => {}
            }
        }

        let summary = RunSummary::from_reports(&reports);

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            elapsed,
            tasks: reports,
            failures,
            cancelled,
            summary,
        }
    }

    /// True when every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl RunSummary {
    fn from_reports(reports: &[TaskReport]) -> Self {
        let total = reports.len();
        let successful = reports.iter().filter(|t| t.is_successful()).count();
        let failed = reports
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let cancelled = reports
            .iter()
            .filter(|t| t.status == TaskStatus::Cancelled)
            .count();

        let success_rate = if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            100.0
        };

        Self {
            total_tasks: total,
            successful_tasks: successful,
            failed_tasks: failed,
            cancelled_tasks: cancelled,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal_task(id: &str, status: TaskStatus) -> Task {
        let task = Task::builder(id).id(id).build();
        task.transition(TaskStatus::Running);
        match status {
            TaskStatus::Success => {
                task.set_result(Value::from("ok"));
                task.transition(TaskStatus::Success);
            }
            TaskStatus::Failed => {
                task.set_error(TaskError::failed("boom"));
                task.transition(TaskStatus::Failed);
            }
            TaskStatus::Cancelled => {
                task.transition(TaskStatus::Cancelled);
            }
            _ => {}
        }
        task
    }

    #[test]
    fn test_collect_partitions_outcomes() {
        let tasks = vec![
            terminal_task("ok", TaskStatus::Success),
            terminal_task("bad", TaskStatus::Failed),
            terminal_task("gone", TaskStatus::Cancelled),
        ];

        let report = RunReport::collect(
            "run".to_string(),
            Utc::now(),
            Duration::from_millis(5),
            &tasks,
        );

        assert_eq!(report.tasks.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures.get("bad"),
            Some(&TaskError::failed("boom"))
        );
        assert_eq!(report.cancelled, vec!["gone"]);
        assert!(!report.is_success());

        assert_eq!(report.summary.total_tasks, 3);
        assert_eq!(report.summary.successful_tasks, 1);
        assert_eq!(report.summary.failed_tasks, 1);
        assert_eq!(report.summary.cancelled_tasks, 1);
    }

    #[test]
    fn test_all_success_report() {
        let tasks = vec![
            terminal_task("a", TaskStatus::Success),
            terminal_task("b", TaskStatus::Success),
        ];

        let report =
            RunReport::collect("run".to_string(), Utc::now(), Duration::ZERO, &tasks);

        assert!(report.is_success());
        assert!(!report.has_failures());
        assert_eq!(report.summary.success_rate, 100.0);
        assert_eq!(report.task("a").unwrap().result, Some(Value::from("ok")));
    }

    #[test]
    fn test_empty_run_report() {
        let report = RunReport::collect("run".to_string(), Utc::now(), Duration::ZERO, &[]);

        assert!(report.is_success());
        assert_eq!(report.summary, RunSummary {
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            success_rate: 100.0,
        });
    }
}
