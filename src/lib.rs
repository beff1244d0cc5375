// ABOUTME: Main library module for the taskforge task scheduler
// ABOUTME: Exports the scheduler, task model, dependency graph and supporting types

//! Dependency-aware concurrent task scheduler.
//!
//! Callers build [`Task`]s declaring priorities, dependencies (by id or by
//! kind tag), timeouts, start delays and retry policies, then hand them to
//! a [`Scheduler`]. The scheduler validates the dependency graph before
//! anything runs, executes tasks concurrently on the tokio runtime,
//! retries failures per policy, propagates cooperative cancellation and
//! returns an aggregate [`RunReport`].
//!
//! ```no_run
//! use taskforge::{ContextKey, Scheduler, Task, TaskContext};
//! use serde_json::json;
//!
//! const GREETING: ContextKey<String> = ContextKey::new("greeting");
//!
//! # async fn demo() -> Result<(), taskforge::SchedulerError> {
//! let produce = Task::builder("produce")
//!     .id("produce")
//!     .work(|ctx: TaskContext, _| async move {
//!         ctx.put(GREETING, "hello".to_string()).await;
//!         Ok(json!("done"))
//!     })
//!     .build();
//!
//! let consume = Task::builder("consume")
//!     .id("consume")
//!     .depends_on("produce")
//!     .work(|ctx: TaskContext, _| async move {
//!         let greeting = ctx.get(GREETING).await.unwrap_or_default();
//!         Ok(json!(greeting))
//!     })
//!     .build();
//!
//! let report = Scheduler::new(8).run(vec![produce, consume]).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod task;

// Re-export commonly used types
pub use context::{ContextKey, TaskContext};
pub use error::{SchedulerError, TaskError};
pub use graph::DependencyGraph;
pub use result::{RunReport, RunSummary, TaskReport};
pub use retry::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use scheduler::Scheduler;
pub use task::{DependencyRef, Task, TaskBuilder, TaskHooks, TaskStatus, Work};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
