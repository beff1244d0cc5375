// ABOUTME: Shared fixtures for scheduler integration tests
// ABOUTME: Provides counting task bodies and recording lifecycle hooks

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use taskforge::{TaskContext, TaskError, TaskHooks};

pub type WorkResult = Result<Value, TaskError>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Body that fails the first `failures` executions with a retryable error,
/// then succeeds, counting every execution.
pub fn succeeds_after(
    executions: Arc<AtomicU32>,
    failures: u32,
) -> impl Fn(TaskContext, CancellationToken) -> BoxFuture<'static, WorkResult> + Send + Sync + 'static
{
    move |_context, _cancel| {
        let executions = Arc::clone(&executions);
        Box::pin(async move {
            let attempt = executions.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= failures {
                Err(TaskError::failed(format!("transient failure {attempt}")))
            } else {
                Ok(json!({ "attempt": attempt }))
            }
        })
    }
}

/// Body that fails every execution, counting them.
pub fn always_fails(
    executions: Arc<AtomicU32>,
) -> impl Fn(TaskContext, CancellationToken) -> BoxFuture<'static, WorkResult> + Send + Sync + 'static
{
    move |_context, _cancel| {
        let executions = Arc::clone(&executions);
        Box::pin(async move {
            executions.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::failed("permanent failure"))
        })
    }
}

/// Hooks implementation that records every lifecycle event in order.
#[derive(Clone, Default)]
pub struct RecordingHooks {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl TaskHooks for RecordingHooks {
    async fn on_start(&self) -> Result<(), TaskError> {
        self.record("start".to_string());
        Ok(())
    }

    async fn on_retry(&self, attempt: u32, error: &TaskError) -> Result<(), TaskError> {
        self.record(format!("retry:{attempt}:{error}"));
        Ok(())
    }

    async fn on_success(&self) -> Result<(), TaskError> {
        self.record("success".to_string());
        Ok(())
    }

    async fn on_failure(&self, error: &TaskError) -> Result<(), TaskError> {
        self.record(format!("failure:{error}"));
        Ok(())
    }

    async fn on_cancelled(&self) -> Result<(), TaskError> {
        self.record("cancelled".to_string());
        Ok(())
    }
}

/// Hooks that always error, for verifying hook failures never corrupt
/// scheduler state.
pub struct FaultyHooks;

#[async_trait]
impl TaskHooks for FaultyHooks {
    async fn on_start(&self) -> Result<(), TaskError> {
        Err(TaskError::failed("start hook exploded"))
    }

    async fn on_success(&self) -> Result<(), TaskError> {
        Err(TaskError::failed("success hook exploded"))
    }

    async fn on_failure(&self, _error: &TaskError) -> Result<(), TaskError> {
        Err(TaskError::failed("failure hook exploded"))
    }
}
