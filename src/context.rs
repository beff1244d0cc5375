// ABOUTME: Shared per-run task context with typed keys
// ABOUTME: Concurrency-safe key/value store used to pass results between dependent tasks

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Typed lookup key for [`TaskContext`]. The key carries the value's type,
/// so a lookup by a `ContextKey<T>` only ever yields a `T` — no casting at
/// the use site.
///
/// ```
/// use taskforge::ContextKey;
///
/// const ARTIFACT_PATH: ContextKey<String> = ContextKey::new("artifact_path");
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Mutable key/value store scoped to one scheduling run and shared by all
/// tasks in that run. Clones share the same underlying map.
///
/// Concurrent writes racing on the same key are last-writer-wins; the only
/// ordering guarantee is the one imposed by dependency edges — a task may
/// assume its dependencies' writes are visible once its own execution
/// begins, because the scheduler awaits dependency completion first.
#[derive(Clone, Default)]
pub struct TaskContext {
    values: Arc<RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put<T: Send + Sync + 'static>(&self, key: ContextKey<T>, value: T) {
        self.values.write().await.insert(key.name, Box::new(value));
    }

    /// Returns a clone of the stored value, or `None` when the key is
    /// absent or the stored value has a different type.
    pub async fn get<T: Clone + Send + Sync + 'static>(&self, key: ContextKey<T>) -> Option<T> {
        self.values
            .read()
            .await
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub async fn contains_key<T>(&self, key: ContextKey<T>) -> bool {
        self.values.read().await.contains_key(key.name)
    }

    pub async fn remove<T: Send + Sync + 'static>(&self, key: ContextKey<T>) -> Option<T> {
        self.values
            .write()
            .await
            .remove(key.name)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").finish_non_exhaustive()
    }
}
