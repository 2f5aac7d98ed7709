//! Concurrent, observable key-value cache.
//!
//! # Visibility
//!
//! `put` schedules the write on a Tokio task and returns immediately. A value
//! becomes visible to `get` only once that task has run, and two concurrent
//! `put`s on the same key resolve as "the task that runs last wins". Callers
//! that need read-your-write must `settle().await` first.
//!
//! `clear` drops what is visible now. It does not cancel scheduled writes, so a
//! `put` issued before `clear` may reappear after it.
//!
//! There is no eviction and no TTL: entries live until `clear`.

use moka::sync::Cache;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::errors::ProcessingError;
use crate::telemetry::MetricsSink;

/// Count of scheduled writes, with a wakeup for `settle` when it reaches zero.
#[derive(Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

/// One scheduled write. Dropping it settles the pending count whether or not
/// the entry was applied, so a task discarded at runtime shutdown cannot
/// leave `settle` waiting.
struct ScheduledWrite<K: Debug, V> {
    pending: Arc<PendingWrites>,
    entry: Option<(K, V)>,
}

impl<K: Debug, V> Drop for ScheduledWrite<K, V> {
    fn drop(&mut self) {
        if let Some((key, _)) = self.entry.take() {
            let lost =
                ProcessingError::CacheWriteLost("task dropped before the write ran".to_string());
            tracing::warn!("Dropping cache write for {:?}: {}", key, lost);
        }
        if self.pending.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pending.idle.notify_waiters();
        }
    }
}

/// Thread-safe map with fire-and-forget writes and hit/miss accounting.
pub struct ConcurrentCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<K, V>,
    pending: Arc<PendingWrites>,
    /// Runtime captured at construction, used by callers outside any runtime.
    runtime: Option<Handle>,
    metrics: Arc<dyn MetricsSink>,
}

impl<K, V> Clone for ConcurrentCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            pending: Arc::clone(&self.pending),
            runtime: self.runtime.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<K, V> ConcurrentCache<K, V>
where
    K: Hash + Eq + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds an empty cache bound to the current Tokio runtime, if there is one.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self::build(Handle::try_current().ok(), metrics)
    }

    /// Builds an empty cache whose writes run on `runtime` when `put` is
    /// called from a thread that has no runtime of its own.
    pub fn with_runtime(runtime: Handle, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::build(Some(runtime), metrics)
    }

    fn build(runtime: Option<Handle>, metrics: Arc<dyn MetricsSink>) -> Self {
        // No max_capacity and no expiry: moka never evicts on its own.
        let entries = Cache::builder().build();

        Self {
            entries,
            pending: Arc::new(PendingWrites::default()),
            runtime,
            metrics,
        }
    }

    /// Schedules the write and returns without waiting for it.
    ///
    /// The write runs on the caller's runtime, or on the one captured at
    /// construction. With neither available it is dropped and logged.
    pub fn put(&self, key: K, value: V) {
        let handle = match Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
        {
            Some(handle) => handle,
            None => {
                let lost = ProcessingError::CacheWriteLost("no Tokio runtime available".to_string());
                tracing::warn!("Dropping cache write for {:?}: {}", key, lost);
                return;
            }
        };

        self.pending.count.fetch_add(1, Ordering::AcqRel);
        let mut write = ScheduledWrite {
            pending: Arc::clone(&self.pending),
            entry: Some((key, value)),
        };
        let entries = self.entries.clone();

        handle.spawn(async move {
            if let Some((key, value)) = write.entry.take() {
                tracing::debug!("Cache entry added: {:?}", key);
                entries.insert(key, value);
            }
        });
    }

    /// Returns the visible value, counting exactly one hit or one miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.entries.get(key);
        if value.is_some() {
            self.metrics.increment_hit();
        } else {
            self.metrics.increment_miss();
        }
        value
    }

    /// Removes every currently visible entry.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        tracing::debug!("Cache cleared");
    }

    /// Number of scheduled writes whose task has not finished yet.
    pub fn pending_writes(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Waits until every write scheduled so far has been applied or dropped.
    pub async fn settle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            tokio::pin!(idle);
            // Register before reading the count so a wakeup in between is kept.
            idle.as_mut().enable();
            if self.pending_writes() == 0 {
                return;
            }
            idle.await;
        }
    }
}
