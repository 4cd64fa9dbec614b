// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process deduplication of concurrent flows.
//!
//! The first caller for a key spawns the flow as its own task; callers
//! arriving while it is pending await the same shared result. The task runs
//! to completion even when every caller has gone away, and removes its own
//! entry when it finishes, so the next caller starts fresh.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::warn;

/// Shared result of a spawned flow; `None` when the task panicked or was
/// aborted.
type Flow<V> = Shared<BoxFuture<'static, Option<V>>>;

struct Entry<V: Clone> {
    id: u64,
    flow: Flow<V>,
}

struct Inflight<K, V: Clone> {
    next_id: u64,
    flows: HashMap<K, Entry<V>>,
}

/// Removes a flow's own entry when its task ends, including by panic or
/// abort. A newer entry under the same key is left alone.
struct Cleanup<K: Eq + Hash, V: Clone> {
    inflight: Arc<Mutex<Inflight<K, V>>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V: Clone> Drop for Cleanup<K, V> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock();
        if inflight.flows.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            inflight.flows.remove(&self.key);
        }
    }
}

/// Map of in-flight flows keyed by `K`.
pub struct Memoizer<K, V: Clone> {
    inflight: Arc<Mutex<Inflight<K, V>>>,
}

impl<K, V> Memoizer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { inflight: Arc::new(Mutex::new(Inflight { next_id: 0, flows: HashMap::new() })) }
    }

    /// Join the pending flow for `key`, or spawn one with `start`.
    ///
    /// Must be called from within a tokio runtime. Returns `None` only when
    /// the flow's task panicked or was aborted.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flow = {
            let mut inflight = self.inflight.lock();
            match inflight.flows.get(&key) {
                Some(entry) => entry.flow.clone(),
                None => {
                    let id = inflight.next_id;
                    inflight.next_id += 1;
                    let flow = self.spawn(key.clone(), id, start());
                    inflight.flows.insert(key, Entry { id, flow: flow.clone() });
                    flow
                }
            }
        };
        flow.await
    }

    fn spawn<Fut>(&self, key: K, id: u64, fut: Fut) -> Flow<V>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let cleanup = Cleanup { inflight: Arc::clone(&self.inflight), key, id };
        let task = tokio::spawn(async move {
            let _cleanup = cleanup;
            fut.await
        });
        async move {
            match task.await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("memoized flow did not complete: {e}");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of flows currently pending.
    pub fn pending(&self) -> usize {
        self.inflight.lock().flows.len()
    }

    /// Forget every pending flow. Running flows still finish and callers
    /// already awaiting keep their result.
    pub fn clear(&self) {
        self.inflight.lock().flows.clear();
    }
}

impl<K, V> Default for Memoizer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Clone> std::fmt::Debug for Memoizer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer").field("pending", &self.inflight.lock().flows.len()).finish()
    }
}

#[cfg(test)]
#[path = "memo_tests.rs"]
mod tests;
