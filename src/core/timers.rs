// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Timer registry for per-sensor deferred callbacks
//!
//! Holds at most one live timer per [`TimerKey`]. Arming a key that already
//! has a timer aborts the old one under the same lock that installs the new
//! one, so there is never a window with two. A firing timer removes itself
//! from the map before its callback runs, and only if its generation is still
//! the current one for the key; a timer that lost a race with `cancel` or a
//! re-arm sees a different generation and returns without side effects.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Kinds of timeout tracked per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    OpenEscalation,
    HeartbeatTimeout,
}

/// Registry key: one entity, one kind of timeout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub entity: String,
    pub kind: TimeoutKind,
}

impl TimerKey {
    pub fn open(source: &str) -> Self {
        Self {
            entity: source.to_string(),
            kind: TimeoutKind::OpenEscalation,
        }
    }

    pub fn heartbeat(identity: &str) -> Self {
        Self {
            entity: identity.to_string(),
            kind: TimeoutKind::HeartbeatTimeout,
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.entity, self.kind)
    }
}

/// Reference to one armed timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    pub key: TimerKey,
    generation: u64,
}

struct TimerEntry {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner {
    timers: Mutex<HashMap<TimerKey, TimerEntry>>,
    next_generation: AtomicU64,
}

/// Shared, cloneable timer registry
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<Inner>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Schedule `callback` to run after `after`, replacing any timer under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, key: TimerKey, after: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut timers = self.inner.timers.lock();

        if let Some(previous) = timers.remove(&key) {
            previous.task.abort();
            debug!("Replaced timer {} (generation {})", key, previous.generation);
        }

        let registry = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if claim(&registry, &task_key, generation) {
                trace!("Timer {} fired", task_key);
                callback.await;
            } else {
                trace!("Timer {} fired stale, ignoring", task_key);
            }
        });

        timers.insert(key.clone(), TimerEntry { generation, task });
        debug!("Armed timer {} for {:?}", key, after);

        TimerHandle { key, generation }
    }

    /// Cancel the timer under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.inner.timers.lock().remove(key) {
            Some(entry) => {
                entry.task.abort();
                debug!("Cancelled timer {}", key);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inner.timers.lock().drain().collect();
        for (_, entry) in &drained {
            entry.task.abort();
        }
        drained.len()
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.inner.timers.lock().contains_key(key)
    }

    /// Cancel `handle` only if it is still the live timer for its key; a
    /// newer timer armed under the same key is left alone.
    pub fn disarm(&self, handle: &TimerHandle) -> bool {
        let mut timers = self.inner.timers.lock();
        match timers.get(&handle.key) {
            Some(entry) if entry.generation == handle.generation => {
                if let Some(entry) = timers.remove(&handle.key) {
                    entry.task.abort();
                }
                debug!("Disarmed timer {}", handle.key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove the entry for `key` if it still belongs to `generation`.
fn claim(registry: &Weak<Inner>, key: &TimerKey, generation: u64) -> bool {
    let Some(inner) = registry.upgrade() else {
        return false;
    };
    let mut timers = inner.timers.lock();
    match timers.get(key) {
        Some(entry) if entry.generation == generation => {
            timers.remove(key);
            true
        }
        _ => false,
    }
}
