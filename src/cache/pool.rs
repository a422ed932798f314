//! Per-function pools with request admission.
//!
//! The pool cache maps a function key to a group of addressable
//! instances. Each instance entry carries a concurrency budget
//! (`requests_per_pod`); a request is admitted against the first entry
//! with spare budget. When no entry has room the caller is either told
//! to specialize a new pod (`NotFound`, while the group is still under
//! its `concurrency` cap) or parked on a FIFO wait-queue until capacity
//! frees up.
//!
//! # Entry lifecycle
//!
//! ```text
//!         set_svc_value
//!   ────────────────────▶ available (active = 0)
//!                         │
//!           get_svc_value │  mark_available
//!    ┌──────────────────▶ in use (active > 0) ──────┐
//!    │                                               │
//!    └────── active < requests_per_pod ──────────────┘
//!                         │
//!                  delete_value
//!                         ▼
//!                      removed
//! ```
//!
//! # Locking
//!
//! The group map has its own mutex; each group's state sits behind a
//! per-group mutex. Neither lock is ever held across an await — parked
//! waiters hold only a oneshot receiver. Wakeups transfer admission
//! before the send and roll back if the receiver is gone, so an entry's
//! `active_requests` never exceeds its budget.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{MuninnError, Result};
use crate::types::{FunctionService, Quantity};

pub(crate) struct PoolCache {
    groups: Mutex<HashMap<String, Arc<PoolGroup>>>,
}

struct PoolGroup {
    inner: Mutex<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    svcs: HashMap<String, PoolEntry>,
    queue: VecDeque<Waiter>,
    /// In-flight specializations promised to callers that were told
    /// `NotFound`.
    svc_waiting: usize,
}

struct PoolEntry {
    val: FunctionService,
    active_requests: usize,
    requests_per_pod: usize,
    current_cpu_usage: Quantity,
    cpu_limit: Quantity,
}

/// A parked request. Removal on cancellation is lazy: dropping the
/// receiver closes the channel and wakeups skip the dead slot.
struct Waiter {
    tx: oneshot::Sender<FunctionService>,
}

/// Diagnostic view of one group, for the dumper.
pub(crate) struct GroupSnapshot {
    pub svc_waiting: usize,
    pub queue_len: usize,
    pub svcs: Vec<EntrySnapshot>,
}

/// Diagnostic view of one pool entry.
pub(crate) struct EntrySnapshot {
    pub address: String,
    pub function_name: String,
    pub current_cpu_usage: Quantity,
    pub cpu_limit: Quantity,
}

impl PoolCache {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn group(&self, key: &str) -> Arc<PoolGroup> {
        let mut groups = self.groups.lock().expect("pool lock poisoned");
        groups
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(PoolGroup {
                    inner: Mutex::new(GroupInner::default()),
                })
            })
            .clone()
    }

    fn existing_group(&self, key: &str) -> Option<Arc<PoolGroup>> {
        self.groups
            .lock()
            .expect("pool lock poisoned")
            .get(key)
            .cloned()
    }

    /// Admit a request for `key`, or tell the caller what to do instead.
    ///
    /// Returns a clone of an entry with spare budget if one exists.
    /// Returns `NotFound` when the group is still under `concurrency` —
    /// the caller should specialize a new pod and hand it back via
    /// [`set_svc_value`](Self::set_svc_value). Otherwise parks until a
    /// wakeup from `set_svc_value` or `mark_available`; waiters are
    /// woken in enqueue order. Dropping the returned future abandons
    /// the wait without leaking group state.
    pub async fn get_svc_value(
        &self,
        key: &str,
        requests_per_pod: usize,
        concurrency: usize,
    ) -> Result<FunctionService> {
        let group = self.group(key);
        let rx = {
            let mut inner = group.inner.lock().expect("pool group lock poisoned");
            for entry in inner.svcs.values_mut() {
                if entry.active_requests < requests_per_pod {
                    entry.active_requests += 1;
                    entry.val.atime = SystemTime::now();
                    return Ok(entry.val.clone());
                }
            }
            if inner.svcs.len() + inner.svc_waiting < concurrency {
                inner.svc_waiting += 1;
                return Err(MuninnError::NotFound(format!(
                    "function '{key}' still under concurrency cap, specialize a new pod"
                )));
            }
            let (tx, rx) = oneshot::channel();
            inner.queue.push_back(Waiter { tx });
            rx
        };
        rx.await.map_err(|_| {
            MuninnError::Internal(format!("pool group for '{key}' dropped a parked request"))
        })
    }

    /// Insert or update the entry at `(key, address)`. Idempotent.
    ///
    /// Whether the address is fresh or updated, the first live parked
    /// waiter (if any) is handed this entry when it has spare budget,
    /// with the admission already accounted. A fresh address
    /// additionally completes one promised specialization, decrementing
    /// the group's waiting counter.
    pub fn set_svc_value(
        &self,
        key: &str,
        address: &str,
        fsvc: FunctionService,
        cpu_limit: Quantity,
        requests_per_pod: usize,
    ) {
        let group = self.group(key);
        let mut inner = group.inner.lock().expect("pool group lock poisoned");
        let GroupInner {
            svcs,
            queue,
            svc_waiting,
        } = &mut *inner;
        if let Some(entry) = svcs.get_mut(address) {
            entry.val = fsvc;
            entry.cpu_limit = cpu_limit;
            entry.requests_per_pod = requests_per_pod;
            wake_waiters(entry, queue, 1);
            return;
        }
        *svc_waiting = svc_waiting.saturating_sub(1);
        let mut entry = PoolEntry {
            val: fsvc,
            active_requests: 0,
            requests_per_pod,
            current_cpu_usage: Quantity::default(),
            cpu_limit,
        };
        wake_waiters(&mut entry, queue, 1);
        svcs.insert(address.to_string(), entry);
    }

    /// Release one admission at `(key, address)`.
    ///
    /// Freed budget is handed to parked waiters in enqueue order.
    pub fn mark_available(&self, key: &str, address: &str) {
        let Some(group) = self.existing_group(key) else {
            debug!(key, "mark_available for unknown function key");
            return;
        };
        let mut inner = group.inner.lock().expect("pool group lock poisoned");
        let GroupInner { svcs, queue, .. } = &mut *inner;
        let Some(entry) = svcs.get_mut(address) else {
            debug!(key, address, "mark_available for unknown address");
            return;
        };
        entry.active_requests = entry.active_requests.saturating_sub(1);
        wake_waiters(entry, queue, usize::MAX);
    }

    /// Record the advisory CPU usage for `(key, address)`.
    pub fn set_cpu_utilization(&self, key: &str, address: &str, usage: Quantity) {
        let Some(group) = self.existing_group(key) else {
            debug!(key, "cpu utilization for unknown function key");
            return;
        };
        let mut inner = group.inner.lock().expect("pool group lock poisoned");
        match inner.svcs.get_mut(address) {
            Some(entry) => entry.current_cpu_usage = usage,
            None => debug!(key, address, "cpu utilization for unknown address"),
        }
    }

    /// Remove the entry at `(key, address)`.
    ///
    /// A group left empty with nothing waiting is dropped.
    pub fn delete_value(&self, key: &str, address: &str) -> Result<()> {
        let mut groups = self.groups.lock().expect("pool lock poisoned");
        let Some(group) = groups.get(key) else {
            return Err(MuninnError::NotFound(format!(
                "no pool group for function '{key}'"
            )));
        };
        let mut inner = group.inner.lock().expect("pool group lock poisoned");
        if inner.svcs.remove(address).is_none() {
            return Err(MuninnError::NotFound(format!(
                "no pool entry for '{address}' under function '{key}'"
            )));
        }
        inner.queue.retain(|w| !w.tx.is_closed());
        let empty = inner.svcs.is_empty() && inner.queue.is_empty() && inner.svc_waiting == 0;
        drop(inner);
        if empty {
            groups.remove(key);
        }
        Ok(())
    }

    /// Snapshot every entry with no active requests, across all groups.
    pub fn list_available(&self) -> Vec<FunctionService> {
        let groups: Vec<_> = self
            .groups
            .lock()
            .expect("pool lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut out = Vec::new();
        for group in groups {
            let inner = group.inner.lock().expect("pool group lock poisoned");
            out.extend(
                inner
                    .svcs
                    .values()
                    .filter(|e| e.active_requests == 0)
                    .map(|e| e.val.clone()),
            );
        }
        out
    }

    /// Snapshot all groups for diagnostic dumping.
    pub fn group_snapshots(&self) -> Vec<GroupSnapshot> {
        let groups: Vec<_> = self
            .groups
            .lock()
            .expect("pool lock poisoned")
            .values()
            .cloned()
            .collect();
        groups
            .iter()
            .map(|group| {
                let inner = group.inner.lock().expect("pool group lock poisoned");
                GroupSnapshot {
                    svc_waiting: inner.svc_waiting,
                    queue_len: inner.queue.len(),
                    svcs: inner
                        .svcs
                        .iter()
                        .map(|(address, e)| EntrySnapshot {
                            address: address.clone(),
                            function_name: e.val.function.name.clone(),
                            current_cpu_usage: e.current_cpu_usage,
                            cpu_limit: e.cpu_limit,
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

/// Hand up to `limit` admissions on `entry` to parked waiters, FIFO.
///
/// The admission is taken before the send and rolled back if the
/// waiter's receiver is already gone, so budget never leaks to
/// cancelled requests.
fn wake_waiters(entry: &mut PoolEntry, queue: &mut VecDeque<Waiter>, limit: usize) {
    let mut woken = 0;
    while woken < limit && entry.active_requests < entry.requests_per_pod {
        let Some(waiter) = queue.pop_front() else {
            break;
        };
        if waiter.tx.is_closed() {
            continue;
        }
        entry.active_requests += 1;
        entry.val.atime = SystemTime::now();
        if waiter.tx.send(entry.val.clone()).is_err() {
            entry.active_requests -= 1;
            continue;
        }
        woken += 1;
    }
}
