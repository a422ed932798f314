//! The function service cache.
//!
//! [`FunctionServiceCache`] tracks live function services three ways at
//! once — by function key, by pod address, by function UID — all
//! referring to the same record, alongside a pool cache that does
//! per-pod request admission for pool-managed functions.
//!
//! # Serialization discipline
//!
//! Atime touches and scan-style reads (`touch_by_address`, `list_old`,
//! `list_old_for_pool`, `log`) must observe a coherent view of the
//! indices, so they are shipped over a request channel to a single
//! cooperative task and handled one at a time. Direct operations
//! (`add`, the lookups, `delete_entry`) go straight to the indices,
//! which are individually thread-safe. No ordering is promised between
//! the two paths; callers that need dump-after-add ordering use the
//! serializer path for both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{MuninnError, Result};
use crate::telemetry;
use crate::types::{FunctionRef, FunctionService, Quantity};

use super::pool::PoolCache;
use super::snapshot::{self, DumpConfig};
use super::Index;

/// Outcome of [`FunctionServiceCache::add`].
#[derive(Debug, Clone)]
pub enum AddOutcome {
    /// The record was inserted; all three indices now cover it.
    Fresh,
    /// The function key was already bound. The existing record is
    /// returned (its atime freshly touched) and the caller should reuse
    /// it instead of the one it tried to insert.
    Reused(FunctionService),
}

enum SerializerRequest {
    Touch {
        address: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ListOld {
        age: Duration,
        reply: oneshot::Sender<Vec<FunctionService>>,
    },
    ListOldPool {
        age: Duration,
        reply: oneshot::Sender<Vec<FunctionService>>,
    },
    Log {
        reply: oneshot::Sender<()>,
    },
}

/// In-memory registry of live function services.
///
/// All returns are value clones; mutating a returned record never
/// changes cached state. Dropping the cache stops its serializer task.
pub struct FunctionServiceCache {
    by_function: Arc<Index<FunctionService>>,
    by_address: Arc<Index<FunctionRef>>,
    by_function_uid: Arc<Index<FunctionRef>>,
    pool: Arc<PoolCache>,
    /// Pod name → record, maintained by the owning specializer for
    /// teardown lookups.
    pod_to_fsvc: DashMap<String, FunctionService>,
    /// Function-service name → websocket flag.
    websocket_fsvc: DashMap<String, bool>,
    dump_config: DumpConfig,
    request_tx: mpsc::Sender<SerializerRequest>,
}

impl FunctionServiceCache {
    /// Create a cache with default dump configuration.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (spawns the serializer task).
    pub fn new() -> Self {
        Self::with_config(DumpConfig::default())
    }

    /// Create a cache that writes diagnostic dumps per `dump_config`.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (spawns the serializer task).
    pub fn with_config(dump_config: DumpConfig) -> Self {
        let by_function = Arc::new(Index::new());
        let by_address = Arc::new(Index::new());
        let by_function_uid = Arc::new(Index::new());
        let pool = Arc::new(PoolCache::new());

        let (request_tx, request_rx) = mpsc::channel(1);
        let serializer = Serializer {
            by_function: by_function.clone(),
            by_address: by_address.clone(),
            pool: pool.clone(),
            rx: request_rx,
        };
        tokio::spawn(serializer.run());

        Self {
            by_function,
            by_address,
            by_function_uid,
            pool,
            pod_to_fsvc: DashMap::new(),
            websocket_fsvc: DashMap::new(),
            dump_config,
            request_tx,
        }
    }

    /// Insert a function service unless its function key is already
    /// bound.
    ///
    /// On a fresh insert the record lands in all three indices with
    /// `ctime = atime = now`; collisions on the address and UID indices
    /// are accepted silently (multiple specializations of the same
    /// function share them). If the key is already bound the existing
    /// record is touched and returned as [`AddOutcome::Reused`].
    pub async fn add(&self, mut fsvc: FunctionService) -> Result<AddOutcome> {
        let key = fsvc.function.cache_key();
        let now = SystemTime::now();
        fsvc.ctime = now;
        fsvc.atime = now;

        let address = fsvc.address.clone();
        let uid = fsvc.function.uid.clone();
        let fref = fsvc.function.clone();

        if let Some(existing) = self.by_function.insert(&key, fsvc) {
            self.touch_by_address(&existing.address).await?;
            return Ok(AddOutcome::Reused(existing));
        }
        let _ = self.by_address.insert(&address, fref.clone());
        let _ = self.by_function_uid.insert(&uid, fref);
        Ok(AddOutcome::Fresh)
    }

    /// Add a function service to the pool cache with `ctime = atime =
    /// now`.
    pub fn add_func(&self, mut fsvc: FunctionService, requests_per_pod: usize) {
        let now = SystemTime::now();
        fsvc.ctime = now;
        fsvc.atime = now;
        let key = fsvc.function.cache_key();
        let address = fsvc.address.clone();
        let cpu_limit = fsvc.cpu_limit;
        self.pool
            .set_svc_value(&key, &address, fsvc, cpu_limit, requests_per_pod);
    }

    /// Look up by function identity. Refreshes the record's atime and
    /// returns a copy.
    pub fn get_by_function(&self, function: &FunctionRef) -> Result<FunctionService> {
        let key = function.cache_key();
        match self
            .by_function
            .update(&key, |svc| svc.atime = SystemTime::now())
        {
            Some(svc) => {
                record_lookup("get_by_function", true);
                Ok(svc)
            }
            None => {
                record_lookup("get_by_function", false);
                Err(MuninnError::NotFound(format!(
                    "no function service for '{key}'"
                )))
            }
        }
    }

    /// Look up by function UID (two hops: UID → function → record).
    /// Refreshes the record's atime and returns a copy.
    pub fn get_by_function_uid(&self, uid: &str) -> Result<FunctionService> {
        let Some(fref) = self.by_function_uid.get(uid) else {
            record_lookup("get_by_function_uid", false);
            return Err(MuninnError::NotFound(format!(
                "no function for uid '{uid}'"
            )));
        };
        let key = fref.cache_key();
        match self
            .by_function
            .update(&key, |svc| svc.atime = SystemTime::now())
        {
            Some(svc) => {
                record_lookup("get_by_function_uid", true);
                Ok(svc)
            }
            None => {
                record_lookup("get_by_function_uid", false);
                Err(MuninnError::NotFound(format!(
                    "uid '{uid}' references missing function service '{key}'"
                )))
            }
        }
    }

    /// Admit a request against the function's pool, or signal the
    /// caller to specialize.
    ///
    /// `NotFound` means the pool is under its `concurrency` cap and the
    /// caller should specialize a new pod (then hand it back via
    /// [`add_func`](Self::add_func)). When the cap is reached the call
    /// parks until capacity frees up; dropping the future abandons the
    /// wait.
    pub async fn get_func_svc(
        &self,
        function: &FunctionRef,
        requests_per_pod: usize,
        concurrency: usize,
    ) -> Result<FunctionService> {
        let key = function.cache_key();
        match self
            .pool
            .get_svc_value(&key, requests_per_pod, concurrency)
            .await
        {
            Ok(svc) => {
                record_lookup("get_func_svc", true);
                Ok(svc)
            }
            Err(e) => {
                record_lookup("get_func_svc", false);
                debug!(%key, "pool admission missed, caller should specialize");
                Err(e)
            }
        }
    }

    /// Refresh the atime of the record behind `address`, via the
    /// serializer.
    pub async fn touch_by_address(&self, address: &str) -> Result<()> {
        self.submit(|reply| SerializerRequest::Touch {
            address: address.to_string(),
            reply,
        })
        .await?
    }

    /// Record advisory CPU usage for a pool entry.
    pub fn set_cpu_utilization(&self, function: &FunctionRef, address: &str, usage: Quantity) {
        self.pool
            .set_cpu_utilization(&function.cache_key(), address, usage);
    }

    /// Release one admission at `(function, address)` in the pool.
    pub fn mark_available(&self, function: &FunctionRef, address: &str) {
        self.pool.mark_available(&function.cache_key(), address);
    }

    /// Remove a record from all three indices.
    ///
    /// Per-index failures are logged, not propagated — a record that is
    /// only partially indexed still comes out. Observes the
    /// running-duration metric.
    pub fn delete_entry(&self, fsvc: &FunctionService) {
        let key = fsvc.function.cache_key();
        if self.by_function.remove(&key).is_none() {
            error!(
                function = %fsvc.function.name,
                %key,
                "error deleting function service from function index"
            );
        }
        if self.by_address.remove(&fsvc.address).is_none() {
            error!(
                function = %fsvc.function.name,
                address = %fsvc.address,
                "error deleting function service from address index"
            );
        }
        if self.by_function_uid.remove(&fsvc.function.uid).is_none() {
            error!(
                function = %fsvc.function.name,
                uid = %fsvc.function.uid,
                "error deleting function service from uid index"
            );
        }
        observe_running_duration(fsvc);
    }

    /// Remove the pool entry at `(function, address)`.
    ///
    /// Failures are logged, not propagated.
    pub fn delete_function_svc(&self, fsvc: &FunctionService) {
        let key = fsvc.function.cache_key();
        if let Err(e) = self.pool.delete_value(&key, &fsvc.address) {
            error!(
                function = %fsvc.function.name,
                address = %fsvc.address,
                error = %e,
                "error deleting function service from pool"
            );
        }
    }

    /// Delete `fsvc` from the indices if it has idled longer than
    /// `min_age`. Returns whether the deletion happened.
    pub fn delete_old(&self, fsvc: &FunctionService, min_age: Duration) -> bool {
        if idle_for(fsvc) < min_age {
            return false;
        }
        self.delete_entry(fsvc);
        true
    }

    /// Delete `fsvc` from the pool if it has idled longer than
    /// `min_age`. Returns whether the deletion happened.
    pub fn delete_old_pool_cache(&self, fsvc: &FunctionService, min_age: Duration) -> bool {
        if idle_for(fsvc) < min_age {
            return false;
        }
        self.delete_function_svc(fsvc);
        true
    }

    /// List records idle for longer than `age`, via the serializer.
    pub async fn list_old(&self, age: Duration) -> Result<Vec<FunctionService>> {
        self.submit(|reply| SerializerRequest::ListOld { age, reply })
            .await
    }

    /// List pool entries with no active requests idle for longer than
    /// `age`, via the serializer.
    pub async fn list_old_for_pool(&self, age: Duration) -> Result<Vec<FunctionService>> {
        self.submit(|reply| SerializerRequest::ListOldPool { age, reply })
            .await
    }

    /// Dump the index contents to the log, via the serializer.
    pub async fn log(&self) {
        if let Err(e) = self
            .submit(|reply| SerializerRequest::Log { reply })
            .await
        {
            error!(error = %e, "cache log request failed");
        }
    }

    /// Write a snapshot of the pool to a fresh dump file.
    ///
    /// Returns the path of the created file, or `NotFound` without
    /// touching the filesystem when the pool is empty.
    pub async fn dump_fn_svc_cache(&self) -> Result<PathBuf> {
        info!("dumping function service pool");
        let groups = self.pool.group_snapshots();
        if groups.is_empty() {
            return Err(MuninnError::NotFound(
                "function service pool is empty".to_string(),
            ));
        }
        let lines = snapshot::format_groups(&groups);
        let path = snapshot::write_dump(&self.dump_config, &lines).await?;
        info!(path = %path.display(), groups = groups.len(), "dumped function service pool");
        Ok(path)
    }

    /// Associate a pod name with a record for later teardown lookups.
    pub fn map_pod(&self, pod_name: impl Into<String>, fsvc: FunctionService) {
        self.pod_to_fsvc.insert(pod_name.into(), fsvc);
    }

    /// The record associated with `pod_name`, if any.
    pub fn fsvc_for_pod(&self, pod_name: &str) -> Option<FunctionService> {
        self.pod_to_fsvc.get(pod_name).map(|e| e.value().clone())
    }

    /// Drop the pod-name association.
    pub fn unmap_pod(&self, pod_name: &str) {
        self.pod_to_fsvc.remove(pod_name);
    }

    /// Flag a function service as serving websocket traffic.
    pub fn set_websocket(&self, fsvc_name: impl Into<String>, websocket: bool) {
        self.websocket_fsvc.insert(fsvc_name.into(), websocket);
    }

    /// Whether a function service was flagged for websocket traffic.
    pub fn is_websocket(&self, fsvc_name: &str) -> bool {
        self.websocket_fsvc
            .get(fsvc_name)
            .map(|e| *e.value())
            .unwrap_or(false)
    }

    /// Drop the websocket flag.
    pub fn clear_websocket(&self, fsvc_name: &str) {
        self.websocket_fsvc.remove(fsvc_name);
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SerializerRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.request_tx
            .send(make(reply))
            .await
            .map_err(|_| MuninnError::Internal("serializer task stopped".to_string()))?;
        rx.await
            .map_err(|_| MuninnError::Internal("serializer task dropped the request".to_string()))
    }
}

impl Default for FunctionServiceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The single task that owns atime touches and scan-style reads.
struct Serializer {
    by_function: Arc<Index<FunctionService>>,
    by_address: Arc<Index<FunctionRef>>,
    pool: Arc<PoolCache>,
    rx: mpsc::Receiver<SerializerRequest>,
}

impl Serializer {
    async fn run(mut self) {
        while let Some(req) = self.rx.recv().await {
            match req {
                SerializerRequest::Touch { address, reply } => {
                    let _ = reply.send(self.touch_by_address(&address));
                }
                SerializerRequest::ListOld { age, reply } => {
                    let _ = reply.send(self.list_old(age));
                }
                SerializerRequest::ListOldPool { age, reply } => {
                    let _ = reply.send(self.list_old_pool(age));
                }
                SerializerRequest::Log { reply } => {
                    self.log_contents();
                    let _ = reply.send(());
                }
            }
        }
    }

    fn touch_by_address(&self, address: &str) -> Result<()> {
        let Some(fref) = self.by_address.get(address) else {
            return Err(MuninnError::NotFound(format!(
                "no function for address '{address}'"
            )));
        };
        let key = fref.cache_key();
        match self
            .by_function
            .update(&key, |svc| svc.atime = SystemTime::now())
        {
            Some(_) => Ok(()),
            None => {
                // Dangling secondary reference; keep serving.
                warn!(
                    address,
                    %key,
                    "address index references a missing function service"
                );
                Err(MuninnError::NotFound(format!(
                    "address '{address}' references missing function service '{key}'"
                )))
            }
        }
    }

    fn list_old(&self, age: Duration) -> Vec<FunctionService> {
        self.by_function
            .snapshot()
            .into_iter()
            .map(|(_, svc)| svc)
            .filter(|svc| idle_for(svc) > age)
            .collect()
    }

    fn list_old_pool(&self, age: Duration) -> Vec<FunctionService> {
        self.pool
            .list_available()
            .into_iter()
            .filter(|svc| idle_for(svc) > age)
            .collect()
    }

    fn log_contents(&self) {
        let entries = self.by_function.snapshot();
        let mut lines = Vec::new();
        for (key, svc) in &entries {
            for obj in &svc.kubernetes_objects {
                lines.push(format!("{key}\t{}\t{}", obj.kind, obj.name));
            }
        }
        info!(
            item_count = entries.len(),
            cache = ?lines,
            "function service cache contents"
        );
    }
}

fn idle_for(fsvc: &FunctionService) -> Duration {
    SystemTime::now()
        .duration_since(fsvc.atime)
        .unwrap_or_default()
}

fn record_lookup(operation: &'static str, hit: bool) {
    let name = if hit {
        telemetry::CACHE_HITS_TOTAL
    } else {
        telemetry::CACHE_MISSES_TOTAL
    };
    metrics::counter!(name, "operation" => operation).increment(1);
}

fn observe_running_duration(fsvc: &FunctionService) {
    let lifetime = fsvc
        .atime
        .duration_since(fsvc.ctime)
        .unwrap_or_default()
        .as_secs_f64();
    metrics::histogram!(
        telemetry::FUNCTION_RUNNING_DURATION_SECONDS,
        "function_name" => fsvc.function.name.clone(),
        "function_namespace" => fsvc.function.namespace.clone(),
    )
    .record(lifetime);
}
