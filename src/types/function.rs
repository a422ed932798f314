//! Function service data model.
//!
//! A [`FunctionService`] is one ready-to-serve instance of a function:
//! the pod (or service) that holds the specialized function code, the
//! endpoint it answers on, and the cluster objects that back it. The
//! cache stores these records and hands out value clones — callers can
//! never mutate cached state through a returned record.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::Quantity;

/// Identity of a function version.
///
/// Two refs with the same [`cache_key`](FunctionRef::cache_key) denote
/// the same logical function version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub namespace: String,
    /// Cluster-assigned unique id, stable across resource versions.
    pub uid: String,
    pub resource_version: String,
}

impl FunctionRef {
    /// Stable cache key for this function version.
    pub fn cache_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.name, self.namespace, self.resource_version
        )
    }
}

/// The environment a function runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRef {
    pub name: String,
    pub namespace: String,
}

/// Opaque reference to a cluster object owned by a function service.
///
/// Kept only so the caller can tear the objects down when the service
/// is retired; the cache never dereferences these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Which executor flavor owns a function service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    /// Requests multiplex over a limited pool of specialized pods.
    PoolManager,
    /// A fresh deployment per function version.
    NewDeploy,
}

impl Default for ExecutorType {
    fn default() -> Self {
        Self::PoolManager
    }
}

/// A ready-to-serve function instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionService {
    /// Unique object name.
    pub name: String,
    /// The function this pod/service serves.
    pub function: FunctionRef,
    /// The function's environment.
    pub environment: EnvironmentRef,
    /// `host:port` the service can be reached at.
    pub address: String,
    /// Cluster objects owned by this service, for caller teardown.
    pub kubernetes_objects: Vec<ObjectRef>,
    pub executor: ExecutorType,
    pub cpu_limit: Quantity,
    /// Creation time; set by the cache on insert.
    pub ctime: SystemTime,
    /// Last access time; refreshed by every read path. Always ≥ `ctime`.
    pub atime: SystemTime,
}

impl FunctionService {
    /// A record for `function` reachable at `address`, timestamps set to
    /// now. The cache re-stamps both on insert.
    pub fn new(name: impl Into<String>, function: FunctionRef, address: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            function,
            environment: EnvironmentRef::default(),
            address: address.into(),
            kubernetes_objects: Vec::new(),
            executor: ExecutorType::default(),
            cpu_limit: Quantity::default(),
            ctime: now,
            atime: now,
        }
    }
}
