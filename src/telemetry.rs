//! Telemetry metric names and span attributes.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `function_name` / `function_namespace` — identity of the function
//! - `operation` — cache operation (e.g. "get_by_function")

use crate::types::FunctionService;

/// Observed lifetime (`atime - ctime`) of a function service, recorded
/// in seconds when the record is deleted from the cache.
///
/// Labels: `function_name`, `function_namespace`.
pub const FUNCTION_RUNNING_DURATION_SECONDS: &str = "muninn_function_running_duration_seconds";

/// Total lookups answered from the cache.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total lookups that missed.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// A telemetry annotation attached to spans and events about a
/// function service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: &'static str,
    pub value: String,
}

impl KeyValue {
    fn new(key: &'static str, value: &str) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Annotation key-values describing a function service.
///
/// Empty sub-fields are omitted, never defaulted.
pub fn attributes_for(fsvc: &FunctionService) -> Vec<KeyValue> {
    let mut attrs = Vec::new();
    if !fsvc.function.name.is_empty() {
        attrs.push(KeyValue::new("function-name", &fsvc.function.name));
    }
    if !fsvc.function.namespace.is_empty() {
        attrs.push(KeyValue::new("function-namespace", &fsvc.function.namespace));
    }
    if !fsvc.environment.name.is_empty() {
        attrs.push(KeyValue::new("environment-name", &fsvc.environment.name));
    }
    if !fsvc.environment.namespace.is_empty() {
        attrs.push(KeyValue::new(
            "environment-namespace",
            &fsvc.environment.namespace,
        ));
    }
    if !fsvc.address.is_empty() {
        attrs.push(KeyValue::new("address", &fsvc.address));
    }
    attrs
}
