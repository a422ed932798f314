//! Muninn - In-memory function service cache for a serverless executor
//!
//! This crate tracks the live function instances (pods/services) an
//! executor knows about: it indexes them three consistent ways, admits
//! invocations against per-pod concurrency budgets, ages out idle
//! entries for an external sweeper, and dumps diagnostic snapshots.
//!
//! # Example
//!
//! ```rust,no_run
//! use muninn::{FunctionRef, FunctionService, FunctionServiceCache};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let cache = FunctionServiceCache::new();
//!
//!     let function = FunctionRef {
//!         name: "hello".into(),
//!         namespace: "default".into(),
//!         uid: "b1f2…".into(),
//!         resource_version: "42".into(),
//!     };
//!
//!     // The specializer registers a ready pod…
//!     let svc = FunctionService::new("hello-1", function.clone(), "10.0.0.1:8080");
//!     cache.add(svc).await?;
//!
//!     // …and the router resolves every invocation against it.
//!     let svc = cache.get_by_function(&function)?;
//!     println!("route to {}", svc.address);
//!     Ok(())
//! }
//! ```
//!
//! # Pool admission
//!
//! For pool-managed functions, [`FunctionServiceCache::get_func_svc`]
//! admits a request against the first pod with spare budget, tells the
//! caller to specialize a new pod (`NotFound`) while the function is
//! under its concurrency cap, or parks the request on a FIFO queue
//! until capacity frees up. See the [`cache`] module docs.

pub mod cache;
pub mod error;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use cache::{AddOutcome, DumpConfig, FunctionServiceCache};
pub use error::{MuninnError, Result};

// Re-export the data model
pub use types::{
    EnvironmentRef, ExecutorType, FunctionRef, FunctionService, ObjectRef, Quantity,
};
