//! Core data types for the function service cache.

mod function;
mod quantity;

pub use function::{EnvironmentRef, ExecutorType, FunctionRef, FunctionService, ObjectRef};
pub use quantity::Quantity;
