//! Muninn error types

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    /// Lookup missed, or the pool signals the caller to specialize a
    /// new pod (see [`FunctionServiceCache::get_func_svc`](crate::FunctionServiceCache::get_func_svc)).
    #[error("not found: {0}")]
    NotFound(String),

    /// The function key is already bound; the existing record wins.
    #[error("name exists: {0}")]
    NameExists(String),

    /// Filesystem or task failure inside the cache itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MuninnError {
    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MuninnError::NotFound(_))
    }

    /// Whether this is a `NameExists` error.
    pub fn is_name_exists(&self) -> bool {
        matches!(self, MuninnError::NameExists(_))
    }
}

/// Result type alias for muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
