//! Error types for the persistence layer.

use thiserror::Error;

/// Errors from the SurrealDB-backed repository (component B).
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// No row matched the lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// A `set_digest_status` (or other optimistic-concurrency write) was
    /// rejected because the row's version had already moved.
    #[error("version conflict on {entity}: expected version {expected}")]
    VersionConflict { entity: String, expected: u64 },

    /// A uniqueness constraint was violated (e.g. duplicate `feed_url`).
    #[error("uniqueness violation: {0}")]
    Duplicate(String),

    /// Database connection error.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Database query error.
    #[error("database query failed: {0}")]
    Query(String),

    /// Schema setup error.
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    /// Serialization/deserialization error.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for RepositoryError {
    fn from(err: surrealdb::Error) -> Self {
        RepositoryError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Errors from an `ObjectStore` implementation (component A).
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    /// The requested key does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A retryable backend failure (network blip, 5xx, lock contention).
    #[error("transient object store error: {0}")]
    Transient(String),

    /// A non-retryable backend failure (permission denied, malformed key).
    #[error("object store error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for ObjectStoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ObjectStoreError::NotFound(err.to_string()),
            _ => ObjectStoreError::Fatal(err.to_string()),
        }
    }
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;
pub type ObjectStoreResult<T> = std::result::Result<T, ObjectStoreError>;
