//! PodDigest State: persistence layer for the pipeline.
//!
//! Houses the Object Store gateway (component A) and the Repository
//! (component B): a SurrealDB-backed implementation of the typed CRUD
//! surface every pipeline stage in `poddigest-pipeline` depends on.
//!
//! ## Layout
//!
//! - `error`: `RepositoryError` / `ObjectStoreError` taxonomies
//! - `storage_traits`: the `Repository`, `ObjectStore`, and `Queue` trait
//!   contracts
//! - `schema`: `SurrealHandle` connection + `DEFINE TABLE` schema setup
//! - `repository`: `SurrealRepository`, the SurrealDB-backed `Repository`
//! - `object_store`: `FsObjectStore` and (behind the `s3` feature)
//!   `S3ObjectStore`
//! - `queue`: `SurrealQueue`, the SurrealDB-backed `Queue` (component C)

mod error;
mod object_store;
mod queue;
mod repository;
mod schema;
mod storage_traits;

pub use error::{ObjectStoreError, ObjectStoreResult, RepositoryError, RepositoryResult};
pub use object_store::FsObjectStore;
#[cfg(feature = "s3")]
pub use object_store::S3ObjectStore;
pub use queue::SurrealQueue;
pub use repository::SurrealRepository;
pub use schema::SurrealHandle;
pub use storage_traits::{ObjectStore, Queue, QueueLease, Repository};

/// Result type for `poddigest-state` operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
