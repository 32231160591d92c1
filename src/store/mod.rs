//! Chunk record store: domain layer plus key-value backends.
//!
//! # Architecture
//!
//! 1. **[`ChunkStore`](generic::ChunkStore)** -- All domain logic
//!    (serialization, pending/complete writes, task-scoped listing).
//!
//! 2. **[`StorageBackend`]** -- Dumb KV trait that backends implement
//!    (in-memory, DynamoDB). No domain logic.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](memory::InMemoryBackend) -- `DashMap`-based, for
//!   tests and single-process deployments.
//! - `DynamoDbBackend` -- production backend, behind the `dynamodb` feature.

pub mod backend;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod generic;
pub mod memory;

pub use backend::{StorageBackend, StorageError};
pub use generic::ChunkStore;
pub use memory::InMemoryBackend;
