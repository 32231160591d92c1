//! Bulk X.509 device certificate issuance.
//!
//! A client asks for N certificates. The request is split into bounded-size
//! chunks, each chunk is published as a work message, and independent workers
//! issue the certificates, upload one archive per chunk, and mark the chunk
//! complete in the record store. Task status is never stored; it is computed
//! by reducing the task's chunk records.
//!
//! # Module Organization
//!
//! - [`domain`] - Chunk records, work messages, certificate templates, status views
//! - [`store`] - Chunk record store (domain layer over dumb KV backends)
//! - [`artifact`] - Object storage for chunk archives, archive building and merging
//! - [`channel`] - At-least-once work channel between splitter and workers
//! - [`ca`] - Certificate authority strategies (managed and customer CAs)
//! - [`subject`] - Subject-name generation (static, increment, list)
//! - [`splitter`] - Task splitting and work publication
//! - [`worker`] - Chunk processing and the worker pool
//! - [`aggregator`] - Task status reduction over chunk records
//! - [`assembler`] - Artifact links, merged bundles, and task-wide deletion
//! - [`http`] - `axum` routes for the bulk issuance API
//! - [`config`] - TOML settings
//! - [`error`] - Error taxonomy
//!
//! # Consistency
//!
//! Nothing here is exactly-once. Record-write/publish in the splitter and
//! upload/mark-complete in the worker are two separate steps; a crash between
//! them leaves a pending chunk without a message or an orphaned archive.
//! [`splitter::TaskSplitter::replay_pending`] is the explicit repair for the
//! first case.

pub mod aggregator;
pub mod artifact;
pub mod assembler;
pub mod ca;
pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod splitter;
pub mod store;
pub mod subject;
pub mod worker;

pub use domain::{CertInfo, ChunkRecord, ChunkStatus, TaskState, TaskStatusView, WorkMessage};
pub use error::{BulkError, BulkResult};
