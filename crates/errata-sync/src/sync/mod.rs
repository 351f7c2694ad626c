//! Advisory synchronization engine
//!
//! # Architecture
//!
//! - **client**: upstream errata endpoint (`UpstreamClient`, `VmaasClient`)
//! - **retry**: transient-failure retry policy wrapped around a client
//! - **paginator**: fetches the whole catalog, page by page, before any write
//! - **registry**: type and severity labels to stable lookup ids
//! - **normalizer**: upstream records to `AdvisoryMetadata`
//! - **reconciler**: chunked, idempotent upserts with per-advisory failures
//! - **store**: storage interface with PostgreSQL and in-memory backends
//! - **orchestrator**: one locked run per trigger, producing a `SyncReport`
//! - **scheduler**: periodic triggers until shutdown

pub mod client;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod paginator;
pub mod reconciler;
pub mod registry;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use client::{UpstreamClient, VmaasClient};
pub use models::{AdvisoryMetadata, ErrataRequest, ErrataResponse, UpstreamErratum};
pub use orchestrator::SyncOrchestrator;
pub use paginator::{FetchedCatalog, Paginator};
pub use reconciler::{ReconcileTally, Reconciler};
pub use registry::TypeRegistry;
pub use report::{AdvisoryFailure, FailureStage, RunOutcome, RunState, SyncReport};
pub use retry::RetryingClient;
pub use scheduler::SyncScheduler;
pub use store::{AdvisoryStore, LookupKind, MemoryStore, PgAdvisoryStore};
