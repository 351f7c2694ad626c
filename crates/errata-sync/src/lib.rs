//! Errata sync library
//!
//! Mirrors advisory ("errata") metadata from the upstream metadata service
//! into a local PostgreSQL database, so the read API can answer advisory and
//! package queries without calling upstream.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use errata_sync::config::Config;
//! use errata_sync::db;
//! use errata_sync::sync::{PgAdvisoryStore, SyncOrchestrator, VmaasClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = Arc::new(PgAdvisoryStore::new(pool, config.sync.lock_key));
//!     let client = Arc::new(VmaasClient::new(&config.upstream)?);
//!
//!     let orchestrator = SyncOrchestrator::new(client, store, config.upstream, config.sync);
//!     let report = orchestrator.trigger().await?;
//!     println!("{}: {} advisories written", report.outcome, report.advisories_processed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod sync;

pub use config::Config;
pub use error::{FetchError, NormalizeError, StoreError, TriggerError};
