//! Storage interface consumed by the sync engine
//!
//! Two implementations share one contract:
//! - [`PgAdvisoryStore`]: PostgreSQL, the production store
//! - [`MemoryStore`]: in-process, for dry runs and tests
//!
//! Contract highlights:
//! - lookup labels map to ids append-only; resolving is an atomic get-or-create
//! - `upsert_advisories` is all-or-nothing for the slice it is given, and
//!   replaces every mutable field plus the package links of each advisory
//! - packages are unique per (name, evra); resolving an existing one is a no-op

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errata_common::types::Nevra;

use super::models::{AdvisoryMetadata, Package, StoredAdvisory};
use crate::error::StoreResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAdvisoryStore;

/// Checkpoint row name for the advisory sync job
pub const CHECKPOINT_JOB: &str = "advisory_sync";

/// Lookup tables grown lazily from upstream labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKind {
    AdvisoryType,
    Severity,
}

impl LookupKind {
    pub fn table(self) -> &'static str {
        match self {
            LookupKind::AdvisoryType => "advisory_type",
            LookupKind::Severity => "advisory_severity",
        }
    }

    /// Rows seeded by the schema migration
    pub fn seeded(self) -> &'static [(i32, &'static str)] {
        match self {
            LookupKind::AdvisoryType => &[
                (0, "unknown"),
                (1, "enhancement"),
                (2, "bugfix"),
                (3, "security"),
            ],
            LookupKind::Severity => &[
                (1, "Low"),
                (2, "Moderate"),
                (3, "Important"),
                (4, "Critical"),
            ],
        }
    }
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// Storage operations used by the sync engine
#[async_trait]
pub trait AdvisoryStore: Send + Sync {
    /// Return the id bound to `label`, allocating the next unused id if new
    async fn resolve_lookup(&self, kind: LookupKind, label: &str) -> StoreResult<i32>;

    /// Return the package rows for `packages`, creating missing ones
    async fn resolve_packages(&self, packages: &[Nevra]) -> StoreResult<Vec<Package>>;

    /// Upsert `advisories` by name in one atomic unit, returning their row ids
    async fn upsert_advisories(&self, advisories: &[AdvisoryMetadata]) -> StoreResult<Vec<i64>>;

    /// Time of the last fully successful sync, if any
    async fn load_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>>;

    async fn save_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()>;

    /// Try to take the store-wide sync lock without waiting
    async fn try_acquire_run_lock(&self) -> StoreResult<bool>;

    async fn release_run_lock(&self) -> StoreResult<()>;
}

/// New row state for an upsert of `incoming` over `existing`
///
/// The row id survives; every other field comes from `incoming`, so the
/// result does not depend on what the old row contained and applying the
/// same record twice yields the same row.
pub fn apply_upsert(
    existing: Option<&StoredAdvisory>,
    incoming: &AdvisoryMetadata,
    allocate_id: impl FnOnce() -> i64,
) -> StoredAdvisory {
    let id = match existing {
        Some(row) => row.id,
        None => allocate_id(),
    };

    StoredAdvisory {
        id,
        advisory: incoming.clone(),
    }
}
