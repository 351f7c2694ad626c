//! Reconciler
//!
//! Writes a normalized batch in chunks, one atomic store call per chunk. A
//! chunk the store rejects is replayed row by row so that only the offending
//! advisories are reported; an unreachable store ends the batch.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::models::AdvisoryMetadata;
use super::report::{AdvisoryFailure, FailureStage};
use super::store::AdvisoryStore;
use crate::error::StoreError;

/// What happened to a reconciled batch
#[derive(Debug, Default)]
pub struct ReconcileTally {
    pub written: usize,
    pub failures: Vec<AdvisoryFailure>,
    /// The store became unreachable; everything after the failure point is
    /// listed in `failures`
    pub store_error: Option<StoreError>,
}

pub struct Reconciler {
    store: Arc<dyn AdvisoryStore>,
    chunk_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AdvisoryStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn reconcile(&self, advisories: &[AdvisoryMetadata]) -> ReconcileTally {
        let mut tally = ReconcileTally::default();
        let mut offset = 0;

        for chunk in advisories.chunks(self.chunk_size) {
            if let Err((handled, e)) = self.write_chunk(chunk, &mut tally).await {
                let remaining = &advisories[offset + handled..];
                error!(
                    error = %e,
                    remaining = remaining.len(),
                    "Store unavailable, abandoning the rest of the batch"
                );
                for adv in remaining {
                    tally
                        .failures
                        .push(AdvisoryFailure::new(&adv.name, FailureStage::Store, &e));
                }
                tally.store_error = Some(e);
                return tally;
            }
            offset += chunk.len();
        }

        debug!(
            written = tally.written,
            failed = tally.failures.len(),
            "Reconciled batch"
        );
        tally
    }

    /// Write one chunk; on an unreachable store, returns how many of its rows
    /// were dealt with before the failure
    async fn write_chunk(
        &self,
        chunk: &[AdvisoryMetadata],
        tally: &mut ReconcileTally,
    ) -> Result<(), (usize, StoreError)> {
        match self.store.upsert_advisories(chunk).await {
            Ok(ids) => {
                tally.written += ids.len();
                return Ok(());
            },
            Err(e) if e.is_unavailable() => return Err((0, e)),
            Err(e) => {
                warn!(
                    chunk = chunk.len(),
                    error = %e,
                    "Chunk rejected, retrying advisories one at a time"
                );
            },
        }

        for (i, adv) in chunk.iter().enumerate() {
            match self.store.upsert_advisories(std::slice::from_ref(adv)).await {
                Ok(_) => tally.written += 1,
                Err(e) if e.is_unavailable() => return Err((i, e)),
                Err(e) => {
                    warn!(advisory = %adv.name, error = %e, "Advisory rejected by store");
                    tally
                        .failures
                        .push(AdvisoryFailure::new(&adv.name, FailureStage::Store, e));
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::sync::models::Package;
    use crate::sync::store::tests::advisory;
    use crate::sync::store::{LookupKind, MemoryStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use errata_common::types::Nevra;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store that rejects chosen names and can go away after N writes
    struct FlakyStore {
        inner: MemoryStore,
        reject: Vec<String>,
        available_writes: Option<usize>,
        writes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(reject: &[&str], available_writes: Option<usize>) -> Self {
            Self {
                inner: MemoryStore::new(),
                reject: reject.iter().map(|s| s.to_string()).collect(),
                available_writes,
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AdvisoryStore for FlakyStore {
        async fn resolve_lookup(&self, kind: LookupKind, label: &str) -> StoreResult<i32> {
            self.inner.resolve_lookup(kind, label).await
        }

        async fn resolve_packages(&self, packages: &[Nevra]) -> StoreResult<Vec<Package>> {
            self.inner.resolve_packages(packages).await
        }

        async fn upsert_advisories(&self, advisories: &[AdvisoryMetadata]) -> StoreResult<Vec<i64>> {
            let call = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.available_writes.is_some_and(|limit| call >= limit) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            if let Some(bad) = advisories.iter().find(|a| self.reject.contains(&a.name)) {
                return Err(StoreError::Rejected(format!("constraint violated by {}", bad.name)));
            }
            self.inner.upsert_advisories(advisories).await
        }

        async fn load_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>> {
            self.inner.load_checkpoint().await
        }

        async fn save_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()> {
            self.inner.save_checkpoint(at).await
        }

        async fn try_acquire_run_lock(&self) -> StoreResult<bool> {
            self.inner.try_acquire_run_lock().await
        }

        async fn release_run_lock(&self) -> StoreResult<()> {
            self.inner.release_run_lock().await
        }
    }

    fn batch(count: usize) -> Vec<AdvisoryMetadata> {
        (1..=count).map(|i| advisory(&format!("RHBA-{i}"))).collect()
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), 3);
        let advisories = batch(7);

        let first = reconciler.reconcile(&advisories).await;
        let after_first = store.advisories().unwrap();
        let second = reconciler.reconcile(&advisories).await;
        let after_second = store.advisories().unwrap();

        assert_eq!(first.written, 7);
        assert_eq!(second.written, 7);
        assert_eq!(after_first, after_second);
        assert_eq!(store.advisory_count().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_rejected_row_is_isolated() {
        let store = Arc::new(FlakyStore::new(&["RHBA-2"], None));
        let reconciler = Reconciler::new(store.clone(), 4);

        let tally = reconciler.reconcile(&batch(6)).await;

        assert_eq!(tally.written, 5);
        assert_eq!(tally.failures.len(), 1);
        assert_eq!(tally.failures[0].name, "RHBA-2");
        assert_eq!(tally.failures[0].stage, FailureStage::Store);
        assert!(tally.store_error.is_none());
        assert!(store.inner.advisory("RHBA-2").unwrap().is_none());
        assert_eq!(store.inner.advisory_count().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unavailable_store_abandons_rest() {
        // First chunk commits, second chunk hits a dead store
        let store = Arc::new(FlakyStore::new(&[], Some(1)));
        let reconciler = Reconciler::new(store.clone(), 2);

        let tally = reconciler.reconcile(&batch(5)).await;

        assert_eq!(tally.written, 2);
        assert!(tally.store_error.as_ref().is_some_and(StoreError::is_unavailable));
        let failed: Vec<_> = tally.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["RHBA-3", "RHBA-4", "RHBA-5"]);
        assert_eq!(store.inner.advisory_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_lost_during_row_replay() {
        // Chunk rejected, first row replay succeeds, then the store is gone
        let store = Arc::new(FlakyStore::new(&["RHBA-3"], Some(2)));
        let reconciler = Reconciler::new(store, 3);

        let tally = reconciler.reconcile(&batch(3)).await;

        assert_eq!(tally.written, 1);
        let failed: Vec<_> = tally.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["RHBA-2", "RHBA-3"]);
        assert!(tally.store_error.is_some());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let reconciler = Reconciler::new(Arc::new(MemoryStore::new()), 10);
        let tally = reconciler.reconcile(&[]).await;
        assert_eq!(tally.written, 0);
        assert!(tally.failures.is_empty());
    }
}
