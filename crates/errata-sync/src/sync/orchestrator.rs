//! Sync orchestrator
//!
//! Runs one sync per trigger: fetch the catalog, normalize it, reconcile it.
//! A run holds two locks for its whole span: an in-process flag and the
//! store's run lock, so neither a second task nor a second process can sync
//! against the same database at the same time.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::client::UpstreamClient;
use super::normalizer::normalize_batch;
use super::paginator::Paginator;
use super::reconciler::Reconciler;
use super::registry::TypeRegistry;
use super::report::{AdvisoryFailure, FailureStage, RunOutcome, RunState, SyncReport};
use super::retry::RetryingClient;
use super::store::AdvisoryStore;
use crate::config::{SyncConfig, UpstreamConfig};
use crate::error::TriggerError;

/// Clears the in-process running flag when dropped
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Releases the store run lock, even if the run future is dropped midway
struct StoreLockGuard {
    store: Option<Arc<dyn AdvisoryStore>>,
}

impl StoreLockGuard {
    async fn release(mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.release_run_lock().await {
                warn!(error = %e, "Failed to release sync lock");
            }
        }
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_run_lock().await {
                        warn!(error = %e, "Failed to release sync lock after abandoned run");
                    }
                });
            },
            Err(_) => warn!("No runtime available to release sync lock"),
        }
    }
}

pub struct SyncOrchestrator {
    client: Arc<dyn UpstreamClient>,
    store: Arc<dyn AdvisoryStore>,
    upstream: UpstreamConfig,
    sync: SyncConfig,
    running: AtomicBool,
    state: watch::Sender<RunState>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Build an orchestrator; `client` is wrapped with the configured retry policy
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        store: Arc<dyn AdvisoryStore>,
        upstream: UpstreamConfig,
        sync: SyncConfig,
    ) -> Self {
        let client: Arc<dyn UpstreamClient> = Arc::new(RetryingClient::new(client, &upstream));
        let (state, _) = watch::channel(RunState::Idle);

        Self {
            client,
            store,
            upstream,
            sync,
            running: AtomicBool::new(false),
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop in-flight and future runs once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: RunState) {
        self.state.send_replace(state);
    }

    /// Run one sync to completion
    ///
    /// Returns [`TriggerError::AlreadyRunning`] without doing anything when
    /// another run holds either lock.
    pub async fn trigger(&self) -> Result<SyncReport, TriggerError> {
        let _running = RunGuard::acquire(&self.running).ok_or(TriggerError::AlreadyRunning)?;

        if !self.store.try_acquire_run_lock().await? {
            return Err(TriggerError::AlreadyRunning);
        }
        let lock = StoreLockGuard {
            store: Some(self.store.clone()),
        };

        let run_id = Uuid::new_v4();
        let report = self
            .run(run_id)
            .instrument(info_span!("sync_run", %run_id))
            .await;

        lock.release().await;
        self.set_state(RunState::Done(report.outcome));

        Ok(report)
    }

    async fn run(&self, run_id: Uuid) -> SyncReport {
        let clock = Instant::now();
        let started_at = Utc::now();
        let mut report = SyncReport::new(run_id, started_at);

        info!(incremental = self.sync.incremental, "Starting advisory sync");

        let modified_since = if self.sync.incremental {
            match self.store.load_checkpoint().await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    error!(error = %e, "Failed to load sync checkpoint");
                    report.store_error = Some(e.to_string());
                    return self.finish(report, clock);
                },
            }
        } else {
            None
        };

        // Fetching
        self.set_state(RunState::Fetching);
        let paginator = Paginator::new(self.client.clone(), &self.upstream)
            .with_cancellation(self.cancel.child_token());
        let catalog = match paginator.fetch_all(modified_since).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(error = %e, "Fetching upstream catalog failed, nothing written");
                report.fetch_error = Some(e.to_string());
                return self.finish(report, clock);
            },
        };
        report.pages_fetched = catalog.pages_fetched;
        report.advisories_fetched = catalog.records.len();

        // Normalizing
        self.set_state(RunState::Normalizing);
        let mut registry = TypeRegistry::new(self.store.clone());
        let batch = match normalize_batch(&catalog.records, &mut registry).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Store unavailable while resolving lookups");
                report.store_error = Some(e.to_string());
                return self.finish(report, clock);
            },
        };
        for (name, e) in &batch.failures {
            report.record_failure(AdvisoryFailure::new(name, FailureStage::Parse, e));
        }

        // Reconciling
        self.set_state(RunState::Reconciling);
        let tally = Reconciler::new(self.store.clone(), self.sync.chunk_size)
            .reconcile(&batch.advisories)
            .await;
        report.advisories_processed = tally.written;
        for failure in tally.failures {
            report.record_failure(failure);
        }
        if let Some(e) = tally.store_error {
            report.store_error = Some(e.to_string());
        }

        let report = self.finish(report, clock);

        if report.outcome == RunOutcome::Success {
            if let Err(e) = self.store.save_checkpoint(started_at).await {
                warn!(error = %e, "Failed to save sync checkpoint");
            }
        }

        report
    }

    fn finish(&self, report: SyncReport, clock: Instant) -> SyncReport {
        let report = report.finish(clock.elapsed());

        match report.outcome {
            RunOutcome::Success => info!(
                processed = report.advisories_processed,
                pages = report.pages_fetched,
                duration = ?report.duration,
                "Advisory sync succeeded"
            ),
            RunOutcome::Partial => warn!(
                processed = report.advisories_processed,
                failed = report.advisories_failed,
                failed_advisories = ?report.failed_names(),
                duration = ?report.duration,
                "Advisory sync partially succeeded"
            ),
            RunOutcome::Failed => error!(
                processed = report.advisories_processed,
                failed = report.advisories_failed,
                duration = ?report.duration,
                "Advisory sync failed"
            ),
        }

        report
    }
}
