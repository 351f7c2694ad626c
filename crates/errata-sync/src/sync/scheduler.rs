//! Periodic sync scheduler

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::orchestrator::SyncOrchestrator;
use super::report::RunOutcome;
use crate::error::TriggerError;

/// Triggers a sync every `interval` until cancelled
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// `cancel` should be the token the orchestrator was built with, so that
    /// shutting down also stops a run that is still fetching
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            cancel,
        }
    }

    /// Start the scheduler in background; the first run starts immediately
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "Sync scheduler started");
            self.run_loop().await;
            info!("Sync scheduler stopped");
        })
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        match self.orchestrator.trigger().await {
            Ok(report) => match report.outcome {
                RunOutcome::Success => info!(
                    run_id = %report.run_id,
                    processed = report.advisories_processed,
                    "Scheduled sync finished"
                ),
                RunOutcome::Partial | RunOutcome::Failed => warn!(
                    run_id = %report.run_id,
                    outcome = %report.outcome,
                    processed = report.advisories_processed,
                    failed = report.advisories_failed,
                    "Scheduled sync finished with failures"
                ),
            },
            Err(TriggerError::AlreadyRunning) => {
                info!("Previous sync still running, skipping this tick");
            },
            Err(e) => error!(error = %e, "Scheduled sync could not start"),
        }
    }
}
