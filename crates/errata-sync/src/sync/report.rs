//! Run state and result summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Partial => write!(f, "partial"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Where the orchestrator is in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Reconciling,
    Done(RunOutcome),
}

impl RunState {
    /// Whether a run currently holds the lock
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Fetching | RunState::Normalizing | RunState::Reconciling
        )
    }
}

/// Pipeline stage an advisory failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Parse,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryFailure {
    pub name: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl AdvisoryFailure {
    pub fn new(name: impl Into<String>, stage: FailureStage, reason: impl ToString) -> Self {
        Self {
            name: name.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Summary of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub pages_fetched: u32,
    pub advisories_fetched: usize,
    /// Advisories written
    pub advisories_processed: usize,
    pub advisories_failed: usize,
    pub failures: Vec<AdvisoryFailure>,
    /// Set when the fetch phase failed and nothing was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    /// Set when the store became unreachable mid-run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

impl SyncReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            outcome: RunOutcome::Success,
            started_at,
            duration: Duration::ZERO,
            pages_fetched: 0,
            advisories_fetched: 0,
            advisories_processed: 0,
            advisories_failed: 0,
            failures: Vec::new(),
            fetch_error: None,
            store_error: None,
        }
    }

    pub fn record_failure(&mut self, failure: AdvisoryFailure) {
        self.advisories_failed += 1;
        self.failures.push(failure);
    }

    /// Names of the advisories that were not written
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    /// Outcome implied by the collected counters and errors
    pub fn classify(&self) -> RunOutcome {
        if self.fetch_error.is_some() || self.store_error.is_some() {
            RunOutcome::Failed
        } else if self.advisories_failed == 0 {
            RunOutcome::Success
        } else if self.advisories_processed > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Failed
        }
    }

    pub(crate) fn finish(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self.outcome = self.classify();
        self
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
