//! Shared fixtures for errata-sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errata_common::types::Nevra;
use errata_sync::config::{SyncConfig, UpstreamConfig};
use errata_sync::error::{StoreError, StoreResult};
use errata_sync::sync::models::{AdvisoryMetadata, Package};
use errata_sync::sync::{AdvisoryStore, LookupKind, MemoryStore, SyncOrchestrator, VmaasClient};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ERRATA_PATH: &str = "/api/v3/errata";

/// Two advisories as the upstream service returns them
pub fn perl_and_rusers() -> Value {
    json!({
        "RHBA-2004:391": {
            "synopsis": "Updated perl packages",
            "summary": "Updated perl packages that fix a UTF-8 support bug are now available.",
            "type": "bugfix",
            "severity": "None",
            "description": "Perl is a high-level programming language.",
            "solution": "Before applying this update, make sure all previously released errata have been applied.",
            "issued": "2004-09-02T00:00:00+00:00",
            "updated": "2004-09-02T00:00:00+00:00",
            "cve_list": [],
            "package_list": [],
            "source_package_list": [],
            "bugzilla_list": ["112339"],
            "reference_list": [],
            "modules_list": [],
            "url": "https://access.redhat.com/errata/RHBA-2004:391"
        },
        "RHBA-2004:403": {
            "synopsis": "Updated rusers packages",
            "summary": "Updated rusers packages that remove the requirement for procps are now available.",
            "type": "bugfix",
            "severity": "None",
            "description": "The rusers program allows users to find out who is logged into certain machines.",
            "solution": "Before applying this update, make sure all previously released errata have been applied.",
            "issued": "2004-09-02T00:00:00+00:00",
            "updated": "2004-09-02T00:00:00+00:00",
            "cve_list": [],
            "package_list": [],
            "source_package_list": [],
            "bugzilla_list": [],
            "reference_list": [],
            "modules_list": [],
            "url": "https://access.redhat.com/errata/RHBA-2004:403"
        }
    })
}

/// A minimal valid upstream record
pub fn erratum(advisory_type: &str) -> Value {
    json!({
        "synopsis": "Synopsis",
        "type": advisory_type,
        "issued": "2020-03-01T10:00:00+00:00",
        "updated": "2020-03-02T10:00:00+00:00"
    })
}

pub fn page(errata_list: Value, page: u32, pages: u32) -> Value {
    json!({
        "errata_list": errata_list,
        "page": page,
        "page_size": 10,
        "pages": pages
    })
}

/// Serve `body` for requests of page `page`
pub async fn mount_page(server: &MockServer, page: u32, body: Value) {
    Mock::given(method("POST"))
        .and(path(ERRATA_PATH))
        .and(body_partial_json(json!({"page": page})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub fn upstream_config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig {
        address: server.uri(),
        page_size: 10,
        request_timeout_secs: 5,
        max_retries: 2,
        retry_backoff_ms: 10,
        ..Default::default()
    }
}

pub fn orchestrator(server: &MockServer, store: Arc<dyn AdvisoryStore>) -> SyncOrchestrator {
    orchestrator_with(server, store, SyncConfig::default())
}

pub fn orchestrator_with(
    server: &MockServer,
    store: Arc<dyn AdvisoryStore>,
    sync: SyncConfig,
) -> SyncOrchestrator {
    let upstream = upstream_config(server);
    let client = Arc::new(VmaasClient::new(&upstream).expect("client"));
    SyncOrchestrator::new(client, store, upstream, sync)
}

/// Memory store whose connection can be cut
pub struct OutageStore {
    pub inner: MemoryStore,
    down: AtomicBool,
}

impl OutageStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        }
    }

    pub fn cut(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AdvisoryStore for OutageStore {
    async fn resolve_lookup(&self, kind: LookupKind, label: &str) -> StoreResult<i32> {
        self.check()?;
        self.inner.resolve_lookup(kind, label).await
    }

    async fn resolve_packages(&self, packages: &[Nevra]) -> StoreResult<Vec<Package>> {
        self.check()?;
        self.inner.resolve_packages(packages).await
    }

    async fn upsert_advisories(&self, advisories: &[AdvisoryMetadata]) -> StoreResult<Vec<i64>> {
        self.check()?;
        self.inner.upsert_advisories(advisories).await
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.check()?;
        self.inner.load_checkpoint().await
    }

    async fn save_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        self.inner.save_checkpoint(at).await
    }

    // The lock stays reachable so runs can start against a dead store
    async fn try_acquire_run_lock(&self) -> StoreResult<bool> {
        self.inner.try_acquire_run_lock().await
    }

    async fn release_run_lock(&self) -> StoreResult<()> {
        self.inner.release_run_lock().await
    }
}
