//! In-process store with the same semantics as the PostgreSQL schema

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errata_common::types::Nevra;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{apply_upsert, AdvisoryStore, LookupKind};
use crate::error::{StoreError, StoreResult};
use crate::sync::models::{AdvisoryMetadata, Package, StoredAdvisory};

#[derive(Debug)]
struct MemoryState {
    lookups: HashMap<LookupKind, BTreeMap<String, i32>>,
    advisories: BTreeMap<String, StoredAdvisory>,
    next_advisory_id: i64,
    package_names: BTreeMap<String, i64>,
    packages: BTreeMap<(i64, String), Package>,
    /// advisory id -> (package id, source)
    links: BTreeMap<i64, BTreeSet<(i64, bool)>>,
    checkpoint: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn seeded() -> Self {
        let lookups = [LookupKind::AdvisoryType, LookupKind::Severity]
            .into_iter()
            .map(|kind| {
                let rows = kind
                    .seeded()
                    .iter()
                    .map(|(id, label)| (label.to_string(), *id))
                    .collect();
                (kind, rows)
            })
            .collect();

        Self {
            lookups,
            advisories: BTreeMap::new(),
            next_advisory_id: 1,
            package_names: BTreeMap::new(),
            packages: BTreeMap::new(),
            links: BTreeMap::new(),
            checkpoint: None,
        }
    }

    fn lookup_exists(&self, kind: LookupKind, id: i32) -> bool {
        self.lookups
            .get(&kind)
            .is_some_and(|rows| rows.values().any(|v| *v == id))
    }

    fn resolve_lookup(&mut self, kind: LookupKind, label: &str) -> StoreResult<i32> {
        if label.is_empty() {
            return Err(StoreError::Rejected(format!("empty {} label", kind)));
        }

        let rows = self.lookups.entry(kind).or_default();
        if let Some(id) = rows.get(label) {
            return Ok(*id);
        }

        let id = rows.values().copied().max().map_or(1, |max| max + 1);
        rows.insert(label.to_string(), id);
        Ok(id)
    }

    fn resolve_package(&mut self, nevra: &Nevra) -> Package {
        let next_name_id = self.package_names.len() as i64 + 1;
        let name_id = *self
            .package_names
            .entry(nevra.name.clone())
            .or_insert(next_name_id);

        let next_id = self.packages.len() as i64 + 1;
        self.packages
            .entry((name_id, nevra.evra()))
            .or_insert_with(|| Package {
                id: next_id,
                name_id,
                evra: nevra.evra(),
            })
            .clone()
    }

    /// Mirror the schema's CHECK and foreign key constraints
    fn check(&self, advisory: &AdvisoryMetadata) -> StoreResult<()> {
        if advisory.name.is_empty() {
            return Err(StoreError::Rejected("advisory name cannot be empty".into()));
        }

        if !self.lookup_exists(LookupKind::AdvisoryType, advisory.advisory_type_id) {
            return Err(StoreError::Rejected(format!(
                "advisory {} references unknown advisory_type_id {}",
                advisory.name, advisory.advisory_type_id
            )));
        }

        if let Some(severity_id) = advisory.severity_id {
            if !self.lookup_exists(LookupKind::Severity, severity_id) {
                return Err(StoreError::Rejected(format!(
                    "advisory {} references unknown severity_id {}",
                    advisory.name, severity_id
                )));
            }
        }

        Ok(())
    }
}

/// In-memory [`AdvisoryStore`]
///
/// Starts with the same seeded lookup rows as the migration. A chunk passed to
/// `upsert_advisories` is validated in full before anything is applied, so a
/// rejected chunk leaves no trace, like a rolled back transaction.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    run_lock: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::seeded()),
            run_lock: AtomicBool::new(false),
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// All advisories ordered by name
    pub fn advisories(&self) -> StoreResult<Vec<StoredAdvisory>> {
        Ok(self.state()?.advisories.values().cloned().collect())
    }

    pub fn advisory(&self, name: &str) -> StoreResult<Option<StoredAdvisory>> {
        Ok(self.state()?.advisories.get(name).cloned())
    }

    pub fn advisory_count(&self) -> StoreResult<usize> {
        Ok(self.state()?.advisories.len())
    }

    pub fn package_count(&self) -> StoreResult<usize> {
        Ok(self.state()?.packages.len())
    }

    /// Packages linked to advisory `name`, with their source flag
    pub fn linked_packages(&self, name: &str) -> StoreResult<Vec<(Package, bool)>> {
        let state = self.state()?;
        let Some(row) = state.advisories.get(name) else {
            return Ok(Vec::new());
        };

        let by_id: HashMap<i64, &Package> = state.packages.values().map(|p| (p.id, p)).collect();
        Ok(state
            .links
            .get(&row.id)
            .into_iter()
            .flatten()
            .filter_map(|(package_id, source)| by_id.get(package_id).map(|p| ((*p).clone(), *source)))
            .collect())
    }

    /// Id currently bound to `label`, without creating it
    pub fn lookup_id(&self, kind: LookupKind, label: &str) -> StoreResult<Option<i32>> {
        Ok(self
            .state()?
            .lookups
            .get(&kind)
            .and_then(|rows| rows.get(label).copied()))
    }
}

#[async_trait]
impl AdvisoryStore for MemoryStore {
    async fn resolve_lookup(&self, kind: LookupKind, label: &str) -> StoreResult<i32> {
        self.state()?.resolve_lookup(kind, label)
    }

    async fn resolve_packages(&self, packages: &[Nevra]) -> StoreResult<Vec<Package>> {
        let mut state = self.state()?;
        Ok(packages.iter().map(|n| state.resolve_package(n)).collect())
    }

    async fn upsert_advisories(&self, advisories: &[AdvisoryMetadata]) -> StoreResult<Vec<i64>> {
        let mut state = self.state()?;

        for advisory in advisories {
            state.check(advisory)?;
        }

        let mut ids = Vec::with_capacity(advisories.len());
        for advisory in advisories {
            let existing = state.advisories.get(&advisory.name).cloned();
            let next_id = state.next_advisory_id;
            let row = apply_upsert(existing.as_ref(), advisory, || next_id);
            if existing.is_none() {
                state.next_advisory_id += 1;
            }

            let links: BTreeSet<(i64, bool)> = advisory
                .packages
                .iter()
                .map(|p| (state.resolve_package(&p.nevra).id, p.source))
                .collect();

            ids.push(row.id);
            state.links.insert(row.id, links);
            state.advisories.insert(advisory.name.clone(), row);
        }

        Ok(ids)
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state()?.checkpoint)
    }

    async fn save_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.state()?.checkpoint = Some(at);
        Ok(())
    }

    async fn try_acquire_run_lock(&self) -> StoreResult<bool> {
        Ok(self
            .run_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn release_run_lock(&self) -> StoreResult<()> {
        self.run_lock.store(false, Ordering::Release);
        Ok(())
    }
}
