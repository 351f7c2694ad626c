//! Type and severity registry
//!
//! Maps upstream free-text labels to stable lookup ids. Resolution goes
//! through the store's atomic get-or-create, so ids are append-only across
//! runs and processes; the cache here only saves round trips within a run.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::store::{AdvisoryStore, LookupKind};
use crate::error::StoreResult;

/// Label used when upstream sends no advisory type
pub const UNKNOWN_TYPE: &str = "unknown";

/// Upstream placeholder meaning "no severity"
const NO_SEVERITY: &str = "None";

/// Canonical form of an advisory type label
pub fn canonical_type(label: Option<&str>) -> String {
    let label = label.map(str::trim).unwrap_or_default();
    if label.is_empty() {
        UNKNOWN_TYPE.to_string()
    } else {
        label.to_lowercase()
    }
}

/// Severity label worth resolving to an id, if any
pub fn canonical_severity(label: Option<&str>) -> Option<&str> {
    label
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != NO_SEVERITY)
}

/// Per-run read-through cache over the store's lookup tables
pub struct TypeRegistry {
    store: Arc<dyn AdvisoryStore>,
    cache: HashMap<(LookupKind, String), i32>,
}

impl TypeRegistry {
    pub fn new(store: Arc<dyn AdvisoryStore>) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    async fn resolve(&mut self, kind: LookupKind, label: String) -> StoreResult<i32> {
        if let Some(id) = self.cache.get(&(kind, label.clone())) {
            return Ok(*id);
        }

        let id = self.store.resolve_lookup(kind, &label).await?;
        debug!(%kind, label = %label, id, "Resolved lookup label");
        self.cache.insert((kind, label), id);
        Ok(id)
    }

    /// Id of the advisory type `label`, allocating one for a new label
    pub async fn resolve_type(&mut self, label: Option<&str>) -> StoreResult<i32> {
        self.resolve(LookupKind::AdvisoryType, canonical_type(label))
            .await
    }

    /// Id of the severity `label`, or `None` when upstream gave no severity
    pub async fn resolve_severity(&mut self, label: Option<&str>) -> StoreResult<Option<i32>> {
        match canonical_severity(label) {
            Some(label) => self
                .resolve(LookupKind::Severity, label.to_string())
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}
