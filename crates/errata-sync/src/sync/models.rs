//! Upstream wire types and the local advisory model
//!
//! The upstream structs mirror the errata endpoint's JSON and accept missing
//! or `null` fields; defaulting happens in the normalizer, not here.

use chrono::{DateTime, Utc};
use errata_common::types::Nevra;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Regex matching every advisory in the upstream catalog
pub const ALL_ERRATA: &str = ".*";

// ============================================================================
// Upstream (wire) types
// ============================================================================

/// One page request against the errata endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrataRequest {
    pub errata_list: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<String>,
}

impl ErrataRequest {
    /// Request for page `page` of the whole catalog
    pub fn page(page: u32, page_size: u32, modified_since: Option<DateTime<Utc>>) -> Self {
        Self {
            errata_list: vec![ALL_ERRATA.to_string()],
            page,
            page_size,
            modified_since: modified_since.map(|t| t.to_rfc3339()),
        }
    }
}

/// One page of the upstream catalog
///
/// `errata_list` is keyed by advisory name; the `BTreeMap` keeps the order in
/// which a page is processed independent of the JSON object order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrataResponse {
    #[serde(default)]
    pub errata_list: BTreeMap<String, UpstreamErratum>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    /// Total page count at the time of this response
    pub pages: u32,
}

/// A single upstream advisory record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamErratum {
    pub synopsis: Option<String>,
    pub summary: Option<String>,
    #[serde(rename = "type")]
    pub advisory_type: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub issued: Option<String>,
    pub updated: Option<String>,
    pub url: Option<String>,
    pub cve_list: Option<Vec<String>>,
    pub bugzilla_list: Option<Vec<String>>,
    pub reference_list: Option<Vec<String>>,
    /// Module stream descriptors, kept opaque
    pub modules_list: Option<Vec<serde_json::Value>>,
    pub package_list: Option<Vec<String>>,
    pub source_package_list: Option<Vec<String>>,
}

// ============================================================================
// Local model
// ============================================================================

/// A normalized advisory, ready to be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryMetadata {
    /// Unique business key, e.g. "RHBA-2004:391"
    pub name: String,
    pub synopsis: String,
    pub description: String,
    pub solution: String,
    pub summary: String,
    pub url: Option<String>,
    pub severity: Option<String>,
    pub severity_id: Option<i32>,
    pub advisory_type_id: i32,
    pub public_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub cve_list: Vec<String>,
    pub bugzilla_list: Vec<String>,
    pub reference_list: Vec<String>,
    pub modules_list: Vec<serde_json::Value>,
    pub package_list: Vec<String>,
    pub source_package_list: Vec<String>,
    /// Parsed `package_list` and `source_package_list` entries
    pub packages: Vec<PackageRef>,
}

/// A package fixed by an advisory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PackageRef {
    pub nevra: Nevra,
    /// Listed in `source_package_list` rather than `package_list`
    pub source: bool,
}

/// A persisted advisory row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAdvisory {
    pub id: i64,
    #[serde(flatten)]
    pub advisory: AdvisoryMetadata,
}

/// A persisted package row, unique per (name, evra)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Package {
    pub id: i64,
    pub name_id: i64,
    pub evra: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_missing_modified_since() {
        let request = ErrataRequest::page(2, 50, None);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({"errata_list": [".*"], "page": 2, "page_size": 50})
        );
    }

    #[test]
    fn test_response_tolerates_nulls_and_missing_fields() {
        let response: ErrataResponse = serde_json::from_value(json!({
            "errata_list": {
                "RHSA-2020:1": {
                    "type": "security",
                    "url": null,
                    "cve_list": null,
                    "issued": "2020-01-01T00:00:00+00:00"
                }
            },
            "page": 0,
            "page_size": 10,
            "pages": 1
        }))
        .unwrap();

        let record = &response.errata_list["RHSA-2020:1"];
        assert_eq!(record.advisory_type.as_deref(), Some("security"));
        assert_eq!(record.url, None);
        assert_eq!(record.cve_list, None);
        assert_eq!(record.bugzilla_list, None);
        assert_eq!(response.pages, 1);
    }

    #[test]
    fn test_response_requires_page_count() {
        let result = serde_json::from_value::<ErrataResponse>(json!({
            "errata_list": {},
            "page": 0
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_response_orders_advisories_by_name() {
        let response: ErrataResponse = serde_json::from_str(
            r#"{"errata_list": {"RHSA-2": {}, "RHBA-1": {}, "RHEA-3": {}}, "pages": 1}"#,
        )
        .unwrap();

        let names: Vec<_> = response.errata_list.keys().cloned().collect();
        assert_eq!(names, vec!["RHBA-1", "RHEA-3", "RHSA-2"]);
    }
}
