//! Record normalizer
//!
//! Turns one upstream record into an [`AdvisoryMetadata`]. Everything that can
//! be checked without the store (timestamps, package identifiers) is checked
//! first, so a record that fails to parse never grows the lookup tables.

use chrono::{DateTime, SecondsFormat, Utc};
use errata_common::types::Nevra;
use tracing::{debug, warn};

use super::models::{AdvisoryMetadata, PackageRef, UpstreamErratum};
use super::registry::TypeRegistry;
use crate::error::{NormalizeError, StoreError};

/// Parse an upstream timestamp carrying an explicit offset (`Z` or `+hh:mm`)
pub fn parse_timestamp(field: &'static str, value: Option<&str>) -> Result<DateTime<Utc>, NormalizeError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NormalizeError::field(field, "", "missing timestamp"))?;

    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| NormalizeError::field(field, value, e))
}

/// Render a timestamp the way upstream sends it
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

fn parse_packages(
    field: &'static str,
    values: &[String],
    source: bool,
) -> Result<Vec<PackageRef>, NormalizeError> {
    values
        .iter()
        .map(|value| {
            Nevra::parse(value)
                .map(|nevra| PackageRef { nevra, source })
                .map_err(|e| NormalizeError::field(field, value.as_str(), e))
        })
        .collect()
}

/// Normalize the upstream record `name`
///
/// Resolving the type and severity labels may insert lookup rows.
pub async fn normalize_record(
    name: &str,
    record: &UpstreamErratum,
    registry: &mut TypeRegistry,
) -> Result<AdvisoryMetadata, NormalizeError> {
    if name.trim().is_empty() {
        return Err(NormalizeError::field("name", name, "advisory name is empty"));
    }

    let public_date = parse_timestamp("issued", record.issued.as_deref())?;
    let modified_date = parse_timestamp("updated", record.updated.as_deref())?;

    let package_list = record.package_list.clone().unwrap_or_default();
    let source_package_list = record.source_package_list.clone().unwrap_or_default();
    let mut packages = parse_packages("package_list", &package_list, false)?;
    packages.extend(parse_packages("source_package_list", &source_package_list, true)?);

    let advisory_type_id = registry.resolve_type(record.advisory_type.as_deref()).await?;
    let severity_id = registry.resolve_severity(record.severity.as_deref()).await?;

    Ok(AdvisoryMetadata {
        name: name.to_string(),
        synopsis: record.synopsis.clone().unwrap_or_default(),
        description: record.description.clone().unwrap_or_default(),
        solution: record.solution.clone().unwrap_or_default(),
        summary: record.summary.clone().unwrap_or_default(),
        url: record.url.clone().filter(|u| !u.is_empty()),
        severity: record.severity.clone(),
        severity_id,
        advisory_type_id,
        public_date,
        modified_date,
        cve_list: record.cve_list.clone().unwrap_or_default(),
        bugzilla_list: record.bugzilla_list.clone().unwrap_or_default(),
        reference_list: record.reference_list.clone().unwrap_or_default(),
        modules_list: record.modules_list.clone().unwrap_or_default(),
        package_list,
        source_package_list,
        packages,
    })
}

/// Outcome of normalizing a fetched catalog
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    /// Advisories in fetch order
    pub advisories: Vec<AdvisoryMetadata>,
    /// Records that could not be normalized, with the reason
    pub failures: Vec<(String, NormalizeError)>,
}

/// Normalize every record, collecting per-record failures
///
/// Stops early only when the store behind the registry is unreachable,
/// since every remaining record would fail the same way.
pub async fn normalize_batch(
    records: &[(String, UpstreamErratum)],
    registry: &mut TypeRegistry,
) -> Result<NormalizedBatch, StoreError> {
    let mut batch = NormalizedBatch::default();

    for (name, record) in records {
        match normalize_record(name, record, registry).await {
            Ok(advisory) => batch.advisories.push(advisory),
            Err(NormalizeError::Registry(e)) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!(advisory = %name, error = %e, "Skipping advisory that failed to normalize");
                batch.failures.push((name.clone(), e));
            },
        }
    }

    debug!(
        normalized = batch.advisories.len(),
        failed = batch.failures.len(),
        "Normalized upstream records"
    );

    Ok(batch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sync::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn registry() -> TypeRegistry {
        TypeRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn record() -> UpstreamErratum {
        UpstreamErratum {
            updated: Some("2004-09-02T00:00:00+00:00".to_string()),
            issued: Some("2004-09-02T00:00:00+00:00".to_string()),
            description: Some("DESC".to_string()),
            solution: Some("SOL".to_string()),
            summary: Some("SUM".to_string()),
            url: Some("URL".to_string()),
            synopsis: Some("SYN".to_string()),
            advisory_type: Some("bugfix".to_string()),
            cve_list: Some(vec!["CVE-1".into(), "CVE-2".into(), "CVE-3".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_timestamp_round_trip_is_byte_identical() {
        let input = "2004-09-02T00:00:00+00:00";
        let parsed = parse_timestamp("issued", Some(input)).unwrap();
        assert_eq!(format_timestamp(&parsed), input);
        assert_eq!(parsed, parse_timestamp("issued", Some(input)).unwrap());
    }

    #[test]
    fn test_timestamp_offsets_are_normalized_to_utc() {
        let zulu = parse_timestamp("issued", Some("2020-01-01T12:00:00Z")).unwrap();
        let shifted = parse_timestamp("issued", Some("2020-01-01T14:00:00+02:00")).unwrap();
        assert_eq!(zulu, shifted);
    }

    #[test]
    fn test_timestamp_rejects_missing_offset_and_garbage() {
        assert!(parse_timestamp("issued", Some("2004-09-02 00:00:00")).is_err());
        assert!(parse_timestamp("issued", Some("yesterday")).is_err());

        let err = parse_timestamp("updated", None).unwrap_err();
        assert!(matches!(err, NormalizeError::Field { field: "updated", .. }));
    }

    #[tokio::test]
    async fn test_normalize_record() {
        let mut registry = registry();
        let adv = normalize_record("ER1", &record(), &mut registry).await.unwrap();

        let expected = Utc.with_ymd_and_hms(2004, 9, 2, 0, 0, 0).unwrap();
        assert_eq!(adv.public_date, expected);
        assert_eq!(adv.modified_date, expected);
        assert_eq!(adv.description, "DESC");
        assert_eq!(adv.solution, "SOL");
        assert_eq!(adv.summary, "SUM");
        assert_eq!(adv.url.as_deref(), Some("URL"));
        assert_eq!(adv.synopsis, "SYN");
        assert_eq!(adv.advisory_type_id, 2);
        assert_eq!(
            serde_json::to_string(&adv.cve_list).unwrap(),
            r#"["CVE-1","CVE-2","CVE-3"]"#
        );
    }

    #[tokio::test]
    async fn test_missing_optional_fields_default() {
        let mut registry = registry();
        let sparse = UpstreamErratum {
            issued: Some("2004-09-02T00:00:00+00:00".to_string()),
            updated: Some("2004-09-02T00:00:00+00:00".to_string()),
            ..Default::default()
        };

        let adv = normalize_record("RHBA-1", &sparse, &mut registry).await.unwrap();

        assert_eq!(adv.url, None);
        assert_eq!(adv.synopsis, "");
        assert_eq!(adv.advisory_type_id, 0);
        assert_eq!(adv.severity_id, None);
        assert!(adv.cve_list.is_empty());
        assert!(adv.modules_list.is_empty());
        assert!(adv.packages.is_empty());
    }

    #[tokio::test]
    async fn test_url_mapping() {
        let mut registry = registry();

        let mut empty = record();
        empty.url = Some(String::new());
        let adv = normalize_record("RHBA-1", &empty, &mut registry).await.unwrap();
        assert_eq!(adv.url, None);

        let mut given = record();
        given.url = Some("https://x".to_string());
        let adv = normalize_record("RHBA-1", &given, &mut registry).await.unwrap();
        assert_eq!(adv.url.as_deref(), Some("https://x"));
    }

    #[tokio::test]
    async fn test_lists_keep_order_and_duplicates() {
        let mut registry = registry();
        let mut rec = record();
        rec.cve_list = Some(vec!["CVE-9".into(), "CVE-1".into(), "CVE-9".into()]);
        rec.bugzilla_list = Some(vec!["2".into(), "1".into()]);

        let adv = normalize_record("RHSA-1", &rec, &mut registry).await.unwrap();

        assert_eq!(adv.cve_list, vec!["CVE-9", "CVE-1", "CVE-9"]);
        assert_eq!(adv.bugzilla_list, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_packages_are_parsed() {
        let mut registry = registry();
        let mut rec = record();
        rec.package_list = Some(vec!["kernel-5.10.13-200.fc31.x86_64".into()]);
        rec.source_package_list = Some(vec!["kernel-5.10.13-200.fc31.src".into()]);

        let adv = normalize_record("RH-100", &rec, &mut registry).await.unwrap();

        assert_eq!(adv.packages.len(), 2);
        assert_eq!(adv.packages[0].nevra.evra(), "5.10.13-200.fc31.x86_64");
        assert!(!adv.packages[0].source);
        assert!(adv.packages[1].source);
        assert_eq!(adv.package_list, vec!["kernel-5.10.13-200.fc31.x86_64"]);
    }

    #[tokio::test]
    async fn test_bad_package_is_field_error() {
        let mut registry = registry();
        let mut rec = record();
        rec.package_list = Some(vec!["not-a-package".into()]);

        let err = normalize_record("RH-100", &rec, &mut registry).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Field { field: "package_list", .. }));
    }

    #[tokio::test]
    async fn test_failed_record_does_not_grow_registry() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = TypeRegistry::new(store.clone());
        let mut rec = record();
        rec.advisory_type = Some("newsflash".to_string());
        rec.issued = Some("not a date".to_string());

        assert!(normalize_record("RH-1", &rec, &mut registry).await.is_err());
        assert_eq!(
            store
                .lookup_id(crate::sync::store::LookupKind::AdvisoryType, "newsflash")
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_batch_collects_failures() {
        let mut registry = registry();
        let mut bad = record();
        bad.updated = Some("2004-13-45".to_string());

        let records = vec![
            ("RHBA-1".to_string(), record()),
            ("RHBA-2".to_string(), bad),
            ("RHBA-3".to_string(), record()),
        ];

        let batch = normalize_batch(&records, &mut registry).await.unwrap();

        assert_eq!(batch.advisories.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, "RHBA-2");
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let mut registry = registry();
        let batch = normalize_batch(&[], &mut registry).await.unwrap();
        assert!(batch.advisories.is_empty());
        assert!(batch.failures.is_empty());
    }
}
