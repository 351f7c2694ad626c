//! PostgreSQL store
//!
//! Every `upsert_advisories` call runs in one transaction: advisory rows,
//! package rows and advisory/package links commit together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errata_common::types::Nevra;
use sqlx::pool::PoolConnection;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AdvisoryStore, LookupKind, CHECKPOINT_JOB};
use crate::error::{StoreError, StoreResult};
use crate::sync::models::{AdvisoryMetadata, Package};

/// [`AdvisoryStore`] backed by PostgreSQL
pub struct PgAdvisoryStore {
    pool: PgPool,
    lock_key: i64,
    /// Connection holding the session-level advisory lock while a run is active
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgAdvisoryStore {
    pub fn new(pool: PgPool, lock_key: i64) -> Self {
        Self {
            pool,
            lock_key,
            lock_conn: Mutex::new(None),
        }
    }
}

/// Get-or-create one lookup label
///
/// The insert only runs for a label that is not there yet: an identity value
/// is drawn before the conflict check, so a blind insert would burn one id
/// per call.
async fn resolve_lookup_in(
    conn: &mut PgConnection,
    kind: LookupKind,
    label: &str,
) -> Result<Option<i32>, sqlx::Error> {
    let sql = format!(
        r#"
        WITH existing AS (
            SELECT id FROM {table} WHERE name = $1
        ),
        inserted AS (
            INSERT INTO {table} (name)
            SELECT $1
            WHERE NOT EXISTS (SELECT 1 FROM existing)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
        )
        SELECT id FROM existing
        UNION ALL
        SELECT id FROM inserted
        "#,
        table = kind.table()
    );

    sqlx::query_scalar::<_, i32>(&sql)
        .bind(label)
        .fetch_optional(&mut *conn)
        .await
}

async fn resolve_packages_in(
    conn: &mut PgConnection,
    packages: &[Nevra],
) -> Result<Vec<Package>, sqlx::Error> {
    if packages.is_empty() {
        return Ok(Vec::new());
    }

    let names: Vec<String> = packages
        .iter()
        .map(|p| p.name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    sqlx::query(
        r#"
        INSERT INTO package_name (name)
        SELECT * FROM UNNEST($1::text[])
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(&names)
    .execute(&mut *conn)
    .await?;

    let name_ids: HashMap<String, i64> =
        sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM package_name WHERE name = ANY($1)")
            .bind(&names)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|(id, name)| (name, id))
            .collect();

    let mut keys: Vec<(i64, String)> = Vec::with_capacity(packages.len());
    for nevra in packages {
        let name_id = name_ids.get(&nevra.name).copied().ok_or_else(|| {
            sqlx::Error::Protocol(format!("package name '{}' missing after insert", nevra.name))
        })?;
        keys.push((name_id, nevra.evra()));
    }

    let name_id_column: Vec<i64> = keys.iter().map(|(id, _)| *id).collect();
    let evra_column: Vec<String> = keys.iter().map(|(_, evra)| evra.clone()).collect();

    sqlx::query(
        r#"
        INSERT INTO package (name_id, evra)
        SELECT * FROM UNNEST($1::bigint[], $2::text[])
        ON CONFLICT (name_id, evra) DO NOTHING
        "#,
    )
    .bind(&name_id_column)
    .bind(&evra_column)
    .execute(&mut *conn)
    .await?;

    let rows: HashMap<(i64, String), Package> = sqlx::query_as::<_, Package>(
        r#"
        SELECT p.id, p.name_id, p.evra
        FROM package p
        JOIN UNNEST($1::bigint[], $2::text[]) AS k(name_id, evra)
          ON p.name_id = k.name_id AND p.evra = k.evra
        "#,
    )
    .bind(&name_id_column)
    .bind(&evra_column)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|p| ((p.name_id, p.evra.clone()), p))
    .collect();

    keys.into_iter()
        .map(|key| {
            rows.get(&key).cloned().ok_or_else(|| {
                sqlx::Error::Protocol(format!("package {:?} missing after insert", key))
            })
        })
        .collect()
}

async fn upsert_rows_in(
    conn: &mut PgConnection,
    advisories: &[AdvisoryMetadata],
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        INSERT INTO advisory_metadata (
            name,
            synopsis,
            description,
            solution,
            summary,
            url,
            severity,
            severity_id,
            advisory_type_id,
            public_date,
            modified_date,
            cve_list,
            bugzilla_list,
            reference_list,
            modules_list,
            package_list,
            source_package_list
        )
        "#,
    );

    query_builder.push_values(advisories, |mut b, adv| {
        b.push_bind(&adv.name)
            .push_bind(&adv.synopsis)
            .push_bind(&adv.description)
            .push_bind(&adv.solution)
            .push_bind(&adv.summary)
            .push_bind(&adv.url)
            .push_bind(&adv.severity)
            .push_bind(adv.severity_id)
            .push_bind(adv.advisory_type_id)
            .push_bind(adv.public_date)
            .push_bind(adv.modified_date)
            .push_bind(Json(&adv.cve_list))
            .push_bind(Json(&adv.bugzilla_list))
            .push_bind(Json(&adv.reference_list))
            .push_bind(Json(&adv.modules_list))
            .push_bind(Json(&adv.package_list))
            .push_bind(Json(&adv.source_package_list));
    });

    query_builder.push(
        r#"
        ON CONFLICT (name) DO UPDATE SET
            synopsis = EXCLUDED.synopsis,
            description = EXCLUDED.description,
            solution = EXCLUDED.solution,
            summary = EXCLUDED.summary,
            url = EXCLUDED.url,
            severity = EXCLUDED.severity,
            severity_id = EXCLUDED.severity_id,
            advisory_type_id = EXCLUDED.advisory_type_id,
            public_date = EXCLUDED.public_date,
            modified_date = EXCLUDED.modified_date,
            cve_list = EXCLUDED.cve_list,
            bugzilla_list = EXCLUDED.bugzilla_list,
            reference_list = EXCLUDED.reference_list,
            modules_list = EXCLUDED.modules_list,
            package_list = EXCLUDED.package_list,
            source_package_list = EXCLUDED.source_package_list,
            synced_at = NOW()
        RETURNING id, name
        "#,
    );

    let rows = query_builder
        .build_query_as::<(i64, String)>()
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
}

async fn replace_links_in(
    conn: &mut PgConnection,
    advisory_ids: &[i64],
    links: &[(i64, i64, bool)],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM advisory_package WHERE advisory_id = ANY($1)")
        .bind(advisory_ids)
        .execute(&mut *conn)
        .await?;

    if links.is_empty() {
        return Ok(());
    }

    let advisory_column: Vec<i64> = links.iter().map(|l| l.0).collect();
    let package_column: Vec<i64> = links.iter().map(|l| l.1).collect();
    let source_column: Vec<bool> = links.iter().map(|l| l.2).collect();

    sqlx::query(
        r#"
        INSERT INTO advisory_package (advisory_id, package_id, source)
        SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bool[])
        ON CONFLICT (advisory_id, package_id) DO NOTHING
        "#,
    )
    .bind(&advisory_column)
    .bind(&package_column)
    .bind(&source_column)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl AdvisoryStore for PgAdvisoryStore {
    async fn resolve_lookup(&self, kind: LookupKind, label: &str) -> StoreResult<i32> {
        let mut conn = self.pool.acquire().await?;

        if let Some(id) = resolve_lookup_in(&mut conn, kind, label).await? {
            return Ok(id);
        }

        // A concurrent insert of the same label is invisible to the statement
        // snapshot above; it has committed by now.
        debug!(%kind, label, "Lookup insert raced, re-reading");
        resolve_lookup_in(&mut conn, kind, label)
            .await?
            .ok_or_else(|| StoreError::Rejected(format!("{} '{}' could not be resolved", kind, label)))
    }

    async fn resolve_packages(&self, packages: &[Nevra]) -> StoreResult<Vec<Package>> {
        let mut tx = self.pool.begin().await?;
        let rows = resolve_packages_in(&mut tx, packages).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn upsert_advisories(&self, advisories: &[AdvisoryMetadata]) -> StoreResult<Vec<i64>> {
        if advisories.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let ids_by_name = upsert_rows_in(&mut tx, advisories).await?;
        let ids = advisories
            .iter()
            .map(|adv| {
                ids_by_name.get(&adv.name).copied().ok_or_else(|| {
                    StoreError::Rejected(format!("advisory {} was not written", adv.name))
                })
            })
            .collect::<StoreResult<Vec<i64>>>()?;

        let nevras: Vec<Nevra> = advisories
            .iter()
            .flat_map(|adv| adv.packages.iter().map(|p| p.nevra.clone()))
            .collect();
        let packages = resolve_packages_in(&mut tx, &nevras).await?;

        let mut package_rows = packages.into_iter();
        let mut links = Vec::with_capacity(nevras.len());
        for (adv, advisory_id) in advisories.iter().zip(&ids) {
            for package_ref in &adv.packages {
                let package = package_rows.next().ok_or_else(|| {
                    StoreError::Rejected(format!("package rows missing for {}", adv.name))
                })?;
                links.push((*advisory_id, package.id, package_ref.source));
            }
        }

        replace_links_in(&mut tx, &ids, &links).await?;
        tx.commit().await?;

        debug!(count = advisories.len(), links = links.len(), "Advisory chunk committed");
        Ok(ids)
    }

    async fn load_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_sync_at FROM sync_checkpoint WHERE job = $1",
        )
        .bind(CHECKPOINT_JOB)
        .fetch_optional(&self.pool)
        .await?;

        Ok(at)
    }

    async fn save_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoint (job, last_sync_at)
            VALUES ($1, $2)
            ON CONFLICT (job)
            DO UPDATE SET last_sync_at = EXCLUDED.last_sync_at, updated_at = NOW()
            "#,
        )
        .bind(CHECKPOINT_JOB)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_acquire_run_lock(&self) -> StoreResult<bool> {
        let mut held = self.lock_conn.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            *held = Some(conn);
        }

        Ok(acquired)
    }

    async fn release_run_lock(&self) -> StoreResult<()> {
        let Some(mut conn) = self.lock_conn.lock().await.take() else {
            return Ok(());
        };

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;

        if !released {
            warn!(lock_key = self.lock_key, "Sync lock was not held by this session");
        }

        Ok(())
    }
}
