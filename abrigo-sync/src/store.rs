//! Local SQLite store for offline-first operations
//!
//! Provides:
//! - Per-entity persistent record collections with typed payloads
//! - Indexes on business id and sync state
//! - Soft deletion
//! - An explicit unit-of-work (`StoreTx`) for multi-write operations
//!
//! The store is an explicitly constructed handle passed to the sync engine
//! and the domain layer; there is no ambient global instance.

use crate::error::{SyncError, SyncResult};
use crate::record::{Entity, RawRecord, RecordMeta, RecordStatus, Stored};
use crate::remote::RemoteRecord;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, Transaction};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Configuration for the local store
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Path to the database file
    pub db_path: String,
    /// Node ID for this device
    pub node_id: Uuid,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "abrigo_local.db".to_string(),
            node_id: Uuid::new_v4(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Local database handle
pub struct LocalStore {
    pool: SqlitePool,
    node_id: Uuid,
}

impl LocalStore {
    /// Open (creating if missing) the local database and initialize schema.
    pub async fn open(config: LocalStoreConfig) -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(Path::new(&config.db_path))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if config.enable_wal {
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&pool)
                .await?;
        }

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        let store = Self {
            pool,
            node_id: config.node_id,
        };

        store.initialize_schema().await?;

        tracing::debug!(node_id = %store.node_id, db_path = %config.db_path, "Opened local store");

        Ok(store)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                business_id TEXT NOT NULL,
                remote_id TEXT,
                legacy_id TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_business ON records(entity_type, business_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_synced ON records(entity_type, synced)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_status ON records(entity_type, status)",
        )
        .execute(&self.pool)
        .await?;

        // Sync bookkeeping (last pull timestamps and the like)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get node ID
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Begin an explicit unit of work. Dropping the returned transaction
    /// without committing rolls back every write made through it.
    pub async fn begin(&self) -> SyncResult<StoreTx> {
        Ok(StoreTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Insert or update a record from a domain mutation. Marks the record
    /// unsynced and refreshes `updated_at`. Assigns `local_id` on insert.
    pub async fn put<T: Entity>(&self, record: &mut Stored<T>) -> SyncResult<i64> {
        let mut conn = self.pool.acquire().await?;
        put_record(&mut conn, record).await
    }

    /// Fetch one record by its store-local identifier.
    pub async fn get<T: Entity>(&self, local_id: i64) -> SyncResult<Option<Stored<T>>> {
        let mut conn = self.pool.acquire().await?;
        match get_raw(&mut conn, T::ENTITY, local_id).await? {
            Some(raw) => Ok(Some(raw.into_stored()?)),
            None => Ok(None),
        }
    }

    /// Fetch one record by business identifier.
    pub async fn get_by_business_id<T: Entity>(
        &self,
        business_id: &str,
    ) -> SyncResult<Option<Stored<T>>> {
        let mut conn = self.pool.acquire().await?;
        match get_by_business_id_raw(&mut conn, T::ENTITY, business_id).await? {
            Some(raw) => Ok(Some(raw.into_stored()?)),
            None => Ok(None),
        }
    }

    /// All records of an entity, optionally restricted to non-deleted ones.
    pub async fn get_all<T: Entity>(&self, only_active: bool) -> SyncResult<Vec<Stored<T>>> {
        let mut conn = self.pool.acquire().await?;
        get_all_raw(&mut conn, T::ENTITY, only_active)
            .await?
            .into_iter()
            .map(RawRecord::into_stored)
            .collect()
    }

    /// Records whose payload field equals `value` (string comparison over
    /// `json_extract`).
    pub async fn query_by_field<T: Entity>(
        &self,
        field: &str,
        value: &str,
    ) -> SyncResult<Vec<Stored<T>>> {
        let mut conn = self.pool.acquire().await?;
        query_by_field_raw(&mut conn, T::ENTITY, field, value)
            .await?
            .into_iter()
            .map(RawRecord::into_stored)
            .collect()
    }

    /// Soft-delete: status becomes `deleted`, `deleted_at` is set and the
    /// record is marked unsynced so the deletion propagates on the next push.
    pub async fn soft_delete(&self, entity: &str, local_id: i64) -> SyncResult<()> {
        let mut conn = self.pool.acquire().await?;
        soft_delete_raw(&mut conn, entity, local_id).await
    }

    /// Records with local changes not yet confirmed remote.
    pub async fn list_unsynced(&self, entity: &str, limit: i64) -> SyncResult<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT local_id, business_id, remote_id, legacy_id, synced, status,
                   created_at, updated_at, deleted_at, data
            FROM records
            WHERE entity_type = ? AND synced = 0
            ORDER BY local_id ASC
            LIMIT ?
            "#,
        )
        .bind(entity)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_raw).collect()
    }

    /// Confirm a pushed record, guarded on `updated_at` so a concurrent
    /// newer local edit is never clobbered. Returns `false` when the guard
    /// did not match and the record stays unsynced.
    pub async fn mark_synced_guarded(
        &self,
        entity: &str,
        local_id: i64,
        seen_updated_at: DateTime<Utc>,
        remote_id: Option<&str>,
    ) -> SyncResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records
            SET synced = 1,
                remote_id = COALESCE(?, remote_id)
            WHERE entity_type = ? AND local_id = ? AND updated_at = ?
            "#,
        )
        .bind(remote_id)
        .bind(entity)
        .bind(local_id)
        .bind(seen_updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Pull-merge writer: upsert a remote record over the matched local one
    /// (or insert it as new) with `synced = true`. Only the sync engine
    /// calls this.
    pub async fn apply_remote(
        &self,
        entity: &str,
        local_id: Option<i64>,
        remote: &RemoteRecord,
    ) -> SyncResult<i64> {
        let data = serde_json::to_string(&remote.data)?;

        match local_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE records
                    SET business_id = ?, remote_id = ?, legacy_id = ?,
                        synced = 1, status = ?,
                        created_at = ?, updated_at = ?, deleted_at = ?,
                        data = ?
                    WHERE entity_type = ? AND local_id = ?
                    "#,
                )
                .bind(&remote.business_id)
                .bind(&remote.remote_id)
                .bind(&remote.legacy_id)
                .bind(remote.status.as_str())
                .bind(remote.created_at.to_rfc3339())
                .bind(remote.updated_at.to_rfc3339())
                .bind(remote.deleted_at.map(|t| t.to_rfc3339()))
                .bind(data)
                .bind(entity)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Ok(id)
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO records (
                        entity_type, business_id, remote_id, legacy_id,
                        synced, status, created_at, updated_at, deleted_at, data
                    ) VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(entity)
                .bind(&remote.business_id)
                .bind(&remote.remote_id)
                .bind(&remote.legacy_id)
                .bind(remote.status.as_str())
                .bind(remote.created_at.to_rfc3339())
                .bind(remote.updated_at.to_rfc3339())
                .bind(remote.deleted_at.map(|t| t.to_rfc3339()))
                .bind(data)
                .execute(&self.pool)
                .await?;
                Ok(result.last_insert_rowid())
            }
        }
    }

    /// Total record count for an entity.
    pub async fn count(&self, entity: &str) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE entity_type = ?")
            .bind(entity)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Count of records already confirmed remote.
    pub async fn count_synced(&self, entity: &str) -> SyncResult<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM records WHERE entity_type = ? AND synced = 1")
                .bind(entity)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get("n")?)
    }

    /// Read a sync bookkeeping value.
    pub async fn get_meta(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Write a sync bookkeeping value.
    pub async fn set_meta(&self, key: &str, value: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the store.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub(crate) async fn acquire(&self) -> SyncResult<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        Ok(self.pool.acquire().await?)
    }
}

/// Explicit unit of work spanning the record collections it touches.
/// Either every write through it commits, or none do.
pub struct StoreTx {
    tx: Transaction<'static, sqlx::Sqlite>,
}

impl StoreTx {
    pub async fn put<T: Entity>(&mut self, record: &mut Stored<T>) -> SyncResult<i64> {
        put_record(&mut self.tx, record).await
    }

    pub async fn get_by_business_id<T: Entity>(
        &mut self,
        business_id: &str,
    ) -> SyncResult<Option<Stored<T>>> {
        match get_by_business_id_raw(&mut self.tx, T::ENTITY, business_id).await? {
            Some(raw) => Ok(Some(raw.into_stored()?)),
            None => Ok(None),
        }
    }

    pub async fn get_all<T: Entity>(&mut self, only_active: bool) -> SyncResult<Vec<Stored<T>>> {
        get_all_raw(&mut self.tx, T::ENTITY, only_active)
            .await?
            .into_iter()
            .map(RawRecord::into_stored)
            .collect()
    }

    pub async fn query_by_field<T: Entity>(
        &mut self,
        field: &str,
        value: &str,
    ) -> SyncResult<Vec<Stored<T>>> {
        query_by_field_raw(&mut self.tx, T::ENTITY, field, value)
            .await?
            .into_iter()
            .map(RawRecord::into_stored)
            .collect()
    }

    pub async fn soft_delete(&mut self, entity: &str, local_id: i64) -> SyncResult<()> {
        soft_delete_raw(&mut self.tx, entity, local_id).await
    }

    pub async fn commit(self) -> SyncResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> SyncResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn put_record<T: Entity>(
    conn: &mut SqliteConnection,
    record: &mut Stored<T>,
) -> SyncResult<i64> {
    // Domain mutation path: the record now differs from the last known
    // remote state.
    record.meta.synced = false;
    record.meta.updated_at = Utc::now();

    let data = serde_json::to_string(&record.data)?;

    match record.meta.local_id {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE records
                SET business_id = ?, remote_id = ?, legacy_id = ?,
                    synced = 0, status = ?, updated_at = ?, deleted_at = ?, data = ?
                WHERE entity_type = ? AND local_id = ?
                "#,
            )
            .bind(&record.meta.business_id)
            .bind(&record.meta.remote_id)
            .bind(&record.meta.legacy_id)
            .bind(record.meta.status.as_str())
            .bind(record.meta.updated_at.to_rfc3339())
            .bind(record.meta.deleted_at.map(|t| t.to_rfc3339()))
            .bind(data)
            .bind(T::ENTITY)
            .bind(id)
            .execute(&mut *conn)
            .await?;

            tracing::debug!(entity_type = T::ENTITY, local_id = id, "Updated record");
            Ok(id)
        }
        None => {
            let result = sqlx::query(
                r#"
                INSERT INTO records (
                    entity_type, business_id, remote_id, legacy_id,
                    synced, status, created_at, updated_at, deleted_at, data
                ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(T::ENTITY)
            .bind(&record.meta.business_id)
            .bind(&record.meta.remote_id)
            .bind(&record.meta.legacy_id)
            .bind(record.meta.status.as_str())
            .bind(record.meta.created_at.to_rfc3339())
            .bind(record.meta.updated_at.to_rfc3339())
            .bind(record.meta.deleted_at.map(|t| t.to_rfc3339()))
            .bind(data)
            .execute(&mut *conn)
            .await?;

            let id = result.last_insert_rowid();
            record.meta.local_id = Some(id);

            tracing::debug!(
                entity_type = T::ENTITY,
                local_id = id,
                business_id = %record.meta.business_id,
                "Inserted record"
            );
            Ok(id)
        }
    }
}

async fn get_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    local_id: i64,
) -> SyncResult<Option<RawRecord>> {
    let row = sqlx::query(
        r#"
        SELECT local_id, business_id, remote_id, legacy_id, synced, status,
               created_at, updated_at, deleted_at, data
        FROM records
        WHERE entity_type = ? AND local_id = ?
        "#,
    )
    .bind(entity)
    .bind(local_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_raw).transpose()
}

pub(crate) async fn get_by_business_id_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    business_id: &str,
) -> SyncResult<Option<RawRecord>> {
    let row = sqlx::query(
        r#"
        SELECT local_id, business_id, remote_id, legacy_id, synced, status,
               created_at, updated_at, deleted_at, data
        FROM records
        WHERE entity_type = ? AND business_id = ?
        "#,
    )
    .bind(entity)
    .bind(business_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_raw).transpose()
}

pub(crate) async fn get_by_envelope_key_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    column: EnvelopeKey,
    value: &str,
) -> SyncResult<Option<RawRecord>> {
    // The column name comes from a closed enum, never from input.
    let sql = match column {
        EnvelopeKey::RemoteId => {
            r#"
            SELECT local_id, business_id, remote_id, legacy_id, synced, status,
                   created_at, updated_at, deleted_at, data
            FROM records
            WHERE entity_type = ? AND remote_id = ?
            "#
        }
        EnvelopeKey::LegacyId => {
            r#"
            SELECT local_id, business_id, remote_id, legacy_id, synced, status,
                   created_at, updated_at, deleted_at, data
            FROM records
            WHERE entity_type = ? AND legacy_id = ?
            "#
        }
    };

    let row = sqlx::query(sql)
        .bind(entity)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_raw).transpose()
}

/// Envelope columns the identity resolver may look up besides the
/// business identifier.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EnvelopeKey {
    RemoteId,
    LegacyId,
}

async fn get_all_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    only_active: bool,
) -> SyncResult<Vec<RawRecord>> {
    let rows = if only_active {
        sqlx::query(
            r#"
            SELECT local_id, business_id, remote_id, legacy_id, synced, status,
                   created_at, updated_at, deleted_at, data
            FROM records
            WHERE entity_type = ? AND status != 'deleted'
            ORDER BY local_id ASC
            "#,
        )
        .bind(entity)
        .fetch_all(&mut *conn)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT local_id, business_id, remote_id, legacy_id, synced, status,
                   created_at, updated_at, deleted_at, data
            FROM records
            WHERE entity_type = ?
            ORDER BY local_id ASC
            "#,
        )
        .bind(entity)
        .fetch_all(&mut *conn)
        .await?
    };

    rows.iter().map(row_to_raw).collect()
}

async fn query_by_field_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    field: &str,
    value: &str,
) -> SyncResult<Vec<RawRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT local_id, business_id, remote_id, legacy_id, synced, status,
               created_at, updated_at, deleted_at, data
        FROM records
        WHERE entity_type = ? AND json_extract(data, '$.' || ?) = ?
        ORDER BY local_id ASC
        "#,
    )
    .bind(entity)
    .bind(field)
    .bind(value)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_raw).collect()
}

async fn soft_delete_raw(
    conn: &mut SqliteConnection,
    entity: &str,
    local_id: i64,
) -> SyncResult<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE records
        SET status = 'deleted', deleted_at = ?, updated_at = ?, synced = 0
        WHERE entity_type = ? AND local_id = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(entity)
    .bind(local_id)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(entity_type = entity, local_id, "Soft-deleted record");
    Ok(())
}

fn row_to_raw(row: &SqliteRow) -> SyncResult<RawRecord> {
    let local_id: i64 = row.try_get("local_id")?;
    let business_id: String = row.try_get("business_id")?;
    let remote_id: Option<String> = row.try_get("remote_id")?;
    let legacy_id: Option<String> = row.try_get("legacy_id")?;
    let synced: i64 = row.try_get("synced")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;
    let data: String = row.try_get("data")?;

    Ok(RawRecord {
        meta: RecordMeta {
            local_id: Some(local_id),
            business_id,
            remote_id,
            legacy_id,
            synced: synced != 0,
            status: RecordStatus::from_str(&status)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            deleted_at: deleted_at.as_deref().map(parse_ts).transpose()?,
        },
        data: serde_json::Value::from_str(&data)
            .map_err(|e| SyncError::Serialization(e.to_string()))?,
    })
}

fn parse_ts(s: &str) -> SyncResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| SyncError::InvalidRecord(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::NamedTempFile;

    pub async fn create_test_store() -> (LocalStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();

        let config = LocalStoreConfig {
            db_path,
            node_id: Uuid::new_v4(),
            max_connections: 5,
            enable_wal: true,
        };

        (LocalStore::open(config).await.unwrap(), temp_file)
    }
}
