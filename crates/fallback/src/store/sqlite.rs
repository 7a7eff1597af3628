//! Offline state persisted in SQLite.
//!
//! Everything the offline layer must not lose across restarts lives in one
//! database file (`{app_data_dir}/protrack/offline.db` by default): the
//! pending-operation queue, dead letters, the record mirror and the id map.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protrack_core::{Collection, OperationId, RecordId};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::r#trait::{OfflineStore, StoreError};
use crate::types::{DeadLetter, OperationKind, PendingOperation};

/// SQLite-backed offline store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite store at {:?}", path))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open the database at the default location under the OS data directory.
    pub async fn open_default() -> anyhow::Result<Self> {
        Self::open(default_db_path()?).await
    }

    /// Private in-memory database (tests).
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;
        // A second connection would see a different, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory SQLite store")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS pending_operations (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                kind             TEXT NOT NULL,
                entity_id        TEXT NOT NULL,
                payload          TEXT NOT NULL,
                idempotency_key  TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                attempts         INTEGER NOT NULL DEFAULT 0,
                last_error       TEXT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                seq               INTEGER PRIMARY KEY AUTOINCREMENT,
                id                TEXT NOT NULL UNIQUE,
                operation         TEXT NOT NULL,
                reason            TEXT NOT NULL,
                dead_lettered_at  TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mirror_records (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection   TEXT NOT NULL,
                record_id    TEXT NOT NULL,
                data         TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE (collection, record_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS id_map (
                local_id   TEXT PRIMARY KEY,
                remote_id  TEXT NOT NULL,
                mapped_at  TEXT NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .context("failed to migrate offline store schema")?;
        }
        Ok(())
    }

    async fn insert_operation<'e, E>(executor: E, op: &PendingOperation) -> anyhow::Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO pending_operations (
                id,
                kind,
                entity_id,
                payload,
                idempotency_key,
                created_at,
                attempts,
                last_error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.kind.as_str())
        .bind(op.entity_id.as_str())
        .bind(op.payload.to_string())
        .bind(op.idempotency_key.to_string())
        .bind(op.created_at.to_rfc3339())
        .bind(i64::from(op.attempts))
        .bind(op.last_error.as_deref())
        .execute(executor)
        .await
        .context("failed to insert pending operation")?;
        Ok(())
    }
}

const SELECT_OPERATIONS: &str = r#"
    SELECT
        id,
        kind,
        entity_id,
        payload,
        idempotency_key,
        created_at,
        attempts,
        last_error
    FROM pending_operations
"#;

#[async_trait]
impl OfflineStore for SqliteStore {
    async fn append_operation(&self, op: &PendingOperation) -> Result<(), StoreError> {
        Self::insert_operation(&self.pool, op).await?;
        Ok(())
    }

    async fn pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_OPERATIONS} ORDER BY seq ASC"))
            .fetch_all(&self.pool)
            .await
            .context("failed to list pending operations")?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            ops.push(row_to_operation(row)?);
        }
        Ok(ops)
    }

    async fn head_operation(&self) -> Result<Option<PendingOperation>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_OPERATIONS} ORDER BY seq ASC LIMIT 1"))
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch head of queue")?;

        Ok(row.map(row_to_operation).transpose()?)
    }

    async fn count_operations(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM pending_operations")
            .fetch_one(&self.pool)
            .await
            .context("failed to count pending operations")?;
        let total: i64 = row.try_get("total").context("failed to read count")?;
        Ok(usize::try_from(total).unwrap_or(0))
    }

    async fn remove_operation(&self, id: OperationId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to remove pending operation")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound(id));
        }
        Ok(())
    }

    async fn record_failure(&self, id: OperationId, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pending_operations
            SET attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(error)
        .execute(&self.pool)
        .await
        .context("failed to record replay failure")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound(id));
        }
        Ok(())
    }

    async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<DeadLetter, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin dead-letter transaction")?;

        let row = sqlx::query(&format!("{SELECT_OPERATIONS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .context("failed to load operation to dead-letter")?
            .ok_or(StoreError::OperationNotFound(id))?;
        let operation = row_to_operation(row)?;

        let letter = DeadLetter {
            operation,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        };
        let serialized =
            serde_json::to_string(&letter.operation).context("failed to serialize dead letter")?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, operation, reason, dead_lettered_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(id.to_string())
        .bind(serialized)
        .bind(reason)
        .bind(letter.dead_lettered_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("failed to insert dead letter")?;

        sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("failed to remove dead-lettered operation")?;

        tx.commit()
            .await
            .context("failed to commit dead-letter transaction")?;
        Ok(letter)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT operation, reason, dead_lettered_at
            FROM dead_letters
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list dead letters")?;

        let mut letters = Vec::with_capacity(rows.len());
        for row in rows {
            letters.push(row_to_dead_letter(row)?);
        }
        Ok(letters)
    }

    async fn requeue_dead_letter(&self, id: OperationId) -> Result<PendingOperation, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin requeue transaction")?;

        let row = sqlx::query(
            "SELECT operation, reason, dead_lettered_at FROM dead_letters WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("failed to load dead letter")?
        .ok_or(StoreError::DeadLetterNotFound(id))?;
        let letter = row_to_dead_letter(row)?;

        sqlx::query("DELETE FROM dead_letters WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("failed to remove dead letter")?;
        Self::insert_operation(&mut *tx, &letter.operation).await?;

        tx.commit()
            .await
            .context("failed to commit requeue transaction")?;
        Ok(letter.operation)
    }

    async fn discard_dead_letter(&self, id: OperationId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to discard dead letter")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DeadLetterNotFound(id));
        }
        Ok(())
    }

    async fn put_record(
        &self,
        collection: Collection,
        id: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO mirror_records (collection, record_id, data, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(collection, record_id)
            DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection.table_name())
        .bind(id.as_str())
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to upsert mirrored record")?;
        Ok(())
    }

    async fn rekey_record(
        &self,
        collection: Collection,
        from: &RecordId,
        to: &RecordId,
        data: &Value,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin rekey transaction")?;

        let from_seq: Option<i64> = sqlx::query_scalar(
            "SELECT seq FROM mirror_records WHERE collection = ?1 AND record_id = ?2",
        )
        .bind(collection.table_name())
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await
        .context("failed to look up mirrored record")?;

        let now = Utc::now().to_rfc3339();
        match from_seq {
            Some(seq) => {
                sqlx::query(
                    "DELETE FROM mirror_records WHERE collection = ?1 AND record_id = ?2 AND seq <> ?3",
                )
                .bind(collection.table_name())
                .bind(to.as_str())
                .bind(seq)
                .execute(&mut *tx)
                .await
                .context("failed to drop superseded mirrored record")?;

                sqlx::query(
                    r#"
                    UPDATE mirror_records
                    SET record_id = ?2,
                        data = ?3,
                        updated_at = ?4
                    WHERE seq = ?1
                    "#,
                )
                .bind(seq)
                .bind(to.as_str())
                .bind(data.to_string())
                .bind(&now)
                .execute(&mut *tx)
                .await
                .context("failed to rekey mirrored record")?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO mirror_records (collection, record_id, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(collection, record_id)
                    DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(collection.table_name())
                .bind(to.as_str())
                .bind(data.to_string())
                .bind(&now)
                .execute(&mut *tx)
                .await
                .context("failed to upsert mirrored record")?;
            }
        }

        tx.commit()
            .await
            .context("failed to commit rekey transaction")?;
        Ok(())
    }

    async fn get_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT data
            FROM mirror_records
            WHERE collection = ?1
              AND record_id = ?2
            "#,
        )
        .bind(collection.table_name())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch mirrored record")?;

        match row {
            Some(row) => Ok(Some(decode_json(&row, "data")?)),
            None => Ok(None),
        }
    }

    async fn records(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data
            FROM mirror_records
            WHERE collection = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(collection.table_name())
        .fetch_all(&self.pool)
        .await
        .context("failed to list mirrored records")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(decode_json(&row, "data")?);
        }
        Ok(records)
    }

    async fn map_id(&self, local: &RecordId, remote: &RecordId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO id_map (local_id, remote_id, mapped_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(local_id)
            DO UPDATE SET
                remote_id = excluded.remote_id,
                mapped_at = excluded.mapped_at
            "#,
        )
        .bind(local.as_str())
        .bind(remote.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to record id mapping")?;
        Ok(())
    }

    async fn resolve_id(&self, local: &RecordId) -> Result<Option<RecordId>, StoreError> {
        let row = sqlx::query("SELECT remote_id FROM id_map WHERE local_id = ?1")
            .bind(local.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("failed to resolve id mapping")?;

        match row {
            Some(row) => {
                let remote: String = row.try_get("remote_id").context("invalid id_map row")?;
                Ok(Some(RecordId::remote(remote)))
            }
            None => Ok(None),
        }
    }

    async fn id_mappings(&self) -> Result<Vec<(RecordId, RecordId)>, StoreError> {
        let rows = sqlx::query("SELECT local_id, remote_id FROM id_map ORDER BY local_id ASC")
            .fetch_all(&self.pool)
            .await
            .context("failed to list id mappings")?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            let local: String = row.try_get("local_id").context("invalid id_map row")?;
            let remote: String = row.try_get("remote_id").context("invalid id_map row")?;
            let local = local
                .parse::<RecordId>()
                .context("invalid local_id in id_map")?;
            pairs.push((local, RecordId::remote(remote)));
        }
        Ok(pairs)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        for table in ["pending_operations", "dead_letters", "mirror_records", "id_map"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to clear {table}"))?;
        }
        Ok(())
    }
}

fn decode_json(row: &SqliteRow, column: &str) -> anyhow::Result<Value> {
    let raw: String = row
        .try_get(column)
        .with_context(|| format!("missing column {column}"))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in column {column}"))
}

fn parse_timestamp(raw: &str, column: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid {column} timestamp"))
}

/// Map a database row into a `PendingOperation`.
fn row_to_operation(row: SqliteRow) -> anyhow::Result<PendingOperation> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<OperationId>()
        .context("invalid id in pending_operations")?;

    let kind_str: String = row.try_get("kind")?;
    let kind = kind_str
        .parse::<OperationKind>()
        .context("invalid kind in pending_operations")?;

    let entity_str: String = row.try_get("entity_id")?;
    let entity_id = entity_str
        .parse::<RecordId>()
        .context("invalid entity_id in pending_operations")?;

    let payload = decode_json(&row, "payload")?;

    let key_str: String = row.try_get("idempotency_key")?;
    let idempotency_key = key_str
        .parse()
        .context("invalid idempotency_key in pending_operations")?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = parse_timestamp(&created_at_str, "created_at")?;

    let attempts: i64 = row.try_get("attempts")?;
    let last_error: Option<String> = row.try_get("last_error")?;

    Ok(PendingOperation {
        id,
        kind,
        entity_id,
        payload,
        idempotency_key,
        created_at,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error,
    })
}

fn row_to_dead_letter(row: SqliteRow) -> anyhow::Result<DeadLetter> {
    let operation: PendingOperation = serde_json::from_value(decode_json(&row, "operation")?)
        .context("invalid operation in dead_letters")?;
    let reason: String = row.try_get("reason")?;
    let at_str: String = row.try_get("dead_lettered_at")?;

    Ok(DeadLetter {
        operation,
        reason,
        dead_lettered_at: parse_timestamp(&at_str, "dead_lettered_at")?,
    })
}

/// Resolve the default database path: `{app_data_dir}/protrack/offline.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut path = base;
    path.push("protrack");
    path.push("offline.db");
    Ok(path)
}
