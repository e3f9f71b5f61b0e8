use super::rows::MutationRow;
use crate::application::ports::mutation_queue::MutationQueue;
use crate::domain::entities::{MutationDraft, MutationRecord};
use crate::domain::value_objects::RecordId;
use crate::shared::config::StorageConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::SubsecRound;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum QueueLocation {
    File(PathBuf),
    Memory,
}

/// SQLite-backed durable queue.
///
/// Nothing is opened until the first operation; the pool (and its migrations)
/// is initialized exactly once and every later call reuses it.
pub struct SqliteMutationQueue {
    location: QueueLocation,
    max_connections: u32,
    pool: OnceCell<SqlitePool>,
}

impl SqliteMutationQueue {
    pub fn new(path: impl Into<PathBuf>, max_connections: u32) -> Self {
        Self {
            location: QueueLocation::File(path.into()),
            max_connections: max_connections.max(1),
            pool: OnceCell::new(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.queue_path(), config.max_connections)
    }

    /// Private in-memory database; contents vanish with the queue.
    pub fn in_memory() -> Self {
        Self {
            location: QueueLocation::Memory,
            max_connections: 1,
            pool: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, AppError> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<SqlitePool, AppError> {
        let options = match &self.location {
            QueueLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await.map_err(|err| {
                            AppError::StorageUnavailable(format!(
                                "cannot create queue directory {}: {err}",
                                parent.display()
                            ))
                        })?;
                    }
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Full)
                    .busy_timeout(Duration::from_secs(5))
            }
            QueueLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(AppError::storage_unavailable)?,
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(AppError::storage_unavailable)?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(
            target: "sync::queue",
            location = ?self.location,
            "durable mutation queue opened"
        );
        Ok(pool)
    }
}

#[async_trait]
impl MutationQueue for SqliteMutationQueue {
    async fn put(&self, mut draft: MutationDraft) -> Result<MutationRecord, AppError> {
        let pool = self.pool().await?;
        draft.captured_at = draft.captured_at.trunc_subsecs(3);
        let fields = serde_json::to_string(&draft.fields)?;
        let mutation_id = Uuid::new_v4();

        let mut tx = pool.begin().await.map_err(AppError::storage_unavailable)?;

        // 版番号は削除後も再利用しない
        let (version,): (i64,) = sqlx::query_as(
            "UPDATE mutation_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::storage_unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO mutation_queue (
                record_id, mutation_id, fields, captured_at, offline_origin, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(record_id) DO UPDATE SET
                mutation_id = excluded.mutation_id,
                fields = excluded.fields,
                captured_at = excluded.captured_at,
                offline_origin = excluded.offline_origin,
                version = excluded.version
            "#,
        )
        .bind(draft.record_id.as_str())
        .bind(mutation_id.to_string())
        .bind(&fields)
        .bind(draft.captured_at.timestamp_millis())
        .bind(draft.offline_origin)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(AppError::storage_unavailable)?;

        tx.commit().await.map_err(AppError::storage_unavailable)?;

        tracing::debug!(
            target: "sync::queue",
            record_id = %draft.record_id,
            version,
            offline_origin = draft.offline_origin,
            "queued mutation"
        );

        let version = u64::try_from(version)
            .map_err(|_| AppError::Internal(format!("sequence went negative: {version}")))?;
        Ok(draft.into_record(mutation_id, version))
    }

    async fn get_all(&self) -> Result<Vec<MutationRecord>, AppError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, MutationRow>(
            r#"
            SELECT record_id, mutation_id, fields, captured_at, offline_origin, version
            FROM mutation_queue
            ORDER BY version ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::storage_unavailable)?;

        rows.into_iter().map(MutationRecord::try_from).collect()
    }

    async fn get(&self, record_id: &RecordId) -> Result<Option<MutationRecord>, AppError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, MutationRow>(
            r#"
            SELECT record_id, mutation_id, fields, captured_at, offline_origin, version
            FROM mutation_queue
            WHERE record_id = ?1
            "#,
        )
        .bind(record_id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(AppError::storage_unavailable)?;

        row.map(MutationRecord::try_from).transpose()
    }

    async fn remove(&self, record_id: &RecordId) -> Result<(), AppError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM mutation_queue WHERE record_id = ?1")
            .bind(record_id.as_str())
            .execute(pool)
            .await
            .map_err(AppError::storage_unavailable)?;
        Ok(())
    }

    async fn remove_if_current(
        &self,
        record_id: &RecordId,
        version: u64,
    ) -> Result<bool, AppError> {
        let pool = self.pool().await?;
        let version = i64::try_from(version)
            .map_err(|_| AppError::ValidationError(format!("version out of range: {version}")))?;
        let result =
            sqlx::query("DELETE FROM mutation_queue WHERE record_id = ?1 AND version = ?2")
                .bind(record_id.as_str())
                .bind(version)
                .execute(pool)
                .await
                .map_err(AppError::storage_unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn len(&self) -> Result<u32, AppError> {
        let pool = self.pool().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mutation_queue")
            .fetch_one(pool)
            .await
            .map_err(AppError::storage_unavailable)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{field_map, FieldValue};
    use tempfile::TempDir;

    fn record_id(raw: &str) -> RecordId {
        RecordId::new(raw.to_string()).unwrap()
    }

    fn draft(id: &str, loads: i64) -> MutationDraft {
        MutationDraft::new(record_id(id), field_map([("loads", loads)]))
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let queue = SqliteMutationQueue::in_memory();

        let first = queue.put(draft("R1", 5)).await.unwrap();
        let second = queue.put(draft("R1", 9)).await.unwrap();
        assert!(second.version > first.version);

        let all = queue.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields["loads"], FieldValue::Integer(9));
        assert_eq!(all[0], second);
    }

    #[tokio::test]
    async fn test_get_all_follows_update_order() {
        let queue = SqliteMutationQueue::in_memory();
        queue.put(draft("R1", 1)).await.unwrap();
        queue.put(draft("R2", 1)).await.unwrap();
        queue.put(draft("R3", 1)).await.unwrap();
        queue.put(draft("R1", 2)).await.unwrap();

        let ids: Vec<String> = queue
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.record_id.to_string())
            .collect();
        assert_eq!(ids, vec!["R2", "R3", "R1"]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let queue = SqliteMutationQueue::in_memory();
        queue.put(draft("R1", 1)).await.unwrap();

        queue.remove(&record_id("R1")).await.unwrap();
        queue.remove(&record_id("R1")).await.unwrap();
        queue.remove(&record_id("missing")).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_if_current_ignores_stale_version() {
        let queue = SqliteMutationQueue::in_memory();
        let stale = queue.put(draft("R1", 5)).await.unwrap();
        let fresh = queue.put(draft("R1", 9)).await.unwrap();

        assert!(!queue
            .remove_if_current(&record_id("R1"), stale.version)
            .await
            .unwrap());
        assert_eq!(queue.len().await.unwrap(), 1);

        assert!(queue
            .remove_if_current(&record_id("R1"), fresh.version)
            .await
            .unwrap());
        assert!(queue.get(&record_id("R1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_versions_not_reused_after_remove() {
        let queue = SqliteMutationQueue::in_memory();
        let first = queue.put(draft("R1", 5)).await.unwrap();
        queue.remove(&record_id("R1")).await.unwrap();
        let recreated = queue.put(draft("R1", 5)).await.unwrap();

        assert!(recreated.version > first.version);
        assert!(!queue
            .remove_if_current(&record_id("R1"), first.version)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue").join("mutation-queue-v1.db");

        let queue = SqliteMutationQueue::new(&path, 1);
        assert!(!queue.is_initialized());
        let stored = queue
            .put(draft("R1", 3).with_offline_origin(true))
            .await
            .unwrap();
        assert!(queue.is_initialized());
        queue.close().await;

        let reopened = SqliteMutationQueue::new(&path, 1);
        let loaded = reopened.get(&record_id("R1")).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert!(loaded.offline_origin);

        let next = reopened.put(draft("R2", 1)).await.unwrap();
        assert!(next.version > stored.version);
    }

    #[tokio::test]
    async fn test_put_reports_storage_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"file").unwrap();

        let queue = SqliteMutationQueue::new(blocker.join("queue.db"), 1);
        let err = queue.put(draft("R1", 1)).await.unwrap_err();
        assert!(err.is_storage_unavailable(), "{err}");
    }
}
