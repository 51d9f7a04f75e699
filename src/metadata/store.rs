use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::MetadataError;
use crate::types::{ChunkMetadata, FileMetadata, FileStatus};

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Authoritative store for file and chunk metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Fails with `Conflict` if the file id is taken.
    async fn insert_file(&self, file: &FileMetadata) -> MetadataResult<()>;

    async fn get_file(&self, file_id: &str) -> MetadataResult<FileMetadata>;

    /// Records a chunk, replacing any previous record for the same sequence number.
    /// Only while the file is not terminal: a merged file yields `Conflict`, a
    /// missing one `NotFound`.
    async fn insert_chunk(&self, chunk: &ChunkMetadata) -> MetadataResult<()>;

    /// All chunks of a file, ascending by chunk id.
    async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<ChunkMetadata>>;

    /// Conditional on the current status not being terminal. A terminal file
    /// yields `Conflict`; a missing one `NotFound`.
    async fn update_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        update_at: i64,
    ) -> MetadataResult<()>;

    async fn health_check(&self) -> MetadataResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_metadata (
    file_id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    chunk_size INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    user_id TEXT NOT NULL,
    create_at INTEGER NOT NULL,
    update_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chunk_metadata (
    file_id TEXT NOT NULL,
    chunk_id INTEGER NOT NULL,
    etag TEXT NOT NULL,
    size INTEGER NOT NULL,
    storage_path TEXT NOT NULL,
    UNIQUE (file_id, chunk_id)
);
CREATE INDEX IF NOT EXISTS idx_chunk_metadata_file ON chunk_metadata(file_id);
"#;

#[derive(Debug, FromRow)]
struct FileRow {
    file_id: String,
    filename: String,
    total_size: i64,
    chunk_count: i64,
    chunk_size: i64,
    status: String,
    user_id: String,
    create_at: i64,
    update_at: i64,
}

impl TryFrom<FileRow> for FileMetadata {
    type Error = MetadataError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str| MetadataError::Corrupt(format!("{}: bad {}", row.file_id, field));
        Ok(FileMetadata {
            status: row.status.parse().map_err(|_| corrupt("status"))?,
            total_size: u64::try_from(row.total_size).map_err(|_| corrupt("total_size"))?,
            chunk_count: u32::try_from(row.chunk_count).map_err(|_| corrupt("chunk_count"))?,
            chunk_size: u64::try_from(row.chunk_size).map_err(|_| corrupt("chunk_size"))?,
            file_name: row.filename,
            user_id: row.user_id,
            create_at: row.create_at,
            update_at: row.update_at,
            file_id: row.file_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChunkRow {
    file_id: String,
    chunk_id: i64,
    etag: String,
    size: i64,
    storage_path: String,
}

impl TryFrom<ChunkRow> for ChunkMetadata {
    type Error = MetadataError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        let chunk_id = u32::try_from(row.chunk_id)
            .map_err(|_| MetadataError::Corrupt(format!("{}: bad chunk_id", row.file_id)))?;
        let size = u64::try_from(row.size)
            .map_err(|_| MetadataError::Corrupt(format!("{}: bad size", row.file_id)))?;
        Ok(ChunkMetadata {
            file_id: row.file_id,
            chunk_id,
            etag: row.etag,
            size,
            storage_path: row.storage_path,
        })
    }
}

fn to_i64(value: u64, field: &str) -> MetadataResult<i64> {
    i64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("{} out of range", field)))
}

/// SQLite-backed metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MetadataError::Database(sqlx::Error::Io(e)))?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// A private database that lives as long as the store.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Explains a conditional write that touched no rows.
    async fn terminal_or_missing(&self, file_id: &str) -> MetadataResult<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM file_metadata WHERE file_id = ?)")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Err(MetadataError::Conflict(format!("file already merged: {}", file_id)))
        } else {
            Err(MetadataError::NotFound(format!("file not found: {}", file_id)))
        }
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert_file(&self, file: &FileMetadata) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_metadata (
                file_id, filename, total_size, chunk_count,
                chunk_size, status, user_id, create_at, update_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.file_id)
        .bind(&file.file_name)
        .bind(to_i64(file.total_size, "total_size")?)
        .bind(i64::from(file.chunk_count))
        .bind(to_i64(file.chunk_size, "chunk_size")?)
        .bind(file.status.as_str())
        .bind(&file.user_id)
        .bind(file.create_at)
        .bind(file.update_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                MetadataError::Conflict(format!("file already exists: {}", file.file_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_file(&self, file_id: &str) -> MetadataResult<FileMetadata> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT file_id, filename, total_size, chunk_count,
                   chunk_size, status, user_id, create_at, update_at
            FROM file_metadata
            WHERE file_id = ?
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| MetadataError::NotFound(format!("file not found: {}", file_id)))?
            .try_into()
    }

    async fn insert_chunk(&self, chunk: &ChunkMetadata) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO chunk_metadata (file_id, chunk_id, etag, size, storage_path)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM file_metadata WHERE file_id = ? AND status <> 'merged'
            )
            ON CONFLICT (file_id, chunk_id) DO UPDATE SET
                etag = excluded.etag,
                size = excluded.size,
                storage_path = excluded.storage_path
            "#,
        )
        .bind(&chunk.file_id)
        .bind(i64::from(chunk.chunk_id))
        .bind(&chunk.etag)
        .bind(to_i64(chunk.size, "size")?)
        .bind(&chunk.storage_path)
        .bind(&chunk.file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        self.terminal_or_missing(&chunk.file_id).await
    }

    async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<ChunkMetadata>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT file_id, chunk_id, etag, size, storage_path
            FROM chunk_metadata
            WHERE file_id = ?
            ORDER BY chunk_id ASC
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChunkMetadata::try_from).collect()
    }

    async fn update_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        update_at: i64,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE file_metadata
            SET status = ?, update_at = ?
            WHERE file_id = ? AND status <> 'merged'
            "#,
        )
        .bind(status.as_str())
        .bind(update_at)
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        self.terminal_or_missing(file_id).await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
