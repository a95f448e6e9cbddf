//! src/services/storage_service.rs
//!
//! StorageService: the on-disk `ObjectStore` backend. Metadata lives in
//! SQLite; payloads are sharded beneath `base_path/{shard}/{shard}/{key}`.

use crate::{
    models::{
        key::ObjectKey,
        object::{ObjectMetadata, ObjectRow, PutOptions, PutOutcome},
        range::ByteRange,
    },
    services::object_store::{
        ByteStream, ObjectStore, StoreError, StoreResult, cancellable, cancelled_io_error,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Read size for payload streams.
const READ_CHUNK: usize = 64 * 1024;
const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// StorageService stores payloads on local disk and their metadata in SQLite:
/// - `put` streams bytes to a temp file, computes the MD5 etag, renames
///   atomically and upserts the metadata row
/// - `get` opens the payload and seeks to the requested range
/// - `stat`/`exists` only touch SQLite
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Keys arrive normalized, so only emptiness, length, `..` segments and
    /// control characters are checked here.
    fn ensure_key_safe(&self, key: &ObjectKey) -> StoreResult<()> {
        let raw = key.as_str();
        if raw.is_empty() || raw.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidKey(raw.to_string()));
        }
        if raw.split('/').any(|segment| segment == "..") {
            return Err(StoreError::InvalidKey(raw.to_string()));
        }
        if raw
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidKey(raw.to_string()));
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Combines base_path/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key.as_str());
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key.as_str());
        path
    }

    /// Fetch the metadata row for `key`; `NotFound` when missing.
    async fn fetch_object(&self, key: &ObjectKey) -> StoreResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT id, key, filename, content_type, size_bytes, etag,
                    acl, metadata, last_modified
             FROM objects
             WHERE key = ?",
        )
        .bind(key.as_str())
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Stream the body into a temp file next to the final location.
    ///
    /// Returns the temp path, byte count and MD5. The temp file is removed
    /// on any error, including cancellation.
    async fn write_temp(
        &self,
        parent: &Path,
        mut body: ByteStream,
        cancel: &CancellationToken,
    ) -> StoreResult<(PathBuf, u64, String)> {
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        let result: io::Result<()> = async {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled_io_error()),
                    next = body.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;
                size_bytes += chunk.len() as u64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok((tmp_path, size_bytes, format!("{:x}", digest.compute())))
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn stat(&self, key: &ObjectKey) -> StoreResult<ObjectMetadata> {
        self.ensure_key_safe(key)?;
        let row = self.fetch_object(key).await?;
        Ok(ObjectMetadata::from(&row))
    }

    /// Open the payload for reading, seeking to `range` when given.
    ///
    /// Returns NotFound if metadata exists but the physical file is missing.
    async fn get(
        &self,
        key: &ObjectKey,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ByteStream> {
        self.ensure_key_safe(key)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let row = self.fetch_object(key).await?;

        let file_path = self.object_path(key);
        let mut file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        let size = row.size_bytes.max(0) as u64;
        let stream: ByteStream = match range {
            Some(range) => {
                if range.start >= size {
                    return Err(StoreError::Backend(format!(
                        "range {}-{} outside object `{}`",
                        range.start, range.end, key
                    )));
                }
                let end = range.end.min(size - 1);
                file.seek(SeekFrom::Start(range.start)).await?;
                Box::pin(ReaderStream::with_capacity(
                    file.take(end - range.start + 1),
                    READ_CHUNK,
                ))
            }
            None => Box::pin(ReaderStream::with_capacity(file, READ_CHUNK)),
        };

        Ok(cancellable(stream, cancel.clone()))
    }

    /// Stream-upload an object to disk and upsert its metadata row.
    ///
    /// Overwrites existing objects (last writer wins).
    async fn put(
        &self,
        key: &ObjectKey,
        body: ByteStream,
        options: PutOptions,
        cancel: &CancellationToken,
    ) -> StoreResult<PutOutcome> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let (tmp_path, size_bytes, etag) = self.write_temp(&parent, body, cancel).await?;

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        let metadata = serde_json::to_string(&options.metadata)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, key, filename, content_type, size_bytes,
                etag, acl, metadata, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                acl = excluded.acl,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.as_str())
        .bind(key.file_name())
        .bind(options.content_type.clone())
        .bind(size_bytes as i64)
        .bind(&etag)
        .bind(options.acl.as_str())
        .bind(metadata)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match insert_result {
            Ok(_) => Ok(PutOutcome {
                etag,
                size: size_bytes,
            }),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    async fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        self.ensure_key_safe(key)?;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects WHERE key = ?")
            .bind(key.as_str())
            .fetch_one(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn health_check(&self) -> StoreResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StoreError::Backend(format!(
                "unexpected sqlite probe result: {}",
                value
            )));
        }

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let bytes = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await; // best-effort cleanup
        if bytes? != b"readyz" {
            return Err(StoreError::Backend("disk probe content mismatch".into()));
        }
        Ok(())
    }
}
