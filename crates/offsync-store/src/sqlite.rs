//! SQLite implementation of the storage traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use offsync_core::{Actor, CachedObject, ObjectQuery, SyncState, Timestamp};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{BucketSyncMetadata, InsertResult, MetadataStore, ObjectCache};

const OBJECT_COLUMNS: &str =
    "bucket, id, etag, payload, acl, created_at, updated_at, deleted, sync_state";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

/// Columns of an `objects` row before payload/ACL decoding.
struct ObjectRow {
    bucket: String,
    id: String,
    etag: String,
    payload: Vec<u8>,
    acl: Vec<u8>,
    created_at: i64,
    updated_at: i64,
    deleted: bool,
    sync_state: i64,
}

impl ObjectRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            bucket: row.get("bucket")?,
            id: row.get("id")?,
            etag: row.get("etag")?,
            payload: row.get("payload")?,
            acl: row.get("acl")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted: row.get("deleted")?,
            sync_state: row.get("sync_state")?,
        })
    }

    fn decode(self) -> Result<CachedObject> {
        let sync_state = SyncState::from_i64(self.sync_state).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "sync_state {} for {}/{}",
                self.sync_state, self.bucket, self.id
            ))
        })?;

        Ok(CachedObject {
            payload: decode_cbor(&self.payload)?,
            acl: decode_cbor(&self.acl)?,
            bucket: self.bucket,
            id: self.id,
            etag: self.etag,
            created_at: Timestamp::from_millis(self.created_at),
            updated_at: Timestamp::from_millis(self.updated_at),
            deleted: self.deleted,
            sync_state,
        })
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn select_objects(
    conn: &Connection,
    sql_where: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CachedObject>> {
    let sql = format!("SELECT {} FROM objects WHERE {}", OBJECT_COLUMNS, sql_where);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, ObjectRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ObjectRow::decode).collect()
}

type MetadataRow = (String, Option<String>, Option<i64>, Option<i64>);

fn read_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetadataRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[async_trait]
impl ObjectCache for SqliteStore {
    async fn insert_object(&self, object: &CachedObject) -> Result<InsertResult> {
        let object = object.clone();

        self.run(move |conn| {
            let payload = encode_cbor(&object.payload)?;
            let acl = encode_cbor(&object.acl)?;

            let inserted = conn.execute(
                "INSERT INTO objects (
                    bucket, id, etag, payload, acl, created_at, updated_at, deleted, sync_state
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(bucket, id) DO NOTHING",
                params![
                    object.bucket,
                    object.id,
                    object.etag,
                    payload,
                    acl,
                    object.created_at.as_millis(),
                    object.updated_at.as_millis(),
                    object.deleted,
                    object.sync_state.to_i64(),
                ],
            )?;

            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn update_object(&self, object: &CachedObject, state: SyncState) -> Result<()> {
        let object = object.clone();

        self.run(move |conn| {
            let payload = encode_cbor(&object.payload)?;
            let acl = encode_cbor(&object.acl)?;

            let updated = conn.execute(
                "UPDATE objects SET
                    etag = ?3, payload = ?4, acl = ?5, created_at = ?6,
                    updated_at = ?7, deleted = ?8, sync_state = ?9
                 WHERE bucket = ?1 AND id = ?2",
                params![
                    object.bucket,
                    object.id,
                    object.etag,
                    payload,
                    acl,
                    object.created_at.as_millis(),
                    object.updated_at.as_millis(),
                    object.deleted,
                    state.to_i64(),
                ],
            )?;

            if updated == 0 {
                return Err(StoreError::NotFound {
                    bucket: object.bucket,
                    id: object.id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete_object(&self, object: &CachedObject) -> Result<bool> {
        let bucket = object.bucket.clone();
        let id = object.id.clone();

        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM objects WHERE bucket = ?1 AND id = ?2",
                params![bucket, id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn find_object(&self, bucket: &str, id: &str) -> Result<Option<CachedObject>> {
        let bucket = bucket.to_string();
        let id = id.to_string();

        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM objects WHERE bucket = ?1 AND id = ?2",
                OBJECT_COLUMNS
            );
            conn.query_row(&sql, params![bucket, id], ObjectRow::read)
                .optional()?
                .map(ObjectRow::decode)
                .transpose()
        })
        .await
    }

    async fn query_objects(
        &self,
        bucket: &str,
        query: &ObjectQuery,
        actor: Option<&Actor>,
    ) -> Result<Vec<CachedObject>> {
        let bucket = bucket.to_string();
        let query = query.clone();
        let actor = actor.cloned();

        self.run(move |conn| {
            // Tombstone and bucket filtering happen in SQL; the condition,
            // ordering and ACL filter run over the decoded rows.
            let candidates = select_objects(
                conn,
                "bucket = ?1 AND (?2 OR deleted = 0)",
                params![bucket, query.include_tombstones],
            )?;
            Ok(query.evaluate(candidates, actor.as_ref()))
        })
        .await
    }

    async fn dirty_objects(&self, bucket: &str) -> Result<Vec<CachedObject>> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            select_objects(
                conn,
                "bucket = ?1 AND sync_state = ?2 ORDER BY updated_at, id",
                params![bucket, SyncState::Dirty.to_i64()],
            )
        })
        .await
    }

    async fn count_objects(&self, bucket: &str) -> Result<usize> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
                params![bucket],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn clear_bucket(&self, bucket: &str) -> Result<usize> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM objects WHERE bucket = ?1", params![bucket])?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn bucket_metadata(&self, bucket: &str) -> Result<Option<BucketSyncMetadata>> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT bucket, sync_scope, last_pull_server_time, last_sync_time
                     FROM bucket_sync WHERE bucket = ?1",
                    params![bucket],
                    read_metadata,
                )
                .optional()?;

            let Some((bucket, scope, last_pull, last_sync)) = row else {
                return Ok(None);
            };

            Ok(Some(BucketSyncMetadata {
                bucket,
                sync_scope: scope.as_deref().map(ObjectQuery::from_stable_string).transpose()?,
                last_pull_server_time: last_pull.map(Timestamp::from_millis),
                last_sync_time: last_sync.map(Timestamp::from_millis),
            }))
        })
        .await
    }

    async fn set_sync_scope(&self, bucket: &str, scope: Option<&ObjectQuery>) -> Result<()> {
        let bucket = bucket.to_string();
        let scope = scope.map(ObjectQuery::to_stable_string);

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO bucket_sync (bucket, sync_scope, last_pull_server_time, last_sync_time)
                 VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT(bucket) DO UPDATE SET
                    sync_scope = excluded.sync_scope,
                    last_pull_server_time = NULL,
                    last_sync_time = NULL",
                params![bucket, scope],
            )?;
            Ok(())
        })
        .await
    }

    async fn all_sync_scopes(&self) -> Result<BTreeMap<String, ObjectQuery>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT bucket, sync_scope FROM bucket_sync WHERE sync_scope IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(bucket, scope)| {
                    let scope = ObjectQuery::from_stable_string(&scope)?;
                    Ok::<_, StoreError>((bucket, scope))
                })
                .collect()
        })
        .await
    }

    async fn set_last_pull_server_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO bucket_sync (bucket, last_pull_server_time) VALUES (?1, ?2)
                 ON CONFLICT(bucket) DO UPDATE SET
                    last_pull_server_time = excluded.last_pull_server_time",
                params![bucket, at.as_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_last_sync_time(&self, bucket: &str, at: Timestamp) -> Result<()> {
        let bucket = bucket.to_string();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO bucket_sync (bucket, last_sync_time) VALUES (?1, ?2)
                 ON CONFLICT(bucket) DO UPDATE SET last_sync_time = excluded.last_sync_time",
                params![bucket, at.as_millis()],
            )?;
            Ok(())
        })
        .await
    }
}
