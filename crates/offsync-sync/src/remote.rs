//! Remote collaborator abstraction.
//!
//! The sync core talks to the remote object store through two narrow
//! traits. Implementations may use HTTP, a local emulator or anything else;
//! none of that is visible here.

use std::sync::Arc;

use async_trait::async_trait;
use offsync_core::{BatchOp, BatchOutcome, CachedObject, ObjectQuery, Timestamp};

use crate::error::RemoteError;

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// One page of a remote query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Matching objects in the query's order, tombstones included if asked.
    pub objects: Vec<CachedObject>,
    /// The remote's clock when it served the request.
    pub server_time: Timestamp,
}

/// Runs queries against the remote store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` over `bucket`, honoring its condition, order, limit,
    /// skip and tombstone flag.
    async fn query(&self, bucket: &str, query: &ObjectQuery) -> Result<QueryPage>;
}

/// Submits batched writes to the remote store.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Apply `ops` to `bucket`. Returns one outcome per operation, in order.
    ///
    /// Items succeed or fail independently.
    async fn batch(&self, bucket: &str, ops: Vec<BatchOp>) -> Result<Vec<BatchOutcome>>;
}

#[async_trait]
impl<T: QueryExecutor + ?Sized> QueryExecutor for Arc<T> {
    async fn query(&self, bucket: &str, query: &ObjectQuery) -> Result<QueryPage> {
        (**self).query(bucket, query).await
    }
}

#[async_trait]
impl<T: BatchExecutor + ?Sized> BatchExecutor for Arc<T> {
    async fn batch(&self, bucket: &str, ops: Vec<BatchOp>) -> Result<Vec<BatchOutcome>> {
        (**self).batch(bucket, ops).await
    }
}

/// A simple in-memory remote for testing.
///
/// Behaves like an object store with etag preconditions: inserts get a
/// server-assigned id, updates and deletes must name the current etag,
/// deletes leave a tombstone. Tests can pin the server clock, force the
/// outcome for a specific id, make queries fail, and inspect every query
/// and batch received.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    use offsync_core::{Document, ReasonCode, ResultCode};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        objects: BTreeMap<(String, String), CachedObject>,
        clock: Option<Timestamp>,
        forced: HashMap<String, BatchOutcome>,
        query_failure: Option<RemoteError>,
        queries: Vec<(String, ObjectQuery)>,
        batches: Vec<(String, Vec<BatchOp>)>,
        next_id: u64,
    }

    impl Inner {
        fn now(&self) -> Timestamp {
            self.clock.unwrap_or_else(Timestamp::now)
        }

        fn assign_id(&mut self) -> String {
            self.next_id += 1;
            format!("obj-{}", self.next_id)
        }
    }

    /// Content-derived version tag.
    fn compute_etag(id: &str, data: &Document, updated_at: Timestamp, deleted: bool) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(id.as_bytes());
        hasher.update(serde_json::Value::Object(data.clone()).to_string().as_bytes());
        hasher.update(&updated_at.as_millis().to_be_bytes());
        hasher.update(&[deleted as u8]);
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// In-memory remote implementation.
    #[derive(Default)]
    pub struct MemoryRemote {
        inner: Mutex<Inner>,
    }

    impl MemoryRemote {
        /// Create a new empty remote.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Store `object` exactly as given, replacing any existing copy.
        pub async fn put(&self, object: CachedObject) {
            let mut inner = self.inner.lock().await;
            let object = object.with_sync_state(offsync_core::SyncState::Sync);
            inner
                .objects
                .insert((object.bucket.clone(), object.id.clone()), object);
        }

        /// Simulate another client writing `data` to an object, creating it
        /// if needed. Returns the new server copy.
        pub async fn write(&self, bucket: &str, id: &str, data: Document) -> CachedObject {
            let mut inner = self.inner.lock().await;
            let now = inner.now();
            let key = (bucket.to_string(), id.to_string());

            let created_at = inner.objects.get(&key).map_or(now, |o| o.created_at);
            let acl = inner.objects.get(&key).map(|o| o.acl.clone()).unwrap_or_default();
            let mut object = CachedObject::new(bucket, id, compute_etag(id, &data, now, false), now)
                .with_payload(data)
                .with_acl(acl);
            object.created_at = created_at;

            inner.objects.insert(key, object.clone());
            object
        }

        /// Simulate another client deleting an object. Returns the tombstone.
        pub async fn remove(&self, bucket: &str, id: &str) -> Option<CachedObject> {
            let mut inner = self.inner.lock().await;
            let now = inner.now();
            let object = inner.objects.get_mut(&(bucket.to_string(), id.to_string()))?;
            object.deleted = true;
            object.updated_at = now;
            object.etag = compute_etag(id, &object.payload, now, true);
            Some(object.clone())
        }

        /// Current server copy, tombstones included.
        pub async fn get(&self, bucket: &str, id: &str) -> Option<CachedObject> {
            let inner = self.inner.lock().await;
            inner.objects.get(&(bucket.to_string(), id.to_string())).cloned()
        }

        /// Live objects in a bucket.
        pub async fn live_count(&self, bucket: &str) -> usize {
            let inner = self.inner.lock().await;
            inner
                .objects
                .values()
                .filter(|o| o.bucket == bucket && !o.deleted)
                .count()
        }

        /// Pin the server clock. `None` follows the system clock.
        pub async fn set_server_time(&self, at: Option<Timestamp>) {
            self.inner.lock().await.clock = at;
        }

        /// Answer the next batch item for `id` with `outcome` instead of
        /// applying it.
        pub async fn force_outcome(&self, id: impl Into<String>, outcome: BatchOutcome) {
            self.inner.lock().await.forced.insert(id.into(), outcome);
        }

        /// Fail every query with `error` until cleared with `None`.
        pub async fn fail_queries(&self, error: Option<RemoteError>) {
            self.inner.lock().await.query_failure = error;
        }

        /// Every query received, oldest first.
        pub async fn query_log(&self) -> Vec<(String, ObjectQuery)> {
            self.inner.lock().await.queries.clone()
        }

        /// Every batch received, oldest first.
        pub async fn batch_log(&self) -> Vec<(String, Vec<BatchOp>)> {
            self.inner.lock().await.batches.clone()
        }

        pub async fn clear_logs(&self) {
            let mut inner = self.inner.lock().await;
            inner.queries.clear();
            inner.batches.clear();
        }

        fn apply(inner: &mut Inner, bucket: &str, op: BatchOp) -> BatchOutcome {
            let now = inner.now();

            match op {
                BatchOp::Insert { data, acl } => {
                    let id = inner.assign_id();
                    let etag = compute_etag(&id, &data, now, false);
                    let object = CachedObject::new(bucket, id.clone(), etag.clone(), now)
                        .with_payload(data.clone())
                        .with_acl(acl);
                    inner.objects.insert((bucket.to_string(), id.clone()), object);
                    BatchOutcome::ok(id, etag, now, Some(data))
                }
                BatchOp::Update { id, etag, data } => {
                    let key = (bucket.to_string(), id.clone());
                    let Some(current) = inner.objects.get_mut(&key).filter(|o| !o.deleted) else {
                        return BatchOutcome::failed(id, ResultCode::NotFound, ReasonCode::Unspecified);
                    };
                    if current.etag != etag {
                        return BatchOutcome::failed(id, ResultCode::Conflict, ReasonCode::EtagMismatch);
                    }
                    current.etag = compute_etag(&id, &data, now, false);
                    current.updated_at = now;
                    current.payload = data.clone();
                    BatchOutcome::ok(id, current.etag.clone(), now, Some(data))
                }
                BatchOp::Delete { id, etag } => {
                    let key = (bucket.to_string(), id.clone());
                    let Some(current) = inner.objects.get_mut(&key).filter(|o| !o.deleted) else {
                        return BatchOutcome::failed(id, ResultCode::NotFound, ReasonCode::Unspecified);
                    };
                    if current.etag != etag {
                        return BatchOutcome::failed(id, ResultCode::Conflict, ReasonCode::EtagMismatch);
                    }
                    current.deleted = true;
                    current.updated_at = now;
                    current.etag = compute_etag(&id, &current.payload, now, true);
                    BatchOutcome::ok(id, current.etag.clone(), now, None)
                }
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for MemoryRemote {
        async fn query(&self, bucket: &str, query: &ObjectQuery) -> Result<QueryPage> {
            let mut inner = self.inner.lock().await;
            inner.queries.push((bucket.to_string(), query.clone()));

            if let Some(err) = &inner.query_failure {
                return Err(err.clone());
            }

            let candidates: Vec<_> = inner
                .objects
                .values()
                .filter(|o| o.bucket == bucket)
                .cloned()
                .collect();

            Ok(QueryPage {
                objects: query.evaluate(candidates, None),
                server_time: inner.now(),
            })
        }
    }

    #[async_trait]
    impl BatchExecutor for MemoryRemote {
        async fn batch(&self, bucket: &str, ops: Vec<BatchOp>) -> Result<Vec<BatchOutcome>> {
            let mut inner = self.inner.lock().await;
            inner.batches.push((bucket.to_string(), ops.clone()));

            let outcomes = ops
                .into_iter()
                .map(|op| {
                    let forced = op.id().and_then(|id| inner.forced.remove(id));
                    match forced {
                        Some(outcome) => outcome,
                        None => Self::apply(&mut inner, bucket, op),
                    }
                })
                .collect();

            Ok(outcomes)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use offsync_core::{Acl, Condition};
        use serde_json::json;

        fn doc(value: serde_json::Value) -> Document {
            match value {
                serde_json::Value::Object(map) => map,
                _ => Document::new(),
            }
        }

        #[tokio::test]
        async fn test_insert_assigns_id_and_etag() {
            let remote = MemoryRemote::new();
            remote.set_server_time(Some(Timestamp::from_millis(1000))).await;

            let outcomes = remote
                .batch("b", vec![BatchOp::Insert { data: doc(json!({"a": 1})), acl: Acl::public() }])
                .await
                .unwrap();

            assert_eq!(outcomes.len(), 1);
            assert!(outcomes[0].is_ok());
            assert_eq!(outcomes[0].id, "obj-1");
            assert_eq!(outcomes[0].updated_at, Some(Timestamp::from_millis(1000)));
            let stored = remote.get("b", "obj-1").await.unwrap();
            assert_eq!(Some(stored.etag), outcomes[0].etag);
        }

        #[tokio::test]
        async fn test_stale_etag_conflicts() {
            let remote = MemoryRemote::new();
            let current = remote.write("b", "1", doc(json!({"v": 1}))).await;

            let outcomes = remote
                .batch(
                    "b",
                    vec![
                        BatchOp::Update { id: "1".into(), etag: "stale".into(), data: Document::new() },
                        BatchOp::Delete { id: "missing".into(), etag: "x".into() },
                        BatchOp::Delete { id: "1".into(), etag: current.etag.clone() },
                    ],
                )
                .await
                .unwrap();

            assert!(outcomes[0].is_version_conflict());
            assert_eq!(outcomes[1].result_code, ResultCode::NotFound);
            assert!(outcomes[2].is_ok());
            assert!(remote.get("b", "1").await.unwrap().deleted);
            assert_eq!(remote.live_count("b").await, 0);
        }

        #[tokio::test]
        async fn test_forced_outcome_is_consumed() {
            let remote = MemoryRemote::new();
            let current = remote.write("b", "1", Document::new()).await;
            remote
                .force_outcome("1", BatchOutcome::failed("1", ResultCode::Forbidden, ReasonCode::Unspecified))
                .await;

            let op = BatchOp::Delete { id: "1".into(), etag: current.etag };
            let first = remote.batch("b", vec![op.clone()]).await.unwrap();
            assert_eq!(first[0].result_code, ResultCode::Forbidden);
            assert!(!remote.get("b", "1").await.unwrap().deleted);

            let second = remote.batch("b", vec![op]).await.unwrap();
            assert!(second[0].is_ok());
        }

        #[tokio::test]
        async fn test_query_reports_server_time_and_logs() {
            let remote = MemoryRemote::new();
            remote.set_server_time(Some(Timestamp::from_millis(42))).await;
            remote.write("b", "1", doc(json!({"k": "x"}))).await;
            remote.write("b", "2", doc(json!({"k": "y"}))).await;
            remote.write("c", "3", doc(json!({"k": "x"}))).await;

            let query = ObjectQuery::new(Condition::eq("k", "x"));
            let page = remote.query("b", &query).await.unwrap();
            assert_eq!(page.server_time, Timestamp::from_millis(42));
            assert_eq!(page.objects.len(), 1);
            assert_eq!(remote.query_log().await, vec![("b".to_string(), query)]);

            remote.fail_queries(Some(RemoteError::Transport("offline".into()))).await;
            assert!(remote.query("b", &ObjectQuery::all()).await.is_err());
        }
    }
}
