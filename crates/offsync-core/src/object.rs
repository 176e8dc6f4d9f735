//! Cached objects: locally stored copies of remote-managed documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acl::Acl;
use crate::time::Timestamp;

/// Arbitrary key/value document carried by an object.
pub type Document = serde_json::Map<String, Value>;

/// Reserved field names addressing object metadata inside conditions.
///
/// Any other field name is resolved as a dotted path into the payload.
pub mod fields {
    /// Object id (string).
    pub const ID: &str = "_id";
    /// Version tag (string).
    pub const ETAG: &str = "_etag";
    /// Creation time (integer milliseconds).
    pub const CREATED_AT: &str = "_created";
    /// Last modification time (integer milliseconds).
    pub const UPDATED_AT: &str = "_modified";
    /// Tombstone flag (bool).
    pub const DELETED: &str = "_deleted";
    /// Owner user id (string).
    pub const OWNER: &str = "_owner";
}

/// Prefix of ids assigned locally before the remote has seen an object.
const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a temporary id for an object created while offline.
pub fn generate_local_id() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    format!("{}{}", LOCAL_ID_PREFIX, hex::encode(bytes))
}

/// Whether `id` was assigned locally by [`generate_local_id`].
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Relationship between a cached copy and the remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Cache content equals the last-observed remote content.
    Sync,
    /// The cache holds a local mutation (or delete) not yet acknowledged.
    Dirty,
}

impl SyncState {
    /// Storage encoding.
    pub const fn to_i64(self) -> i64 {
        match self {
            SyncState::Sync => 0,
            SyncState::Dirty => 1,
        }
    }

    /// Decode from storage.
    pub const fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(SyncState::Sync),
            1 => Some(SyncState::Dirty),
            _ => None,
        }
    }
}

/// One locally stored copy of a remote-managed object.
///
/// An empty `etag` means the remote has never acknowledged this object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedObject {
    pub bucket: String,
    pub id: String,
    pub etag: String,
    pub payload: Document,
    #[serde(default)]
    pub acl: Acl,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
    pub sync_state: SyncState,
}

impl CachedObject {
    /// Create a synced object as the remote reports it.
    pub fn new(
        bucket: impl Into<String>,
        id: impl Into<String>,
        etag: impl Into<String>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            id: id.into(),
            etag: etag.into(),
            payload: Document::new(),
            acl: Acl::default(),
            created_at: updated_at,
            updated_at,
            deleted: false,
            sync_state: SyncState::Sync,
        }
    }

    /// Create an object locally, before the remote has assigned an id.
    pub fn new_local(bucket: impl Into<String>, payload: Document, acl: Acl, now: Timestamp) -> Self {
        Self {
            bucket: bucket.into(),
            id: generate_local_id(),
            etag: String::new(),
            payload,
            acl,
            created_at: now,
            updated_at: now,
            deleted: false,
            sync_state: SyncState::Dirty,
        }
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Document) -> Self {
        self.payload = payload;
        self
    }

    /// Replace the ACL.
    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    /// Set one payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Mark as a tombstone.
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Set the sync state.
    pub fn with_sync_state(mut self, state: SyncState) -> Self {
        self.sync_state = state;
        self
    }

    /// Whether the remote has ever acknowledged this object.
    pub fn is_remote_known(&self) -> bool {
        !self.etag.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.sync_state == SyncState::Dirty
    }

    /// Resolve a field name to a value for condition evaluation and ordering.
    ///
    /// Reserved names in [`fields`] map to metadata; anything else is a dotted
    /// path into the payload. Missing fields resolve to `None`.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            fields::ID => Some(Value::String(self.id.clone())),
            fields::ETAG => Some(Value::String(self.etag.clone())),
            fields::CREATED_AT => Some(self.created_at.to_value()),
            fields::UPDATED_AT => Some(self.updated_at.to_value()),
            fields::DELETED => Some(Value::Bool(self.deleted)),
            fields::OWNER => self.acl.owner.clone().map(Value::String),
            path => {
                let mut parts = path.split('.');
                let first = parts.next()?;
                let mut current = self.payload.get(first)?;
                for part in parts {
                    current = match current {
                        Value::Object(map) => map.get(part)?,
                        Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(current.clone())
            }
        }
    }
}
