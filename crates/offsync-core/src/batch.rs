//! Batched push requests and their per-item outcomes.

use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::object::{CachedObject, Document};
use crate::time::Timestamp;

/// One operation in a push batch.
///
/// Updates and deletes carry the object's known etag as an optimistic
/// concurrency precondition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Insert { data: Document, acl: Acl },
    Update { id: String, etag: String, data: Document },
    Delete { id: String, etag: String },
}

impl BatchOp {
    /// The operation that pushes `object`'s pending local change.
    ///
    /// Tombstones become deletes, objects the remote has never acknowledged
    /// become inserts, everything else an update.
    pub fn for_object(object: &CachedObject) -> Self {
        if object.deleted {
            BatchOp::Delete {
                id: object.id.clone(),
                etag: object.etag.clone(),
            }
        } else if !object.is_remote_known() {
            BatchOp::Insert {
                data: object.payload.clone(),
                acl: object.acl.clone(),
            }
        } else {
            BatchOp::Update {
                id: object.id.clone(),
                etag: object.etag.clone(),
                data: object.payload.clone(),
            }
        }
    }

    /// Target id, if the operation has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            BatchOp::Insert { .. } => None,
            BatchOp::Update { id, .. } | BatchOp::Delete { id, .. } => Some(id),
        }
    }
}

/// Per-item result classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    Conflict,
    Forbidden,
    NotFound,
    BadRequest,
    ServerError,
    #[serde(other)]
    Unknown,
}

impl ResultCode {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => ResultCode::Ok,
            400 => ResultCode::BadRequest,
            401 | 403 => ResultCode::Forbidden,
            404 => ResultCode::NotFound,
            409 | 412 => ResultCode::Conflict,
            500..=599 => ResultCode::ServerError,
            _ => ResultCode::Unknown,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ResultCode::Ok
    }
}

/// Finer-grained reason attached to a non-`Ok` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    #[default]
    Unspecified,
    RequestConflicted,
    DuplicateKey,
    DuplicateId,
    EtagMismatch,
    #[serde(other)]
    Unknown,
}

impl ReasonCode {
    /// Whether the reason denotes a stale version precondition.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, ReasonCode::EtagMismatch | ReasonCode::RequestConflicted)
    }
}

/// The remote's answer for one item of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Object id. For inserts this is the id the remote assigned.
    pub id: String,
    pub result_code: ResultCode,
    #[serde(default)]
    pub reason_code: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// The remote's resulting document, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
}

impl BatchOutcome {
    /// A successful outcome.
    pub fn ok(id: impl Into<String>, etag: impl Into<String>, updated_at: Timestamp, data: Option<Document>) -> Self {
        Self {
            id: id.into(),
            result_code: ResultCode::Ok,
            reason_code: ReasonCode::Unspecified,
            etag: Some(etag.into()),
            updated_at: Some(updated_at),
            data,
        }
    }

    /// A failed outcome with no resulting state.
    pub fn failed(id: impl Into<String>, result_code: ResultCode, reason_code: ReasonCode) -> Self {
        Self {
            id: id.into(),
            result_code,
            reason_code,
            etag: None,
            updated_at: None,
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result_code.is_ok()
    }

    /// Whether this outcome reports a stale etag precondition.
    pub fn is_version_conflict(&self) -> bool {
        self.result_code == ResultCode::Conflict && self.reason_code.is_version_conflict()
    }
}
