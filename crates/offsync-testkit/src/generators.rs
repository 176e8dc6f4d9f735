//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use offsync_core::{CachedObject, Condition, Document, SyncState, Timestamp};

/// Generate a field name.
pub fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}".prop_map(String::from)
}

/// Generate a scalar JSON value. Floats are left out so comparisons and
/// serialization stay exact.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

/// Generate a flat document of up to eight fields.
pub fn document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(field_name(), scalar(), 0..8).prop_map(|fields| fields.into_iter().collect())
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..=4_102_444_800_000).prop_map(Timestamp::from_millis)
}

/// Generate a sync state.
pub fn sync_state() -> impl Strategy<Value = SyncState> {
    prop_oneof![Just(SyncState::Sync), Just(SyncState::Dirty)]
}

/// Generate a cached object in `bucket`.
pub fn cached_object(bucket: &'static str) -> impl Strategy<Value = CachedObject> {
    (
        "[a-z0-9]{1,12}",
        "[0-9a-f]{16}",
        document(),
        timestamp(),
        any::<bool>(),
        sync_state(),
    )
        .prop_map(move |(id, etag, payload, updated_at, deleted, state)| {
            CachedObject::new(bucket, id, etag, updated_at)
                .with_payload(payload)
                .with_deleted(deleted)
                .with_sync_state(state)
        })
}

fn leaf_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::All),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::eq(f, v)),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::ne(f, v)),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::gt(f, v)),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::gte(f, v)),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::lt(f, v)),
        (field_name(), scalar()).prop_map(|(f, v)| Condition::lte(f, v)),
        (field_name(), prop::collection::vec(scalar(), 0..4)).prop_map(|(f, vs)| Condition::in_values(f, vs)),
        field_name().prop_map(Condition::exists),
    ]
}

/// Generate a condition tree up to four levels deep.
pub fn condition() -> impl Strategy<Value = Condition> {
    leaf_condition().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::and),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::or),
            inner.prop_map(Condition::not),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_condition_stable_form_round_trips(c in condition()) {
            let parsed = Condition::from_stable_string(&c.to_stable_string()).unwrap();
            prop_assert_eq!(parsed, c);
        }

        #[test]
        fn test_cached_object_stays_in_bucket(obj in cached_object("things")) {
            prop_assert_eq!(obj.bucket.as_str(), "things");
            prop_assert!(!obj.id.is_empty());
        }

        #[test]
        fn test_not_inverts(c in condition(), obj in cached_object("b")) {
            prop_assert_eq!(Condition::not(c.clone()).matches(&obj), !c.matches(&obj));
        }
    }
}
