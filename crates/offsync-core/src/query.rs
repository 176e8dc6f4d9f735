//! Query expressions over cached objects.
//!
//! A [`Condition`] is a boolean expression tree over object fields; an
//! [`ObjectQuery`] adds ordering, paging, projection and tombstone
//! visibility. Both serialize to a stable JSON string form, which is what
//! gets persisted as a bucket's sync scope and what tests compare.
//!
//! Evaluation here mirrors the remote query language closely enough that the
//! local cache and the in-memory remote agree on filtering and ordering:
//! numbers compare numerically, strings lexicographically, and values of
//! different types never satisfy a range comparison.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acl::{Actor, Permission};
use crate::error::{CoreError, Result};
use crate::object::CachedObject;

/// A boolean expression over object fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Matches every object.
    #[default]
    All,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Exists { field: String },
    And { clauses: Vec<Condition> },
    Or { clauses: Vec<Condition> },
    Not { clause: Box<Condition> },
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq { field: field.into(), value: value.into() }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne { field: field.into(), value: value.into() }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt { field: field.into(), value: value.into() }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte { field: field.into(), value: value.into() }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt { field: field.into(), value: value.into() }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte { field: field.into(), value: value.into() }
    }

    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In { field: field.into(), values }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists { field: field.into() }
    }

    /// Conjunction of `clauses`, kept exactly as given.
    pub fn and(clauses: Vec<Condition>) -> Self {
        Self::And { clauses }
    }

    /// Disjunction of `clauses`, kept exactly as given.
    pub fn or(clauses: Vec<Condition>) -> Self {
        Self::Or { clauses }
    }

    pub fn not(clause: Condition) -> Self {
        Self::Not { clause: Box::new(clause) }
    }

    /// Evaluate against an object.
    pub fn matches(&self, object: &CachedObject) -> bool {
        match self {
            Condition::All => true,
            Condition::Eq { field, value } => object
                .field(field)
                .is_some_and(|v| values_equal(&v, value)),
            Condition::Ne { field, value } => !object
                .field(field)
                .is_some_and(|v| values_equal(&v, value)),
            Condition::Gt { field, value } => {
                range_matches(object, field, value, |o| o == Ordering::Greater)
            }
            Condition::Gte { field, value } => {
                range_matches(object, field, value, |o| o != Ordering::Less)
            }
            Condition::Lt { field, value } => {
                range_matches(object, field, value, |o| o == Ordering::Less)
            }
            Condition::Lte { field, value } => {
                range_matches(object, field, value, |o| o != Ordering::Greater)
            }
            Condition::In { field, values } => object
                .field(field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(&v, candidate))),
            Condition::Exists { field } => object.field(field).is_some(),
            Condition::And { clauses } => clauses.iter().all(|c| c.matches(object)),
            Condition::Or { clauses } => clauses.iter().any(|c| c.matches(object)),
            Condition::Not { clause } => !clause.matches(object),
        }
    }

    /// Stable string form.
    pub fn to_stable_string(&self) -> String {
        // Serializing a tree of enums, strings and JSON values cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the form produced by [`Condition::to_stable_string`].
    pub fn from_stable_string(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

fn range_matches(
    object: &CachedObject,
    field: &str,
    bound: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    object
        .field(field)
        .and_then(|v| compare_values(&v, bound))
        .is_some_and(accept)
}

/// Equality with numeric normalization (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Compare two values of the same scalar type. `None` for mixed or
/// non-scalar types.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        _ => None,
    }
}

/// Total order used for sorting: missing < null < bool < number < string <
/// array < object, then by value within a type.
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        other => other,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Ascending }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Descending }
    }
}

/// A complete query: filter, ordering, paging, projection, tombstones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub include_tombstones: bool,
}

impl ObjectQuery {
    /// Every live object, unordered.
    pub fn all() -> Self {
        Self::default()
    }

    /// Live objects matching `condition`.
    pub fn new(condition: Condition) -> Self {
        Self { condition, ..Self::default() }
    }

    /// Append an ordering key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Restrict returned payloads to `fields`.
    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }

    pub fn with_tombstones(mut self, include: bool) -> Self {
        self.include_tombstones = include;
        self
    }

    /// Whether `object` passes the tombstone rule and the condition.
    pub fn matches(&self, object: &CachedObject) -> bool {
        (self.include_tombstones || !object.deleted) && self.condition.matches(object)
    }

    /// Order two objects by this query's ordering keys.
    pub fn compare(&self, a: &CachedObject, b: &CachedObject) -> Ordering {
        for key in &self.order {
            let ord = sort_cmp(a.field(&key.field).as_ref(), b.field(&key.field).as_ref());
            let ord = match key.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Run this query over `objects`.
    ///
    /// When `actor` is given, objects it may not read are dropped before
    /// paging. `None` evaluates with no access filtering.
    pub fn evaluate(
        &self,
        objects: impl IntoIterator<Item = CachedObject>,
        actor: Option<&Actor>,
    ) -> Vec<CachedObject> {
        let mut matched: Vec<CachedObject> = objects
            .into_iter()
            .filter(|o| self.matches(o))
            .filter(|o| actor.map_or(true, |a| o.acl.allows(a, Permission::Read)))
            .collect();

        matched.sort_by(|a, b| self.compare(a, b));

        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut page: Vec<CachedObject> = matched.into_iter().skip(skip).take(limit).collect();

        if let Some(projection) = &self.projection {
            for object in &mut page {
                object.payload.retain(|k, _| projection.iter().any(|p| p == k));
            }
        }

        page
    }

    /// Stable string form.
    pub fn to_stable_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the form produced by [`ObjectQuery::to_stable_string`].
    pub fn from_stable_string(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Acl, Principal};
    use crate::object::fields;
    use crate::time::Timestamp;
    use proptest::prelude::*;
    use serde_json::json;

    fn obj(id: &str, updated: i64) -> CachedObject {
        CachedObject::new("b", id, format!("e{}", id), Timestamp::from_millis(updated))
    }

    #[test]
    fn test_comparisons() {
        let o = obj("1", 100).with_field("score", 7).with_field("name", "kiwi");

        assert!(Condition::eq("score", 7.0).matches(&o));
        assert!(Condition::gt("score", 6).matches(&o));
        assert!(!Condition::gt("score", 7).matches(&o));
        assert!(Condition::gte("score", 7).matches(&o));
        assert!(Condition::lt("name", "lime").matches(&o));
        assert!(Condition::lte(fields::UPDATED_AT, 100).matches(&o));
        assert!(Condition::ne("name", "apple").matches(&o));
        assert!(Condition::in_values("name", vec![json!("fig"), json!("kiwi")]).matches(&o));
        assert!(Condition::exists("score").matches(&o));
        assert!(!Condition::exists("missing").matches(&o));
    }

    #[test]
    fn test_mixed_types_never_satisfy_ranges() {
        let o = obj("1", 100).with_field("score", "7");
        assert!(!Condition::gt("score", 1).matches(&o));
        assert!(!Condition::lt("score", 100).matches(&o));
        assert!(!Condition::gt("missing", 1).matches(&o));
    }

    #[test]
    fn test_boolean_composition() {
        let o = obj("1", 100).with_field("a", 1).with_field("b", 2);
        let both = Condition::and(vec![Condition::eq("a", 1), Condition::eq("b", 2)]);
        let either = Condition::or(vec![Condition::eq("a", 9), Condition::eq("b", 2)]);

        assert!(both.matches(&o));
        assert!(either.matches(&o));
        assert!(!Condition::not(both).matches(&o));
        assert!(Condition::and(vec![]).matches(&o));
        assert!(!Condition::or(vec![]).matches(&o));
    }

    #[test]
    fn test_stable_string_is_deterministic() {
        let c = Condition::and(vec![
            Condition::gte(fields::UPDATED_AT, 1000),
            Condition::eq("doc", json!({"z": 1, "a": 2})),
        ]);
        let s = c.to_stable_string();
        assert_eq!(s, c.clone().to_stable_string());
        assert_eq!(Condition::from_stable_string(&s).unwrap(), c);
        assert!(s.starts_with(r#"{"type":"and""#));
    }

    #[test]
    fn test_evaluate_orders_pages_and_hides_tombstones() {
        let objects = vec![
            obj("c", 300),
            obj("a", 100),
            obj("b", 100),
            obj("d", 50).with_deleted(true),
        ];

        let q = ObjectQuery::all()
            .order_by(OrderBy::ascending(fields::UPDATED_AT))
            .order_by(OrderBy::ascending(fields::ID));
        let ids: Vec<_> = q.evaluate(objects.clone(), None).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let q = q.with_tombstones(true).skip(1).limit(2);
        let ids: Vec<_> = q.evaluate(objects, None).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_evaluate_descending_and_projection() {
        let objects = vec![
            obj("a", 1).with_field("n", 1).with_field("x", true),
            obj("b", 2).with_field("n", 3).with_field("x", true),
            obj("c", 3).with_field("n", 2).with_field("x", true),
        ];
        let q = ObjectQuery::all()
            .order_by(OrderBy::descending("n"))
            .project(vec!["n".into()]);
        let result = q.evaluate(objects, None);
        let ids: Vec<_> = result.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(result.iter().all(|o| o.payload.len() == 1));
    }

    #[test]
    fn test_evaluate_filters_by_acl() {
        let private = obj("p", 1).with_acl(Acl::owned_by("alice"));
        let shared = obj("s", 2)
            .with_acl(Acl::owned_by("alice").with(Permission::Read, Principal::Authenticated));

        let q = ObjectQuery::all();
        let bob = Actor::user("bob");
        let alice = Actor::user("alice");

        let seen: Vec<_> = q
            .evaluate(vec![private.clone(), shared.clone()], Some(&bob))
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(seen, vec!["s"]);
        assert_eq!(q.evaluate(vec![private.clone(), shared.clone()], Some(&alice)).len(), 2);
        assert_eq!(q.evaluate(vec![private, shared], None).len(), 2);
    }

    #[test]
    fn test_query_stable_string_omits_unset_paging() {
        let q = ObjectQuery::new(Condition::eq("k", "v"));
        let s = q.to_stable_string();
        assert!(!s.contains("limit"));
        assert_eq!(ObjectQuery::from_stable_string(&s).unwrap(), q);
    }

    proptest! {
        #[test]
        fn test_numeric_equality_matches_ordering(a in -1000i64..1000, b in -1000i64..1000) {
            let va = json!(a);
            let vb = json!(b as f64);
            prop_assert_eq!(values_equal(&va, &vb), a == b);
            prop_assert_eq!(compare_values(&va, &json!(b)), Some(a.cmp(&b)));
        }
    }
}
