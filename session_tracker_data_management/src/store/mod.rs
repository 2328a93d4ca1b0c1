use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

pub mod constants;
pub mod keys;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub(crate) const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item does not exist: {0}")]
    ItemNotFound(String),

    #[error("Condition not met on {0}")]
    ConditionFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: String,
    pub value: Value,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Fail with `ItemNotFound` instead of creating the item.
    pub exists: bool,
    /// Fields incremented atomically as part of the update. A missing field counts as 0.
    pub add: Vec<(String, i64)>,
    /// Secondary index tag. Left untouched when `None`.
    pub label: Option<String>,
    /// Fields the stored value must hold for the update to apply, checked in the same atomic step.
    /// A missing field compares equal to `null`. Fails with `ConditionFailed`.
    pub conditions: Vec<(String, Value)>,
}

impl SetOptions {
    pub fn must_exist(mut self) -> Self {
        self.exists = true;
        self
    }

    pub fn add(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.add.push((field.into(), delta));
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Conditions only hold against an existing value.
    pub(crate) fn holds_for(&self, previous: Option<&Value>) -> bool {
        self.conditions.iter().all(|(field, expected)| match previous {
            Some(previous) => previous.get(field).unwrap_or(&Value::Null) == expected,
            None => false,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub reverse: bool,
    /// Inclusive upper bound on the key.
    pub until: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    pub previous: Option<Value>,
    pub current: Value,
}

/// Emitted after every successful `set`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub key: String,
    pub previous: Option<Value>,
    pub current: Value,
}

/// Key-value storage for session records and samples.
/// `set` is a single atomic conditional update: merge, increment and existence check can not interleave
/// with another writer on the same key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Item>, StoreError>;

    async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<SetOutcome, StoreError>;

    /// No-op when the key is absent.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Items whose key starts with `prefix`, in key order (or reversed).
    async fn query_by_prefix(&self, prefix: &str, options: QueryOptions) -> Result<Vec<Item>, StoreError>;

    async fn query_by_label(&self, label: &str) -> Result<Vec<Item>, StoreError>;

    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Smallest string greater than every string starting with `prefix`, `None` if there is none.
pub(crate) fn prefix_end(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = (last as u32 + 1..=char::MAX as u32).find_map(char::from_u32) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Objects are shallow merged into an existing object, anything else replaces it.
/// Increments are applied on top of the merged value.
pub(crate) fn apply_update(previous: Option<&Value>, value: Value, add: &[(String, i64)]) -> Value {
    let mut next = match (previous, value) {
        (Some(Value::Object(existing)), Value::Object(fields)) => {
            let mut merged = existing.clone();
            merged.extend(fields);
            Value::Object(merged)
        }
        (_, value) => value,
    };

    if add.is_empty() {
        return next;
    }

    if !next.is_object() {
        next = Value::Object(Map::new());
    }

    if let Value::Object(fields) = &mut next {
        for (field, delta) in add {
            let current = fields.get(field).and_then(Value::as_i64).unwrap_or(0);
            fields.insert(field.clone(), Value::from(current + delta));
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merges_objects() {
        let previous = json!({ "name": "a", "active": true, "counter": 3 });
        let next = apply_update(Some(&previous), json!({ "name": "b", "active": false }), &[]);
        assert_eq!(next, json!({ "name": "b", "active": false, "counter": 3 }));
    }

    #[test]
    fn adds_to_missing_field() {
        let previous = json!({ "name": "a" });
        let next = apply_update(Some(&previous), json!({}), &[("counter".into(), 1)]);
        assert_eq!(next, json!({ "name": "a", "counter": 1 }));
    }

    #[test]
    fn null_clears_a_field_value() {
        let previous = json!({ "speedKmh": 12.5 });
        let next = apply_update(Some(&previous), json!({ "speedKmh": null }), &[]);
        assert_eq!(next, json!({ "speedKmh": null }));
    }

    #[test]
    fn prefix_end_bumps_the_last_char() {
        assert_eq!(prefix_end("session:").as_deref(), Some("session;"));
        assert_eq!(prefix_end("session#a:").as_deref(), Some("session#a;"));
        assert_eq!(prefix_end(""), None);
    }

    #[test]
    fn conditions() {
        let options = SetOptions::default().where_eq("active", true);
        assert!(options.holds_for(Some(&json!({ "active": true }))));
        assert!(!options.holds_for(Some(&json!({ "active": false }))));
        assert!(!options.holds_for(None));

        let missing_is_null = SetOptions::default().where_eq("aggregatedCounter", Value::Null);
        assert!(missing_is_null.holds_for(Some(&json!({}))));
        assert!(SetOptions::default().holds_for(None));
    }

    #[test]
    fn non_objects_replace() {
        let next = apply_update(Some(&json!([1, 2])), json!("text"), &[]);
        assert_eq!(next, json!("text"));
    }
}
