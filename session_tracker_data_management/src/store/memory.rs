use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::{apply_update, prefix_end, ChangeEvent, Item, QueryOptions, SetOptions, SetOutcome, Store, StoreError, CHANGE_FEED_CAPACITY};

struct Entry {
    value: Value,
    label: Option<String>,
}

/// Ordered in-memory store. One lock guards the whole map, so every `set` is trivially atomic.
#[derive(Clone)]
pub struct MemoryStore {
    items: Arc<Mutex<BTreeMap<String, Entry>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            items: Arc::new(Mutex::new(BTreeMap::new())),
            changes,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Item>, StoreError> {
        let items = self.items.lock().await;
        Ok(items.get(key).map(|entry| Item {
            key: key.to_string(),
            value: entry.value.clone(),
            label: entry.label.clone(),
        }))
    }

    async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<SetOutcome, StoreError> {
        let mut items = self.items.lock().await;

        let existing = items.get(key);
        if options.exists && existing.is_none() {
            return Err(StoreError::ItemNotFound(key.to_string()));
        }
        if !options.holds_for(existing.map(|entry| &entry.value)) {
            return Err(StoreError::ConditionFailed(key.to_string()));
        }

        let previous = existing.map(|entry| entry.value.clone());
        let label = options.label.or_else(|| existing.and_then(|entry| entry.label.clone()));
        let current = apply_update(previous.as_ref(), value, &options.add);

        items.insert(key.to_string(), Entry { value: current.clone(), label });

        // Sent under the lock so the feed sees updates in the order they were applied.
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent {
            key: key.to_string(),
            previous: previous.clone(),
            current: current.clone(),
        });

        Ok(SetOutcome { previous, current })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.items.lock().await.remove(key);
        Ok(())
    }

    async fn query_by_prefix(&self, prefix: &str, options: QueryOptions) -> Result<Vec<Item>, StoreError> {
        let end = prefix_end(prefix);
        let upper = match (options.until.as_deref(), end.as_deref()) {
            (Some(until), _) if until < prefix => return Ok(Vec::new()),
            (Some(until), Some(end)) if until < end => Bound::Included(until),
            (Some(until), None) => Bound::Included(until),
            (_, Some(end)) => Bound::Excluded(end),
            (None, None) => Bound::Unbounded,
        };

        let items = self.items.lock().await;
        let range = items
            .range::<str, _>((Bound::Included(prefix), upper))
            .filter(|(key, _)| key.starts_with(prefix));
        let limit = options.limit.unwrap_or(usize::MAX);

        let to_item = |(key, entry): (&String, &Entry)| Item {
            key: key.clone(),
            value: entry.value.clone(),
            label: entry.label.clone(),
        };

        Ok(if options.reverse {
            range.rev().take(limit).map(to_item).collect()
        } else {
            range.take(limit).map(to_item).collect()
        })
    }

    async fn query_by_label(&self, label: &str) -> Result<Vec<Item>, StoreError> {
        let items = self.items.lock().await;
        Ok(items
            .iter()
            .filter(|(_, entry)| entry.label.as_deref() == Some(label))
            .map(|(key, entry)| Item {
                key: key.clone(),
                value: entry.value.clone(),
                label: entry.label.clone(),
            })
            .collect())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
