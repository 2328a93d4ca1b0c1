//! Behaviour every `Store` implementation has to share. Called from the tests of each implementation.

use std::sync::Arc;

use serde_json::json;

use super::{QueryOptions, SetOptions, Store, StoreError};

pub async fn conditional_set(store: &dyn Store) {
    let missing = store.set("session:missing", json!({ "name": "x" }), SetOptions::default().must_exist()).await;
    assert!(matches!(missing, Err(StoreError::ItemNotFound(key)) if key == "session:missing"));
    assert_eq!(store.get("session:missing").await.unwrap(), None);

    let created = store.set("session:a", json!({ "name": "a", "active": true }), SetOptions::default()).await.unwrap();
    assert_eq!(created.previous, None);

    let updated = store.set("session:a", json!({ "active": false }), SetOptions::default().must_exist()).await.unwrap();
    assert_eq!(updated.previous, Some(json!({ "name": "a", "active": true })));
    assert_eq!(updated.current, json!({ "name": "a", "active": false }));

    let item = store.get("session:a").await.unwrap().unwrap();
    assert_eq!(item.value, json!({ "name": "a", "active": false }));

    store.remove("session:a").await.unwrap();
    store.remove("session:a").await.unwrap();
    assert_eq!(store.get("session:a").await.unwrap(), None);
}

pub async fn atomic_add(store: &dyn Store) {
    store.set("session:a", json!({ "name": "a" }), SetOptions::default()).await.unwrap();

    let mut last = None;
    for _ in 0..3 {
        last = Some(store.set("session:a", json!({}), SetOptions::default().must_exist().add("counter", 1)).await.unwrap());
    }

    let last = last.unwrap();
    assert_eq!(last.previous, Some(json!({ "name": "a", "counter": 2 })));
    assert_eq!(last.current, json!({ "name": "a", "counter": 3 }));
}

pub async fn prefix_queries(store: &dyn Store) {
    for i in 1..=5 {
        store.set(&format!("session#a:{i}"), json!({ "n": i }), SetOptions::default()).await.unwrap();
    }
    store.set("session#b:1", json!({ "n": 100 }), SetOptions::default()).await.unwrap();
    store.set("session:a", json!({ "name": "a" }), SetOptions::default()).await.unwrap();

    let keys = |items: Vec<super::Item>| items.into_iter().map(|item| item.key).collect::<Vec<_>>();

    let all = store.query_by_prefix("session#a:", QueryOptions::default()).await.unwrap();
    assert_eq!(keys(all), vec!["session#a:1", "session#a:2", "session#a:3", "session#a:4", "session#a:5"]);

    let latest = store
        .query_by_prefix("session#a:", QueryOptions { limit: Some(2), reverse: true, until: None })
        .await
        .unwrap();
    assert_eq!(keys(latest), vec!["session#a:5", "session#a:4"]);

    let bounded = store
        .query_by_prefix("session#a:", QueryOptions { limit: Some(2), reverse: true, until: Some("session#a:3".into()) })
        .await
        .unwrap();
    assert_eq!(keys(bounded), vec!["session#a:3", "session#a:2"]);

    let sessions = store.query_by_prefix("session:", QueryOptions::default()).await.unwrap();
    assert_eq!(keys(sessions), vec!["session:a"]);

    let nothing = store.query_by_prefix("session#c:", QueryOptions::default()).await.unwrap();
    assert!(nothing.is_empty());

    let before_prefix = store
        .query_by_prefix("session#b:", QueryOptions { until: Some("session#a:9".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(before_prefix.is_empty());

    let past_prefix = store
        .query_by_prefix("session#a:", QueryOptions { reverse: true, until: Some("session#z".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(keys(past_prefix).len(), 5);
}

pub async fn field_conditions(store: &dyn Store) {
    store.set("session:a", json!({ "active": true }), SetOptions::default()).await.unwrap();

    let bumped = store
        .set("session:a", json!({}), SetOptions::default().must_exist().where_eq("active", true).add("counter", 1))
        .await
        .unwrap();
    assert_eq!(bumped.current, json!({ "active": true, "counter": 1 }));

    store.set("session:a", json!({ "active": false }), SetOptions::default()).await.unwrap();
    let refused = store
        .set("session:a", json!({}), SetOptions::default().must_exist().where_eq("active", true).add("counter", 1))
        .await;
    assert!(matches!(refused, Err(StoreError::ConditionFailed(key)) if key == "session:a"));
    assert_eq!(store.get("session:a").await.unwrap().unwrap().value, json!({ "active": false, "counter": 1 }));

    let missing = store
        .set("session:b", json!({}), SetOptions::default().must_exist().where_eq("active", true))
        .await;
    assert!(matches!(missing, Err(StoreError::ItemNotFound(_))));

    // Missing fields compare equal to null.
    store
        .set("session:a", json!({ "aggregatedCounter": 2 }), SetOptions::default().where_eq("aggregatedCounter", serde_json::Value::Null))
        .await
        .unwrap();
}

pub async fn labels(store: &dyn Store) {
    store.set("session#a:1", json!({ "n": 1 }), SetOptions::default().label("session:a")).await.unwrap();
    store.set("session#a:2", json!({ "n": 2 }), SetOptions::default().label("session:a")).await.unwrap();
    store.set("session#b:1", json!({ "n": 3 }), SetOptions::default().label("session:b")).await.unwrap();

    // Updating without a label keeps the old one.
    store.set("session#a:2", json!({ "n": 20 }), SetOptions::default()).await.unwrap();

    let labelled = store.query_by_label("session:a").await.unwrap();
    let keys: Vec<_> = labelled.iter().map(|item| item.key.as_str()).collect();
    assert_eq!(keys, vec!["session#a:1", "session#a:2"]);
    assert_eq!(labelled[1].value, json!({ "n": 20 }));
    assert_eq!(labelled[1].label.as_deref(), Some("session:a"));

    assert!(store.query_by_label("session:c").await.unwrap().is_empty());
}

pub async fn change_feed(store: &dyn Store) {
    let mut changes = store.changes();

    store.set("session:a", json!({ "counter": 0 }), SetOptions::default()).await.unwrap();
    store.set("session:a", json!({}), SetOptions::default().add("counter", 1)).await.unwrap();

    let created = changes.recv().await.unwrap();
    assert_eq!(created.key, "session:a");
    assert_eq!(created.previous, None);

    let updated = changes.recv().await.unwrap();
    assert_eq!(updated.previous, Some(json!({ "counter": 0 })));
    assert_eq!(updated.current, json!({ "counter": 1 }));
}

pub async fn concurrent_increments(store: Arc<dyn Store>) {
    store.set("session:a", json!({ "name": "a" }), SetOptions::default()).await.unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let outcome = store
                    .set("session:a", json!({}), SetOptions::default().must_exist().add("counter", 1))
                    .await
                    .unwrap();
                let previous = outcome.previous.unwrap()["counter"].as_i64().unwrap_or(0);
                let current = outcome.current["counter"].as_i64().unwrap();
                (previous, current)
            })
        })
        .collect();

    let mut counters = Vec::new();
    for task in tasks {
        let (previous, current) = task.await.unwrap();
        assert_eq!(previous + 1, current);
        counters.push(current);
    }
    counters.sort();

    assert_eq!(counters, (1..=50).collect::<Vec<i64>>());
}
