use std::{path::Path, str::FromStr};

use async_trait::async_trait;
use const_format::concatcp;
use serde_json::Value;
use sqlx::{query, query_as, sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Executor, Pool, Sqlite};
use tokio::sync::broadcast;

use super::{apply_update, constants::*, prefix_end, ChangeEvent, Item, QueryOptions, SetOptions, SetOutcome, Store, StoreError, CHANGE_FEED_CAPACITY};

const SELECT_ITEMS: &str = concatcp!("SELECT ", KEY, ", ", VALUE, ", ", LABEL, " FROM ", ITEMS_TABLE_NAME);

// ?1 prefix, ?2 inclusive upper bound or NULL, ?3 limit (-1 is unbounded), ?4 end of the prefix range or NULL.
// A plain key range so the primary key index serves the scan.
const PREFIX_FILTER: &str = concatcp!(
    " WHERE ", KEY, " >= ?1 AND (?4 IS NULL OR ", KEY, " < ?4) AND (?2 IS NULL OR ", KEY, " <= ?2)"
);
const QUERY_PREFIX_ASC: &str = concatcp!(SELECT_ITEMS, PREFIX_FILTER, " ORDER BY ", KEY, " ASC LIMIT ?3");
const QUERY_PREFIX_DESC: &str = concatcp!(SELECT_ITEMS, PREFIX_FILTER, " ORDER BY ", KEY, " DESC LIMIT ?3");

type Row = (String, String, Option<String>);

/// SQLite backed store. Updates are a compare-and-swap on the stored JSON text,
/// retried until no other writer got in between the read and the write.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        Self::connect_with(options, 8).await
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if is_memory_url(url) { 1 } else { 8 };
        Self::connect_with(options, max_connections).await
    }

    /// Every connection to `sqlite::memory:` is its own database, so the pool is kept to one.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect_with(options, 1).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        let store = Self { pool, changes };
        store.init().await?;

        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", ITEMS_TABLE_NAME, "(",
                KEY,   " TEXT PRIMARY KEY NOT NULL,",
                VALUE, " TEXT NOT NULL,",
                LABEL, " TEXT);

            CREATE INDEX IF NOT EXISTS ", ITEMS_LABEL_INDEX, " ON ", ITEMS_TABLE_NAME, "(", LABEL, ");"
        )).await?;

        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Row>, StoreError> {
        Ok(query_as::<_, Row>(concatcp!(SELECT_ITEMS, " WHERE ", KEY, " = ?1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?)
    }

    fn emit(&self, key: &str, outcome: &SetOutcome) {
        let _ = self.changes.send(ChangeEvent {
            key: key.to_string(),
            previous: outcome.previous.clone(),
            current: outcome.current.clone(),
        });
    }
}

// Every connection to an in-memory url opens its own empty database.
fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn to_item((key, value, label): Row) -> Result<Item, StoreError> {
    Ok(Item {
        key,
        value: serde_json::from_str(&value)?,
        label,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Item>, StoreError> {
        self.fetch(key).await?.map(to_item).transpose()
    }

    async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<SetOutcome, StoreError> {
        loop {
            match self.fetch(key).await? {
                None => {
                    if options.exists {
                        return Err(StoreError::ItemNotFound(key.to_string()));
                    }
                    if !options.holds_for(None) {
                        return Err(StoreError::ConditionFailed(key.to_string()));
                    }

                    let current = apply_update(None, value.clone(), &options.add);
                    let inserted = query(concatcp!(
                        "INSERT INTO ", ITEMS_TABLE_NAME, "(", KEY, ", ", VALUE, ", ", LABEL, ")
                        VALUES (?1, ?2, ?3) ON CONFLICT(", KEY, ") DO NOTHING"))
                        .bind(key)
                        .bind(serde_json::to_string(&current)?)
                        .bind(&options.label)
                        .execute(&self.pool).await?
                        .rows_affected();

                    if inserted == 1 {
                        let outcome = SetOutcome { previous: None, current };
                        self.emit(key, &outcome);
                        return Ok(outcome);
                    }
                }
                Some((_, stored, label)) => {
                    let previous: Value = serde_json::from_str(&stored)?;
                    // The compare-and-swap below fails if `stored` changed after this check.
                    if !options.holds_for(Some(&previous)) {
                        return Err(StoreError::ConditionFailed(key.to_string()));
                    }
                    let current = apply_update(Some(&previous), value.clone(), &options.add);
                    let updated = query(concatcp!(
                        "UPDATE ", ITEMS_TABLE_NAME, " SET ", VALUE, " = ?1, ", LABEL, " = ?2
                        WHERE ", KEY, " = ?3 AND ", VALUE, " = ?4"))
                        .bind(serde_json::to_string(&current)?)
                        .bind(options.label.as_ref().or(label.as_ref()))
                        .bind(key)
                        .bind(&stored)
                        .execute(&self.pool).await?
                        .rows_affected();

                    if updated == 1 {
                        let outcome = SetOutcome { previous: Some(previous), current };
                        self.emit(key, &outcome);
                        return Ok(outcome);
                    }
                }
            }

            tracing::trace!("Lost update race on {}, retrying", key);
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        query(concatcp!("DELETE FROM ", ITEMS_TABLE_NAME, " WHERE ", KEY, " = ?1"))
            .bind(key)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn query_by_prefix(&self, prefix: &str, options: QueryOptions) -> Result<Vec<Item>, StoreError> {
        let sql = if options.reverse { QUERY_PREFIX_DESC } else { QUERY_PREFIX_ASC };
        let limit = options.limit.map(|limit| limit as i64).unwrap_or(-1);

        query_as::<_, Row>(sql)
            .bind(prefix)
            .bind(options.until)
            .bind(limit)
            .bind(prefix_end(prefix))
            .fetch_all(&self.pool).await?
            .into_iter()
            .map(to_item)
            .collect()
    }

    async fn query_by_label(&self, label: &str) -> Result<Vec<Item>, StoreError> {
        query_as::<_, Row>(concatcp!(SELECT_ITEMS, " WHERE ", LABEL, " = ?1 ORDER BY ", KEY))
            .bind(label)
            .fetch_all(&self.pool).await?
            .into_iter()
            .map(to_item)
            .collect()
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn conditional_set() {
        conformance::conditional_set(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn atomic_add() {
        conformance::atomic_add(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn prefix_queries() {
        conformance::prefix_queries(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn labels() {
        conformance::labels(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn field_conditions() {
        conformance::field_conditions(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn memory_url_keeps_a_single_connection() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert_eq!(store.pool.options().get_max_connections(), 1);

        // Every query has to see the table created by `init`.
        conformance::prefix_queries(&store).await;
        assert!(!is_memory_url("sqlite://data/database.db"));
    }

    #[tokio::test]
    async fn change_feed() {
        conformance::change_feed(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_distinct() {
        conformance::concurrent_increments(Arc::new(SqliteStore::in_memory().await.unwrap())).await;
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("session_tracker_{}", std::process::id()));
        let path = dir.join("store_reopen.db");
        let _ = std::fs::remove_file(&path);

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.set("session:a", serde_json::json!({ "name": "a" }), SetOptions::default()).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let item = store.get("session:a").await.unwrap().unwrap();
        assert_eq!(item.value, serde_json::json!({ "name": "a" }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
