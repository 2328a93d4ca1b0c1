use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use session_tracker_lib::{
    aggregation::Aggregate,
    coordinate::Coordinate,
    sample::{Sample, SampleId},
    session::{SessionId, SessionState, TrackSession},
};
use tokio::sync::broadcast;

use crate::{
    store::{
        constants::{ACTIVE, AGGREGATED_COUNTER, COUNTER, DISTANCE_KM, LAST_SAMPLE_ID, NAME, SPEED_KMH},
        keys::{sample_key, sample_label, sample_prefix, session_key, SESSIONS_PREFIX},
        ChangeEvent, Item, MemoryStore, QueryOptions, SetOptions, SqliteStore, Store, StoreError,
    },
    DataManagerError, DATABASE_PATH,
};

/// Result of appending a sample: the sample and the counter transition it caused.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub sample: Sample,
    pub previous_counter: u64,
    pub counter: u64,
}

#[derive(Clone)]
pub struct DataManager {
    store: Arc<dyn Store>,
}

/// The public interface for all session and sample data.
impl DataManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// SQLite at `database_url`, or `data/database.db` under the project root.
    pub async fn start(database_url: Option<&str>) -> Result<Self, DataManagerError> {
        let store = match database_url {
            Some(url) => SqliteStore::connect(url).await,
            None => {
                let root = project_root::get_project_root().map_err(|err| DataManagerError::Store(err.into()))?;
                SqliteStore::open(&root.join(DATABASE_PATH)).await
            }
        }
        .map_err(DataManagerError::Store)?;

        Ok(Self::new(Arc::new(store)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// New sessions start out active.
    pub async fn create_session(&self, name: &str) -> Result<TrackSession, DataManagerError> {
        if name.trim().is_empty() {
            return Err(DataManagerError::Validation("Name is required!".into()));
        }

        let session = TrackSession::new(SessionId::generate(), name.to_string(), true);
        let value = serde_json::to_value(&session).map_err(|err| DataManagerError::Store(err.into()))?;

        self.store
            .set(&session_key(&session.id), value, SetOptions::default())
            .await
            .map_err(DataManagerError::Store)?;

        tracing::info!("Created session {} ({})", session.id, session.name);
        Ok(session)
    }

    pub async fn find_session(&self, session_id: SessionId) -> Result<Option<TrackSession>, DataManagerError> {
        self.store
            .get(&session_key(&session_id))
            .await
            .map_err(DataManagerError::Store)?
            .map(decode)
            .transpose()
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<TrackSession, DataManagerError> {
        self.find_session(session_id)
            .await?
            .ok_or(DataManagerError::SessionNotFound(session_id))
    }

    pub async fn list_sessions(&self) -> Result<Vec<TrackSession>, DataManagerError> {
        self.store
            .query_by_prefix(SESSIONS_PREFIX, QueryOptions::default())
            .await
            .map_err(DataManagerError::Store)?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Renames and (de)activates a session. Counter and aggregate are left alone.
    pub async fn update_session(&self, session_id: SessionId, name: &str, active: bool) -> Result<(), DataManagerError> {
        if name.trim().is_empty() {
            return Err(DataManagerError::Validation("Please provide name and active!".into()));
        }

        self.store
            .set(&session_key(&session_id), json!({ NAME: name, ACTIVE: active }), SetOptions::default().must_exist())
            .await
            .map_err(|err| session_error(session_id, err))?;

        tracing::info!("Updated session {}: name {:?}, active {}", session_id, name, active);
        Ok(())
    }

    /// Removes the session and every sample it owns. Deleting an unknown session is a no-op.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), DataManagerError> {
        self.store
            .remove(&session_key(&session_id))
            .await
            .map_err(DataManagerError::Store)?;

        let samples = self
            .store
            .query_by_label(&sample_label(&session_id))
            .await
            .map_err(DataManagerError::Store)?;

        for sample in &samples {
            self.store.remove(&sample.key).await.map_err(DataManagerError::Store)?;
        }

        tracing::info!("Deleted session {} and {} samples", session_id, samples.len());
        Ok(())
    }

    /// Stores a sample for an active session and atomically bumps the session counter.
    /// Nothing is written when the session is missing or inactive.
    pub async fn append_sample(&self, session_id: SessionId, sample_id: SampleId, position: Coordinate) -> Result<Ingested, DataManagerError> {
        if !position.is_valid() {
            return Err(DataManagerError::Validation(format!(
                "Coordinate out of range: lat {}, lng {}",
                position.latitude, position.longitude
            )));
        }

        let session = self.get_session(session_id).await?;
        if session.state() == SessionState::Inactive {
            return Err(DataManagerError::SessionInactive(session_id));
        }

        let sample = Sample::new(session_id, sample_id, position);
        let key = sample_key(&session_id, &sample_id);
        let value = serde_json::to_value(&sample).map_err(|err| DataManagerError::Store(err.into()))?;

        self.store
            .set(&key, value, SetOptions::default().label(sample_label(&session_id)))
            .await
            .map_err(DataManagerError::Store)?;

        // The active check is repeated inside the increment, a session deactivated after the lookup
        // must not take the sample. The sample id rides along so the trigger knows which window it closes.
        let increment = SetOptions::default()
            .must_exist()
            .where_eq(ACTIVE, true)
            .add(COUNTER, 1);

        let outcome = match self
            .store
            .set(&session_key(&session_id), json!({ LAST_SAMPLE_ID: sample_id }), increment)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                // The session vanished or was deactivated between the lookup and the increment.
                if let Err(remove_err) = self.store.remove(&key).await {
                    tracing::error!("Failed to remove orphaned sample {}: {}", key, remove_err);
                }
                return Err(session_error(session_id, err));
            }
        };

        Ok(Ingested {
            sample,
            previous_counter: counter_of(outcome.previous.as_ref()),
            counter: counter_of(Some(&outcome.current)),
        })
    }

    /// Up to `limit` samples, most recent first. With `until`, the window ends at that sample.
    pub async fn recent_samples(&self, session_id: SessionId, limit: usize, until: Option<SampleId>) -> Result<Vec<Sample>, DataManagerError> {
        let options = QueryOptions {
            limit: Some(limit),
            reverse: true,
            until: until.map(|sample_id| sample_key(&session_id, &sample_id)),
        };

        self.samples(session_id, options).await
    }

    /// Every sample of the session, most recent first.
    pub async fn list_samples(&self, session_id: SessionId) -> Result<Vec<Sample>, DataManagerError> {
        self.samples(session_id, QueryOptions { reverse: true, ..Default::default() }).await
    }

    async fn samples(&self, session_id: SessionId, options: QueryOptions) -> Result<Vec<Sample>, DataManagerError> {
        self.store
            .query_by_prefix(&sample_prefix(&session_id), options)
            .await
            .map_err(DataManagerError::Store)?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// The `position`-th sample of the session in creation order, counting from 1.
    pub async fn sample_at(&self, session_id: SessionId, position: u64) -> Result<Option<SampleId>, DataManagerError> {
        if position == 0 {
            return Ok(None);
        }

        let options = QueryOptions {
            limit: Some(position as usize),
            ..Default::default()
        };
        let samples: Vec<Sample> = self.samples(session_id, options).await?;

        Ok(samples.get(position as usize - 1).map(|sample| sample.id))
    }

    /// Stores the aggregate triggered at `counter` on the session, unless an aggregate triggered at
    /// a later counter got there first. Returns whether it was stored.
    pub async fn store_aggregate(&self, session_id: SessionId, counter: u64, aggregate: &Aggregate) -> Result<bool, DataManagerError> {
        let key = session_key(&session_id);

        loop {
            let stored = self
                .store
                .get(&key)
                .await
                .map_err(DataManagerError::Store)?
                .ok_or(DataManagerError::SessionNotFound(session_id))?;

            let seen = stored.value.get(AGGREGATED_COUNTER).cloned().unwrap_or(serde_json::Value::Null);
            if seen.as_u64().unwrap_or(0) >= counter {
                tracing::debug!("Session {}: aggregate for counter {} is stale, keeping {}", session_id, counter, seen);
                return Ok(false);
            }

            let update = json!({
                DISTANCE_KM: aggregate.distance_km,
                SPEED_KMH: aggregate.speed_kmh,
                AGGREGATED_COUNTER: counter,
            });

            match self
                .store
                .set(&key, update, SetOptions::default().must_exist().where_eq(AGGREGATED_COUNTER, seen))
                .await
            {
                Ok(_) => return Ok(true),
                Err(StoreError::ConditionFailed(_)) => continue,
                Err(err) => return Err(session_error(session_id, err)),
            }
        }
    }

    /// Updates to every record, with the value before and after.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.changes()
    }
}

pub fn counter_of(value: Option<&serde_json::Value>) -> u64 {
    value
        .and_then(|value| value.get(COUNTER))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
}

/// The sample whose append produced the counter in this session record.
pub fn last_sample_of(value: &serde_json::Value) -> Option<SampleId> {
    value
        .get(LAST_SAMPLE_ID)
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
}

fn decode<T: DeserializeOwned>(item: Item) -> Result<T, DataManagerError> {
    serde_json::from_value(item.value).map_err(|source| DataManagerError::Corrupt { key: item.key, source })
}

fn session_error(session_id: SessionId, err: StoreError) -> DataManagerError {
    match err {
        StoreError::ItemNotFound(_) => DataManagerError::SessionNotFound(session_id),
        StoreError::ConditionFailed(_) => DataManagerError::SessionInactive(session_id),
        err => DataManagerError::Store(err),
    }
}
