use session_tracker_data_management::{DataManager, DataManagerError};
use session_tracker_lib::{
    aggregation::{should_trigger, Aggregate, WindowAggregator},
    coordinate::Coordinate,
    events::SessionEvent,
    sample::{Sample, SampleId},
    session::SessionId,
};

use crate::{config::AggregationMode, notifier::Notifier};

/// Accepts samples for a session, pushes them to subscribers right away, and every
/// `window_size` samples recomputes distance and speed over the trailing window.
#[derive(Clone)]
pub struct IngestionPipeline {
    data_manager: DataManager,
    notifier: Notifier,
    aggregator: WindowAggregator,
    mode: AggregationMode,
}

impl IngestionPipeline {
    pub fn new(data_manager: DataManager, notifier: Notifier, window_size: usize, mode: AggregationMode) -> Self {
        Self {
            data_manager,
            notifier,
            aggregator: WindowAggregator::new(window_size),
            mode,
        }
    }

    pub fn window_size(&self) -> u64 {
        self.aggregator.window_size() as u64
    }

    pub async fn ingest(&self, session_id: SessionId, position: Coordinate) -> Result<Sample, DataManagerError> {
        self.ingest_sample(session_id, SampleId::generate(), position).await
    }

    /// Fails with `SessionNotFound` / `SessionInactive` before anything is stored or published.
    /// Once the sample is stored the call succeeds; a failing recomputation is only logged.
    pub async fn ingest_sample(&self, session_id: SessionId, sample_id: SampleId, position: Coordinate) -> Result<Sample, DataManagerError> {
        let ingested = self.data_manager.append_sample(session_id, sample_id, position).await?;

        tracing::debug!("Session {}: sample {} is number {}", session_id, sample_id, ingested.counter);

        self.notifier.publish(
            session_id,
            &SessionEvent::SampleCreated {
                session_id,
                sample: ingested.sample.clone(),
            },
        );

        if self.mode == AggregationMode::Inline
            && should_trigger(ingested.previous_counter, ingested.counter, self.window_size())
        {
            if let Err(err) = self.recompute(session_id, ingested.counter, Some(sample_id)).await {
                tracing::error!("Failed to aggregate session {}: {}", session_id, err);
            }
        }

        Ok(ingested.sample)
    }

    /// Aggregates the most recent window, ending at `until` when given, and publishes it.
    /// The result is stored on the session unless an aggregate triggered at a later `counter` already is.
    pub async fn recompute(&self, session_id: SessionId, counter: u64, until: Option<SampleId>) -> Result<Aggregate, DataManagerError> {
        let window = self
            .data_manager
            .recent_samples(session_id, self.aggregator.window_size(), until)
            .await?;

        let aggregate = self.aggregator.aggregate(&window);

        match aggregate.speed_kmh {
            Some(speed) => tracing::info!(
                "Session {} at {}: {:.3} km at {:.1} km/h over {} samples",
                session_id, counter, aggregate.distance_km, speed, aggregate.sample_count
            ),
            None => tracing::info!(
                "Session {} at {}: {:.3} km over {} samples, no elapsed time",
                session_id, counter, aggregate.distance_km, aggregate.sample_count
            ),
        }

        self.data_manager.store_aggregate(session_id, counter, &aggregate).await?;

        self.notifier.publish(
            session_id,
            &SessionEvent::AggregateCalculated {
                session_id,
                aggregate: aggregate.clone(),
            },
        );

        Ok(aggregate)
    }

    /// `recompute`, unless an aggregate for `counter` or later is already stored.
    /// Returns `None` when skipped.
    pub async fn recompute_pending(&self, session_id: SessionId, counter: u64, until: Option<SampleId>) -> Result<Option<Aggregate>, DataManagerError> {
        let session = self.data_manager.get_session(session_id).await?;
        if session.aggregated_counter >= counter {
            tracing::debug!("Session {}: window at {} already aggregated", session_id, counter);
            return Ok(None);
        }

        self.recompute(session_id, counter, until).await.map(Some)
    }

    /// Aggregates every window whose trigger was never handled, e.g. after change notifications were dropped.
    /// Returns how many windows were aggregated.
    pub async fn catch_up(&self) -> Result<usize, DataManagerError> {
        let mut aggregated = 0;

        for session in self.data_manager.list_sessions().await? {
            for counter in session.pending_triggers(self.window_size()) {
                let until = self.data_manager.sample_at(session.id, counter).await?;
                if until.is_none() {
                    tracing::warn!("Session {}: no sample number {} to aggregate up to", session.id, counter);
                    continue;
                }

                self.recompute(session.id, counter, until).await?;
                aggregated += 1;
            }
        }

        Ok(aggregated)
    }
}
