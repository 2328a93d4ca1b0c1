use session_tracker_data_management::{counter_of, last_sample_of, store::{keys::parse_session_key, ChangeEvent}};
use session_tracker_lib::aggregation::should_trigger;
use tokio::{sync::broadcast::{self, error::RecvError}, task::JoinHandle};

use crate::pipeline::IngestionPipeline;

/// Runs the aggregation trigger from store updates instead of inline with ingestion.
/// Aggregate writes leave the counter alone, so they never trigger again.
pub fn spawn(pipeline: IngestionPipeline, mut changes: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Aggregation listener started");
        loop {
            match changes.recv().await {
                Ok(change) => handle_change(&pipeline, change).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Aggregation listener fell behind, skipped {} store updates, catching up", skipped);
                    match pipeline.catch_up().await {
                        Ok(windows) => tracing::info!("Caught up on {} windows", windows),
                        Err(err) => tracing::error!("Failed to catch up on skipped triggers: {}", err),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("Aggregation listener stopped");
    })
}

async fn handle_change(pipeline: &IngestionPipeline, change: ChangeEvent) {
    let Some(session_id) = parse_session_key(&change.key) else {
        return;
    };
    // Only updates, a freshly created session has nothing to aggregate.
    let Some(previous) = change.previous.as_ref() else {
        return;
    };

    let previous_counter = counter_of(Some(previous));
    let counter = counter_of(Some(&change.current));

    if should_trigger(previous_counter, counter, pipeline.window_size()) {
        // The increment wrote the id of the sample it counted, so the window ends where the trigger fired.
        // A catch-up may already have handled this trigger.
        let until = last_sample_of(&change.current);
        if let Err(err) = pipeline.recompute_pending(session_id, counter, until).await {
            tracing::error!("Failed to aggregate session {}: {}", session_id, err);
        }
    }
}
