use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use session_tracker_lib::{events::SessionEvent, session::SessionId};

use crate::subscriptions::{HandleId, SubscriptionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("{0} is no longer connected")]
    Closed(HandleId),

    #[error("Delivery to {0} timed out after {1:?}")]
    TimedOut(HandleId, Duration),
}

/// Hands a serialized event to one live connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, handle: HandleId, payload: Arc<str>) -> Result<(), DeliveryFailure>;
}

/// Fans events out to every subscriber of a session.
#[derive(Clone)]
pub struct Notifier {
    registry: SubscriptionRegistry,
    transport: Arc<dyn Transport>,
    delivery_timeout: Duration,
}

impl Notifier {
    pub fn new(registry: SubscriptionRegistry, transport: Arc<dyn Transport>, delivery_timeout: Duration) -> Self {
        Self {
            registry,
            transport,
            delivery_timeout,
        }
    }

    /// Fire and forget: every subscriber gets its own time-bounded delivery task,
    /// so one slow or dead connection never holds up the caller or the other subscribers.
    /// Failed deliveries are logged, the handle stays registered until its connection goes away.
    ///
    /// Returns how many deliveries were started.
    pub fn publish(&self, session_id: SessionId, event: &SessionEvent) -> usize {
        let members = self.registry.members_of(session_id);
        if members.is_empty() {
            return 0;
        }

        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::error!("Failed to serialize event for session {}: {}", session_id, err);
                return 0;
            }
        };

        for handle in members.iter().copied() {
            let notifier = self.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(err) = notifier.deliver(handle, payload).await {
                    tracing::warn!("Delivery failure for session {}: {}", session_id, err);
                }
            });
        }

        members.len()
    }

    /// Direct message to one connection, e.g. the answer to a subscribe attempt.
    pub async fn send_to(&self, handle: HandleId, event: &SessionEvent) -> Result<(), DeliveryFailure> {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(err) => {
                tracing::error!("Failed to serialize event for {}: {}", handle, err);
                return Ok(());
            }
        };
        self.deliver(handle, payload).await
    }

    async fn deliver(&self, handle: HandleId, payload: Arc<str>) -> Result<(), DeliveryFailure> {
        tokio::time::timeout(self.delivery_timeout, self.transport.publish(handle, payload))
            .await
            .unwrap_or(Err(DeliveryFailure::TimedOut(handle, self.delivery_timeout)))
    }
}
