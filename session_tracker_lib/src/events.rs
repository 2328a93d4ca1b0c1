use serde::{Deserialize, Serialize};

use crate::{aggregation::Aggregate, sample::Sample, session::SessionId};

/// Everything pushed to live subscribers of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    #[serde(rename = "coordinate.created")]
    SampleCreated { session_id: SessionId, sample: Sample },
    #[serde(rename = "distance.calculated")]
    AggregateCalculated { session_id: SessionId, aggregate: Aggregate },
    #[serde(rename = "subscribed")]
    Subscribed { session_id: SessionId },
    #[serde(rename = "subscription.error")]
    SubscriptionError { code: String, message: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::SampleCreated { session_id, .. }
            | SessionEvent::AggregateCalculated { session_id, .. }
            | SessionEvent::Subscribed { session_id } => Some(*session_id),
            SessionEvent::SubscriptionError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coordinate::Coordinate, sample::SampleId};

    #[test]
    fn tagged_by_type() {
        let session_id = SessionId::generate();
        let sample = Sample::new(session_id, SampleId::generate(), Coordinate::new(1.0, 2.0));
        let json = serde_json::to_value(SessionEvent::SampleCreated { session_id, sample }).unwrap();
        assert_eq!(json["type"], "coordinate.created");
        assert_eq!(json["sessionId"], serde_json::json!(session_id.to_string()));
        assert_eq!(json["sample"]["lng"], serde_json::json!(2.0));
    }

    #[test]
    fn missing_speed_is_null() {
        let session_id = SessionId::generate();
        let event = SessionEvent::AggregateCalculated { session_id, aggregate: Aggregate::empty() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "distance.calculated");
        assert!(json["aggregate"]["speedKmh"].is_null());
        assert_eq!(event.session_id(), Some(session_id));
    }
}
