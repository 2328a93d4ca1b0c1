use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sample::SampleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|_| "Session id is not a uuid")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Inactive,
}

/// A session record as it is kept in the store.
/// `counter` is the number of samples ever ingested and only ever grows.
/// `last_sample_id` is the sample that produced the current counter value, written in the same update.
/// `aggregated_counter` is the counter value the stored distance and speed were triggered at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSession {
    pub id: SessionId,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub counter: u64,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub last_sample_id: Option<SampleId>,
    #[serde(default)]
    pub aggregated_counter: u64,
}

impl TrackSession {
    pub fn new(id: SessionId, name: String, active: bool) -> Self {
        Self {
            id,
            name,
            active,
            counter: 0,
            distance_km: None,
            speed_kmh: None,
            last_sample_id: None,
            aggregated_counter: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active {
            SessionState::Active
        } else {
            SessionState::Inactive
        }
    }

    /// The last computed distance and speed, absent until the first trigger.
    pub fn last_aggregate(&self) -> Option<(f64, Option<f64>)> {
        self.distance_km.map(|distance| (distance, self.speed_kmh))
    }

    /// Multiples of `window_size` the counter has passed that have no stored aggregate yet.
    pub fn pending_triggers(&self, window_size: u64) -> Vec<u64> {
        if window_size == 0 {
            return Vec::new();
        }
        let first = self.aggregated_counter / window_size + 1;
        let last = self.counter / window_size;
        (first..=last).map(|n| n * window_size).collect()
    }
}
