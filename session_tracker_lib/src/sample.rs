use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::{NoContext, Timestamp, Uuid, Version};

use crate::{coordinate::Coordinate, session::SessionId};

/// Time-ordered sample identifier (UUIDv7). The creation time is embedded in the id,
/// and the textual form sorts in creation order, which the store relies on for key ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(Uuid);

impl SampleId {
    /// Monotonic within the process, even for ids created in the same millisecond.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// An id stamped with an explicit creation time, e.g. when replaying recorded tracks.
    pub fn at(time: DateTime<Utc>) -> Self {
        let seconds = u64::try_from(time.timestamp()).unwrap_or(0);
        let ts = Timestamp::from_unix(NoContext, seconds, time.timestamp_subsec_nanos());
        Self(Uuid::new_v7(ts))
    }

    /// Millisecond precision.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0
            .get_timestamp()
            .and_then(|ts| {
                let (seconds, nanos) = ts.to_unix();
                DateTime::from_timestamp(seconds as i64, nanos)
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SampleId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|_| "Sample id is not a uuid")?;
        if uuid.get_version() != Some(Version::SortRand) {
            return Err("Sample id is not time ordered");
        }
        Ok(Self(uuid))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub session_id: SessionId,
    pub id: SampleId,
    #[serde(flatten)]
    pub position: Coordinate,
}

impl Sample {
    pub fn new(session_id: SessionId, id: SampleId, position: Coordinate) -> Self {
        Self {
            session_id,
            id,
            position,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.id.created_at()
    }
}
