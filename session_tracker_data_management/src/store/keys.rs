use session_tracker_lib::{sample::SampleId, session::SessionId};

// `session:<id>` holds the session record, `session#<id>:<sample>` its samples.
// The different delimiter keeps sample keys out of a `session:` prefix scan.
pub const SESSIONS_PREFIX: &str = "session:";

pub fn session_key(session_id: &SessionId) -> String {
    format!("{SESSIONS_PREFIX}{session_id}")
}

pub fn sample_prefix(session_id: &SessionId) -> String {
    format!("session#{session_id}:")
}

pub fn sample_key(session_id: &SessionId, sample_id: &SampleId) -> String {
    format!("session#{session_id}:{sample_id}")
}

/// Samples are labelled with the key of the session that owns them.
pub fn sample_label(session_id: &SessionId) -> String {
    session_key(session_id)
}

pub fn parse_session_key(key: &str) -> Option<SessionId> {
    key.strip_prefix(SESSIONS_PREFIX)?.parse().ok()
}
