use const_format::concatcp;
use session_tracker_lib::session::SessionId;

pub mod store;
mod data_manager;

pub use data_manager::*;
pub use store::StoreError;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "database.db");

#[derive(Debug, thiserror::Error)]
pub enum DataManagerError {
    #[error("{0}")]
    Validation(String),

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Session {0} is not active")]
    SessionInactive(SessionId),

    #[error("Corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(StoreError),
}
