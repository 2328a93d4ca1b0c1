use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use session_tracker_data_management::DataManagerError;

/// Error body of every failed request: `{"message": ..., "ok": false}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<DataManagerError> for ApiError {
    fn from(err: DataManagerError) -> Self {
        match err {
            DataManagerError::Validation(message) => Self::bad_request(message),
            DataManagerError::SessionNotFound(_) => Self::not_found(err.to_string()),
            DataManagerError::SessionInactive(_) => Self::bad_request(err.to_string()),
            err => {
                tracing::error!("Request failed: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message, "ok": false }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use session_tracker_lib::session::SessionId;

    use super::*;

    #[test]
    fn data_manager_errors_map_to_status() {
        let id = SessionId::generate();

        let err = ApiError::from(DataManagerError::Validation("Name is required!".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Name is required!");

        assert_eq!(ApiError::from(DataManagerError::SessionNotFound(id)).status, StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(DataManagerError::SessionInactive(id)).status, StatusCode::BAD_REQUEST);
    }
}
