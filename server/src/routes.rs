use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use session_tracker_lib::{coordinate::Coordinate, sample::Sample, session::{SessionId, TrackSession}};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, server_state::ServerState, websocket::ws_handler};

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSession {
    name: Option<String>,
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NewSample {
    lat: Option<f64>,
    lng: Option<f64>,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{session_id}", get(get_session).put(update_session).delete(delete_session))
        .route("/sessions/{session_id}/data", get(list_samples).post(post_sample))
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not Found")
}

// Ids that do not parse can not name a stored session.
fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Session {} not found", raw)))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn list_sessions(State(state): State<Arc<ServerState>>) -> Result<Json<Vec<TrackSession>>, ApiError> {
    Ok(Json(state.data_manager.list_sessions().await?))
}

async fn create_session(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<CreateSession>, JsonRejection>,
) -> Result<Response, ApiError> {
    let name = body(payload)?
        .name
        .ok_or_else(|| ApiError::bad_request("Name is required!"))?;

    let session = state.data_manager.create_session(&name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": session.id }))).into_response())
}

async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<TrackSession>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.data_manager.get_session(session_id).await?))
}

async fn update_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<UpdateSession>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let UpdateSession { name, active } = body(payload)?;
    let (Some(name), Some(active)) = (name, active) else {
        return Err(ApiError::bad_request("Please provide name and active!"));
    };

    state.data_manager.update_session(session_id, &name, active).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    state.data_manager.delete_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_sample(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<NewSample>, JsonRejection>,
) -> Result<Response, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let NewSample { lat, lng } = body(payload)?;
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(ApiError::bad_request("Data is required!"));
    };

    let sample = state.pipeline.ingest(session_id, Coordinate::new(lat, lng)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": sample.id }))).into_response())
}

async fn list_samples(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Sample>>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    state.data_manager.get_session(session_id).await?;
    Ok(Json(state.data_manager.list_samples(session_id).await?))
}
