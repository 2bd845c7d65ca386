//! Event-type administration: creating an event type provisions its backing
//! topic; deleting it triggers asynchronous topic deletion.
use crate::api::error::{ApiError, Problem};
use crate::api::{ADMIN_SCOPE, Client};
use crate::app::AppState;
use crate::event_types::EventType;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct EventTypeCreateRequest {
    pub name: String,
    #[serde(default)]
    pub partitions: Option<u32>,
    #[serde(default)]
    pub retention_ms: Option<i64>,
    #[serde(default)]
    pub read_scopes: Vec<String>,
    #[serde(default)]
    pub write_scopes: Vec<String>,
}

fn check_admin(client: &Client) -> Result<(), Problem> {
    if client.scopes.contains(ADMIN_SCOPE) {
        return Ok(());
    }
    Err(Problem::new(
        StatusCode::FORBIDDEN,
        format!("administration requires the {ADMIN_SCOPE} scope"),
    ))
}

pub async fn create_event_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EventTypeCreateRequest>,
) -> Response {
    let client = Client::from_headers(&headers);
    if let Err(problem) = check_admin(&client) {
        return problem.into_response();
    }
    if request.name.trim().is_empty() {
        return Problem::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "event type name must not be empty",
        )
        .into_response();
    }
    if state.event_types.find_by_name(&request.name).is_ok() {
        return Problem::new(
            StatusCode::CONFLICT,
            format!("event type {} already exists", request.name),
        )
        .into_response();
    }

    let partitions = request.partitions.unwrap_or(1).max(1);
    let retention_ms = request
        .retention_ms
        .unwrap_or(state.config.default_retention_ms);
    let topic = match state.repository.create_topic(partitions, retention_ms).await {
        Ok(topic) => topic,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let event_type = EventType {
        name: request.name.clone(),
        topic: topic.clone(),
        read_scopes: request.read_scopes,
        write_scopes: request.write_scopes,
    };
    if state.event_types.insert(event_type.clone()).is_err() {
        // Lost a race on the name; drop the freshly created topic.
        if let Err(err) = state.repository.delete_topic(&topic).await {
            tracing::warn!(topic = %topic, error = %err, "failed to clean up orphaned topic");
        }
        return Problem::new(
            StatusCode::CONFLICT,
            format!("event type {} already exists", request.name),
        )
        .into_response();
    }
    tracing::info!(event_type = %request.name, topic = %topic, "created event type");
    (StatusCode::CREATED, Json(event_type)).into_response()
}

pub async fn delete_event_type(
    Path(name): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let client = Client::from_headers(&headers);
    if let Err(problem) = check_admin(&client) {
        return problem.into_response();
    }
    let event_type = match state.event_types.find_by_name(&name) {
        Ok(event_type) => event_type,
        Err(err) => return ApiError::from(err).into_response(),
    };
    // Topic deletion is asynchronous downstream; failure keeps the event type
    // registered so the operator can retry.
    if let Err(err) = state.repository.delete_topic(&event_type.topic).await {
        return ApiError::from(err).into_response();
    }
    let _ = state.event_types.remove(&name);
    tracing::info!(event_type = %name, topic = %event_type.topic, "deleted event type");
    StatusCode::NO_CONTENT.into_response()
}
