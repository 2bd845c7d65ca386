//! Problem bodies and the mapping from internal errors to HTTP responses.
use crate::api::IllegalScope;
use crate::event_types::NoSuchEventType;
use crate::limits::NoConnectionSlots;
use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use hermod_broker::RepositoryError;
use serde::Serialize;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// RFC 7807 body used by every error response of the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Problem {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            title: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Json(self),
        )
            .into_response()
    }
}

/// Failures of the events endpoints, each carrying its HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("incorrect syntax of X-nakadi-cursors header")]
    UnparseableCursor { raw: String },
    #[error(transparent)]
    NoSuchEventType(#[from] NoSuchEventType),
    #[error(transparent)]
    IllegalScope(#[from] IllegalScope),
    #[error(transparent)]
    NoConnectionSlots(#[from] NoConnectionSlots),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn to_problem(&self) -> Problem {
        match self {
            ApiError::UnparseableCursor { .. } => Problem::new(
                StatusCode::BAD_REQUEST,
                "incorrect syntax of X-nakadi-cursors header",
            ),
            ApiError::NoSuchEventType(_) => {
                Problem::new(StatusCode::NOT_FOUND, "topic not found")
            }
            ApiError::IllegalScope(err) => Problem::new(StatusCode::FORBIDDEN, err.to_string()),
            ApiError::NoConnectionSlots(err) => {
                Problem::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Repository(RepositoryError::InvalidCursor(err)) => {
                Problem::new(StatusCode::PRECONDITION_FAILED, err.to_string())
            }
            ApiError::Repository(RepositoryError::EventPublishing) => Problem::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "error publishing events",
            ),
            ApiError::Repository(err) => {
                Problem::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Internal(message) => {
                Problem::new(StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.to_problem().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_broker::{CursorErrorKind, InvalidCursorError, TopicPosition};

    #[test]
    fn invalid_cursor_maps_to_precondition_failed() {
        let err = ApiError::Repository(RepositoryError::InvalidCursor(InvalidCursorError::new(
            CursorErrorKind::Unavailable,
            TopicPosition::new("t", "0", "999999"),
        )));
        let problem = err.to_problem();
        assert_eq!(problem.status, 412);
        assert!(problem.detail.unwrap().contains("cursor UNAVAILABLE"));
    }

    #[test]
    fn unparseable_header_maps_to_bad_request() {
        let err = ApiError::UnparseableCursor { raw: "{".into() };
        let problem = err.to_problem();
        assert_eq!(problem.status, 400);
        assert_eq!(
            problem.detail.as_deref(),
            Some("incorrect syntax of X-nakadi-cursors header")
        );
    }

    #[test]
    fn missing_event_type_maps_to_not_found() {
        let err = ApiError::NoSuchEventType(NoSuchEventType("orders".into()));
        let problem = err.to_problem();
        assert_eq!(problem.status, 404);
        assert_eq!(problem.detail.as_deref(), Some("topic not found"));
    }

    #[test]
    fn no_slots_maps_to_service_unavailable() {
        let err = ApiError::NoConnectionSlots(NoConnectionSlots {
            event_type: "orders".into(),
            partition: "0".into(),
            max: 5,
        });
        let problem = err.to_problem();
        assert_eq!(problem.status, 503);
        assert!(problem.detail.unwrap().contains("no free slots"));
    }

    #[test]
    fn problem_title_is_the_canonical_reason() {
        let problem = Problem::new(StatusCode::PRECONDITION_FAILED, "x");
        assert_eq!(problem.title, "Precondition Failed");
    }
}
