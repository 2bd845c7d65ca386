//! Batch publish endpoint: `POST /event-types/{name}/events`. Every event is
//! assigned its partition up front; the repository publishes the batch
//! synchronously and the response reports one result per item.
use crate::api::error::{ApiError, Problem};
use crate::api::Client;
use crate::app::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hermod_broker::{BatchItem, ItemResponse, RepositoryError};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministically map a partition key onto one of the topic's partitions,
/// keeping all events with the same key on the same partition.
fn partition_for_key(key: &str, partitions: &[String]) -> String {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let index = (hasher.finish() as usize) % partitions.len().max(1);
    partitions[index].clone()
}

/// Partition assignment for one event: an explicit `metadata.partition` wins,
/// then a `metadata.partition_key` hash, then a hash of the whole payload.
fn assign_partition(event: &Value, partitions: &[String]) -> Result<String, Problem> {
    let metadata = event.get("metadata");
    if let Some(partition) = metadata
        .and_then(|metadata| metadata.get("partition"))
        .and_then(Value::as_str)
    {
        if !partitions.iter().any(|name| name == partition) {
            return Err(Problem::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("partition {partition} does not exist for this event type"),
            ));
        }
        return Ok(partition.to_string());
    }
    if let Some(key) = metadata
        .and_then(|metadata| metadata.get("partition_key"))
        .and_then(Value::as_str)
    {
        return Ok(partition_for_key(key, partitions));
    }
    Ok(partition_for_key(&event.to_string(), partitions))
}

pub async fn publish_events(
    Path(name): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let client = Client::from_headers(&headers);
    if state
        .blacklist
        .is_production_blocked(&name, &client.client_id)
    {
        return Problem::new(
            StatusCode::FORBIDDEN,
            "Application or event type is blocked",
        )
        .into_response();
    }

    let event_type = match state.event_types.find_by_name(&name) {
        Ok(event_type) => event_type,
        Err(err) => return ApiError::from(err).into_response(),
    };
    if let Err(err) = client.check_scopes(&event_type.write_scopes) {
        return ApiError::from(err).into_response();
    }

    let events: Vec<Value> = match serde_json::from_str(&body) {
        Ok(events) => events,
        Err(_) => {
            return Problem::new(
                StatusCode::BAD_REQUEST,
                "request body must be a JSON array of events",
            )
            .into_response();
        }
    };
    if events.is_empty() {
        return (StatusCode::OK, Json(Vec::<ItemResponse>::new())).into_response();
    }

    let partitions = match state.repository.list_partition_names(&event_type.topic) {
        Ok(partitions) => partitions,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut batch = Vec::with_capacity(events.len());
    for event in &events {
        match assign_partition(event, &partitions) {
            Ok(partition) => batch.push(BatchItem::new(event.to_string(), partition)),
            Err(problem) => return problem.into_response(),
        }
    }

    match state
        .repository
        .sync_post_batch(&event_type.topic, &batch)
        .await
    {
        Ok(()) => {
            let report: Vec<ItemResponse> = batch.iter().map(BatchItem::response).collect();
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(RepositoryError::EventPublishing) => {
            let report: Vec<ItemResponse> = batch.iter().map(BatchItem::response).collect();
            tracing::warn!(event_type = %name, "publish batch failed");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions(count: usize) -> Vec<String> {
        (0..count).map(|index| index.to_string()).collect()
    }

    #[test]
    fn explicit_partition_wins() {
        let event: Value =
            serde_json::from_str(r#"{"metadata":{"partition":"2"},"x":1}"#).expect("json");
        assert_eq!(assign_partition(&event, &partitions(4)).expect("assign"), "2");
    }

    #[test]
    fn unknown_explicit_partition_is_rejected() {
        let event: Value =
            serde_json::from_str(r#"{"metadata":{"partition":"9"}}"#).expect("json");
        let problem = assign_partition(&event, &partitions(2)).expect_err("reject");
        assert_eq!(problem.status, 422);
    }

    #[test]
    fn partition_keys_are_sticky() {
        let event: Value =
            serde_json::from_str(r#"{"metadata":{"partition_key":"order-1"}}"#).expect("json");
        let first = assign_partition(&event, &partitions(8)).expect("assign");
        let second = assign_partition(&event, &partitions(8)).expect("assign");
        assert_eq!(first, second);
    }

    #[test]
    fn events_without_metadata_still_get_a_partition() {
        let event: Value = serde_json::from_str(r#"{"x":1}"#).expect("json");
        let partition = assign_partition(&event, &partitions(3)).expect("assign");
        assert!(partitions(3).contains(&partition));
    }
}
