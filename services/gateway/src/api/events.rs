//! Streaming controller for `GET /event-types/{name}/events`: parses the
//! cursors header, negotiates the start position, runs admission and drives
//! the event stream until the client goes away or a limit is met.
use crate::api::error::{ApiError, Problem};
use crate::api::Client;
use crate::app::AppState;
use crate::features::Feature;
use crate::limits::{ConnectionSlot, ConsumerLimiter};
use crate::stream::{EventStream, EventStreamConfig};
use crate::watcher::ConnectionWatcher;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hermod_broker::{
    CursorErrorKind, EventConsumer, InvalidCursorError, TopicPosition, TopicRepository,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Header carrying the starting cursors, a JSON array of partition/offset.
pub const CURSORS_HEADER: &str = "x-nakadi-cursors";

const CONSUMERS_GAUGE: &str = "hermod_consumers";
const STREAM_CHANNEL_DEPTH: usize = 16;

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub batch_limit: Option<usize>,
    pub stream_limit: Option<usize>,
    pub batch_flush_timeout: Option<u64>,
    pub stream_timeout: Option<u64>,
    pub stream_keep_alive_limit: Option<i64>,
}

/// Wire form of one cursor in the header.
#[derive(Debug, Clone, Deserialize)]
pub struct WireCursor {
    pub partition: Option<String>,
    pub offset: Option<String>,
}

/// Resolve the positions streaming starts from. No header means "from the
/// newest position of every partition"; a BEGIN offset substitutes the
/// partition's before-oldest position, loaded lazily once.
pub(crate) fn streaming_start(
    repository: &TopicRepository,
    topic: &str,
    header: Option<&str>,
) -> Result<Vec<TopicPosition>, ApiError> {
    let Some(raw) = header else {
        return Ok(repository.load_newest_position([topic])?);
    };
    let cursors: Vec<WireCursor> =
        serde_json::from_str(raw).map_err(|_| ApiError::UnparseableCursor {
            raw: raw.to_string(),
        })?;

    let mut before_oldest: Option<HashMap<String, TopicPosition>> = None;
    let mut result = Vec::with_capacity(cursors.len());
    for cursor in cursors {
        let is_begin = cursor
            .offset
            .as_deref()
            .is_some_and(|offset| offset.eq_ignore_ascii_case(hermod_broker::BEFORE_OLDEST_OFFSET));
        let position = if is_begin {
            if before_oldest.is_none() {
                before_oldest = Some(
                    repository
                        .load_oldest_position([topic], false)?
                        .into_iter()
                        .filter_map(|position| {
                            Some((position.partition.clone()?, position))
                        })
                        .collect(),
                );
            }
            let oldest = before_oldest.as_ref().expect("loaded above");
            cursor
                .partition
                .as_deref()
                .and_then(|partition| oldest.get(partition).cloned())
                .ok_or_else(|| {
                    InvalidCursorError::new(
                        CursorErrorKind::PartitionNotFound,
                        TopicPosition {
                            topic: topic.to_string(),
                            partition: cursor.partition.clone(),
                            offset: cursor.offset.clone(),
                        },
                    )
                })
                .map_err(hermod_broker::RepositoryError::from)?
        } else {
            let wire = TopicPosition {
                topic: topic.to_string(),
                partition: cursor.partition.clone(),
                offset: cursor.offset.clone(),
            };
            if cursor.partition.is_none() {
                return Err(
                    hermod_broker::RepositoryError::from(InvalidCursorError::new(
                        CursorErrorKind::NullPartition,
                        wire,
                    ))
                    .into(),
                );
            }
            if cursor.offset.is_none() {
                return Err(
                    hermod_broker::RepositoryError::from(InvalidCursorError::new(
                        CursorErrorKind::NullOffset,
                        wire,
                    ))
                    .into(),
                );
            }
            wire
        };
        result.push(position);
    }
    if result.is_empty() {
        return Err(hermod_broker::RepositoryError::from(InvalidCursorError::bare(
            CursorErrorKind::InvalidFormat,
        ))
        .into());
    }
    Ok(result)
}

struct PreparedStream {
    config: EventStreamConfig,
    consumer: EventConsumer,
    slots: Vec<ConnectionSlot>,
}

async fn prepare_stream(
    state: &AppState,
    name: &str,
    params: &StreamParams,
    headers: &HeaderMap,
    client: &Client,
) -> Result<PreparedStream, ApiError> {
    let event_type = state.event_types.find_by_name(name)?;
    client.check_scopes(&event_type.read_scopes)?;

    if !state.repository.topic_exists(&event_type.topic).await? {
        // The registry knows the event type but the log store lost the topic;
        // that is a broken deployment, not a client mistake.
        return Err(ApiError::Internal("topic is absent in the log store".into()));
    }

    let header = headers
        .get(CURSORS_HEADER)
        .and_then(|value| value.to_str().ok());
    let cursors = streaming_start(&state.repository, &event_type.topic, header)?;

    let config = EventStreamConfig {
        event_type: name.to_string(),
        client_id: client.client_id.clone(),
        cursors,
        batch_limit: params
            .batch_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(state.config.default_batch_limit),
        stream_limit: params.stream_limit.unwrap_or(0),
        batch_timeout: Duration::from_secs(
            params
                .batch_flush_timeout
                .filter(|timeout| *timeout > 0)
                .unwrap_or(state.config.default_batch_flush_timeout_s),
        ),
        stream_timeout: params
            .stream_timeout
            .filter(|timeout| *timeout > 0)
            .map(Duration::from_secs),
        keep_alive_limit: params.stream_keep_alive_limit.unwrap_or(-1),
    };

    // Bound the number of simultaneous streams one client may hold.
    let slots = if state.features.is_enabled(Feature::LimitConsumersNumber) {
        let partitions: Vec<String> = config
            .cursors
            .iter()
            .filter_map(|cursor| cursor.partition.clone())
            .collect();
        state
            .limiter
            .acquire_connection_slots(&client.client_id, name, &partitions)?
    } else {
        Vec::new()
    };

    match state.repository.create_event_consumer(&config.cursors) {
        Ok(consumer) => Ok(PreparedStream {
            config,
            consumer,
            slots,
        }),
        Err(err) => {
            // Nothing acquired may outlive a failed setup.
            state.limiter.release_connection_slots(&slots);
            Err(err.into())
        }
    }
}

/// Releases everything a stream holds, exactly once, even when the stream
/// task panics.
struct StreamCleanup {
    watcher: ConnectionWatcher,
    limiter: Arc<ConsumerLimiter>,
    slots: Vec<ConnectionSlot>,
    event_type: String,
}

impl Drop for StreamCleanup {
    fn drop(&mut self) {
        self.watcher.mark_closed();
        self.limiter.release_connection_slots(&self.slots);
        metrics::gauge!(CONSUMERS_GAUGE, "event_type" => self.event_type.clone()).decrement(1.0);
    }
}

fn stream_response(state: &AppState, prepared: PreparedStream) -> Response {
    let watcher = ConnectionWatcher::new();
    let connection_ready = watcher.connection_ready();
    let event_type = prepared.config.event_type.clone();
    metrics::gauge!(CONSUMERS_GAUGE, "event_type" => event_type.clone()).increment(1.0);

    let cleanup = StreamCleanup {
        watcher,
        limiter: Arc::clone(&state.limiter),
        slots: prepared.slots,
        event_type,
    };
    let stream = EventStream::new(
        prepared.consumer,
        prepared.config,
        Arc::clone(&state.blacklist),
    );
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH);
    tokio::spawn(async move {
        let _cleanup = cleanup;
        stream.stream_events(connection_ready, tx).await;
    });

    let body = Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::convert::Infallible>(chunk), rx))
    }));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-json-stream")
        .body(body)
        .expect("streaming response builds")
}

pub async fn stream_events(
    Path(name): Path<String>,
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let client = Client::from_headers(&headers);
    if state
        .blacklist
        .is_consumption_blocked(&name, &client.client_id)
    {
        return Problem::new(
            StatusCode::FORBIDDEN,
            "Application or event type is blocked",
        )
        .into_response();
    }

    match prepare_stream(&state, &name, &params, &headers, &client).await {
        Ok(prepared) => stream_response(&state, prepared),
        Err(err) => {
            match &err {
                ApiError::UnparseableCursor { raw } => {
                    tracing::debug!(cursors = %raw, "rejecting unparseable cursors header");
                }
                ApiError::NoConnectionSlots(_) => {
                    tracing::debug!(event_type = %name, client = %client.client_id,
                        "connection refused, no free connection slots");
                }
                other => {
                    tracing::warn!(event_type = %name, error = %other,
                        "failed to start event stream");
                }
            }
            err.into_response()
        }
    }
}
