// The streaming half of the consume path: pulls events from an
// `EventConsumer` and writes newline-delimited JSON batch frames into the
// response channel until a stop condition is met. Batching and keep-alive
// policy live here; admission and cleanup are the controller's business.
use crate::blacklist::Blacklist;
use bytes::Bytes;
use hermod_broker::{EventConsumer, TopicPosition};
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Bounds for one streaming response. Zero limits mean unbounded; a negative
/// keep-alive limit lets the stream idle forever.
#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub event_type: String,
    pub client_id: String,
    pub cursors: Vec<TopicPosition>,
    pub batch_limit: usize,
    pub stream_limit: usize,
    pub batch_timeout: Duration,
    pub stream_timeout: Option<Duration>,
    pub keep_alive_limit: i64,
}

#[derive(Serialize)]
struct FrameCursor<'a> {
    partition: &'a str,
    offset: &'a str,
}

#[derive(Serialize)]
struct Frame<'a> {
    cursor: FrameCursor<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<Box<RawValue>>,
}

fn frame_line(partition: &str, offset: &str, events: Vec<String>) -> Bytes {
    let events = events
        .into_iter()
        .map(|payload| {
            if serde_json::from_str::<&RawValue>(&payload).is_ok() {
                RawValue::from_string(payload).expect("validated json")
            } else {
                // Payloads are opaque; a non-JSON payload ships as a string.
                let quoted = serde_json::to_string(&payload).unwrap_or_else(|_| "null".into());
                RawValue::from_string(quoted).expect("quoted string is valid json")
            }
        })
        .collect();
    let frame = Frame {
        cursor: FrameCursor { partition, offset },
        events,
    };
    let mut line = serde_json::to_string(&frame).expect("frame serializes");
    line.push('\n');
    Bytes::from(line)
}

pub struct EventStream {
    consumer: EventConsumer,
    config: EventStreamConfig,
    blacklist: Arc<Blacklist>,
}

impl EventStream {
    pub fn new(
        consumer: EventConsumer,
        config: EventStreamConfig,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        Self {
            consumer,
            config,
            blacklist,
        }
    }

    /// Run until the client disconnects, a limit is met, or reading fails.
    /// `connection_ready` is the shared disconnect flag; a failed write into
    /// `out` lowers it so every observer agrees the stream is over.
    pub async fn stream_events(
        mut self,
        connection_ready: Arc<AtomicBool>,
        out: mpsc::Sender<Bytes>,
    ) {
        let started = Instant::now();
        // Latest known resume position per partition, advanced as events are
        // read and echoed on keep-alive frames.
        let mut latest: BTreeMap<String, String> = self
            .config
            .cursors
            .iter()
            .filter_map(|cursor| Some((cursor.partition.clone()?, cursor.offset.clone()?)))
            .collect();
        let mut sent_events = 0usize;
        let mut keep_alives = 0i64;

        loop {
            if !connection_ready.load(Ordering::Relaxed) {
                break;
            }
            if self
                .blacklist
                .is_consumption_blocked(&self.config.event_type, &self.config.client_id)
            {
                tracing::info!(
                    event_type = %self.config.event_type,
                    client = %self.config.client_id,
                    "closing stream for blacklisted consumer"
                );
                break;
            }
            if let Some(stream_timeout) = self.config.stream_timeout {
                if started.elapsed() >= stream_timeout {
                    break;
                }
            }

            let (batch, failed) = self.collect_batch(sent_events, &mut latest).await;
            let batched: usize = batch.values().map(Vec::len).sum();
            let frames: Vec<Bytes> = if batched == 0 {
                keep_alives += 1;
                latest
                    .iter()
                    .map(|(partition, offset)| frame_line(partition, offset, Vec::new()))
                    .collect()
            } else {
                keep_alives = 0;
                batch
                    .into_iter()
                    .map(|(partition, events)| {
                        let offset = latest.get(&partition).cloned().unwrap_or_default();
                        frame_line(&partition, &offset, events)
                    })
                    .collect()
            };
            for frame in frames {
                if out.send(frame).await.is_err() {
                    // The response body is gone: the client disconnected.
                    connection_ready.store(false, Ordering::Relaxed);
                    return;
                }
            }
            if failed {
                break;
            }

            sent_events += batched;
            if self.config.stream_limit > 0 && sent_events >= self.config.stream_limit {
                break;
            }
            if self.config.keep_alive_limit >= 0 && keep_alives >= self.config.keep_alive_limit {
                break;
            }
        }
    }

    /// Gather one batch, bounded by `batch_limit`, the flush deadline and the
    /// remaining stream budget. Returns the per-partition events and whether
    /// the consumer failed.
    async fn collect_batch(
        &mut self,
        sent_events: usize,
        latest: &mut BTreeMap<String, String>,
    ) -> (BTreeMap<String, Vec<String>>, bool) {
        let deadline = Instant::now() + self.config.batch_timeout;
        let mut batch: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut count = 0usize;
        loop {
            if count >= self.config.batch_limit {
                break;
            }
            if self.config.stream_limit > 0 && sent_events + count >= self.config.stream_limit {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.consumer.read_event()).await {
                Err(_elapsed) => break,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "reading from consumer failed, closing stream");
                    return (batch, true);
                }
                Ok(Ok(None)) => continue,
                Ok(Ok(Some(event))) => {
                    let (Some(partition), Some(offset)) =
                        (event.next_position.partition, event.next_position.offset)
                    else {
                        continue;
                    };
                    latest.insert(partition.clone(), offset);
                    batch.entry(partition).or_default().push(event.payload);
                    count += 1;
                }
            }
        }
        (batch, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_broker::{RepositorySettings, TopicRepository};
    use hermod_log::MemoryLog;

    fn repository(log: &MemoryLog) -> TopicRepository {
        let client = Arc::new(log.clone());
        let settings = RepositorySettings {
            poll_timeout: Duration::from_millis(10),
            ..RepositorySettings::default()
        };
        TopicRepository::new(client.clone(), client, settings)
    }

    fn config(cursors: Vec<TopicPosition>) -> EventStreamConfig {
        EventStreamConfig {
            event_type: "orders".into(),
            client_id: "app".into(),
            cursors,
            batch_limit: 10,
            stream_limit: 0,
            batch_timeout: Duration::from_millis(40),
            stream_timeout: None,
            keep_alive_limit: -1,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            lines.push(String::from_utf8(chunk.to_vec()).expect("utf8"));
        }
        lines
    }

    #[tokio::test]
    async fn streams_events_with_resume_cursors() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        for index in 0..3 {
            log.append("t", 0, format!("{{\"n\":{index}}}")).expect("append");
        }
        let repo = repository(&log);
        let cursors = vec![TopicPosition::new("t", "0", "0")];
        let consumer = repo.create_event_consumer(&cursors).expect("consumer");

        let mut config = config(cursors);
        config.stream_limit = 3;
        let stream = EventStream::new(consumer, config, Arc::new(Blacklist::new()));
        let (tx, rx) = mpsc::channel(16);
        let ready = Arc::new(AtomicBool::new(true));
        stream.stream_events(ready, tx).await;

        let lines = drain(rx).await;
        let joined = lines.concat();
        assert!(joined.contains("\"events\":[{\"n\":0},{\"n\":1},{\"n\":2}]"));
        assert!(joined.contains("\"cursor\":{\"partition\":\"0\",\"offset\":\"3\"}"));
    }

    #[tokio::test]
    async fn keep_alive_limit_ends_an_idle_stream() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 2);
        let repo = repository(&log);
        let cursors = vec![
            TopicPosition::new("t", "0", "0"),
            TopicPosition::new("t", "1", "0"),
        ];
        let consumer = repo.create_event_consumer(&cursors).expect("consumer");

        let mut config = config(cursors);
        config.batch_timeout = Duration::from_millis(15);
        config.keep_alive_limit = 2;
        let stream = EventStream::new(consumer, config, Arc::new(Blacklist::new()));
        let (tx, rx) = mpsc::channel(16);
        stream
            .stream_events(Arc::new(AtomicBool::new(true)), tx)
            .await;

        let lines = drain(rx).await;
        // Two keep-alive rounds over two partitions, no events key.
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert!(!line.contains("events"));
            assert!(line.contains("\"offset\":\"0\""));
        }
    }

    #[tokio::test]
    async fn lowered_connection_flag_stops_the_stream() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        let repo = repository(&log);
        let cursors = vec![TopicPosition::new("t", "0", "0")];
        let consumer = repo.create_event_consumer(&cursors).expect("consumer");

        let stream = EventStream::new(consumer, config(cursors), Arc::new(Blacklist::new()));
        let (tx, _rx) = mpsc::channel(16);
        let ready = Arc::new(AtomicBool::new(false));
        // Returns immediately instead of idling.
        tokio::time::timeout(
            Duration::from_millis(100),
            stream.stream_events(ready, tx),
        )
        .await
        .expect("stream stopped");
    }

    #[tokio::test]
    async fn dropped_receiver_lowers_the_connection_flag() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.append("t", 0, "{}").expect("append");
        let repo = repository(&log);
        let cursors = vec![TopicPosition::new("t", "0", "0")];
        let consumer = repo.create_event_consumer(&cursors).expect("consumer");

        let stream = EventStream::new(consumer, config(cursors), Arc::new(Blacklist::new()));
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let ready = Arc::new(AtomicBool::new(true));
        stream.stream_events(Arc::clone(&ready), tx).await;
        assert!(!ready.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn blacklisted_consumer_is_cut_off() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        let repo = repository(&log);
        let cursors = vec![TopicPosition::new("t", "0", "0")];
        let consumer = repo.create_event_consumer(&cursors).expect("consumer");

        let blacklist = Arc::new(Blacklist::new());
        blacklist.block_consumer_app("app");
        let stream = EventStream::new(consumer, config(cursors), blacklist);
        let (tx, _rx) = mpsc::channel(16);
        tokio::time::timeout(
            Duration::from_millis(100),
            stream.stream_events(Arc::new(AtomicBool::new(true)), tx),
        )
        .await
        .expect("stream stopped");
    }

    #[test]
    fn non_json_payloads_are_quoted() {
        let line = frame_line("0", "1", vec!["not json".into()]);
        let text = String::from_utf8(line.to_vec()).expect("utf8");
        assert!(text.contains("\"events\":[\"not json\"]"));
    }
}
