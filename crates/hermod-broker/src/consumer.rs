// Streaming consumer handed to the event stream. Seeded with validated
// cursors by the repository; yields one event at a time together with the
// cursor a client would commit to resume after it.
use crate::cursor::{InternalCursor, TopicPosition};
use crate::error::{RepositoryError, Result};
use hermod_log::LogConsumer;
use std::collections::VecDeque;
use std::time::Duration;

/// One consumed event plus the position to resume from after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedEvent {
    pub payload: String,
    pub next_position: TopicPosition,
}

/// Pull-based consumer over a set of partitions.
pub struct EventConsumer {
    consumer: Box<dyn LogConsumer>,
    poll_timeout: Duration,
    buffered: VecDeque<ConsumedEvent>,
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("poll_timeout", &self.poll_timeout)
            .field("buffered", &self.buffered)
            .finish()
    }
}

impl EventConsumer {
    pub(crate) fn new(consumer: Box<dyn LogConsumer>, poll_timeout: Duration) -> Self {
        Self {
            consumer,
            poll_timeout,
            buffered: VecDeque::new(),
        }
    }

    /// Next event, or `None` after one poll timeout of silence. A consumer
    /// positioned at the tail simply waits; that is not an error.
    pub async fn read_event(&mut self) -> Result<Option<ConsumedEvent>> {
        if self.buffered.is_empty() {
            let records = self
                .consumer
                .poll(self.poll_timeout)
                .await
                .map_err(|err| RepositoryError::ServiceUnavailable(err.to_string()))?;
            self.buffered.extend(records.into_iter().map(|record| {
                let next =
                    InternalCursor::new(record.topic, record.partition, record.offset + 1);
                ConsumedEvent {
                    payload: record.payload,
                    next_position: next.to_position(),
                }
            }));
        }
        Ok(self.buffered.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermod_log::{LogClient, MemoryLog, TopicPartition};

    async fn consumer_at(log: &MemoryLog, topic: &str, partition: i32, offset: i64) -> EventConsumer {
        let mut inner = log.consumer();
        let tp = TopicPartition::new(topic, partition);
        inner.assign(vec![tp.clone()]).expect("assign");
        inner.seek(&tp, offset).expect("seek");
        EventConsumer::new(inner, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn read_event_reports_the_resume_position() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.append("t", 0, "first").expect("append");
        log.append("t", 0, "second").expect("append");

        let mut consumer = consumer_at(&log, "t", 0, 0).await;
        let event = consumer.read_event().await.expect("read").expect("event");
        assert_eq!(event.payload, "first");
        assert_eq!(event.next_position, TopicPosition::new("t", "0", "1"));

        let event = consumer.read_event().await.expect("read").expect("event");
        assert_eq!(event.payload, "second");
        assert_eq!(event.next_position, TopicPosition::new("t", "0", "2"));
    }

    #[tokio::test]
    async fn read_event_at_tail_returns_none_after_timeout() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.append("t", 0, "only").expect("append");

        let mut consumer = consumer_at(&log, "t", 0, 1).await;
        let event = consumer.read_event().await.expect("read");
        assert!(event.is_none());
    }
}
