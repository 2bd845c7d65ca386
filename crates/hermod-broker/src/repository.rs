// Topic repository: topic lifecycle, position queries, cursor validation and
// the synchronous batch publish path. This is the only owner of the
// circuit-breaker registry; producers are borrowed from the client pool for
// the duration of one publish.
use crate::batch::{BatchItem, PublishingStatus, PublishingStep, fail_unpublished};
use crate::breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker};
use crate::consumer::EventConsumer;
use crate::cursor::{InternalCursor, TopicPosition};
use crate::error::{CursorErrorKind, InvalidCursorError, RepositoryError, Result};
use futures::future;
use hermod_log::{
    Coordination, LogClient, LogError, LogProducer, PooledProducer, ProducerRecord, SendFuture,
    TopicPartition, TopicSettings,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Initial subscription position when materializing offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialPosition {
    Begin,
    End,
}

/// Topic defaults and publish/consume deadlines.
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    /// Replication factor applied to created topics.
    pub replication_factor: u32,
    /// Segment rotation period applied to created topics.
    pub rotation_ms: i64,
    /// Budget for handing a batch to the producer.
    pub send_timeout: Duration,
    /// Budget the log store itself has per request; added to the send budget
    /// to form the aggregate publish deadline.
    pub request_timeout: Duration,
    /// Poll budget for streaming consumers.
    pub poll_timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            replication_factor: 1,
            rotation_ms: 50_000_000,
            send_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(100),
            breaker: BreakerConfig::default(),
        }
    }
}

pub struct TopicRepository {
    client: Arc<dyn LogClient>,
    coordination: Arc<dyn Coordination>,
    settings: RepositorySettings,
    breakers: BreakerRegistry,
}

impl TopicRepository {
    pub fn new(
        client: Arc<dyn LogClient>,
        coordination: Arc<dyn Coordination>,
        settings: RepositorySettings,
    ) -> Self {
        let breakers = BreakerRegistry::new(settings.breaker.clone());
        Self {
            client,
            coordination,
            settings,
            breakers,
        }
    }

    // ---- topic lifecycle -------------------------------------------------

    /// Create a topic named by a fresh UUID and return that name.
    pub async fn create_topic(&self, partitions: u32, retention_ms: i64) -> Result<String> {
        let topic = Uuid::new_v4().to_string();
        let session = self
            .coordination
            .session()
            .await
            .map_err(|err| RepositoryError::TopicCreation(err.to_string()))?;
        let settings = TopicSettings {
            retention_ms,
            segment_ms: self.settings.rotation_ms,
        };
        session
            .create_topic(
                &topic,
                partitions,
                self.settings.replication_factor,
                &settings,
            )
            .await
            .map_err(|err| match err {
                LogError::TopicExists(_) => RepositoryError::TopicCreation(format!(
                    "topic {topic} already exists (or wasn't completely removed yet)"
                )),
                other => {
                    RepositoryError::TopicCreation(format!("unable to create topic {topic}: {other}"))
                }
            })?;
        tracing::info!(topic = %topic, partitions, retention_ms, "created topic");
        Ok(topic)
    }

    /// Trigger topic deletion; the removal itself is asynchronous.
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        let session = self
            .coordination
            .session()
            .await
            .map_err(|err| RepositoryError::TopicDeletion(err.to_string()))?;
        session.delete_topic(topic).await.map_err(|err| {
            RepositoryError::TopicDeletion(format!("unable to delete topic {topic}: {err}"))
        })
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let session = self
            .coordination
            .session()
            .await
            .map_err(|err| RepositoryError::ServiceUnavailable(err.to_string()))?;
        session
            .list_topics()
            .await
            .map_err(|_| RepositoryError::ServiceUnavailable("failed to list topics".into()))
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        Ok(self.list_topics().await?.iter().any(|name| name == topic))
    }

    pub fn list_partition_names(&self, topic: &str) -> Result<Vec<String>> {
        let producer = self.client.take_producer();
        let result = producer.partitions_for(topic);
        self.client.release_producer(producer);
        let infos =
            result.map_err(|err| RepositoryError::ServiceUnavailable(err.to_string()))?;
        Ok(infos
            .into_iter()
            .map(|info| info.partition.to_string())
            .collect())
    }

    // ---- position queries ------------------------------------------------

    /// Next-to-be-written position of every partition of the given topics.
    pub fn load_newest_position<'a, I>(&self, topics: I) -> Result<Vec<TopicPosition>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Ok(self
            .load_positions(topics, InitialPosition::End)?
            .iter()
            .map(InternalCursor::to_position)
            .collect())
    }

    /// Oldest available position of every partition. With
    /// `position_on_existing`, offsets are shifted by one so they denote the
    /// first existing record in read-after commit semantics.
    pub fn load_oldest_position<'a, I>(
        &self,
        topics: I,
        position_on_existing: bool,
    ) -> Result<Vec<TopicPosition>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Ok(self
            .load_positions(topics, InitialPosition::Begin)?
            .iter()
            .map(|cursor| {
                if position_on_existing {
                    cursor.add_offset(1).to_position()
                } else {
                    cursor.to_position()
                }
            })
            .collect())
    }

    /// Per-partition offsets suitable for initializing a subscription.
    pub fn materialize_positions(
        &self,
        topic: &str,
        position: InitialPosition,
    ) -> Result<HashMap<String, i64>> {
        Ok(self
            .load_positions([topic], position)?
            .into_iter()
            .map(|cursor| (cursor.partition().to_string(), cursor.offset()))
            .collect())
    }

    fn load_positions<'a, I>(&self, topics: I, position: InitialPosition) -> Result<Vec<InternalCursor>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unavailable =
            |err: LogError| RepositoryError::ServiceUnavailable(format!(
                "error occurred when fetching partitions offsets: {err}"
            ));
        let mut consumer = self.client.consumer();
        let mut assignment = Vec::new();
        for topic in topics {
            for info in consumer.partitions_for(topic).map_err(unavailable)? {
                assignment.push(TopicPartition::new(info.topic, info.partition));
            }
        }
        consumer.assign(assignment.clone()).map_err(unavailable)?;
        match position {
            InitialPosition::Begin => consumer.seek_to_beginning().map_err(unavailable)?,
            InitialPosition::End => consumer.seek_to_end().map_err(unavailable)?,
        }
        assignment
            .into_iter()
            .map(|tp| {
                let offset = consumer.position(&tp).map_err(unavailable)?;
                Ok(InternalCursor::new(tp.topic, tp.partition, offset))
            })
            .collect()
    }

    // ---- cursor validation -----------------------------------------------

    /// Check client cursors against the currently retained window and return
    /// their normalized form. A cursor equal to the newest position denotes
    /// the tail and is accepted; the consumer will wait for the next record.
    pub fn validate_cursors(&self, cursors: &[TopicPosition]) -> Result<Vec<InternalCursor>> {
        let mut topics: Vec<&str> = cursors.iter().map(|cursor| cursor.topic.as_str()).collect();
        topics.sort_unstable();
        topics.dedup();

        let by_partition = |positions: Vec<InternalCursor>| {
            positions
                .into_iter()
                .map(|cursor| ((cursor.topic().to_string(), cursor.partition()), cursor))
                .collect::<HashMap<_, _>>()
        };
        let oldest = by_partition(self.load_positions(topics.iter().copied(), InitialPosition::Begin)?);
        let newest = by_partition(self.load_positions(topics.iter().copied(), InitialPosition::End)?);

        let mut result = Vec::with_capacity(cursors.len());
        for position in cursors {
            let proposed = InternalCursor::from_position(position)?;
            let key = (proposed.topic().to_string(), proposed.partition());
            let Some(newest) = newest.get(&key) else {
                return Err(InvalidCursorError::new(
                    CursorErrorKind::PartitionNotFound,
                    position.clone(),
                )
                .into());
            };
            let Some(oldest) = oldest.get(&key) else {
                return Err(InvalidCursorError::new(
                    CursorErrorKind::PartitionNotFound,
                    position.clone(),
                )
                .into());
            };
            if proposed < *oldest || proposed > *newest {
                return Err(InvalidCursorError::new(
                    CursorErrorKind::Unavailable,
                    position.clone(),
                )
                .into());
            }
            result.push(proposed);
        }
        Ok(result)
    }

    /// Commit cursors may point at records that already aged out, so only the
    /// partition's existence and the cursor format are checked.
    pub fn validate_commit_cursor(&self, position: &TopicPosition) -> Result<()> {
        let partitions = self.list_partition_names(&position.topic)?;
        let partition = position.partition.as_deref().ok_or_else(|| {
            InvalidCursorError::new(CursorErrorKind::NullPartition, position.clone())
        })?;
        if position.offset.is_none() {
            return Err(
                InvalidCursorError::new(CursorErrorKind::NullOffset, position.clone()).into(),
            );
        }
        if !partitions.iter().any(|name| name == partition) {
            return Err(InvalidCursorError::new(
                CursorErrorKind::PartitionNotFound,
                position.clone(),
            )
            .into());
        }
        InternalCursor::from_position(position)?;
        Ok(())
    }

    /// Order two positions of the same partition by offset.
    pub fn compare_offsets(
        &self,
        first: &TopicPosition,
        second: &TopicPosition,
    ) -> Result<std::cmp::Ordering> {
        let first = InternalCursor::from_position(first)?;
        let second = InternalCursor::from_position(second)?;
        Ok(first.cmp(&second))
    }

    // ---- publishing ------------------------------------------------------

    /// Publish a batch synchronously. On error the per-item results carry the
    /// detail; every item ends as Submitted or Failed with a non-empty detail.
    pub async fn sync_post_batch(&self, topic_id: &str, batch: &[BatchItem]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let producer = self.client.take_producer();
        let outcome = self.send_batch(&producer, topic_id, batch).await;
        self.client.release_producer(producer);
        outcome?;

        if batch
            .iter()
            .any(|item| item.status() == PublishingStatus::Failed)
        {
            fail_unpublished(batch, "internal error");
            metrics::counter!("hermod_publish_batches_failed_total").increment(1);
            return Err(RepositoryError::EventPublishing);
        }
        metrics::counter!("hermod_publish_batches_total").increment(1);
        Ok(())
    }

    async fn send_batch(
        &self,
        producer: &PooledProducer,
        topic_id: &str,
        batch: &[BatchItem],
    ) -> Result<()> {
        let leaders: HashMap<String, String> = match producer.partitions_for(topic_id) {
            Ok(infos) => infos
                .into_iter()
                .map(|info| (info.partition.to_string(), info.leader))
                .collect(),
            Err(err) => {
                tracing::warn!(topic = topic_id, error = %err, "failed to resolve partition leaders");
                fail_unpublished(batch, "internal error");
                return Err(RepositoryError::EventPublishing);
            }
        };

        let mut dispatched: Vec<(&BatchItem, SendFuture, Arc<CircuitBreaker>)> = Vec::new();
        let mut short_circuited = 0usize;
        for item in batch {
            assert!(
                !item.partition().is_empty(),
                "batch item partition must be assigned before publishing"
            );
            item.set_step(PublishingStep::Publishing);
            let (partition, leader) = match (
                item.partition().parse::<i32>().ok(),
                leaders.get(item.partition()),
            ) {
                (Some(partition), Some(leader)) => (partition, leader.clone()),
                _ => {
                    item.update_status_and_detail(PublishingStatus::Failed, "internal error");
                    continue;
                }
            };
            item.set_broker_id(&leader);
            let breaker = self.breakers.breaker_for(&leader);
            if !breaker.allow_request() {
                short_circuited += 1;
                item.update_status_and_detail(PublishingStatus::Failed, "short circuited");
                continue;
            }
            breaker.mark_start();
            let send = producer.send(ProducerRecord {
                topic: topic_id.to_string(),
                partition,
                key: Some(item.partition().to_string()),
                payload: item.event().to_string(),
            });
            dispatched.push((item, send, breaker));
        }
        if short_circuited > 0 {
            tracing::warn!(
                topic = topic_id,
                count = short_circuited,
                "short circuiting publish requests due to broker timeouts"
            );
            metrics::counter!("hermod_publish_short_circuited_total")
                .increment(short_circuited as u64);
        }

        let waits = dispatched.into_iter().map(|(item, send, breaker)| {
            async move {
                match send.await {
                    Ok(Ok(_metadata)) => {
                        item.update_status_and_detail(PublishingStatus::Submitted, "");
                        item.set_step(PublishingStep::Published);
                        breaker.mark_success();
                        None
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "failed to publish record");
                        item.update_status_and_detail(PublishingStatus::Failed, "internal error");
                        if err.is_connection_error() {
                            breaker.mark_failure();
                        } else {
                            breaker.mark_success();
                        }
                        Some(err)
                    }
                    // The completion channel was dropped before an outcome
                    // arrived; leave the item for the interrupt sweep.
                    Err(_closed) => {
                        breaker.mark_success();
                        Some(LogError::Cancelled)
                    }
                }
            }
        });

        let deadline = self.settings.send_timeout + self.settings.request_timeout;
        let outcomes = match tokio::time::timeout(deadline, future::join_all(waits)).await {
            Ok(outcomes) => outcomes,
            Err(_elapsed) => {
                fail_unpublished(batch, "timed out");
                return Err(RepositoryError::EventPublishing);
            }
        };

        if let Some(err) = outcomes
            .iter()
            .flatten()
            .find(|err| err.is_reset_error())
        {
            tracing::info!(
                topic = topic_id,
                error = %err,
                "terminating producer after unrecoverable send error"
            );
            producer.terminate();
        }
        if outcomes
            .iter()
            .flatten()
            .any(|err| matches!(err, LogError::Cancelled))
        {
            fail_unpublished(batch, "interrupted");
            return Err(RepositoryError::EventPublishing);
        }
        Ok(())
    }

    // ---- consumer factory ------------------------------------------------

    /// Validate the cursors and open a consumer seeded with them.
    pub fn create_event_consumer(&self, cursors: &[TopicPosition]) -> Result<EventConsumer> {
        let validated = self.validate_cursors(cursors)?;
        let unavailable =
            |err: LogError| RepositoryError::ServiceUnavailable(err.to_string());
        let mut consumer = self.client.consumer();
        let assignment: Vec<TopicPartition> = validated
            .iter()
            .map(|cursor| TopicPartition::new(cursor.topic(), cursor.partition()))
            .collect();
        consumer.assign(assignment).map_err(unavailable)?;
        for cursor in &validated {
            let tp = TopicPartition::new(cursor.topic(), cursor.partition());
            consumer.seek(&tp, cursor.offset()).map_err(unavailable)?;
        }
        Ok(EventConsumer::new(consumer, self.settings.poll_timeout))
    }
}
