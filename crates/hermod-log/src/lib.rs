// Client seam for the underlying topic-partitioned log store.
// The repository layer is written against these traits; `memory` provides the
// in-process implementation used by the gateway wiring and the test suites.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub mod error;
pub mod memory;
pub mod pool;

pub use error::{LogError, Result};
pub use memory::MemoryLog;
pub use pool::{PooledProducer, ProducerPool};

/// One append-only partition of a topic.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// Partition metadata reported by the cluster, including the current leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub topic: String,
    pub partition: i32,
    /// Id of the broker currently responsible for this partition's writes.
    pub leader: String,
}

/// A record handed to a producer. Partition assignment happens upstream.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: i32,
    pub key: Option<String>,
    pub payload: String,
}

/// Metadata for a successfully appended record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record returned by a consumer poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: String,
}

/// Completion signal for one asynchronous send. Resolves once the broker
/// acknowledges or rejects the record; a closed channel means the send was
/// abandoned before completion.
pub type SendFuture = oneshot::Receiver<Result<RecordMetadata>>;

/// Producer handle into the log store.
pub trait LogProducer: Send + Sync {
    /// Current partition metadata for a topic.
    fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>>;

    /// Submit one record. Submission order per partition is the append order.
    fn send(&self, record: ProducerRecord) -> SendFuture;
}

/// Consumer handle into the log store. Instances are single-owner; the
/// repository opens short-lived ones for position queries and long-lived ones
/// for streaming.
#[async_trait]
pub trait LogConsumer: Send {
    fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>>;

    /// Replace the assignment with the given partition set.
    fn assign(&mut self, partitions: Vec<TopicPartition>) -> Result<()>;

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()>;

    fn seek_to_beginning(&mut self) -> Result<()>;

    fn seek_to_end(&mut self) -> Result<()>;

    /// Offset of the next record that would be returned for this partition.
    fn position(&self, partition: &TopicPartition) -> Result<i64>;

    /// Fetch the next records, waiting up to `timeout` when positioned at the
    /// tail. An empty result after the timeout is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>>;
}

/// Topic-level settings applied at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSettings {
    /// How long records are retained before aging out.
    pub retention_ms: i64,
    /// Segment rotation period; bounds how promptly retention is enforced.
    pub segment_ms: i64,
}

/// Administrative operations executed within one coordination session.
#[async_trait]
pub trait CoordinationSession: Send {
    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication: u32,
        settings: &TopicSettings,
    ) -> Result<()>;

    /// Triggers deletion; the actual removal is asynchronous.
    async fn delete_topic(&self, topic: &str) -> Result<()>;

    async fn list_topics(&self) -> Result<Vec<String>>;
}

/// Handle to the coordination service. Admin work happens inside a scoped
/// session acquired once per action and dropped on every exit path.
#[async_trait]
pub trait Coordination: Send + Sync {
    async fn session(&self) -> Result<Box<dyn CoordinationSession>>;
}

/// Factory surface the repository uses to obtain producers and consumers.
pub trait LogClient: Send + Sync {
    /// Borrow a pooled producer; the caller has exclusive use until release.
    fn take_producer(&self) -> Arc<PooledProducer>;

    /// Return a producer to the pool. Terminated producers are dropped.
    fn release_producer(&self, producer: Arc<PooledProducer>);

    /// Open a fresh consumer handle.
    fn consumer(&self) -> Box<dyn LogConsumer>;
}
