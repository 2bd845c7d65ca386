// In-process log store. One `MemoryLog` models a whole cluster: topics with
// numbered partitions, a per-partition leader broker, and append-only records
// with a movable start offset standing in for retention. Fault hooks let the
// test suites force the error paths a real cluster produces.
use crate::error::{LogError, Result};
use crate::pool::{PooledProducer, ProducerPool};
use crate::{
    Coordination, CoordinationSession, LogClient, LogConsumer, LogProducer, LogRecord,
    PartitionInfo, ProducerRecord, RecordMetadata, SendFuture, TopicPartition, TopicSettings,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const DEFAULT_MAX_IDLE_PRODUCERS: usize = 4;
const MAX_POLL_RECORDS: usize = 500;

#[derive(Debug)]
struct PartitionLog {
    // Offset of the first retained record; records below it have aged out.
    start_offset: i64,
    records: VecDeque<String>,
}

impl PartitionLog {
    fn next_offset(&self) -> i64 {
        self.start_offset + self.records.len() as i64
    }
}

struct PartitionState {
    leader: Mutex<String>,
    log: Mutex<PartitionLog>,
}

struct TopicState {
    partitions: Vec<PartitionState>,
}

#[derive(Default)]
struct Faults {
    fail_next_send: Mutex<VecDeque<LogError>>,
    send_delay: Mutex<Option<Duration>>,
    drop_next_ack: AtomicBool,
    coordination_down: AtomicBool,
}

struct ClusterState {
    topics: RwLock<HashMap<String, Arc<TopicState>>>,
    pending_deletion: Mutex<HashSet<String>>,
    broker_count: u32,
    faults: Faults,
    // Cluster-wide append signal; pollers waiting at a tail re-check on it.
    appended: Notify,
}

impl ClusterState {
    fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>> {
        let topics = self.topics.read();
        let state = topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownTopicOrPartition(topic.to_string()))?;
        Ok(state
            .partitions
            .iter()
            .enumerate()
            .map(|(index, partition)| PartitionInfo {
                topic: topic.to_string(),
                partition: index as i32,
                leader: partition.leader.lock().clone(),
            })
            .collect())
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<Arc<TopicState>> {
        let topics = self.topics.read();
        let state = topics
            .get(topic)
            .ok_or_else(|| LogError::UnknownTopicOrPartition(topic.to_string()))?;
        if partition < 0 || partition as usize >= state.partitions.len() {
            return Err(LogError::UnknownTopicOrPartition(format!(
                "{topic}-{partition}"
            )));
        }
        Ok(Arc::clone(state))
    }

    fn append(&self, topic: &str, partition: i32, payload: String) -> Result<RecordMetadata> {
        let state = self.partition(topic, partition)?;
        let offset = {
            let mut log = state.partitions[partition as usize].log.lock();
            let offset = log.next_offset();
            log.records.push_back(payload);
            offset
        };
        self.appended.notify_waiters();
        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}

/// In-memory log store implementing the full client seam. Cloneable handles
/// share one cluster.
#[derive(Clone)]
pub struct MemoryLog {
    cluster: Arc<ClusterState>,
    pool: Arc<ProducerPool>,
}

impl MemoryLog {
    pub fn new(broker_count: u32) -> Self {
        let cluster = Arc::new(ClusterState {
            topics: RwLock::new(HashMap::new()),
            pending_deletion: Mutex::new(HashSet::new()),
            broker_count: broker_count.max(1),
            faults: Faults::default(),
            appended: Notify::new(),
        });
        let pool_cluster = Arc::clone(&cluster);
        let pool = Arc::new(ProducerPool::new(DEFAULT_MAX_IDLE_PRODUCERS, move || {
            Arc::new(MemoryProducer {
                cluster: Arc::clone(&pool_cluster),
            }) as Arc<dyn LogProducer>
        }));
        Self { cluster, pool }
    }

    /// Create a topic directly, bypassing the coordination session. Partition
    /// leaders are assigned round-robin over the configured brokers.
    pub fn add_topic(&self, topic: impl Into<String>, partitions: u32) {
        let topic = topic.into();
        let broker_count = self.cluster.broker_count;
        let partitions = (0..partitions.max(1))
            .map(|index| PartitionState {
                leader: Mutex::new((index % broker_count).to_string()),
                log: Mutex::new(PartitionLog {
                    start_offset: 0,
                    records: VecDeque::new(),
                }),
            })
            .collect();
        self.cluster
            .topics
            .write()
            .insert(topic, Arc::new(TopicState { partitions }));
    }

    /// Append one record directly; returns its offset.
    pub fn append(&self, topic: &str, partition: i32, payload: impl Into<String>) -> Result<i64> {
        self.cluster
            .append(topic, partition, payload.into())
            .map(|metadata| metadata.offset)
    }

    /// Age out all records below `new_start`, as retention would.
    pub fn trim_to(&self, topic: &str, partition: i32, new_start: i64) -> Result<()> {
        let state = self.cluster.partition(topic, partition)?;
        let mut log = state.partitions[partition as usize].log.lock();
        while log.start_offset < new_start {
            if log.records.pop_front().is_none() {
                // Trimming past the tail moves the whole window forward.
                log.start_offset = new_start;
                return Ok(());
            }
            log.start_offset += 1;
        }
        Ok(())
    }

    pub fn set_leader(&self, topic: &str, partition: i32, leader: impl Into<String>) -> Result<()> {
        let state = self.cluster.partition(topic, partition)?;
        *state.partitions[partition as usize].leader.lock() = leader.into();
        Ok(())
    }

    pub fn leader(&self, topic: &str, partition: i32) -> Result<String> {
        let state = self.cluster.partition(topic, partition)?;
        let leader = state.partitions[partition as usize].leader.lock().clone();
        Ok(leader)
    }

    /// Forget a pending deletion so the topic name can be reused.
    pub fn purge_deleted(&self, topic: &str) {
        self.cluster.pending_deletion.lock().remove(topic);
    }

    /// Queue an error for the next producer send.
    pub fn fail_next_send(&self, error: LogError) {
        self.cluster.faults.fail_next_send.lock().push_back(error);
    }

    /// Delay completion of subsequent sends; `None` restores prompt acks.
    pub fn delay_sends(&self, delay: Option<Duration>) {
        *self.cluster.faults.send_delay.lock() = delay;
    }

    /// Drop the completion channel of the next send without appending,
    /// modeling a producer torn down mid-flight.
    pub fn drop_next_send_ack(&self) {
        self.cluster.faults.drop_next_ack.store(true, Ordering::SeqCst);
    }

    /// Number of producers sitting idle in the pool. Terminated producers
    /// never come back, which makes replacement observable in tests.
    pub fn idle_producers(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn set_coordination_down(&self, down: bool) {
        self.cluster
            .faults
            .coordination_down
            .store(down, Ordering::SeqCst);
    }
}

impl LogClient for MemoryLog {
    fn take_producer(&self) -> Arc<PooledProducer> {
        self.pool.take()
    }

    fn release_producer(&self, producer: Arc<PooledProducer>) {
        self.pool.release(producer);
    }

    fn consumer(&self) -> Box<dyn LogConsumer> {
        Box::new(MemoryConsumer {
            cluster: Arc::clone(&self.cluster),
            assignment: Vec::new(),
            positions: HashMap::new(),
        })
    }
}

struct MemoryProducer {
    cluster: Arc<ClusterState>,
}

impl LogProducer for MemoryProducer {
    fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>> {
        self.cluster.partitions_for(topic)
    }

    fn send(&self, record: ProducerRecord) -> SendFuture {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let faults = &self.cluster.faults;
        if faults.drop_next_ack.swap(false, Ordering::SeqCst) {
            drop(tx);
            return rx;
        }
        if let Some(error) = faults.fail_next_send.lock().pop_front() {
            let _ = tx.send(Err(error));
            return rx;
        }
        let delay = *faults.send_delay.lock();
        match delay {
            None => {
                let outcome = self
                    .cluster
                    .append(&record.topic, record.partition, record.payload);
                let _ = tx.send(outcome);
            }
            Some(delay) => {
                let cluster = Arc::clone(&self.cluster);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let outcome = cluster.append(&record.topic, record.partition, record.payload);
                    let _ = tx.send(outcome);
                });
            }
        }
        rx
    }
}

struct MemoryConsumer {
    cluster: Arc<ClusterState>,
    assignment: Vec<TopicPartition>,
    positions: HashMap<TopicPartition, i64>,
}

impl MemoryConsumer {
    fn log_bounds(&self, partition: &TopicPartition) -> Result<(i64, i64)> {
        let state = self.cluster.partition(&partition.topic, partition.partition)?;
        let log = state.partitions[partition.partition as usize].log.lock();
        Ok((log.start_offset, log.next_offset()))
    }

    fn fetch(&mut self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        for assigned in &self.assignment {
            let state = self
                .cluster
                .partition(&assigned.topic, assigned.partition)?;
            let log = state.partitions[assigned.partition as usize].log.lock();
            let position = self
                .positions
                .entry(assigned.clone())
                .or_insert(log.start_offset);
            // Positions below the retained window clamp to the window start;
            // the repository validates cursors before seeding consumers.
            if *position < log.start_offset {
                *position = log.start_offset;
            }
            while *position < log.next_offset() && records.len() < MAX_POLL_RECORDS {
                let index = (*position - log.start_offset) as usize;
                records.push(LogRecord {
                    topic: assigned.topic.clone(),
                    partition: assigned.partition,
                    offset: *position,
                    payload: log.records[index].clone(),
                });
                *position += 1;
            }
            if records.len() >= MAX_POLL_RECORDS {
                break;
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    fn partitions_for(&self, topic: &str) -> Result<Vec<PartitionInfo>> {
        self.cluster.partitions_for(topic)
    }

    fn assign(&mut self, partitions: Vec<TopicPartition>) -> Result<()> {
        for partition in &partitions {
            self.cluster.partition(&partition.topic, partition.partition)?;
        }
        self.positions.clear();
        for partition in &partitions {
            let (start, _next) = self.log_bounds(partition)?;
            self.positions.insert(partition.clone(), start);
        }
        self.assignment = partitions;
        Ok(())
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()> {
        if !self.assignment.contains(partition) {
            return Err(LogError::UnknownTopicOrPartition(format!(
                "{}-{} is not assigned",
                partition.topic, partition.partition
            )));
        }
        self.positions.insert(partition.clone(), offset);
        Ok(())
    }

    fn seek_to_beginning(&mut self) -> Result<()> {
        for partition in self.assignment.clone() {
            let (start, _next) = self.log_bounds(&partition)?;
            self.positions.insert(partition, start);
        }
        Ok(())
    }

    fn seek_to_end(&mut self) -> Result<()> {
        for partition in self.assignment.clone() {
            let (_start, next) = self.log_bounds(&partition)?;
            self.positions.insert(partition, next);
        }
        Ok(())
    }

    fn position(&self, partition: &TopicPartition) -> Result<i64> {
        self.positions
            .get(partition)
            .copied()
            .ok_or_else(|| {
                LogError::UnknownTopicOrPartition(format!(
                    "{}-{} is not assigned",
                    partition.topic, partition.partition
                ))
            })
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>> {
        let deadline = Instant::now() + timeout;
        let cluster = Arc::clone(&self.cluster);
        loop {
            // Arm the signal before fetching so an append between the fetch
            // and the wait is not missed.
            let notified = cluster.appended.notified();
            let records = self.fetch()?;
            if !records.is_empty() {
                return Ok(records);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

struct MemorySession {
    cluster: Arc<ClusterState>,
}

impl MemorySession {
    fn check_reachable(&self) -> Result<()> {
        if self.cluster.faults.coordination_down.load(Ordering::SeqCst) {
            return Err(LogError::Coordination(
                "coordination service unreachable".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        _replication: u32,
        _settings: &TopicSettings,
    ) -> Result<()> {
        self.check_reachable()?;
        if self.cluster.pending_deletion.lock().contains(topic) {
            return Err(LogError::TopicExists(topic.to_string()));
        }
        let broker_count = self.cluster.broker_count;
        let mut topics = self.cluster.topics.write();
        if topics.contains_key(topic) {
            return Err(LogError::TopicExists(topic.to_string()));
        }
        let partitions = (0..partitions.max(1))
            .map(|index| PartitionState {
                leader: Mutex::new((index % broker_count).to_string()),
                log: Mutex::new(PartitionLog {
                    start_offset: 0,
                    records: VecDeque::new(),
                }),
            })
            .collect();
        topics.insert(topic.to_string(), Arc::new(TopicState { partitions }));
        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        self.check_reachable()?;
        let removed = self.cluster.topics.write().remove(topic);
        if removed.is_none() {
            return Err(LogError::UnknownTopicOrPartition(topic.to_string()));
        }
        // Deletion is asynchronous in a real cluster; model the window where
        // the name is still reserved.
        self.cluster
            .pending_deletion
            .lock()
            .insert(topic.to_string());
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.check_reachable()?;
        let mut topics: Vec<String> = self.cluster.topics.read().keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }
}

#[async_trait]
impl Coordination for MemoryLog {
    async fn session(&self) -> Result<Box<dyn CoordinationSession>> {
        if self.cluster.faults.coordination_down.load(Ordering::SeqCst) {
            return Err(LogError::Coordination(
                "coordination service unreachable".into(),
            ));
        }
        Ok(Box::new(MemorySession {
            cluster: Arc::clone(&self.cluster),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned_consumer(log: &MemoryLog, topic: &str, partition: i32) -> Box<dyn LogConsumer> {
        let mut consumer = log.consumer();
        consumer
            .assign(vec![TopicPartition::new(topic, partition)])
            .expect("assign");
        consumer
    }

    #[tokio::test]
    async fn append_and_poll_round_trip() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.append("t", 0, "a").expect("append");
        log.append("t", 0, "b").expect("append");

        let mut consumer = assigned_consumer(&log, "t", 0);
        consumer.seek_to_beginning().expect("seek");
        let records = consumer.poll(Duration::from_millis(10)).await.expect("poll");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[0].payload, "a");
        assert_eq!(records[1].offset, 1);
    }

    #[tokio::test]
    async fn poll_at_tail_waits_for_next_record() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.append("t", 0, "a").expect("append");

        let mut consumer = assigned_consumer(&log, "t", 0);
        consumer.seek_to_end().expect("seek");
        let writer = log.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("t", 0, "late").expect("append");
        });
        let records = consumer.poll(Duration::from_secs(1)).await.expect("poll");
        handle.await.expect("writer");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, "late");
        assert_eq!(records[0].offset, 1);
    }

    #[tokio::test]
    async fn trim_moves_the_beginning() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        for index in 0..10 {
            log.append("t", 0, format!("e{index}")).expect("append");
        }
        log.trim_to("t", 0, 5).expect("trim");

        let mut consumer = assigned_consumer(&log, "t", 0);
        consumer.seek_to_beginning().expect("seek");
        let partition = TopicPartition::new("t", 0);
        assert_eq!(consumer.position(&partition).expect("position"), 5);
        consumer.seek_to_end().expect("seek");
        assert_eq!(consumer.position(&partition).expect("position"), 10);
    }

    #[tokio::test]
    async fn producer_send_reports_offsets_in_order() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        let producer = log.take_producer();
        let mut receivers = Vec::new();
        for index in 0..3 {
            receivers.push(producer.send(ProducerRecord {
                topic: "t".into(),
                partition: 0,
                key: None,
                payload: format!("e{index}"),
            }));
        }
        for (index, rx) in receivers.into_iter().enumerate() {
            let metadata = rx.await.expect("ack").expect("send");
            assert_eq!(metadata.offset, index as i64);
        }
        log.release_producer(producer);
    }

    #[tokio::test]
    async fn fail_next_send_delivers_the_queued_error() {
        let log = MemoryLog::new(1);
        log.add_topic("t", 1);
        log.fail_next_send(LogError::Timeout);
        let producer = log.take_producer();
        let rx = producer.send(ProducerRecord {
            topic: "t".into(),
            partition: 0,
            key: None,
            payload: "e".into(),
        });
        assert_eq!(rx.await.expect("ack"), Err(LogError::Timeout));
        // The failed record was not appended.
        let mut consumer = assigned_consumer(&log, "t", 0);
        consumer.seek_to_end().expect("seek");
        assert_eq!(
            consumer
                .position(&TopicPartition::new("t", 0))
                .expect("position"),
            0
        );
    }

    #[tokio::test]
    async fn pending_deletion_blocks_recreation() {
        let log = MemoryLog::new(1);
        let session = log.session().await.expect("session");
        let settings = TopicSettings {
            retention_ms: 1000,
            segment_ms: 100,
        };
        session
            .create_topic("t", 2, 1, &settings)
            .await
            .expect("create");
        session.delete_topic("t").await.expect("delete");
        let err = session
            .create_topic("t", 2, 1, &settings)
            .await
            .expect_err("blocked");
        assert!(matches!(err, LogError::TopicExists(_)));
        log.purge_deleted("t");
        session
            .create_topic("t", 2, 1, &settings)
            .await
            .expect("recreate");
    }

    #[tokio::test]
    async fn coordination_down_fails_sessions() {
        let log = MemoryLog::new(1);
        log.set_coordination_down(true);
        assert!(log.session().await.is_err());
        log.set_coordination_down(false);
        assert!(log.session().await.is_ok());
    }
}
