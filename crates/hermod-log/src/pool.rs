// Producer pooling. Producers are expensive to build and safe to share
// serially; the pool hands out one handle per publisher and replaces handles
// that were terminated after an unrecoverable send error.
use crate::{LogProducer, ProducerRecord, SendFuture};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A producer handle owned by the pool. Terminating the handle marks it so
/// `release` drops it instead of returning it to the idle set.
pub struct PooledProducer {
    inner: Arc<dyn LogProducer>,
    terminated: AtomicBool,
}

impl PooledProducer {
    fn new(inner: Arc<dyn LogProducer>) -> Self {
        Self {
            inner,
            terminated: AtomicBool::new(false),
        }
    }

    /// Mark this producer as poisoned. The pool replaces it on release.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl LogProducer for PooledProducer {
    fn partitions_for(&self, topic: &str) -> crate::Result<Vec<crate::PartitionInfo>> {
        self.inner.partitions_for(topic)
    }

    fn send(&self, record: ProducerRecord) -> SendFuture {
        self.inner.send(record)
    }
}

type ProducerBuilder = Box<dyn Fn() -> Arc<dyn LogProducer> + Send + Sync>;

/// Hands out shared producer handles: `take` prefers an idle producer and
/// builds a new one when none is available; `release` returns healthy handles
/// up to the idle cap and drops the rest.
pub struct ProducerPool {
    build: ProducerBuilder,
    idle: Mutex<Vec<Arc<PooledProducer>>>,
    max_idle: usize,
}

impl ProducerPool {
    pub fn new(
        max_idle: usize,
        build: impl Fn() -> Arc<dyn LogProducer> + Send + Sync + 'static,
    ) -> Self {
        Self {
            build: Box::new(build),
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub fn take(&self) -> Arc<PooledProducer> {
        if let Some(producer) = self.idle.lock().pop() {
            return producer;
        }
        Arc::new(PooledProducer::new((self.build)()))
    }

    pub fn release(&self, producer: Arc<PooledProducer>) {
        if producer.is_terminated() {
            tracing::debug!("dropping terminated producer");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(producer);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
