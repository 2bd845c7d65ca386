// Per-event publish bookkeeping. One `BatchItem` exists per event in a batch;
// it is owned by the publish call but mutated from send-completion handlers,
// so its mutable state sits behind a small lock.
use parking_lot::Mutex;
use serde::Serialize;

/// Outcome of publishing one item. `Aborted` is the initial state and means
/// the item was never handed to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishingStatus {
    Submitted,
    Failed,
    Aborted,
}

/// How far the item progressed through the publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishingStep {
    None,
    Publishing,
    Published,
}

/// Snapshot of an item's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResponse {
    pub publishing_status: PublishingStatus,
    pub detail: String,
}

#[derive(Debug)]
struct ItemState {
    broker_id: Option<String>,
    step: PublishingStep,
    status: PublishingStatus,
    detail: String,
}

/// One event of a publish batch with its assigned partition and result.
#[derive(Debug)]
pub struct BatchItem {
    event: String,
    partition: String,
    state: Mutex<ItemState>,
}

impl BatchItem {
    pub fn new(event: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            partition: partition.into(),
            state: Mutex::new(ItemState {
                broker_id: None,
                step: PublishingStep::None,
                status: PublishingStatus::Aborted,
                detail: String::new(),
            }),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn broker_id(&self) -> Option<String> {
        self.state.lock().broker_id.clone()
    }

    pub fn set_broker_id(&self, broker_id: impl Into<String>) {
        self.state.lock().broker_id = Some(broker_id.into());
    }

    pub fn step(&self) -> PublishingStep {
        self.state.lock().step
    }

    pub fn set_step(&self, step: PublishingStep) {
        self.state.lock().step = step;
    }

    pub fn update_status_and_detail(&self, status: PublishingStatus, detail: &str) {
        let mut state = self.state.lock();
        state.status = status;
        state.detail = detail.to_string();
    }

    pub fn status(&self) -> PublishingStatus {
        self.state.lock().status
    }

    pub fn detail(&self) -> String {
        self.state.lock().detail.clone()
    }

    pub fn response(&self) -> ItemResponse {
        let state = self.state.lock();
        ItemResponse {
            publishing_status: state.status,
            detail: state.detail.clone(),
        }
    }
}

/// Fail every item that was not submitted and has no detail yet. Submitted
/// items and items that already carry a detail are left untouched, which
/// keeps per-item results monotonic across the sweeps.
pub fn fail_unpublished(batch: &[BatchItem], reason: &str) {
    for item in batch {
        if item.status() != PublishingStatus::Submitted && item.detail().is_empty() {
            item.update_status_and_detail(PublishingStatus::Failed, reason);
        }
    }
}
