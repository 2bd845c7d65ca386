// Connection-slot admission: at most N concurrent streams per client, event
// type and partition. Acquisition is atomic across a partition list; release
// is idempotent by slot token.
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// One held reservation. The token makes release idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSlot {
    pub client: String,
    pub event_type: String,
    pub partition: String,
    token: Uuid,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "no free slots for streaming: maximum of {max} simultaneous streams reached \
     for partition {partition} of event type {event_type}"
)]
pub struct NoConnectionSlots {
    pub event_type: String,
    pub partition: String,
    pub max: usize,
}

type SlotKey = (String, String, String);

pub struct ConsumerLimiter {
    max_streams: usize,
    held: Mutex<HashMap<SlotKey, Vec<Uuid>>>,
}

impl ConsumerLimiter {
    pub fn new(max_streams: usize) -> Self {
        Self {
            max_streams,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one slot per partition, atomically: on any refusal nothing
    /// stays acquired.
    pub fn acquire_connection_slots(
        &self,
        client: &str,
        event_type: &str,
        partitions: &[String],
    ) -> Result<Vec<ConnectionSlot>, NoConnectionSlots> {
        let mut held = self.held.lock();
        let mut acquired: Vec<ConnectionSlot> = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let key = (
                client.to_string(),
                event_type.to_string(),
                partition.clone(),
            );
            let tokens = held.entry(key).or_default();
            if tokens.len() >= self.max_streams {
                // Roll back what this call already took before refusing.
                for slot in &acquired {
                    let key = (
                        slot.client.clone(),
                        slot.event_type.clone(),
                        slot.partition.clone(),
                    );
                    if let Some(tokens) = held.get_mut(&key) {
                        tokens.retain(|token| *token != slot.token);
                    }
                }
                held.retain(|_, tokens| !tokens.is_empty());
                return Err(NoConnectionSlots {
                    event_type: event_type.to_string(),
                    partition: partition.clone(),
                    max: self.max_streams,
                });
            }
            let token = Uuid::new_v4();
            tokens.push(token);
            acquired.push(ConnectionSlot {
                client: client.to_string(),
                event_type: event_type.to_string(),
                partition: partition.clone(),
                token,
            });
        }
        Ok(acquired)
    }

    /// Idempotent release; unknown tokens and empty lists are no-ops.
    pub fn release_connection_slots(&self, slots: &[ConnectionSlot]) {
        if slots.is_empty() {
            return;
        }
        let mut held = self.held.lock();
        for slot in slots {
            let key = (
                slot.client.clone(),
                slot.event_type.clone(),
                slot.partition.clone(),
            );
            if let Some(tokens) = held.get_mut(&key) {
                tokens.retain(|token| *token != slot.token);
            }
        }
        held.retain(|_, tokens| !tokens.is_empty());
    }

    /// Slots currently held by one client for one event type.
    pub fn held_by(&self, client: &str, event_type: &str) -> usize {
        self.held
            .lock()
            .iter()
            .filter(|((c, e, _), _)| c == client && e == event_type)
            .map(|(_, tokens)| tokens.len())
            .sum()
    }
}
