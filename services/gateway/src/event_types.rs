// Event-type metadata: the mapping from a public event-type name to its
// backing topic and the scopes that gate access. Durable persistence of this
// metadata is out of scope; the registry is process-local.
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One event type, backed 1:1 by a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventType {
    pub name: String,
    pub topic: String,
    #[serde(default)]
    pub read_scopes: Vec<String>,
    #[serde(default)]
    pub write_scopes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("event type not found: {0}")]
pub struct NoSuchEventType(pub String);

#[derive(Debug, thiserror::Error)]
#[error("event type already exists: {0}")]
pub struct DuplicatedEventType(pub String);

#[derive(Default)]
pub struct EventTypeRegistry {
    inner: RwLock<HashMap<String, EventType>>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_name(&self, name: &str) -> Result<EventType, NoSuchEventType> {
        self.inner
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NoSuchEventType(name.to_string()))
    }

    pub fn insert(&self, event_type: EventType) -> Result<(), DuplicatedEventType> {
        let mut inner = self.inner.write();
        if inner.contains_key(&event_type.name) {
            return Err(DuplicatedEventType(event_type.name));
        }
        inner.insert(event_type.name.clone(), event_type);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<EventType, NoSuchEventType> {
        self.inner
            .write()
            .remove(name)
            .ok_or_else(|| NoSuchEventType(name.to_string()))
    }
}
