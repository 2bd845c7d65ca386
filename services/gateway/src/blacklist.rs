// Emergency blocking of misbehaving applications or event types, checked on
// both the consume and the publish path.
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct BlockedSet {
    apps: HashSet<String>,
    event_types: HashSet<String>,
}

impl BlockedSet {
    fn is_blocked(&self, event_type: &str, app: &str) -> bool {
        self.apps.contains(app) || self.event_types.contains(event_type)
    }
}

#[derive(Debug, Default)]
pub struct Blacklist {
    consumers: RwLock<BlockedSet>,
    producers: RwLock<BlockedSet>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_consumption_blocked(&self, event_type: &str, app: &str) -> bool {
        self.consumers.read().is_blocked(event_type, app)
    }

    pub fn is_production_blocked(&self, event_type: &str, app: &str) -> bool {
        self.producers.read().is_blocked(event_type, app)
    }

    pub fn block_consumer_app(&self, app: impl Into<String>) {
        self.consumers.write().apps.insert(app.into());
    }

    pub fn block_consumer_event_type(&self, event_type: impl Into<String>) {
        self.consumers.write().event_types.insert(event_type.into());
    }

    pub fn block_producer_app(&self, app: impl Into<String>) {
        self.producers.write().apps.insert(app.into());
    }

    pub fn block_producer_event_type(&self, event_type: impl Into<String>) {
        self.producers.write().event_types.insert(event_type.into());
    }

    pub fn unblock_consumer_app(&self, app: &str) {
        self.consumers.write().apps.remove(app);
    }

    pub fn unblock_consumer_event_type(&self, event_type: &str) {
        self.consumers.write().event_types.remove(event_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_an_app_blocks_every_event_type() {
        let blacklist = Blacklist::new();
        blacklist.block_consumer_app("rogue");
        assert!(blacklist.is_consumption_blocked("orders", "rogue"));
        assert!(blacklist.is_consumption_blocked("payments", "rogue"));
        assert!(!blacklist.is_consumption_blocked("orders", "polite"));
    }

    #[test]
    fn consumer_and_producer_lists_are_independent() {
        let blacklist = Blacklist::new();
        blacklist.block_consumer_event_type("orders");
        assert!(blacklist.is_consumption_blocked("orders", "app"));
        assert!(!blacklist.is_production_blocked("orders", "app"));
    }

    #[test]
    fn unblocking_restores_access() {
        let blacklist = Blacklist::new();
        blacklist.block_consumer_app("app");
        blacklist.unblock_consumer_app("app");
        assert!(!blacklist.is_consumption_blocked("orders", "app"));
    }
}
