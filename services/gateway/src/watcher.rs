// Disconnect detection for long streaming responses. The watcher owns a
// shared flag that stays true while the client is connected; the streaming
// loop checks it between batches and the controller lowers it on exit.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
pub struct ConnectionWatcher {
    ready: Arc<AtomicBool>,
}

impl ConnectionWatcher {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The shared flag observed by the streaming loop.
    pub fn connection_ready(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Lower the flag; called when the client goes away and again,
    /// idempotently, when the controller tears the stream down.
    pub fn mark_closed(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }
}

impl Default for ConnectionWatcher {
    fn default() -> Self {
        Self::new()
    }
}
