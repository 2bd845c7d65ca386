// Per-broker circuit breaking for the publish path. One breaker exists per
// leader broker id; only connection-class failures count against it, so a
// rejected record on a healthy broker never trips the circuit.
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning knobs for one broker's breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window required to trip Closed -> Open.
    pub failure_threshold: u32,
    /// Length of the sliding outcome window.
    pub window: Duration,
    /// Time an Open breaker blocks requests before probing with HalfOpen.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    // When the current state was entered.
    since: Instant,
    window_start: Instant,
    failures: u32,
}

/// Three-state failure suppressor guarding one broker.
pub struct CircuitBreaker {
    broker_id: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    in_flight: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(broker_id: impl Into<String>, config: BreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            broker_id: broker_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                since: now,
                window_start: now,
                failures: 0,
            }),
            in_flight: AtomicU32::new(0),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Whether a request may go out. An Open breaker blocks until the
    /// cooldown elapses, then lets a probe through in HalfOpen.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.since.elapsed() >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.since = Instant::now();
                    tracing::info!(broker = %self.broker_id, "circuit breaker probing after cooldown");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a request going out.
    pub fn mark_start(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful outcome. A HalfOpen probe success closes the
    /// circuit and resets the window.
    pub fn mark_success(&self) {
        self.settle();
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.since = Instant::now();
            inner.window_start = inner.since;
            inner.failures = 0;
            tracing::info!(broker = %self.broker_id, "circuit breaker closed");
        }
    }

    /// Record a connection-class failure. Enough failures within the window
    /// trip the circuit; a HalfOpen probe failure re-opens it immediately.
    pub fn mark_failure(&self) {
        self.settle();
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if now.duration_since(inner.window_start) > self.config.window {
            inner.window_start = now;
            inner.failures = 0;
        }
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.since = now;
                tracing::warn!(broker = %self.broker_id, "circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.since = now;
                tracing::warn!(
                    broker = %self.broker_id,
                    failures = inner.failures,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    fn settle(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                value.checked_sub(1)
            });
    }
}

/// Get-or-create registry of per-broker breakers. Breakers are created lazily
/// on first publish that references a broker id and live for the process.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn breaker_for(&self, broker_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(broker_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(broker_id, self.config.clone()))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
