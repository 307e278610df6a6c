//! Per-service circuit breakers.
//!
//! States: `closed` (pass-through), `open` (fail fast with a typed
//! `CircuitOpen` carrying the remaining cool-down), `half_open` (a small
//! number of probe calls). Every transition is logged with the service,
//! previous state, reason, and counts.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Instant;
use tracing::{info, warn};

use nexsus_core::config::BreakerConfig;
use nexsus_core::error::{NexsusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

/// Run-visible summary of one breaker.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: BreakerState,
    pub trips: u64,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    trips: Mutex<u64>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
            trips: Mutex::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> BreakerState {
        match &*self.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let (state, consecutive_failures) = match &*inner {
            Inner::Closed {
                consecutive_failures,
            } => (BreakerState::Closed, *consecutive_failures),
            Inner::Open { .. } => (BreakerState::Open, self.config.failure_threshold),
            Inner::HalfOpen { .. } => (BreakerState::HalfOpen, 0),
        };
        BreakerSnapshot {
            service: self.service.clone(),
            state,
            trips: *self.trips.lock(),
            consecutive_failures,
        }
    }

    pub fn trip_count(&self) -> u64 {
        *self.trips.lock()
    }

    /// Gate a call: `Ok` when the call may proceed, `CircuitOpen` when the
    /// breaker is cooling down. Moves `open → half_open` when the reset
    /// timeout has elapsed.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Inner::Open { since } = &*inner {
            let elapsed = since.elapsed();
            if elapsed >= self.config.reset_timeout {
                info!(
                    service = %self.service,
                    previous = "open",
                    "circuit breaker entering half-open"
                );
                *inner = Inner::HalfOpen { successes: 0 };
            } else {
                let remaining = self.config.reset_timeout - elapsed;
                return Err(NexsusError::CircuitOpen {
                    service: self.service.clone(),
                    remaining_ms: remaining.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            Inner::HalfOpen { successes } => {
                *successes += 1;
                if *successes >= self.config.half_open_successes {
                    info!(
                        service = %self.service,
                        previous = "half_open",
                        successes = *successes,
                        "circuit breaker closed"
                    );
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                    };
                }
            }
            Inner::Open { .. } => {}
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        previous = "closed",
                        failures = *consecutive_failures,
                        reason,
                        "circuit breaker opened"
                    );
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                    *self.trips.lock() += 1;
                }
            }
            Inner::HalfOpen { .. } => {
                warn!(
                    service = %self.service,
                    previous = "half_open",
                    reason,
                    "circuit breaker re-opened"
                );
                *inner = Inner::Open {
                    since: Instant::now(),
                };
                *self.trips.lock() += 1;
            }
            Inner::Open { .. } => {}
        }
    }

    /// Wrap one (already retry-wrapped) operation. Rejections and
    /// cancellations pass through without touching breaker health.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_against_breaker() {
                    self.record_failure(&err.to_string());
                }
                Err(err)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_open_elapsed(&self) {
        *self.inner.lock() = Inner::Open {
            since: Instant::now() - self.config.reset_timeout,
        };
    }
}

/// The four breakers the pipeline carries, one per external service.
/// Shared handles so the embedding gateway and store adapter observe the
/// same state the run report reads.
pub struct BreakerSet {
    pub schema_source: std::sync::Arc<CircuitBreaker>,
    pub record_source: std::sync::Arc<CircuitBreaker>,
    pub embedding: std::sync::Arc<CircuitBreaker>,
    pub vector_store: std::sync::Arc<CircuitBreaker>,
}

impl BreakerSet {
    pub fn new(
        schema_source: BreakerConfig,
        record_source: BreakerConfig,
        embedding: BreakerConfig,
        vector_store: BreakerConfig,
    ) -> Self {
        Self {
            schema_source: std::sync::Arc::new(CircuitBreaker::new("schema_source", schema_source)),
            record_source: std::sync::Arc::new(CircuitBreaker::new("record_source", record_source)),
            embedding: std::sync::Arc::new(CircuitBreaker::new("embedding", embedding)),
            vector_store: std::sync::Arc::new(CircuitBreaker::new("vector_store", vector_store)),
        }
    }

    pub fn from_config(config: &nexsus_core::NexsusConfig) -> Self {
        Self::new(
            config.breaker_schema_source,
            config.breaker_record_source,
            config.breaker_embedding,
            config.breaker_vector_store,
        )
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        vec![
            self.schema_source.snapshot(),
            self.record_source.snapshot(),
            self.embedding.snapshot(),
            self.vector_store.snapshot(),
        ]
    }

    pub fn total_trips(&self) -> u64 {
        self.snapshots().iter().map(|s| s.trips).sum()
    }
}
