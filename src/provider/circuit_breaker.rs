//! Process-wide circuit breaker shared by every provider call.
//!
//! ```text
//! Closed   → Open      consecutive_failures >= threshold
//! Open     → HalfOpen  cooldown elapsed, next caller becomes the probe
//! HalfOpen → Closed    probe succeeded
//! HalfOpen → Open      probe failed (cooldown restarts)
//! ```
//!
//! Only one probe runs at a time. Callers arriving during HALF_OPEN queue on
//! the probe slot and re-evaluate the state once the probe has settled.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// All mutable fields live under one lock so transitions are atomic.
#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    /// Held for the whole duration of a HALF_OPEN probe.
    probe_slot: tokio::sync::Mutex<()>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cfg: &BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            probe_slot: tokio::sync::Mutex::new(()),
            failure_threshold: cfg.failure_threshold.max(1),
            cooldown: cfg.cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Run `call` under breaker supervision.
    ///
    /// Fails with [`ProviderError::CircuitOpen`] without invoking `call` while
    /// the breaker is open and the cooldown has not elapsed.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match self.admit()? {
            Admission::Normal => {
                let result = call().await;
                self.record(Admission::Normal, &result);
                result
            }
            Admission::Probe => {
                let slot = self.probe_slot.lock().await;
                // The probe we queued behind may already have settled the state.
                match self.admit()? {
                    Admission::Normal => {
                        drop(slot);
                        let result = call().await;
                        self.record(Admission::Normal, &result);
                        result
                    }
                    Admission::Probe => {
                        let result = call().await;
                        self.record(Admission::Probe, &result);
                        drop(slot);
                        result
                    }
                }
            }
        }
    }

    fn admit(&self) -> Result<Admission, ProviderError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::HalfOpen => Ok(Admission::Probe),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(self.cooldown);
                if elapsed < self.cooldown {
                    return Err(ProviderError::CircuitOpen {
                        retry_in: self.cooldown - elapsed,
                    });
                }
                inner.state = BreakerState::HalfOpen;
                info!("[BREAKER] half-open: cooldown of {:?} elapsed, admitting one probe", self.cooldown);
                Ok(Admission::Probe)
            }
        }
    }

    fn record<T>(&self, admission: Admission, result: &Result<T, ProviderError>) {
        let failed = matches!(result, Err(e) if e.counts_as_failure());
        let mut inner = self.lock();

        match (admission, inner.state) {
            (Admission::Probe, BreakerState::HalfOpen) => {
                if failed {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.consecutive_failures += 1;
                    warn!("[BREAKER] re-opened: probe failed, cooling down for {:?}", self.cooldown);
                } else {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!("[BREAKER] closed: probe succeeded");
                }
            }
            (Admission::Normal, BreakerState::Closed) => {
                if failed {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                        warn!(
                            failures = inner.consecutive_failures,
                            threshold = self.failure_threshold,
                            "[BREAKER] opened after {} consecutive failures",
                            inner.consecutive_failures,
                        );
                    }
                } else {
                    inner.consecutive_failures = 0;
                }
            }
            // Outcome of a call admitted under a state that has since changed.
            // Only the probe decides how the breaker leaves OPEN/HALF_OPEN.
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
