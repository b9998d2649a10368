use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a closed circuit open.
    pub failure_threshold: u32,
    /// Consecutive successes that close a half-open circuit.
    pub success_threshold: u32,
    /// How long an open circuit rejects calls before allowing a probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of one circuit, for callers that surface health info.
#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub total_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    total_requests: u64,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            total_requests: 0,
        }
    }
}

/// One circuit breaker per key (typically the remote host), created lazily.
///
/// All transitions happen under the per-key map entry, so concurrent calls
/// against the same key serialize their state changes while unrelated keys
/// stay independent.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    records: DashMap<String, CircuitRecord>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Gate a call about to go out on `key`.
    ///
    /// Open circuits reject until `open_timeout` has passed since the last
    /// recorded failure, then flip to half-open and let a probe through.
    pub fn check_circuit(&self, key: &str) -> Result<(), CallError> {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(CircuitRecord::new);

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = record.last_failure_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed >= self.config.open_timeout {
                    record.state = CircuitState::HalfOpen;
                    record.consecutive_successes = 0;
                    info!(circuit = key, "Circuit breaker transitioned to half-open");
                    Ok(())
                } else {
                    Err(CallError::CircuitOpen {
                        key: key.to_string(),
                        retry_in: self.config.open_timeout - elapsed,
                    })
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(CircuitRecord::new);

        record.total_requests += 1;
        record.consecutive_successes += 1;
        record.consecutive_failures = 0;

        if record.state == CircuitState::HalfOpen
            && record.consecutive_successes >= self.config.success_threshold
        {
            record.state = CircuitState::Closed;
            record.consecutive_successes = 0;
            record.last_failure_at = None;
            info!(circuit = key, "Circuit breaker closed after half-open recovery");
        }
    }

    pub fn record_failure(&self, key: &str) {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(CircuitRecord::new);

        record.total_requests += 1;
        record.consecutive_failures += 1;
        record.consecutive_successes = 0;
        record.last_failure_at = Some(Instant::now());

        match record.state {
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                error!(circuit = key, "Circuit breaker re-opened after half-open failure");
            }
            CircuitState::Closed
                if record.consecutive_failures >= self.config.failure_threshold =>
            {
                record.state = CircuitState::Open;
                warn!(
                    circuit = key,
                    failures = record.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Force a circuit back to closed with zeroed streak counters. Manual
    /// recovery path; lifetime request totals are kept.
    pub fn reset(&self, key: &str) {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(CircuitRecord::new);

        record.state = CircuitState::Closed;
        record.consecutive_failures = 0;
        record.consecutive_successes = 0;
        record.last_failure_at = None;
        info!(circuit = key, "Circuit breaker reset");
    }

    /// Unknown keys read as closed without creating a record.
    pub fn get_state(&self, key: &str) -> CircuitState {
        self.records.get(key).map_or(CircuitState::Closed, |r| r.state)
    }

    /// Literal state check; an elapsed open timeout only takes effect on the
    /// next `check_circuit`.
    pub fn is_open(&self, key: &str) -> bool {
        self.get_state(key) == CircuitState::Open
    }

    pub fn all_states(&self) -> HashMap<String, CircuitState> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.state))
            .collect()
    }

    pub fn metrics(&self, key: &str) -> CircuitMetrics {
        self.records.get(key).map_or(
            CircuitMetrics {
                state: CircuitState::Closed,
                total_requests: 0,
                consecutive_failures: 0,
                consecutive_successes: 0,
            },
            |record| CircuitMetrics {
                state: record.state,
                total_requests: record.total_requests,
                consecutive_failures: record.consecutive_failures,
                consecutive_successes: record.consecutive_successes,
            },
        )
    }

    /// Drop every record. Intended for shutdown or between test cases.
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
