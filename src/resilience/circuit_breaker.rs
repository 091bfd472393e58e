//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls go straight to the fallback
//! - Half-Open: a single probe call tests whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within window
//! Open → Half-Open: after cool-down
//! Half-Open → Closed: probe succeeds (counter reset)
//! Half-Open → Open: probe fails (cool-down doubled, capped)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency key, created lazily on first failure
//! - Entries live in a sharded map; transitions are per-key read-modify-write
//! - Exactly one probe in Half-Open; a dropped probe releases its slot

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    cool_down_until: Option<Instant>,
    current_cool_down: Duration,
    probe_in_flight: bool,
}

impl BreakerEntry {
    fn new(cool_down: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            cool_down_until: None,
            current_cool_down: cool_down,
            probe_in_flight: false,
        }
    }
}

/// Result of asking whether a call may reach the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; call normally.
    Allowed,
    /// Circuit half-open; this call is the single probe.
    Probe,
    /// Circuit open (or probe already running); use the fallback.
    Rejected,
}

/// Point-in-time view of one breaker, for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub cool_down_remaining_ms: Option<u64>,
}

/// Registry of per-dependency circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    entries: Arc<DashMap<String, BreakerEntry>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Decide whether a call to `dependency` may proceed.
    pub fn admit(&self, dependency: &str) -> Admission {
        let Some(mut entry) = self.entries.get_mut(dependency) else {
            return Admission::Allowed;
        };

        match entry.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled = entry
                    .cool_down_until
                    .map_or(true, |until| Instant::now() >= until);
                if cooled {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    metrics::record_circuit_state(dependency, CircuitState::HalfOpen.gauge());
                    tracing::info!(dependency, "Circuit half-open, sending probe");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    Admission::Rejected
                } else {
                    entry.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful call made under `admission`.
    pub fn record_success(&self, dependency: &str, admission: Admission) {
        let Some(mut entry) = self.entries.get_mut(dependency) else {
            return;
        };

        match admission {
            Admission::Probe => {
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.cool_down_until = None;
                entry.current_cool_down = self.config.cool_down();
                entry.probe_in_flight = false;
                metrics::record_circuit_state(dependency, CircuitState::Closed.gauge());
                tracing::info!(dependency, "Probe succeeded, circuit closed");
            }
            Admission::Allowed => {
                if entry.state == CircuitState::Closed {
                    entry.failure_count = 0;
                }
            }
            Admission::Rejected => {}
        }
    }

    /// Record a failed call made under `admission`.
    pub fn record_failure(&self, dependency: &str, admission: Admission) {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(dependency.to_string())
            .or_insert_with(|| BreakerEntry::new(self.config.cool_down()));

        match admission {
            Admission::Probe => {
                let extended = entry
                    .current_cool_down
                    .saturating_mul(2)
                    .min(self.config.max_cool_down());
                entry.current_cool_down = extended;
                entry.state = CircuitState::Open;
                entry.cool_down_until = Some(now + extended);
                entry.last_failure_at = Some(now);
                entry.probe_in_flight = false;
                metrics::record_circuit_state(dependency, CircuitState::Open.gauge());
                tracing::warn!(dependency, cool_down = ?extended, "Probe failed, circuit re-opened");
            }
            Admission::Allowed => {
                if entry.state != CircuitState::Closed {
                    // Another caller already tripped it.
                    entry.last_failure_at = Some(now);
                    return;
                }
                let stale = entry
                    .last_failure_at
                    .is_some_and(|at| now.duration_since(at) > self.config.window());
                if stale {
                    entry.failure_count = 0;
                }
                entry.failure_count += 1;
                entry.last_failure_at = Some(now);

                if entry.failure_count >= self.config.failure_threshold {
                    let cool_down = entry.current_cool_down;
                    entry.state = CircuitState::Open;
                    entry.cool_down_until = Some(now + cool_down);
                    metrics::record_circuit_state(dependency, CircuitState::Open.gauge());
                    tracing::warn!(
                        dependency,
                        failures = entry.failure_count,
                        cool_down = ?cool_down,
                        "Circuit opened"
                    );
                }
            }
            Admission::Rejected => {}
        }
    }

    /// Give back a probe slot whose call never finished.
    pub fn release_probe(&self, dependency: &str) {
        if let Some(mut entry) = self.entries.get_mut(dependency) {
            if entry.state == CircuitState::HalfOpen {
                entry.probe_in_flight = false;
            }
        }
    }

    pub fn state(&self, dependency: &str) -> CircuitState {
        self.entries
            .get(dependency)
            .map_or(CircuitState::Closed, |e| e.state)
    }

    pub fn failure_count(&self, dependency: &str) -> u32 {
        self.entries.get(dependency).map_or(0, |e| e.failure_count)
    }

    pub fn any_open(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.value().state != CircuitState::Closed)
    }

    /// Force a dependency back to closed, e.g. after a verified reconnect.
    pub fn reset(&self, dependency: &str) {
        if self.entries.remove(dependency).is_some() {
            metrics::record_circuit_state(dependency, CircuitState::Closed.gauge());
            tracing::info!(dependency, "Circuit reset");
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|e| BreakerSnapshot {
                dependency: e.key().clone(),
                state: e.state,
                failure_count: e.failure_count,
                cool_down_remaining_ms: e
                    .cool_down_until
                    .filter(|_| e.state == CircuitState::Open)
                    .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            })
            .collect();
        out.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        out
    }
}

/// Holds a half-open probe slot until the call reports back.
///
/// Dropping the permit without completing it (e.g. the caller's future was
/// cancelled) releases the slot so the breaker cannot wedge in Half-Open.
pub(crate) struct ProbePermit<'a> {
    breakers: &'a CircuitBreakers,
    dependency: &'a str,
    admission: Admission,
    settled: bool,
}

impl<'a> ProbePermit<'a> {
    pub(crate) fn new(breakers: &'a CircuitBreakers, dependency: &'a str, admission: Admission) -> Self {
        Self {
            breakers,
            dependency,
            admission,
            settled: false,
        }
    }

    pub(crate) fn success(mut self) {
        self.settled = true;
        self.breakers.record_success(self.dependency, self.admission);
    }

    pub(crate) fn failure(mut self) {
        self.settled = true;
        self.breakers.record_failure(self.dependency, self.admission);
    }
}

impl Drop for ProbePermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breakers.release_probe(self.dependency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            cool_down_secs: 10,
            max_cool_down_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let breakers = CircuitBreakers::new(config());
        for _ in 0..2 {
            assert_eq!(breakers.admit("db"), Admission::Allowed);
            breakers.record_failure("db", Admission::Allowed);
        }
        assert_eq!(breakers.state("db"), CircuitState::Closed);

        breakers.record_failure("db", Admission::Allowed);
        assert_eq!(breakers.state("db"), CircuitState::Open);
        assert_eq!(breakers.admit("db"), Admission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_failures_fall_out_of_window() {
        let breakers = CircuitBreakers::new(config());
        breakers.record_failure("db", Admission::Allowed);
        breakers.record_failure("db", Admission::Allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        breakers.record_failure("db", Admission::Allowed);

        assert_eq!(breakers.state("db"), CircuitState::Closed);
        assert_eq!(breakers.failure_count("db"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let breakers = CircuitBreakers::new(config());
        breakers.record_failure("db", Admission::Allowed);
        breakers.record_failure("db", Admission::Allowed);
        breakers.record_success("db", Admission::Allowed);
        breakers.record_failure("db", Admission::Allowed);
        assert_eq!(breakers.state("db"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let breakers = CircuitBreakers::new(config());
        for _ in 0..3 {
            breakers.record_failure("db", Admission::Allowed);
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breakers.admit("db"), Admission::Probe);
        assert_eq!(breakers.admit("db"), Admission::Rejected);

        breakers.record_success("db", Admission::Probe);
        assert_eq!(breakers.state("db"), CircuitState::Closed);
        assert_eq!(breakers.admit("db"), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_doubles_cool_down() {
        let breakers = CircuitBreakers::new(config());
        for _ in 0..3 {
            breakers.record_failure("db", Admission::Allowed);
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breakers.admit("db"), Admission::Probe);
        breakers.record_failure("db", Admission::Probe);

        let snapshot = &breakers.snapshots()[0];
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.cool_down_remaining_ms, Some(20_000));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breakers.admit("db"), Admission::Rejected);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breakers.admit("db"), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let breakers = CircuitBreakers::new(config());
        for _ in 0..3 {
            breakers.record_failure("db", Admission::Allowed);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let admission = breakers.admit("db");
        assert_eq!(admission, Admission::Probe);
        drop(ProbePermit::new(&breakers, "db", admission));

        assert_eq!(breakers.admit("db"), Admission::Probe);
    }

    #[test]
    fn test_unrelated_dependencies_are_independent() {
        let breakers = CircuitBreakers::new(config());
        for _ in 0..3 {
            breakers.record_failure("database", Admission::Allowed);
        }
        assert_eq!(breakers.state("database"), CircuitState::Open);
        assert_eq!(breakers.admit("cache"), Admission::Allowed);
        assert!(breakers.any_open());

        breakers.reset("database");
        assert!(!breakers.any_open());
    }
}
