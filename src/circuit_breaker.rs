use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{SearchError, SearchResult};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitState {
    pub name: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    /// Set while the single half-open trial call is running.
    pub trial_in_flight: bool,
}

impl CircuitState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

enum Admission {
    Rejected,
    Admitted,
    Trial,
}

/// Releases the half-open trial slot if the trial call is dropped before
/// it records an outcome.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    name: &'a str,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut circuit) = self.breaker.circuits.get_mut(self.name) {
            if circuit.status == CircuitStatus::HalfOpen && circuit.trial_in_flight {
                log::debug!("circuit {} trial call abandoned", self.name);
                circuit.trial_in_flight = false;
            }
        }
    }
}

/// Serializable view of a circuit for the status endpoint.
#[derive(Serialize, Debug, Clone)]
pub struct CircuitSnapshot {
    pub name: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(30),
        }
    }
}

/// Registry of named circuits.
///
/// ```text
///   Closed --(failures >= threshold)--> Open
///   Open --(cool-down elapsed, next call)--> HalfOpen
///   HalfOpen --(primary ok)--> Closed
///   HalfOpen --(primary fails)--> Open (opened_at reset)
/// ```
///
/// Only the call that moves a circuit to HalfOpen runs `primary`; callers
/// arriving while that probe runs get the fallback. Every transition happens
/// while holding the circuit's map entry, so a threshold crossing and a reset
/// can never interleave.
pub struct CircuitBreaker {
    circuits: DashMap<String, CircuitState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    /// Runs `primary` when the circuit allows it, otherwise `fallback`.
    ///
    /// A failing `primary` is also answered by `fallback`, which receives the
    /// primary's error (`None` when the call was short-circuited). Whatever
    /// `fallback` returns is the result of the call.
    pub async fn execute<T, P, PFut, F, FFut>(
        &self,
        name: &str,
        primary: P,
        fallback: F,
    ) -> SearchResult<T>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = SearchResult<T>>,
        F: FnOnce(Option<SearchError>) -> FFut,
        FFut: Future<Output = SearchResult<T>>,
    {
        let _trial = match self.admit(name) {
            Admission::Rejected => {
                log::debug!("circuit {name} is open, using fallback");
                return fallback(None).await;
            }
            Admission::Admitted => None,
            Admission::Trial => Some(TrialSlot {
                breaker: self,
                name,
            }),
        };

        match primary().await {
            Ok(value) => {
                self.record_success(name);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(name, &err);
                fallback(Some(err)).await
            }
        }
    }

    fn admit(&self, name: &str) -> Admission {
        let mut circuit = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(|| CircuitState::new(name));

        match circuit.status {
            CircuitStatus::Closed => Admission::Admitted,
            CircuitStatus::HalfOpen if circuit.trial_in_flight => Admission::Rejected,
            CircuitStatus::HalfOpen => {
                circuit.trial_in_flight = true;
                Admission::Trial
            }
            CircuitStatus::Open => {
                let cooled = circuit
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.cool_down);
                if !cooled {
                    return Admission::Rejected;
                }
                log::info!("circuit {name} half-open, probing primary");
                circuit.status = CircuitStatus::HalfOpen;
                circuit.trial_in_flight = true;
                Admission::Trial
            }
        }
    }

    fn record_success(&self, name: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(name) {
            if circuit.status != CircuitStatus::Closed {
                log::info!("circuit {name} closed after successful probe");
            }
            circuit.status = CircuitStatus::Closed;
            circuit.consecutive_failures = 0;
            circuit.opened_at = None;
            circuit.trial_in_flight = false;
        }
    }

    fn record_failure(&self, name: &str, err: &SearchError) {
        let mut circuit = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(|| CircuitState::new(name));
        circuit.consecutive_failures += 1;

        match circuit.status {
            CircuitStatus::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    log::warn!(
                        "circuit {name} opened after {} consecutive failures, last error: {err}",
                        circuit.consecutive_failures
                    );
                    circuit.status = CircuitStatus::Open;
                    circuit.opened_at = Some(Instant::now());
                }
            }
            CircuitStatus::HalfOpen => {
                log::warn!("circuit {name} probe failed, reopening: {err}");
                circuit.status = CircuitStatus::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.trial_in_flight = false;
            }
            // Another caller already opened it; keep its opened_at.
            CircuitStatus::Open => {}
        }
    }

    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.circuits.get(name).map(|circuit| circuit.clone())
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = Utc::now();
        let mut circuits: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|circuit| CircuitSnapshot {
                name: circuit.name.clone(),
                status: circuit.status,
                consecutive_failures: circuit.consecutive_failures,
                opened_at: circuit.opened_at.and_then(|opened| {
                    chrono::Duration::from_std(opened.elapsed())
                        .ok()
                        .map(|elapsed| now - elapsed)
                }),
            })
            .collect();
        circuits.sort_by(|a, b| a.name.cmp(&b.name));
        circuits
    }

    /// Forces every circuit back to closed.
    pub fn reset(&self) {
        self.circuits.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
