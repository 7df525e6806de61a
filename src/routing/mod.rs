//! 路由模块：在静态配置的推理副本之间进行轮询负载均衡。
//!
//! # Replica Routing
//!
//! Selection is pure bookkeeping: it performs no network calls. Workers call
//! [`ReplicaSelector::next`] once per dispatch and feed the outcome back
//! through [`ReplicaSelector::report`].
//!
//! | Selector | Policy |
//! |----------|--------|
//! | [`RoundRobinSelector`] | Shared atomic cursor over the static replica list |
//! | [`BreakerSelector`] | Decorator skipping replicas whose circuit breaker is open |
//!
//! Replica health is normally enforced outside the dispatcher (readiness
//! checks remove unhealthy pods from the service endpoint), so the
//! round-robin selector is used on its own unless a breaker is configured.

use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Base URL of one inference replica, e.g. `http://10.0.0.7:5000`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Replica(String);

impl Replica {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim_end_matches('/').to_string())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Replica {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Replica {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure,
}

pub trait ReplicaSelector: Send + Sync {
    /// Replica for the next dispatch, or `None` when nothing is selectable.
    fn next(&self) -> Option<Replica>;

    /// Outcome of a dispatch made to `replica`.
    fn report(&self, _replica: &Replica, _outcome: DispatchOutcome) {}

    /// The static replica list, in configuration order.
    fn replicas(&self) -> &[Replica];

    fn strategy(&self) -> &'static str;

    /// Per-replica breaker state, empty when no breaker is configured.
    fn breaker_snapshots(&self) -> Vec<(Replica, CircuitBreakerSnapshot)> {
        Vec::new()
    }
}

/// Round robin over a fixed list.
///
/// Concurrent callers each take a distinct step of the rotation: the cursor
/// is advanced with a single `fetch_add`.
pub struct RoundRobinSelector {
    replicas: Vec<Replica>,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(replicas: impl IntoIterator<Item = Replica>) -> Self {
        Self {
            replicas: replicas.into_iter().collect(),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ReplicaSelector for RoundRobinSelector {
    fn next(&self) -> Option<Replica> {
        if self.replicas.is_empty() {
            return None;
        }
        let step = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.replicas[step % self.replicas.len()].clone())
    }

    fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    fn strategy(&self) -> &'static str {
        "round_robin"
    }
}

/// Wraps a selector with one circuit breaker per replica.
pub struct BreakerSelector<S> {
    inner: S,
    breakers: HashMap<Replica, CircuitBreaker>,
}

impl<S: ReplicaSelector> BreakerSelector<S> {
    pub fn new(inner: S, config: CircuitBreakerConfig) -> Self {
        let breakers = inner
            .replicas()
            .iter()
            .map(|r| (r.clone(), CircuitBreaker::new(config.clone())))
            .collect();
        Self { inner, breakers }
    }

    fn allows(&self, replica: &Replica) -> bool {
        self.breakers.get(replica).map(|b| b.allow()).unwrap_or(true)
    }
}

impl<S: ReplicaSelector> ReplicaSelector for BreakerSelector<S> {
    fn next(&self) -> Option<Replica> {
        // One shared cursor step per call. The fallback scan is local so that
        // concurrent callers cannot consume each other's steps.
        let first = self.inner.next()?;
        if self.allows(&first) {
            return Some(first);
        }
        let replicas = self.inner.replicas();
        let start = replicas.iter().position(|r| *r == first).unwrap_or(0);
        let found = (1..replicas.len())
            .map(|offset| &replicas[(start + offset) % replicas.len()])
            .find(|r| self.allows(r))
            .cloned();
        if found.is_none() {
            warn!("all replicas have an open circuit breaker");
        }
        found
    }

    fn report(&self, replica: &Replica, outcome: DispatchOutcome) {
        if let Some(breaker) = self.breakers.get(replica) {
            match outcome {
                DispatchOutcome::Success => breaker.on_success(),
                DispatchOutcome::Failure => breaker.on_failure(),
            }
        }
        self.inner.report(replica, outcome);
    }

    fn replicas(&self) -> &[Replica] {
        self.inner.replicas()
    }

    fn strategy(&self) -> &'static str {
        "round_robin+circuit_breaker"
    }

    fn breaker_snapshots(&self) -> Vec<(Replica, CircuitBreakerSnapshot)> {
        self.inner
            .replicas()
            .iter()
            .filter_map(|r| self.breakers.get(r).map(|b| (r.clone(), b.snapshot())))
            .collect()
    }
}
