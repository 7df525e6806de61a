use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

impl CircuitBreakerSnapshot {
    pub fn is_open(&self) -> bool {
        self.open_remaining_ms.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_secs", with = "crate::config::duration_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Consecutive-failure breaker guarding one replica.
///
/// - Counts consecutive dispatch failures
/// - Opens for `cooldown` once `failure_threshold` is reached
/// - After the cooldown the replica is admitted again with a clean count
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    /// Whether a dispatch to the guarded replica may proceed now.
    pub fn allow(&self) -> bool {
        let Ok(mut st) = self.state.lock() else {
            // fail open: a broken breaker must not take the replica out of rotation
            return true;
        };
        match st.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                st.open_until = None;
                st.consecutive_failures = 0;
                true
            }
            None => true,
        }
    }

    pub fn on_success(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = 0;
            st.open_until = None;
        }
    }

    pub fn on_failure(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            if st.consecutive_failures >= self.cfg.failure_threshold && st.open_until.is_none() {
                st.open_until = Some(Instant::now() + self.cfg.cooldown);
            }
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let (consecutive_failures, open_remaining_ms) = match self.state.lock() {
            Ok(st) => (
                st.consecutive_failures,
                st.open_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).as_millis() as u64),
            ),
            Err(_) => (0, None),
        };
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures,
            open_remaining_ms,
        }
    }
}
