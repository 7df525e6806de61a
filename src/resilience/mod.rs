//! 弹性模块：为副本提供熔断保护。
//!
//! # Resilience Module
//!
//! Opt-in failure isolation for replicas. The base dispatcher rotates over
//! every configured replica; when a `circuit_breaker` section is configured,
//! [`crate::routing::BreakerSelector`] wraps the round-robin selector with
//! one [`circuit_breaker::CircuitBreaker`] per replica and skips replicas
//! whose breaker is open.
//!
//! ```rust
//! use infer_dispatch::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_cooldown(Duration::from_secs(15)),
//! );
//! if breaker.allow() {
//!     // dispatch...
//!     breaker.on_success();
//! }
//! ```

pub mod circuit_breaker;
