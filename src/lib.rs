//! # infer-dispatch
//!
//! 面向图像分类副本的异步推理请求调度器。
//!
//! Asynchronous request dispatcher for a pool of image-classification
//! replicas. Clients upload an image, receive a request id immediately and
//! poll for the result while a bounded worker pool forwards the work.
//!
//! ## Overview
//!
//! Every upload is fingerprinted (SHA-256 of the bytes). A fingerprint already
//! seen is answered from an LRU result cache; anything else is queued in a
//! bounded FIFO and rejected outright when the queue is full. Workers pull
//! jobs, pick a replica round robin, call its synchronous `/predict`
//! endpoint and record the outcome in the result store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use infer_dispatch::{Dispatcher, DispatcherConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> infer_dispatch::Result<()> {
//!     let config = DispatcherConfig::load()?;
//!     let dispatcher = Arc::new(Dispatcher::new(config)?);
//!     dispatcher.start();
//!
//!     infer_dispatch::server::serve(Arc::clone(&dispatcher), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Defaults, YAML file and environment overrides |
//! | [`types`] | Job records, statuses and inference results |
//! | [`cache`] | Content fingerprints and the LRU result cache |
//! | [`queue`] | Bounded FIFO job queue |
//! | [`routing`] | Replica selection strategies |
//! | [`resilience`] | Per-replica circuit breaker |
//! | [`transport`] | Replica client |
//! | [`store`] | Request id → job record |
//! | [`metrics`] | Counters and the status report |
//! | [`dispatcher`] | Admission path and worker pool |
//! | [`server`] | axum HTTP front end |

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod queue;
pub mod resilience;
pub mod routing;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use cache::{Fingerprint, ResultCache};
pub use config::DispatcherConfig;
pub use dispatcher::{Admission, Dispatcher};
pub use metrics::{Metrics, StatusReport};
pub use queue::JobQueue;
pub use routing::{Replica, ReplicaSelector, RoundRobinSelector};
pub use store::ResultStore;
pub use transport::{HttpReplicaClient, InferenceBackend, TransportError};
pub use types::{InferenceResult, Job, JobRecord, JobStatus};

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

mod error;

pub use error::{Error, ErrorContext};
