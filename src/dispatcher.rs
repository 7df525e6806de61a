//! Admission path and worker pool.
//!
//! ```text
//! client ── submit ──► cache lookup ──hit──► completed record (from_cache)
//!                          │miss
//!                          ▼
//!                 queued record + try_enqueue ──full──► Rejected
//!                          │
//!         workers ◄── dequeue ── JobQueue
//!            │ selector.next() → backend.infer() (bounded by timeout)
//!            ▼
//!   ResultStore (completed / failed) + ResultCache + Metrics
//! ```
//!
//! Every shared component is an `Arc` handed to each worker when it is
//! spawned; there is no ambient global state.

use crate::cache::{Fingerprint, ResultCache};
use crate::config::DispatcherConfig;
use crate::metrics::{Gauges, Metrics, ReplicaBreaker, StatusReport};
use crate::queue::JobQueue;
use crate::routing::{BreakerSelector, DispatchOutcome, Replica, ReplicaSelector, RoundRobinSelector};
use crate::store::ResultStore;
use crate::transport::{HttpReplicaClient, InferenceBackend, TransportError};
use crate::types::{InferenceResult, Job, JobRecord, JobStatus};
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of submitting one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Accepted; poll the result store with `request_id`.
    Queued { request_id: String, queue_size: usize },
    /// Answered from the cache; a completed record exists for `request_id`.
    Cached {
        request_id: String,
        result: InferenceResult,
    },
    /// Queue at capacity; nothing was stored.
    Rejected { queue_size: usize, capacity: usize },
    /// Admission is closed because the dispatcher is stopping.
    ShuttingDown,
}

impl Admission {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Admission::Queued { request_id, .. } | Admission::Cached { request_id, .. } => {
                Some(request_id)
            }
            Admission::Rejected { .. } | Admission::ShuttingDown => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. } | Admission::ShuttingDown)
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<JobQueue<Job>>,
    cache: Arc<ResultCache>,
    store: Arc<ResultStore>,
    selector: Arc<dyn ReplicaSelector>,
    backend: Arc<dyn InferenceBackend>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Dispatcher calling replicas over HTTP.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let backend = HttpReplicaClient::new(config.request_timeout, config.predict_path.clone())?;
        Self::with_backend(config, Arc::new(backend))
    }

    /// Dispatcher using a caller-supplied inference backend.
    pub fn with_backend(config: DispatcherConfig, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;

        let round_robin = RoundRobinSelector::new(config.replicas.iter().cloned().map(Replica::new));
        let selector: Arc<dyn ReplicaSelector> = match config.circuit_breaker.clone() {
            Some(cb) => Arc::new(BreakerSelector::new(round_robin, cb)),
            None => Arc::new(round_robin),
        };

        Ok(Self {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            cache: Arc::new(ResultCache::new(config.cache_capacity)),
            store: Arc::new(ResultStore::with_max_records(config.result_store.max_records)),
            selector,
            backend,
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Spawn the worker pool on the current tokio runtime.
    ///
    /// Returns the number of workers started; calling it again is a no-op.
    pub fn start(&self) -> usize {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !workers.is_empty() {
            return 0;
        }
        for id in 0..self.config.workers {
            workers.push(tokio::spawn(self.worker(id).run()));
        }
        info!(
            workers = self.config.workers,
            replicas = ?self.config.replicas,
            queue_capacity = self.config.queue_capacity,
            "dispatcher started"
        );
        workers.len()
    }

    fn worker(&self, id: usize) -> Worker {
        Worker {
            id,
            queue: Arc::clone(&self.queue),
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            selector: Arc::clone(&self.selector),
            backend: Arc::clone(&self.backend),
            metrics: Arc::clone(&self.metrics),
            timeout: self.config.request_timeout,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Stop admitting work, stop idle workers and wait for in-flight jobs.
    ///
    /// Jobs still queued stay `queued`; nothing is persisted.
    pub async fn shutdown(&self) {
        self.queue.close();
        self.shutdown.cancel();
        let handles: Vec<_> = {
            let mut workers = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            workers.drain(..).collect()
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!(pending = self.queue.len(), "dispatcher stopped");
    }

    /// Admit one image.
    pub fn submit(&self, filename: &str, payload: Bytes) -> Result<Admission> {
        if filename.trim().is_empty() {
            return Err(Error::validation_with_context(
                "Empty filename",
                ErrorContext::new().with_field_path("image.filename"),
            ));
        }
        if payload.is_empty() {
            return Err(Error::validation_with_context(
                "Empty image payload",
                ErrorContext::new().with_field_path("image"),
            ));
        }

        self.metrics.record_request();
        let fingerprint = Fingerprint::of(&payload);
        let cached = self.cache.lookup(&fingerprint);
        self.metrics.record_cache_lookup(cached.is_some());

        let request_id = Uuid::new_v4().to_string();

        if let Some(result) = cached {
            self.store.create(JobRecord::cached(
                &request_id,
                filename,
                fingerprint.as_str(),
                result.clone(),
            ))?;
            self.metrics.record_cache_served();
            info!(request_id = %request_id, filename, "served from cache");
            return Ok(Admission::Cached { request_id, result });
        }

        // the record must exist before a worker can dequeue the job
        self.store
            .create(JobRecord::queued(&request_id, filename, fingerprint.as_str()))?;

        match self
            .queue
            .try_enqueue(Job::new(&request_id, filename, fingerprint, payload))
        {
            Ok(queue_size) => {
                info!(request_id = %request_id, filename, queue_size, "request queued");
                Ok(Admission::Queued {
                    request_id,
                    queue_size,
                })
            }
            Err(rejected) => {
                self.store.remove(&request_id);
                self.metrics.record_rejection();
                if rejected.closed {
                    warn!(filename, "dispatcher shutting down, rejecting request");
                    return Ok(Admission::ShuttingDown);
                }
                let queue_size = self.queue.len();
                warn!(filename, queue_size, capacity = rejected.capacity, "queue full, rejecting request");
                Ok(Admission::Rejected {
                    queue_size,
                    capacity: rejected.capacity,
                })
            }
        }
    }

    /// Current record for `request_id`.
    pub fn result(&self, request_id: &str) -> Result<JobRecord> {
        self.store
            .get(request_id)
            .ok_or_else(|| Error::NotFound(request_id.to_string()))
    }

    pub fn result_ids(&self) -> Vec<String> {
        self.store.ids()
    }

    pub fn status(&self) -> StatusReport {
        let circuit_breakers = self
            .selector
            .breaker_snapshots()
            .into_iter()
            .map(|(replica, state)| ReplicaBreaker {
                replica: replica.to_string(),
                state,
            })
            .collect();
        self.metrics.report(Gauges {
            queue_size: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            peak_queue_size: self.queue.peak(),
            cache_size: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            stored_results: self.store.len(),
            jobs: self.store.status_counts(),
            replicas: self
                .selector
                .replicas()
                .iter()
                .map(|r| r.to_string())
                .collect(),
            workers: self.config.workers,
            selection_strategy: self.selector.strategy(),
            circuit_breakers,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue<Job> {
        &self.queue
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// One worker's handles to the shared components.
struct Worker {
    id: usize,
    queue: Arc<JobQueue<Job>>,
    cache: Arc<ResultCache>,
    store: Arc<ResultStore>,
    selector: Arc<dyn ReplicaSelector>,
    backend: Arc<dyn InferenceBackend>,
    metrics: Arc<Metrics>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "worker started");
        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.queue.dequeue() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let request_id = job.request_id.clone();
            // a panic while handling one job must not take the worker down
            if AssertUnwindSafe(self.process(job)).catch_unwind().await.is_err() {
                error!(worker = self.id, request_id = %request_id, "job handler panicked");
                self.fail(
                    &request_id,
                    "internal error while processing job".to_string(),
                    None,
                    None,
                );
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        self.metrics.record_queue_wait(job.enqueued_at.elapsed());

        let replica = self.selector.next();
        let replica_url = replica.as_ref().map(|r| r.to_string());
        if let Err(e) = self.store.update(&job.request_id, |r| {
            r.status = JobStatus::Processing;
            r.started_at = Some(Utc::now());
            r.replica_used = replica_url;
        }) {
            warn!(worker = self.id, request_id = %job.request_id, error = %e, "cannot start job");
            return;
        }

        let Some(replica) = replica else {
            self.fail(&job.request_id, TransportError::NoReplica.to_string(), None, None);
            return;
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.timeout,
            self.backend.infer(&replica, &job.filename, job.payload.clone()),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => self.complete(&job, &replica, result, elapsed),
            Err(e) => {
                self.selector.report(&replica, DispatchOutcome::Failure);
                self.fail(&job.request_id, e.to_string(), Some(elapsed), Some(&replica));
            }
        }
    }

    fn complete(&self, job: &Job, replica: &Replica, result: InferenceResult, elapsed: Duration) {
        self.selector.report(replica, DispatchOutcome::Success);
        self.cache.insert(job.fingerprint.clone(), result.clone());

        let updated = self.store.update(&job.request_id, |r| {
            r.status = JobStatus::Completed;
            r.completed_at = Some(Utc::now());
            r.processing_time = Some(elapsed.as_secs_f64());
            r.result = Some(result);
        });
        match updated {
            Ok(_) => {
                self.metrics.record_success(elapsed);
                info!(
                    worker = self.id,
                    request_id = %job.request_id,
                    replica = %replica,
                    processing_time = elapsed.as_secs_f64(),
                    "request completed"
                );
            }
            Err(e) => warn!(
                worker = self.id,
                request_id = %job.request_id,
                error = %e,
                "cannot record result"
            ),
        }
    }

    /// Mark the job failed. `elapsed` is `None` when no replica was called.
    ///
    /// Metrics only count the failure if the record actually became `failed`.
    fn fail(
        &self,
        request_id: &str,
        detail: String,
        elapsed: Option<Duration>,
        replica: Option<&Replica>,
    ) {
        warn!(
            worker = self.id,
            request_id,
            replica = replica.map(|r| r.url()).unwrap_or("-"),
            error = %detail,
            "request failed"
        );
        let updated = self.store.update(request_id, |r| {
            r.status = JobStatus::Failed;
            r.completed_at = Some(Utc::now());
            r.processing_time = Some(elapsed.unwrap_or_default().as_secs_f64());
            r.error = Some(detail);
        });
        match updated {
            Ok(_) => self.metrics.record_failure(elapsed),
            Err(e) => warn!(worker = self.id, request_id, error = %e, "cannot record failure"),
        }
    }
}
