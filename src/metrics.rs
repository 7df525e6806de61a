//! Process-wide dispatcher metrics.
//!
//! Counters are plain atomics updated by the admission path and the workers;
//! [`Metrics::report`] derives rates and averages on read. A report is not an
//! atomic cut across all counters, which is acceptable for status polling and
//! autoscaling.

use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::store::StatusCounts;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct DurationSum {
    micros: AtomicU64,
    count: AtomicU64,
}

impl DurationSum {
    fn record(&self, d: Duration) {
        self.micros
            .fetch_add(d.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn average_secs(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.micros.load(Ordering::Relaxed) as f64 / count as f64 / 1_000_000.0
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

pub struct Metrics {
    started: Instant,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rejected_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    processing: DurationSum,
    queue_wait: DurationSum,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            processing: DurationSum::default(),
            queue_wait: DurationSum::default(),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A request answered straight from the cache.
    pub fn record_cache_served(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Time a job spent queued before a worker picked it up.
    pub fn record_queue_wait(&self, waited: Duration) {
        self.queue_wait.record(waited);
    }

    pub fn record_success(&self, processing: Duration) {
        self.processing.record(processing);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed job; `processing` is `None` when no replica was called.
    pub fn record_failure(&self, processing: Option<Duration>) {
        if let Some(processing) = processing {
            self.processing.record(processing);
        }
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn counters(&self) -> Counters {
        Counters {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dispatched_jobs: self.processing.count(),
        }
    }

    /// Combine counters with point-in-time gauges into a status report.
    pub fn report(&self, gauges: Gauges) -> StatusReport {
        let c = self.counters();
        let uptime = self.uptime().as_secs_f64();
        let lookups = c.cache_hits + c.cache_misses;
        let open_circuits = gauges
            .circuit_breakers
            .iter()
            .filter(|b| b.state.is_open())
            .count();

        StatusReport {
            total_requests: c.total_requests,
            successful_requests: c.successful_requests,
            failed_requests: c.failed_requests,
            rejected_requests: c.rejected_requests,
            stored_results: gauges.stored_results,
            jobs: gauges.jobs,
            queue_size: gauges.queue_size,
            endpoint_url: gauges.replicas.join(","),
            replicas: gauges.replicas,
            workers: gauges.workers,
            uptime_seconds: round2(uptime),
            cache_metrics: CacheMetrics {
                cache_hits: c.cache_hits,
                cache_misses: c.cache_misses,
                cache_hit_rate: percent(c.cache_hits, lookups),
                cache_size: gauges.cache_size,
                cache_capacity: gauges.cache_capacity,
                cache_utilization: percent(gauges.cache_size as u64, gauges.cache_capacity as u64),
            },
            health_metrics: HealthMetrics {
                status: "healthy",
                error_rate: percent(c.failed_requests, c.total_requests),
                rejection_rate: percent(c.rejected_requests, c.total_requests),
                open_circuits,
                circuit_breakers: gauges.circuit_breakers,
            },
            performance_metrics: PerformanceMetrics {
                avg_processing_time: round4(self.processing.average_secs()),
                avg_queue_time: round4(self.queue_wait.average_secs()),
                throughput: if uptime > 0.0 {
                    round4(c.successful_requests as f64 / uptime)
                } else {
                    0.0
                },
                dispatched_jobs: c.dispatched_jobs,
                selection_strategy: gauges.selection_strategy,
            },
            queue_metrics: QueueMetrics {
                queue_size: gauges.queue_size,
                queue_capacity: gauges.queue_capacity,
                queue_utilization: percent(gauges.queue_size as u64, gauges.queue_capacity as u64),
                peak_queue_size: gauges.peak_queue_size,
            },
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Raw counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Jobs that reached a replica call (success or failure).
    pub dispatched_jobs: u64,
}

/// Values owned by other components, sampled when a report is built.
#[derive(Debug, Clone, Default)]
pub struct Gauges {
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub peak_queue_size: usize,
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub stored_results: usize,
    pub jobs: StatusCounts,
    pub replicas: Vec<String>,
    pub workers: usize,
    pub selection_strategy: &'static str,
    pub circuit_breakers: Vec<ReplicaBreaker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicaBreaker {
    pub replica: String,
    #[serde(flatten)]
    pub state: CircuitBreakerSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub stored_results: usize,
    /// Stored records by lifecycle status.
    pub jobs: StatusCounts,
    pub queue_size: usize,
    pub endpoint_url: String,
    pub replicas: Vec<String>,
    pub workers: usize,
    pub uptime_seconds: f64,
    pub cache_metrics: CacheMetrics,
    pub health_metrics: HealthMetrics,
    pub performance_metrics: PerformanceMetrics,
    pub queue_metrics: QueueMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percent of lookups that hit.
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub cache_capacity: usize,
    /// Percent of capacity in use.
    pub cache_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub status: &'static str,
    /// Failed jobs as a percent of all requests.
    pub error_rate: f64,
    pub rejection_rate: f64,
    pub open_circuits: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub circuit_breakers: Vec<ReplicaBreaker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    /// Mean replica round trip, seconds.
    pub avg_processing_time: f64,
    /// Mean time from admission to dequeue, seconds.
    pub avg_queue_time: f64,
    /// Successful requests per second of uptime.
    pub throughput: f64,
    pub dispatched_jobs: u64,
    pub selection_strategy: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub queue_size: usize,
    pub queue_capacity: usize,
    /// Percent of capacity in use.
    pub queue_utilization: f64,
    pub peak_queue_size: usize,
}
