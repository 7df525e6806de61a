//! Job lifecycle types.

use crate::cache::Fingerprint;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Statuses only move forward; terminal statuses never change.
    ///
    /// `queued → completed/failed` is allowed so a job that cannot be
    /// dispatched at all can still be closed out.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == *self || next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body returned by a replica's inference endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub filename: String,
    /// Seconds spent inside the replica.
    pub inference_time: f64,
    /// Labels ordered by confidence, most likely first.
    pub predictions: Vec<String>,
}

/// Record of one admitted job, owned by the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub request_id: String,
    pub filename: String,
    pub fingerprint: String,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds spent on the replica round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<InferenceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub from_cache: bool,
}

impl JobRecord {
    pub fn queued(
        request_id: impl Into<String>,
        filename: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            filename: filename.into(),
            fingerprint: fingerprint.into(),
            status: JobStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time: None,
            replica_used: None,
            result: None,
            error: None,
            from_cache: false,
        }
    }

    /// Completed record synthesised for a cache hit.
    pub fn cached(
        request_id: impl Into<String>,
        filename: impl Into<String>,
        fingerprint: impl Into<String>,
        result: InferenceResult,
    ) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Completed,
            completed_at: Some(now),
            processing_time: Some(0.0),
            result: Some(result),
            from_cache: true,
            ..Self::queued(request_id, filename, fingerprint)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Unit of work held by the queue until a worker picks it up.
#[derive(Debug, Clone)]
pub struct Job {
    pub request_id: String,
    pub filename: String,
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn new(
        request_id: impl Into<String>,
        filename: impl Into<String>,
        fingerprint: Fingerprint,
        payload: Bytes,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            filename: filename.into(),
            fingerprint,
            payload,
            enqueued_at: Instant::now(),
        }
    }
}
