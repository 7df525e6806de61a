//! Result store: request id → job record.
//!
//! Records are created by the admission path and advanced by exactly one
//! worker. Status only moves forward (`queued → processing → completed /
//! failed`); a mutation that would reverse it or touch a terminal record is
//! rejected and leaves the record unchanged.
//!
//! Without `max_records` the store keeps every record for the lifetime of
//! the process. With it, creating a record past the limit evicts the oldest
//! terminal record; pending records are never evicted, so the limit can be
//! exceeded while every stored job is still in flight.

use crate::types::{JobRecord, JobStatus};
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    // creation order, used for listing and retention
    order: VecDeque<String>,
}

impl Inner {
    fn evict_oldest_terminal(&mut self) -> Option<String> {
        let pos = self.order.iter().position(|id| {
            self.records
                .get(id)
                .map(|r| r.is_terminal())
                .unwrap_or(true)
        })?;
        let id = self.order.remove(pos)?;
        self.records.remove(&id);
        Some(id)
    }
}

pub struct ResultStore {
    inner: RwLock<Inner>,
    max_records: Option<usize>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_records: None,
        }
    }

    pub fn with_max_records(max_records: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_records,
        }
    }

    // Writers validate on a copy and commit with a single insert, so a
    // poisoned lock never guards a half-applied update.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, record: JobRecord) -> Result<()> {
        let mut inner = self.write();
        if inner.records.contains_key(&record.request_id) {
            return Err(Error::runtime_with_context(
                "duplicate request id",
                ErrorContext::new()
                    .with_details(record.request_id.clone())
                    .with_source("result_store"),
            ));
        }
        if let Some(max) = self.max_records {
            while inner.records.len() >= max {
                match inner.evict_oldest_terminal() {
                    Some(evicted) => debug!(request_id = %evicted, "evicted stored result"),
                    None => break,
                }
            }
        }
        inner.order.push_back(record.request_id.clone());
        inner.records.insert(record.request_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, request_id: &str) -> Option<JobRecord> {
        self.read().records.get(request_id).cloned()
    }

    /// Atomic read-modify-write of one record.
    ///
    /// Returns the updated record, [`Error::NotFound`] for an unknown id, or
    /// [`Error::InvalidTransition`] if `mutate` would move the status
    /// backwards, change a terminal record, or rewrite the request id.
    pub fn update<F>(&self, request_id: &str, mutate: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut inner = self.write();
        let current = inner
            .records
            .get(request_id)
            .ok_or_else(|| Error::NotFound(request_id.to_string()))?;

        let mut next = current.clone();
        mutate(&mut next);

        if !current.status.can_transition_to(next.status) || next.request_id != current.request_id
        {
            return Err(Error::InvalidTransition {
                request_id: request_id.to_string(),
                from: current.status.to_string(),
                to: next.status.to_string(),
            });
        }

        inner.records.insert(request_id.to_string(), next.clone());
        Ok(next)
    }

    /// Drop a record that never became visible as an admitted job.
    pub fn remove(&self, request_id: &str) -> Option<JobRecord> {
        let mut inner = self.write();
        let removed = inner.records.remove(request_id)?;
        inner.order.retain(|id| id != request_id);
        Some(removed)
    }

    /// Request ids in creation order.
    pub fn ids(&self) -> Vec<String> {
        self.read().order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let inner = self.read();
        let mut counts = StatusCounts::default();
        for record in inner.records.values() {
            match record.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}
