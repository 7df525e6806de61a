//! 类型模块：定义作业记录、作业状态与推理结果等核心数据类型。
//!
//! # Types Module
//!
//! Core data types shared by the admission path, the worker pool and the
//! HTTP surface.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`JobRecord`] | Full lifecycle record of one admitted job, as returned by polling |
//! | [`JobStatus`] | `queued → processing → completed / failed` |
//! | [`InferenceResult`] | Replica response: filename, inference time, ranked predictions |
//! | [`Job`] | Queue item carrying the payload a worker needs to dispatch |
//!
//! ## Example
//!
//! ```rust
//! use infer_dispatch::types::{JobRecord, JobStatus};
//!
//! let record = JobRecord::queued("req-1", "cat.jpg", "abc123");
//! assert_eq!(record.status, JobStatus::Queued);
//! assert!(record.status.can_transition_to(JobStatus::Processing));
//! ```

pub mod job;

pub use job::{InferenceResult, Job, JobRecord, JobStatus};
