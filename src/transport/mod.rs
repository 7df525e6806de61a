//! 传输模块：调用推理副本的同步预测接口。
//!
//! # Replica Transport
//!
//! [`InferenceBackend`] is the seam between the worker pool and the replicas.
//! Production uses [`HttpReplicaClient`]; tests plug in in-process fakes.

mod http;

pub use http::{HttpReplicaClient, IMAGE_FIELD};

use crate::routing::Replica;
use crate::types::InferenceResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run inference for one image on `replica`.
    async fn infer(
        &self,
        replica: &Replica,
        filename: &str,
        payload: Bytes,
    ) -> Result<InferenceResult, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timeout after {:.1}s waiting for replica", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("invalid replica response: {0}")]
    Decode(String),

    #[error("no replica available")]
    NoReplica,

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}
