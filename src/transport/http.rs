use super::{InferenceBackend, TransportError};
use crate::routing::Replica;
use crate::types::InferenceResult;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::env;
use std::time::Duration;

/// Multipart field the replica reads the image from.
pub const IMAGE_FIELD: &str = "image";

/// Calls a replica's synchronous inference endpoint over HTTP.
///
/// One pooled `reqwest::Client` is shared by every worker.
pub struct HttpReplicaClient {
    client: reqwest::Client,
    predict_path: String,
    timeout: Duration,
}

impl HttpReplicaClient {
    pub fn new(timeout: Duration, predict_path: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("DISPATCHER_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let mut predict_path = predict_path.into();
        if !predict_path.starts_with('/') {
            predict_path.insert(0, '/');
        }

        Ok(Self {
            client,
            predict_path,
            timeout,
        })
    }

    pub fn predict_url(&self, replica: &Replica) -> String {
        format!("{}{}", replica.url(), self.predict_path)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl InferenceBackend for HttpReplicaClient {
    async fn infer(
        &self,
        replica: &Replica,
        filename: &str,
        payload: Bytes,
    ) -> std::result::Result<InferenceResult, TransportError> {
        let part = Part::bytes(payload.to_vec()).file_name(filename.to_string());
        let form = Form::new().part(IMAGE_FIELD, part);

        let response = self
            .client
            .post(self.predict_url(replica))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<InferenceResult>()
            .await
            .map_err(|e| match self.classify(e) {
                TransportError::Http(e) => TransportError::Decode(e.to_string()),
                other => other,
            })
    }
}

impl HttpReplicaClient {
    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(e)
        }
    }
}
