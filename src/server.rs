//! HTTP front end.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/predict_async` | POST | multipart upload (`image`), returns a request id |
//! | `/result/:request_id` | GET | poll one job record |
//! | `/results` | GET | list stored request ids |
//! | `/health` | GET | liveness |
//! | `/status` | GET | metrics snapshot for dashboards and autoscaling |

use crate::dispatcher::{Admission, Dispatcher};
use crate::metrics::StatusReport;
use crate::transport::IMAGE_FIELD;
use crate::types::{InferenceResult, JobRecord};
use crate::Error;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub status: String,
    pub message: String,
    pub queue_size: usize,
    pub request_id: String,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: String,
    pub from_cache: bool,
    pub request_id: String,
    pub status_url: String,
    pub result: InferenceResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectedResponse {
    pub status: String,
    pub error: String,
    pub queue_size: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub total_results: usize,
    pub results: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn api_error(err: Error) -> ApiError {
    match err {
        Error::Validation { message, .. } => error_response(StatusCode::BAD_REQUEST, message),
        Error::NotFound(_) => error_response(StatusCode::NOT_FOUND, "Request ID not found"),
        other => {
            error!(error = %other, "request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn status_url(request_id: &str) -> String {
    format!("/result/{}", request_id)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/predict_async", post(predict_async_handler))
        .route("/result/:request_id", get(result_handler))
        .route("/results", get(results_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(dispatcher: Arc<Dispatcher>, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&dispatcher.config().bind_address).await?;
    info!(address = %listener.local_addr()?, "dispatcher listening");
    axum::serve(listener, create_router(AppState::new(dispatcher)))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn predict_async_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart =
        multipart.map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?;

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?;
        image = Some((filename, data));
        break;
    }

    let Some((filename, data)) = image else {
        return Err(error_response(StatusCode::BAD_REQUEST, "No image provided"));
    };
    if filename.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "No image selected"));
    }

    let admission = state.dispatcher.submit(&filename, data).map_err(api_error)?;
    let response = match admission {
        Admission::Queued {
            request_id,
            queue_size,
        } => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                status: "queued".to_string(),
                message: "Request queued for processing".to_string(),
                queue_size,
                status_url: status_url(&request_id),
                request_id,
            }),
        )
            .into_response(),
        Admission::Cached { request_id, result } => (
            StatusCode::OK,
            Json(CachedResponse {
                status: "completed".to_string(),
                from_cache: true,
                status_url: status_url(&request_id),
                request_id,
                result,
            }),
        )
            .into_response(),
        Admission::Rejected {
            queue_size,
            capacity,
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RejectedResponse {
                status: "rejected".to_string(),
                error: "Queue is full".to_string(),
                queue_size,
                capacity,
            }),
        )
            .into_response(),
        Admission::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RejectedResponse {
                status: "rejected".to_string(),
                error: "Dispatcher is shutting down".to_string(),
                queue_size: state.dispatcher.queue().len(),
                capacity: state.dispatcher.queue().capacity(),
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn result_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .dispatcher
        .result(&request_id)
        .map(Json)
        .map_err(api_error)
}

async fn results_handler(State(state): State<AppState>) -> Json<ResultsResponse> {
    let results = state.dispatcher.result_ids();
    Json(ResultsResponse {
        total_results: results.len(),
        results,
    })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.dispatcher.status())
}
