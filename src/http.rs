//! HTTP boundary for the assessment pipeline.
//!
//! Request bodies are validated by axum's `Json` extractor, so malformed
//! input is rejected before it reaches the pipeline.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::models::FeatureVector;
use crate::pipeline::{AssessmentPipeline, PipelineError};

pub struct AppState {
    pub pipeline: AssessmentPipeline,
}

impl AppState {
    pub fn new(pipeline: AssessmentPipeline) -> Self {
        Self { pipeline }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/chat", post(chat))
        .route("/monitoring-data", get(monitoring_data))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub classifier: bool,
    pub classifier_version: Option<String>,
    pub generator: bool,
    /// Stored assessments; absent while the store cannot be read.
    pub records: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplanationRequest {
    pub label: String,
    pub factors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExplanationResponse {
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<String>,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        match self {
            PipelineError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    detail: "Model not loaded".to_string(),
                }),
            )
                .into_response(),
        }
    }
}

/// GET /
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let models = state.pipeline.models();
    let records = match state.pipeline.store().count().await {
        Ok(count) => Some(count),
        Err(err) => {
            tracing::warn!(error = %err, "failed to count stored assessments");
            None
        }
    };
    Json(StatusResponse {
        status: "Active".to_string(),
        classifier: models.has_classifier(),
        classifier_version: models
            .classifier()
            .ok()
            .map(|classifier| classifier.version().to_string()),
        generator: models.has_generator(),
        records,
    })
}

/// POST /predict
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(features): Json<FeatureVector>,
) -> Response {
    match state.pipeline.assess(&features).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "prediction rejected");
            err.into_response()
        }
    }
}

/// POST /explain
async fn explain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExplanationRequest>,
) -> Json<ExplanationResponse> {
    let explanation = state
        .pipeline
        .explain(&request.label, &request.factors)
        .await;
    Json(ExplanationResponse { explanation })
}

/// POST /chat
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    Json(state.pipeline.chat(&request.message, &request.history).await)
}

/// GET /monitoring-data
async fn monitoring_data(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.store().list_all().await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to read monitoring data");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    detail: "Monitoring data unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}
