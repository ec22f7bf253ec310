//! HTTP API for predictions, training, model status, health checks and metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use vitals_lib::{
    health::{components as health_components, ComponentStatus, HealthRegistry},
    source::{EntitySource, ObservationSource},
    sweep::{
        shutdown_signal, BatchOrchestrator, SchedulerConfig, SweepConfig, SweepRecord,
        SweepScheduler, SweepSummary,
    },
    ArtifactStore, ArtifactSummary, FeatureValues, PredictError, Predictor, StoreError,
    StructuredLogger, SweepError, Trainer, TrainingConfig, TrainingOutcome, TrainingStatus,
};

/// Classifier family reported by `/v1/models`
pub const MODEL_NAME: &str = "isolation-forest";

/// Version of the model contract reported by `/v1/models`
pub const MODEL_VERSION: &str = "1.0";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub store: Arc<dyn ArtifactStore>,
    pub trainer: Arc<Trainer>,
    pub predictor: Arc<Predictor>,
    pub scheduler: Arc<SweepScheduler>,
}

/// Everything needed to wire the lifecycle components together
pub struct Components {
    pub store: Arc<dyn ArtifactStore>,
    pub observations: Arc<dyn ObservationSource>,
    pub entities: Arc<dyn EntitySource>,
    pub training: TrainingConfig,
    pub sweep: SweepConfig,
    pub scheduler: SchedulerConfig,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, components: Components) -> Self {
        let trainer = Arc::new(
            Trainer::new(
                components.observations,
                components.store.clone(),
                components.training,
            )
            .with_logger(components.logger)
            .with_health(health_registry.clone()),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            trainer.clone(),
            components.entities,
            components.sweep,
        ));
        let scheduler = Arc::new(SweepScheduler::new(
            orchestrator,
            health_registry.clone(),
            components.scheduler,
        ));

        Self {
            health_registry: health_registry.clone(),
            predictor: Arc::new(
                Predictor::new(components.store.clone()).with_health(health_registry.clone()),
            ),
            store: components.store,
            trainer,
            scheduler,
        }
    }

    /// Read the artifact store once and reflect the result on the `store` component
    pub async fn check_store(&self) {
        match self.store.list().await {
            Ok(models) => {
                info!(model_count = models.len(), "Artifact store readable");
                self.health_registry.restore(health_components::STORE).await;
            }
            Err(e) => self.store_failed(&e).await,
        }
    }

    async fn store_failed(&self, e: &StoreError) {
        error!(error = %e, "Artifact store check failed");
        self.health_registry
            .set_degraded(
                health_components::STORE,
                format!("Failed to list models: {}", e),
            )
            .await;
    }
}

/// Error body in the `{"detail": ...}` shape clients already parse
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Prediction request; `heart_rate` is shorthand for a `heart_rate` feature
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub patient_id: String,
    #[serde(default)]
    pub heart_rate: Option<f64>,
    #[serde(default)]
    pub features: FeatureValues,
}

impl PredictRequest {
    pub fn feature_values(&self) -> FeatureValues {
        let mut features = self.features.clone();
        if let Some(heart_rate) = self.heart_rate {
            features.insert(vitals_lib::DEFAULT_FEATURE.to_string(), heart_rate);
        }
        features
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: bool,
    pub anomaly_score: f64,
}

/// One entity's training result
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResult {
    pub patient_id: String,
    pub status: TrainingStatus,
    pub message: String,
}

impl From<TrainingOutcome> for TrainResult {
    fn from(outcome: TrainingOutcome) -> Self {
        Self {
            patient_id: outcome.entity_id,
            status: outcome.status,
            message: outcome.message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TrainAllResponse {
    pub results: Vec<TrainResult>,
    pub summary: SweepSummary,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub status: &'static str,
    /// RFC 3339 training time of the artifact
    pub version: String,
    #[serde(flatten)]
    pub summary: ArtifactSummary,
}

impl From<ArtifactSummary> for ModelInfo {
    fn from(summary: ArtifactSummary) -> Self {
        Self {
            status: "loaded",
            version: summary.trained_at.to_rfc3339(),
            summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub models: Vec<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepRecord>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(json!({
            "status": health.message(),
            "components": health.components,
        })),
    )
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::internal(format!("Failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = match state.store.list().await {
        Ok(models) => models,
        Err(e) => {
            state.store_failed(&e).await;
            return Err(ApiError::internal(format!("Failed to list models: {}", e)));
        }
    };

    Ok(Json(ModelsResponse {
        name: MODEL_NAME,
        version: MODEL_VERSION,
        status: if models.is_empty() { "not loaded" } else { "loaded" },
        models: models.into_iter().map(ModelInfo::from).collect(),
        last_sweep: state.scheduler.last_sweep().await,
    }))
}

async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(&entity_id).await {
        Ok(artifact) => Ok(Json(ModelInfo::from(artifact.summary())).into_response()),
        Err(StoreError::NotFound(_)) => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "patient_id": entity_id, "status": "not loaded" })),
        )
            .into_response()),
        Err(e) => {
            error!(entity_id = %entity_id, error = %e, "Failed to load model");
            Err(ApiError::internal(format!("Failed to load model: {}", e)))
        }
    }
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let features = request.feature_values();

    match state.predictor.predict(&request.patient_id, &features).await {
        Ok(prediction) => Ok(Json(PredictResponse {
            prediction: prediction.is_anomaly,
            anomaly_score: prediction.score,
        })),
        Err(PredictError::NotFound(_)) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!(
                "Model for patient {} not found. Please trigger training first.",
                request.patient_id
            ),
        )),
        Err(e) if e.is_client_error() => {
            Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
        Err(e) => Err(ApiError::internal(format!("Failed to predict: {}", e))),
    }
}

async fn train_all(State(state): State<Arc<AppState>>) -> Result<Json<TrainAllResponse>, ApiError> {
    let report = match state.scheduler.trigger().await {
        Ok(report) => report,
        Err(e @ SweepError::InProgress) => {
            return Err(ApiError::new(StatusCode::CONFLICT, e.to_string()))
        }
    };

    if let Some(error) = report.enumeration_error {
        return Err(ApiError::internal(format!(
            "Failed to list patient IDs: {}",
            error
        )));
    }
    if report.entity_count == 0 {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "No patient IDs found"));
    }

    Ok(Json(TrainAllResponse {
        summary: report.summary,
        results: report.outcomes.into_iter().map(TrainResult::from).collect(),
    }))
}

async fn train_one(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> impl IntoResponse {
    let outcome = state.trainer.train(&entity_id).await;

    let status_code = match outcome.status {
        TrainingStatus::Trained | TrainingStatus::Skipped => StatusCode::OK,
        TrainingStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status_code, Json(TrainResult::from(outcome)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/models/:entity_id", get(get_model))
        .route("/predict", post(predict))
        .route("/train/all", post(train_all))
        .route("/train/:entity_id", post(train_one))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server, stopping once shutdown is broadcast
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}
