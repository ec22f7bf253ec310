//! Per-entity vitals anomaly model lifecycle
//!
//! This crate provides the core functionality for:
//! - Isolation forest anomaly classifier
//! - Durable per-entity model artifact storage
//! - Training from an observation source with minimum sample checks
//! - Point-in-time anomaly prediction
//! - Batch retraining sweeps and their scheduling
//! - Health checks and observability

pub mod detector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod source;
pub mod store;
pub mod sweep;
pub mod trainer;

pub use error::{ClassifierError, PredictError, SourceError, StoreError, SweepError, TrainError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use predictor::Predictor;
pub use store::ArtifactStore;
pub use sweep::{BatchOrchestrator, SweepScheduler};
pub use trainer::{Trainer, TrainingConfig};
