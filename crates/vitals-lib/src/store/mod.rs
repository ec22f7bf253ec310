//! Model artifact storage
//!
//! One artifact per entity. Writes replace the whole artifact at once, so a
//! concurrent reader sees either the previous artifact or the new one.

mod fs;
mod memory;

pub use fs::{artifact_file_name, FsArtifactStore, ARTIFACT_FORMAT_VERSION};
pub use memory::MemoryArtifactStore;

use crate::error::StoreError;
use crate::models::{ArtifactSummary, ModelArtifact};
use async_trait::async_trait;
use std::sync::Arc;

/// Keyed store of trained model artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `artifact` under `entity_id`, replacing any previous one
    async fn put(&self, entity_id: &str, artifact: ModelArtifact) -> Result<(), StoreError>;

    /// Load the artifact for `entity_id`, `StoreError::NotFound` if none exists
    async fn get(&self, entity_id: &str) -> Result<Arc<ModelArtifact>, StoreError>;

    /// Existence check; never fails
    async fn exists(&self, entity_id: &str) -> bool;

    /// Summaries of every readable artifact, sorted by entity id
    async fn list(&self) -> Result<Vec<ArtifactSummary>, StoreError>;
}

pub(crate) fn check_key(entity_id: &str, artifact: &ModelArtifact) -> Result<(), StoreError> {
    if entity_id.is_empty() {
        return Err(StoreError::InvalidEntityId(entity_id.to_string()));
    }
    if artifact.entity_id != entity_id {
        return Err(StoreError::KeyMismatch {
            key: entity_id.to_string(),
            entity_id: artifact.entity_id.clone(),
        });
    }
    Ok(())
}
