//! In-process artifact store for tests and ephemeral deployments

use super::{check_key, ArtifactStore};
use crate::error::StoreError;
use crate::models::{ArtifactSummary, ModelArtifact};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Artifact store backed by a map; contents are lost on restart
///
/// The store can be switched into a failing mode to exercise error handling.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<BTreeMap<String, Arc<ModelArtifact>>>,
    failing: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }

    /// Make every operation fail with an I/O error until `recover` is called
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Undo `fail`; stored artifacts are untouched
    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "artifact store unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, entity_id: &str, artifact: ModelArtifact) -> Result<(), StoreError> {
        check_key(entity_id, &artifact)?;
        self.check_available()?;
        self.artifacts
            .write()
            .await
            .insert(entity_id.to_string(), Arc::new(artifact));
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Arc<ModelArtifact>, StoreError> {
        self.check_available()?;
        self.artifacts
            .read()
            .await
            .get(entity_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(entity_id.to_string()))
    }

    async fn exists(&self, entity_id: &str) -> bool {
        if self.check_available().is_err() {
            return false;
        }
        self.artifacts.read().await.contains_key(entity_id)
    }

    async fn list(&self) -> Result<Vec<ArtifactSummary>, StoreError> {
        self.check_available()?;
        Ok(self
            .artifacts
            .read()
            .await
            .values()
            .map(|artifact| artifact.summary())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Classifier, DetectorConfig, IsolationForest};

    fn artifact(entity_id: &str) -> ModelArtifact {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![60.0 + i as f64]).collect();
        let forest = IsolationForest::fit(&rows, &DetectorConfig::default()).unwrap();
        ModelArtifact::new(entity_id, vec!["heart_rate".to_string()], forest, rows.len()).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryArtifactStore::new();
        assert!(matches!(store.get("p3").await, Err(StoreError::NotFound(_))));
        assert!(!store.exists("p3").await);
    }

    #[tokio::test]
    async fn test_put_replaces_previous_artifact() {
        let store = MemoryArtifactStore::new();
        store.put("p1", artifact("p1")).await.unwrap();
        let first = store.get("p1").await.unwrap();

        store.put("p1", artifact("p1")).await.unwrap();
        let second = store.get("p1").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failing_store_errors_until_recovered() {
        let store = MemoryArtifactStore::new();
        store.put("p1", artifact("p1")).await.unwrap();

        store.fail();
        assert!(matches!(store.get("p1").await, Err(StoreError::Io(_))));
        assert!(matches!(store.put("p1", artifact("p1")).await, Err(StoreError::Io(_))));
        assert!(store.list().await.is_err());
        assert!(!store.exists("p1").await);

        store.recover();
        assert!(store.get("p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_rejects_mismatched_key() {
        let store = MemoryArtifactStore::new();
        let result = store.put("p2", artifact("p1")).await;
        assert!(matches!(result, Err(StoreError::KeyMismatch { .. })));
        assert!(store.is_empty().await);
    }
}
