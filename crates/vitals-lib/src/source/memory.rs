//! In-memory observation source for tests and local runs

use super::{EntitySource, ObservationSource};
use crate::error::SourceError;
use crate::models::Observation;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

/// Observation source backed by a map of entity id to readings
///
/// Entities can be marked as failing to exercise error handling.
#[derive(Debug, Default)]
pub struct MemorySource {
    observations: RwLock<BTreeMap<String, Vec<Observation>>>,
    failing: RwLock<HashSet<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append readings for an entity, registering it if unknown
    pub fn insert(&self, entity_id: &str, observations: impl IntoIterator<Item = Observation>) {
        let mut map = self.observations.write().unwrap_or_else(|e| e.into_inner());
        map.entry(entity_id.to_string())
            .or_default()
            .extend(observations);
    }

    /// Replace every reading held for an entity
    pub fn replace(&self, entity_id: &str, observations: impl IntoIterator<Item = Observation>) {
        let mut map = self.observations.write().unwrap_or_else(|e| e.into_inner());
        map.insert(entity_id.to_string(), observations.into_iter().collect());
    }

    /// Register an entity without readings
    pub fn register(&self, entity_id: &str) {
        self.insert(entity_id, std::iter::empty());
    }

    /// Make every fetch for `entity_id` fail
    pub fn fail_entity(&self, entity_id: &str) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.insert(entity_id.to_string());
    }

    /// Undo `fail_entity`
    pub fn recover_entity(&self, entity_id: &str) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.remove(entity_id);
    }
}

#[async_trait]
impl ObservationSource for MemorySource {
    async fn fetch(&self, entity_id: &str) -> Result<Vec<Observation>, SourceError> {
        let failing = self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(entity_id);
        if failing {
            return Err(SourceError::Unavailable(format!(
                "fetch for entity '{}' failed",
                entity_id
            )));
        }

        Ok(self
            .observations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl EntitySource for MemorySource {
    async fn list_entity_ids(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .observations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}
