//! Filesystem artifact store
//!
//! Each artifact is a JSON document in the model directory, named after the
//! entity. Documents carry a SHA256 checksum of the serialized classifier
//! which is verified on every load. Writes go to a temp file that is synced
//! and then renamed over the target, so readers never see a partial document.

use super::{check_key, ArtifactStore};
use crate::error::StoreError;
use crate::models::{ArtifactSummary, ModelArtifact};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Version of the on-disk document layout
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const ARTIFACT_SUFFIX: &str = "_model.json";

#[derive(Serialize)]
struct StoredArtifactRef<'a> {
    format_version: u32,
    checksum: String,
    artifact: &'a ModelArtifact,
}

#[derive(Deserialize)]
struct StoredArtifact {
    format_version: u32,
    checksum: String,
    artifact: ModelArtifact,
}

/// Artifact store persisting one JSON document per entity
pub struct FsArtifactStore {
    model_dir: PathBuf,
    /// Decoded artifacts; replaced on every successful put
    cache: DashMap<String, Arc<ModelArtifact>>,
    temp_counter: AtomicU64,
}

impl FsArtifactStore {
    /// Open a store rooted at `model_dir`, creating the directory if needed
    pub fn open(model_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let model_dir = model_dir.into();
        std::fs::create_dir_all(&model_dir)?;

        info!(model_dir = %model_dir.display(), "Opened model artifact store");

        Ok(Self {
            model_dir,
            cache: DashMap::new(),
            temp_counter: AtomicU64::new(0),
        })
    }

    fn path_for(&self, entity_id: &str) -> Result<PathBuf, StoreError> {
        artifact_file_name(entity_id)
            .map(|name| self.model_dir.join(name))
            .ok_or_else(|| StoreError::InvalidEntityId(entity_id.to_string()))
    }

    async fn load(&self, entity_id: &str, path: &Path) -> Result<ModelArtifact, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(entity_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let artifact = decode(entity_id, &bytes)?;
        if artifact.entity_id != entity_id {
            return Err(corrupt(
                entity_id,
                format!("document belongs to entity '{}'", artifact.entity_id),
            ));
        }

        debug!(entity_id = %entity_id, path = %path.display(), "Loaded model artifact");
        Ok(artifact)
    }

    async fn write_atomically(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self.model_dir.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        let result: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp artifact file");
                }
            }
            return Err(e.into());
        }

        sync_dir(&self.model_dir).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, entity_id: &str, artifact: ModelArtifact) -> Result<(), StoreError> {
        check_key(entity_id, &artifact)?;
        let path = self.path_for(entity_id)?;

        let checksum = compute_checksum(&serde_json::to_vec(&artifact.classifier)?);
        let document = serde_json::to_vec(&StoredArtifactRef {
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: checksum.clone(),
            artifact: &artifact,
        })?;

        if let Err(e) = self.write_atomically(&path, &document).await {
            // The rename may have landed before the failure; reload from disk
            self.cache.remove(entity_id);
            return Err(e);
        }
        self.cache.insert(entity_id.to_string(), Arc::new(artifact));

        info!(
            entity_id = %entity_id,
            path = %path.display(),
            size = document.len(),
            checksum = %checksum,
            "Model artifact written"
        );

        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Arc<ModelArtifact>, StoreError> {
        if let Some(cached) = self.cache.get(entity_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let path = self.path_for(entity_id)?;
        let loaded = Arc::new(self.load(entity_id, &path).await?);

        // A put that finished while we were reading wins over what we read
        let entry = self.cache.entry(entity_id.to_string()).or_insert(loaded);
        Ok(Arc::clone(entry.value()))
    }

    async fn exists(&self, entity_id: &str) -> bool {
        if self.cache.contains_key(entity_id) {
            return true;
        }
        match self.path_for(entity_id) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn list(&self) -> Result<Vec<ArtifactSummary>, StoreError> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.model_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') || !file_name.ends_with(ARTIFACT_SUFFIX) {
                continue;
            }

            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Failed to read model artifact");
                    continue;
                }
            };

            match decode(&file_name, &bytes) {
                Ok(artifact) if artifact_file_name(&artifact.entity_id).as_deref() == Some(file_name.as_str()) => {
                    summaries.push(artifact.summary());
                }
                Ok(artifact) => {
                    warn!(file = %file_name, entity_id = %artifact.entity_id, "Artifact file name does not match its entity, skipping");
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Skipping unreadable model artifact");
                }
            }
        }

        summaries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(summaries)
    }
}

/// File name for an entity's artifact, `None` for an empty id
///
/// Ids made of ASCII alphanumerics, `-` and `_` are used as-is; anything else
/// is hex encoded behind a `~` prefix so it cannot escape the model directory.
pub fn artifact_file_name(entity_id: &str) -> Option<String> {
    if entity_id.is_empty() {
        return None;
    }

    let plain = entity_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    Some(if plain {
        format!("{}{}", entity_id, ARTIFACT_SUFFIX)
    } else {
        format!("~{}{}", hex::encode(entity_id.as_bytes()), ARTIFACT_SUFFIX)
    })
}

fn decode(label: &str, bytes: &[u8]) -> Result<ModelArtifact, StoreError> {
    let stored: StoredArtifact = serde_json::from_slice(bytes)
        .map_err(|e| corrupt(label, format!("unreadable document: {}", e)))?;

    if stored.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(corrupt(
            label,
            format!("unsupported format version {}", stored.format_version),
        ));
    }

    let computed = compute_checksum(&serde_json::to_vec(&stored.artifact.classifier)?);
    if computed != stored.checksum {
        return Err(corrupt(
            label,
            format!("checksum mismatch: expected {}, got {}", stored.checksum, computed),
        ));
    }

    stored
        .artifact
        .validate()
        .map_err(|e| corrupt(label, e.to_string()))?;

    Ok(stored.artifact)
}

fn corrupt(entity_id: &str, reason: String) -> StoreError {
    StoreError::Corrupt {
        entity_id: entity_id.to_string(),
        reason,
    }
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Flush the directory entry so a finished rename survives a power loss
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
