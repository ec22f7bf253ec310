//! Observation sources
//!
//! The trainer reads historical readings through [`ObservationSource`] and the
//! batch orchestrator enumerates entities through [`EntitySource`]. Both treat
//! "nothing there" as an empty result, not an error.

mod influx;
mod memory;

pub use influx::{escape_influx_string, InfluxConfig, InfluxSource};
pub use memory::MemorySource;

use crate::error::SourceError;
use crate::models::Observation;
use async_trait::async_trait;

/// Supplies the readings for one entity
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// All readings for `entity_id`, in no particular order; empty if none exist
    async fn fetch(&self, entity_id: &str) -> Result<Vec<Observation>, SourceError>;
}

/// Enumerates every entity known to the data source
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn list_entity_ids(&self) -> Result<Vec<String>, SourceError>;
}
