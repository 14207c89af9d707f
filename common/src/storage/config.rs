//! Storage backend configuration.

use serde::{Deserialize, Serialize};

/// Selects the byte store backing an engine.
///
/// Deserializes from a tagged table, e.g. `{ "type": "InMemory" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Volatile storage held in process memory. Data lives as long as the
    /// storage instance does.
    #[default]
    InMemory,
}
