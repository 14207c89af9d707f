//! Configuration options for TableDb.

use common::StorageConfig;
use objectstore::Durability;

use crate::database::DEFAULT_DATABASE_NAME;

/// Configuration for opening a [`Database`](crate::Database).
///
/// The default opens [`DEFAULT_DATABASE_NAME`] in memory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the underlying database. Must not be empty.
    pub name: String,

    /// Storage backend configuration.
    pub storage: StorageConfig,

    /// Options applied to every write transaction.
    pub write: WriteOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_DATABASE_NAME.to_string(),
            storage: StorageConfig::default(),
            write: WriteOptions::default(),
        }
    }
}

impl Config {
    /// In-memory configuration for the named database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Options for write operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// If true, writes flush storage before the operation returns.
    /// Default: false (returns once the write is visible).
    pub await_durable: bool,
}

impl WriteOptions {
    pub(crate) fn durability(&self) -> Durability {
        if self.await_durable {
            Durability::Strict
        } else {
            Durability::Relaxed
        }
    }
}
