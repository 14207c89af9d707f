//! Engine entry point: versioned open and the upgrade callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{Storage, StorageConfig, create_storage};
use tokio::sync::RwLock;

use crate::catalog::{DatabaseMeta, IndexMeta, StoreMeta};
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Parameters for a new object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    /// Record field holding the primary key.
    pub key_path: String,
    /// When set, records without a key get the next integer from the
    /// store's key generator.
    pub auto_increment: bool,
}

impl StoreParams {
    pub fn new(key_path: impl Into<String>, auto_increment: bool) -> Self {
        Self {
            key_path: key_path.into(),
            auto_increment,
        }
    }
}

/// Parameters for a new index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParams {
    pub unique: bool,
}

/// Handle to an object store engine.
///
/// The engine owns the byte store and one lock per database name. Cloning is
/// cheap and clones share both.
///
/// Read-write transactions and version changes take a database's lock
/// exclusively, read-only transactions take it shared, so writes to a
/// database are serialized and a version change waits for every running
/// transaction to finish.
#[derive(Clone)]
pub struct ObjectStoreEngine {
    storage: Arc<dyn Storage>,
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl ObjectStoreEngine {
    /// Creates an engine over an existing storage implementation.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates an engine over storage built from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be initialized.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self> {
        let storage = create_storage(config)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self::new(storage))
    }

    /// Returns the stored version of a database, or `None` if it was never
    /// opened.
    pub async fn database_version(&self, name: &str) -> Result<Option<u64>> {
        let meta = DatabaseMeta::load(self.storage.as_ref(), name).await?;
        Ok(meta.map(|m| m.version))
    }

    /// Opens a database, running `upgrade` when the requested version is
    /// higher than the stored one.
    ///
    /// `version: None` opens at the stored version, or at version 1 for a
    /// database that does not exist yet. The upgrade callback runs at most
    /// once per call; the new version and any stores it created are
    /// persisted in one batch only after it returns `Ok`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty name or version 0.
    /// - [`Error::Version`] when `version` is lower than the stored version.
    /// - Whatever the upgrade callback returns; the stored version is then
    ///   left unchanged.
    #[tracing::instrument(level = "debug", skip(self, upgrade))]
    pub async fn open<F>(&self, name: &str, version: Option<u64>, upgrade: F) -> Result<Connection>
    where
        F: FnOnce(&mut VersionChange) -> Result<()>,
    {
        if name.is_empty() {
            return Err(Error::InvalidInput("database name is required".to_string()));
        }
        if version == Some(0) {
            return Err(Error::InvalidInput(
                "database version must be greater than zero".to_string(),
            ));
        }

        let lock = self.lock_for(name)?;
        let _exclusive = lock.write().await;

        let mut meta = DatabaseMeta::load(self.storage.as_ref(), name)
            .await?
            .unwrap_or_default();
        let requested = version.unwrap_or(meta.version.max(1));

        if requested < meta.version {
            return Err(Error::Version(format!(
                "requested version {} is less than the existing version {} of {}",
                requested, meta.version, name
            )));
        }

        if requested > meta.version {
            let old_version = meta.version;
            let mut change = VersionChange {
                old_version,
                new_version: requested,
                meta,
            };
            upgrade(&mut change)?;

            change.meta.version = requested;
            self.storage.apply(vec![change.meta.to_op(name)?]).await?;
            tracing::info!(
                database = name,
                old_version = old_version,
                new_version = requested,
                "Database upgraded"
            );
            meta = change.meta;
        }

        Ok(Connection::new(
            name.to_string(),
            Arc::new(meta),
            Arc::clone(&self.storage),
            Arc::clone(&lock),
        ))
    }

    fn lock_for(&self, name: &str) -> Result<Arc<RwLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to acquire lock table: {}", e)))?;
        Ok(Arc::clone(locks.entry(name.to_string()).or_default()))
    }
}

/// Schema changes permitted while a database is being upgraded.
///
/// Passed to the upgrade callback of [`ObjectStoreEngine::open`].
pub struct VersionChange {
    old_version: u64,
    new_version: u64,
    meta: DatabaseMeta,
}

impl VersionChange {
    /// The stored version before this upgrade, 0 for a new database.
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    pub fn new_version(&self) -> u64 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.meta.stores.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.meta.stores.contains_key(name)
    }

    /// Creates an empty object store and returns a builder for its indexes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Constraint`] if a store with this name exists and
    /// [`Error::InvalidInput`] for an empty name or key path.
    pub fn create_object_store(
        &mut self,
        name: &str,
        params: StoreParams,
    ) -> Result<StoreBuilder<'_>> {
        if name.is_empty() {
            return Err(Error::InvalidInput("object store name is required".to_string()));
        }
        if params.key_path.is_empty() {
            return Err(Error::InvalidInput(format!(
                "object store {} needs a key path",
                name
            )));
        }
        if self.meta.stores.contains_key(name) {
            return Err(Error::Constraint(format!(
                "object store {} already exists",
                name
            )));
        }

        let store = self
            .meta
            .stores
            .entry(name.to_string())
            .or_insert(StoreMeta {
                key_path: params.key_path,
                auto_increment: params.auto_increment,
                indexes: Vec::new(),
            });
        tracing::debug!(store = name, "Created object store");
        Ok(StoreBuilder {
            name: name.to_string(),
            store,
        })
    }
}

/// Adds indexes to a store created during the current upgrade.
pub struct StoreBuilder<'a> {
    name: String,
    store: &'a mut StoreMeta,
}

impl StoreBuilder<'_> {
    /// Declares an index over `key_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Constraint`] if the store already has an index with
    /// this name.
    pub fn create_index(
        &mut self,
        name: &str,
        key_path: &str,
        params: IndexParams,
    ) -> Result<&mut Self> {
        if name.is_empty() || key_path.is_empty() {
            return Err(Error::InvalidInput(format!(
                "index on {} needs a name and a key path",
                self.name
            )));
        }
        if self.store.index(name).is_some() {
            return Err(Error::Constraint(format!(
                "index {} already exists on {}",
                name, self.name
            )));
        }
        self.store.indexes.push(IndexMeta {
            name: name.to_string(),
            key_path: key_path.to_string(),
            unique: params.unique,
        });
        tracing::debug!(store = %self.name, index = name, unique = params.unique, "Created index");
        Ok(self)
    }
}
