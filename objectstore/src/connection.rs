//! Open database connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::Storage;
use tokio::sync::RwLock;

use crate::catalog::{DatabaseMeta, StoreMeta};
use crate::error::{Error, Result};
use crate::transaction::{Transaction, TxGuard};

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// When a committed transaction counts as done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Durability {
    /// Commit returns once writes are visible.
    #[default]
    Relaxed,
    /// Commit flushes the underlying storage before returning.
    Strict,
}

/// A connection to one database at one version.
///
/// The store layout seen by a connection is fixed at open time; a schema
/// change means opening a new connection at a higher version.
pub struct Connection {
    name: String,
    meta: Arc<DatabaseMeta>,
    storage: Arc<dyn Storage>,
    lock: Arc<RwLock<()>>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        name: String,
        meta: Arc<DatabaseMeta>,
        storage: Arc<dyn Storage>,
        lock: Arc<RwLock<()>>,
    ) -> Self {
        Self {
            name,
            meta,
            storage,
            lock,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.meta.version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.meta.stores.keys().cloned().collect()
    }

    /// Returns the definition of a store, if it exists at this version.
    pub fn store_meta(&self, name: &str) -> Option<&StoreMeta> {
        self.meta.stores.get(name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the connection. Transactions already started run to
    /// completion; new ones fail with [`Error::InvalidState`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(database = %self.name, version = self.version(), "Connection closed");
        }
    }

    /// Starts a transaction over the named stores with relaxed durability.
    pub async fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Transaction> {
        self.transaction_with_durability(stores, mode, Durability::default())
            .await
    }

    /// Starts a transaction over the named stores.
    ///
    /// Waits until the database lock is available in the requested mode.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the connection is closed, including
    ///   while waiting for the lock.
    /// - [`Error::NotFound`] if a named store does not exist.
    pub async fn transaction_with_durability(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        durability: Durability,
    ) -> Result<Transaction> {
        self.ensure_open()?;
        if stores.is_empty() {
            return Err(Error::InvalidInput(
                "a transaction needs at least one object store".to_string(),
            ));
        }
        for store in stores {
            if !self.meta.stores.contains_key(*store) {
                return Err(Error::NotFound(format!(
                    "object store {} not found in {}",
                    store, self.name
                )));
            }
        }

        let guard = match mode {
            TransactionMode::ReadOnly => TxGuard::Shared(Arc::clone(&self.lock).read_owned().await),
            TransactionMode::ReadWrite => {
                TxGuard::Exclusive(Arc::clone(&self.lock).write_owned().await)
            }
        };
        self.ensure_open()?;

        Ok(Transaction::new(
            self.name.clone(),
            mode,
            durability,
            stores.iter().map(|s| s.to_string()).collect(),
            Arc::clone(&self.meta),
            Arc::clone(&self.storage),
            guard,
        ))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "connection to {} (version {}) is closed",
                self.name,
                self.version()
            )));
        }
        Ok(())
    }
}
