//! A single-table key/value store of named memories.

use common::StorageConfig;
use objectstore::{Connection, Key, ObjectStoreEngine, StoreParams, TransactionMode};
use serde_json::{Value, json};

use crate::error::Result;
use crate::response::{Lookup, Outcome, ResponseMessage};

/// Database holding the memories.
pub const MEMORY_DATABASE_NAME: &str = "memoryDB";
/// Store holding the memories, keyed by `name`.
pub const MEMORY_STORE_NAME: &str = "memories";

const MEMORY_VERSION: u64 = 1;

/// Named values in one fixed store.
///
/// Each memory is stored as `{"name": ..., "value": ...}`. There is no
/// schema and no index; the name is the primary key.
pub struct Memory {
    connection: Connection,
}

impl Memory {
    /// Opens the memory database on storage built from `config`.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let engine = ObjectStoreEngine::open_with_config(config).await?;
        Self::with_engine(engine).await
    }

    /// Opens the memory database on an existing engine.
    pub async fn with_engine(engine: ObjectStoreEngine) -> Result<Self> {
        let connection = engine
            .open(MEMORY_DATABASE_NAME, Some(MEMORY_VERSION), |change| {
                if !change.contains(MEMORY_STORE_NAME) {
                    change
                        .create_object_store(MEMORY_STORE_NAME, StoreParams::new("name", false))?;
                }
                Ok(())
            })
            .await?;
        Ok(Self { connection })
    }

    /// Stores a new memory. Returns a 409 if the name is taken.
    #[tracing::instrument(level = "debug", skip_all, fields(memory = %name))]
    pub async fn create(&self, name: &str, value: Value) -> Outcome {
        let created = self
            .insert(name, value)
            .await
            .map_err(|err| failure(format!("Error creating memory {}.", name), err))?;

        if !created {
            return Err(ResponseMessage::conflict(format!(
                "Memory {} already exists.",
                name
            )));
        }
        Ok(ResponseMessage::created(format!(
            "Memory {} created successfully.",
            name
        )))
    }

    /// Reads the value of a memory.
    #[tracing::instrument(level = "debug", skip_all, fields(memory = %name))]
    pub async fn read(&self, name: &str) -> Outcome<Lookup<Value>> {
        let stored = self
            .get(name)
            .await
            .map_err(|err| failure(format!("Error reading memory {}.", name), err))?;
        Ok(match stored {
            Some(mut memory) => {
                Lookup::Found(memory.get_mut("value").map(Value::take).unwrap_or_default())
            }
            None => Lookup::NotFound(does_not_exist(name)),
        })
    }

    /// Deletes a memory. Returns a 404 outcome if it does not exist.
    #[tracing::instrument(level = "debug", skip_all, fields(memory = %name))]
    pub async fn delete(&self, name: &str) -> Outcome {
        let deleted = self
            .remove(name)
            .await
            .map_err(|err| failure(format!("Error deleting memory {}.", name), err))?;

        if !deleted {
            return Ok(does_not_exist(name));
        }
        Ok(ResponseMessage::ok(format!(
            "Memory {} deleted successfully.",
            name
        )))
    }

    async fn get(&self, name: &str) -> objectstore::Result<Option<Value>> {
        let tx = self
            .connection
            .transaction(&[MEMORY_STORE_NAME], TransactionMode::ReadOnly)
            .await?;
        tx.object_store(MEMORY_STORE_NAME)?.get(&Key::from(name)).await
    }

    /// Puts the memory unless the name is taken; check and write share
    /// one read-write transaction.
    async fn insert(&self, name: &str, value: Value) -> objectstore::Result<bool> {
        let tx = self
            .connection
            .transaction(&[MEMORY_STORE_NAME], TransactionMode::ReadWrite)
            .await?;
        let store = tx.object_store(MEMORY_STORE_NAME)?;
        if store.get(&Key::from(name)).await?.is_some() {
            return Ok(false);
        }
        store.put(json!({"name": name, "value": value})).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn remove(&self, name: &str) -> objectstore::Result<bool> {
        let tx = self
            .connection
            .transaction(&[MEMORY_STORE_NAME], TransactionMode::ReadWrite)
            .await?;
        let store = tx.object_store(MEMORY_STORE_NAME)?;
        let key = Key::from(name);
        if store.get(&key).await?.is_none() {
            return Ok(false);
        }
        store.delete(&key).await?;
        tx.commit().await?;
        Ok(true)
    }
}

fn does_not_exist(name: &str) -> ResponseMessage {
    ResponseMessage::not_found(format!("Memory {} does not exist.", name))
}

fn failure(message: String, err: objectstore::Error) -> ResponseMessage {
    tracing::warn!(error = %err, "{}", message);
    ResponseMessage::internal(message, err)
}
