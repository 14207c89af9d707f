//! Transactions and the store and index accessors obtained from them.
//!
//! Each write request applies its record, index entry and key generator
//! updates as one atomic [`RecordOp`] batch.

use std::sync::Arc;

use bytes::Bytes;
use common::{PrefixRange, Record, RecordOp, Storage};
use serde_json::{Map, Value};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

use crate::catalog::{DatabaseMeta, IndexMeta, StoreMeta};
use crate::connection::{Durability, TransactionMode};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::serde::{
    decode_key, encode_key, generator_key, index_entry_key, index_value_prefix, record_key,
    record_prefix,
};

/// Largest key the generator hands out (2^53, the last integer an f64 holds
/// exactly).
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Database lock held for the lifetime of a transaction.
pub(crate) enum TxGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// A read-only or read-write transaction over a fixed set of stores.
///
/// Dropping the transaction releases the database lock. Writes made through
/// it are already visible by then; [`Transaction::commit`] additionally
/// flushes storage under [`Durability::Strict`].
pub struct Transaction {
    database: String,
    mode: TransactionMode,
    durability: Durability,
    scope: Vec<String>,
    meta: Arc<DatabaseMeta>,
    storage: Arc<dyn Storage>,
    _guard: TxGuard,
}

impl Transaction {
    pub(crate) fn new(
        database: String,
        mode: TransactionMode,
        durability: Durability,
        scope: Vec<String>,
        meta: Arc<DatabaseMeta>,
        storage: Arc<dyn Storage>,
        guard: TxGuard,
    ) -> Self {
        Self {
            database,
            mode,
            durability,
            scope,
            meta,
            storage,
            _guard: guard,
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns an accessor for a store in this transaction's scope.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore<'_>> {
        if !self.scope.iter().any(|s| s == name) {
            return Err(Error::NotFound(format!(
                "object store {} is not in the scope of this transaction",
                name
            )));
        }
        let meta = self.meta.stores.get(name).ok_or_else(|| {
            Error::Internal(format!("object store {} missing from catalog", name))
        })?;
        Ok(ObjectStore {
            tx: self,
            name: name.to_string(),
            meta,
        })
    }

    /// Finishes the transaction, flushing storage under strict durability.
    pub async fn commit(self) -> Result<()> {
        if self.mode == TransactionMode::ReadWrite && self.durability == Durability::Strict {
            self.storage.flush().await?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Add,
    Put,
}

/// Accessor for one object store within a transaction.
pub struct ObjectStore<'a> {
    tx: &'a Transaction,
    name: String,
    meta: &'a StoreMeta,
}

impl ObjectStore<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &str {
        &self.meta.key_path
    }

    pub fn auto_increment(&self) -> bool {
        self.meta.auto_increment
    }

    pub fn index_names(&self) -> Vec<String> {
        self.meta.index_names()
    }

    /// Inserts a new record and returns its primary key.
    ///
    /// # Errors
    ///
    /// - [`Error::Constraint`] if the key exists or a unique index already
    ///   holds the record's value for another record.
    /// - [`Error::Data`] if the record is not an object or has no usable key.
    /// - [`Error::ReadOnly`] inside a read-only transaction.
    #[tracing::instrument(level = "trace", skip_all, fields(store = %self.name))]
    pub async fn add(&self, value: Value) -> Result<Key> {
        self.write(value, WriteKind::Add).await
    }

    /// Inserts or replaces a record and returns its primary key.
    #[tracing::instrument(level = "trace", skip_all, fields(store = %self.name))]
    pub async fn put(&self, value: Value) -> Result<Key> {
        self.write(value, WriteKind::Put).await
    }

    /// Gets a record by primary key.
    pub async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let storage_key = record_key(&self.tx.database, &self.name, key);
        Ok(self.read_record(storage_key).await?.map(Value::Object))
    }

    /// Returns every record in primary key order.
    pub async fn get_all(&self) -> Result<Vec<Value>> {
        let range = PrefixRange::new(record_prefix(&self.tx.database, &self.name));
        let records = self.tx.storage.scan(range).await?;
        records
            .iter()
            .map(|record| serde_json::from_slice(&record.value).map_err(Error::from))
            .collect()
    }

    pub async fn count(&self) -> Result<usize> {
        let range = PrefixRange::new(record_prefix(&self.tx.database, &self.name));
        Ok(self.tx.storage.scan(range).await?.len())
    }

    /// Deletes a record by primary key. Deleting a missing key succeeds.
    #[tracing::instrument(level = "trace", skip_all, fields(store = %self.name))]
    pub async fn delete(&self, key: &Key) -> Result<()> {
        self.ensure_writable()?;
        let storage_key = record_key(&self.tx.database, &self.name, key);
        let Some(previous) = self.read_record(storage_key.clone()).await? else {
            return Ok(());
        };

        let mut ops = vec![RecordOp::Delete(storage_key)];
        for index in &self.meta.indexes {
            if let Some(value) = index_value(&previous, index) {
                ops.push(RecordOp::Delete(self.index_entry(index, &value, key)));
            }
        }
        self.tx.storage.apply(ops).await?;
        Ok(())
    }

    /// Returns an accessor for a declared index of this store.
    pub fn index(&self, name: &str) -> Result<Index<'_>> {
        let meta = self.meta.index(name).ok_or_else(|| {
            Error::NotFound(format!("index {} not found on {}", name, self.name))
        })?;
        Ok(Index { store: self, meta })
    }

    async fn write(&self, value: Value, kind: WriteKind) -> Result<Key> {
        self.ensure_writable()?;
        let Value::Object(mut fields) = value else {
            return Err(Error::Data(format!(
                "records in {} must be objects",
                self.name
            )));
        };

        let mut ops = Vec::new();
        let key_path = &self.meta.key_path;
        let key = match fields.get(key_path) {
            Some(raw) => {
                let key = Key::from_json(raw).filter(Key::is_valid).ok_or_else(|| {
                    Error::Data(format!(
                        "value at key path {} of {} is not a valid key",
                        key_path, self.name
                    ))
                })?;
                if self.meta.auto_increment {
                    if let Key::Number(n) = &key {
                        let current = self.current_generated_key().await?;
                        if *n >= (current + 1) as f64 {
                            let advanced = n.floor().min(MAX_GENERATED_KEY as f64) as u64;
                            ops.push(self.generator_op(advanced));
                        }
                    }
                }
                key
            }
            None if self.meta.auto_increment => {
                let next = self.current_generated_key().await? + 1;
                if next > MAX_GENERATED_KEY {
                    return Err(Error::Constraint(format!(
                        "key generator of {} is exhausted",
                        self.name
                    )));
                }
                fields.insert(key_path.clone(), Value::from(next));
                ops.push(self.generator_op(next));
                Key::Number(next as f64)
            }
            None => {
                return Err(Error::Data(format!(
                    "record has no value at key path {} of {}",
                    key_path, self.name
                )));
            }
        };

        let storage_key = record_key(&self.tx.database, &self.name, &key);
        let previous = self.read_record(storage_key.clone()).await?;
        if previous.is_some() && kind == WriteKind::Add {
            return Err(Error::Constraint(format!(
                "key {} already exists in {}",
                key, self.name
            )));
        }

        if let Some(previous) = &previous {
            for index in &self.meta.indexes {
                if let Some(value) = index_value(previous, index) {
                    ops.push(RecordOp::Delete(self.index_entry(index, &value, &key)));
                }
            }
        }
        for index in &self.meta.indexes {
            if let Some(value) = index_value(&fields, index) {
                if index.unique {
                    self.ensure_unique(index, &value, &key).await?;
                }
                ops.push(RecordOp::Put(Record::new(
                    self.index_entry(index, &value, &key),
                    encode_key(&key),
                )));
            }
        }
        ops.push(RecordOp::Put(Record::new(
            storage_key,
            Bytes::from(serde_json::to_vec(&fields)?),
        )));

        self.tx.storage.apply(ops).await?;
        Ok(key)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.tx.mode == TransactionMode::ReadOnly {
            return Err(Error::ReadOnly(format!(
                "cannot write to {} in a read-only transaction",
                self.name
            )));
        }
        Ok(())
    }

    async fn ensure_unique(&self, index: &IndexMeta, value: &Key, primary: &Key) -> Result<()> {
        let prefix = index_value_prefix(&self.tx.database, &self.name, &index.name, value);
        let own = encode_key(primary);
        let entries = self.tx.storage.scan(PrefixRange::new(prefix)).await?;
        if entries.iter().any(|entry| entry.value != own) {
            return Err(Error::Constraint(format!(
                "unique index {} on {} already contains {}",
                index.name, self.name, value
            )));
        }
        Ok(())
    }

    async fn current_generated_key(&self) -> Result<u64> {
        let key = generator_key(&self.tx.database, &self.name);
        match self.tx.storage.get(key).await? {
            Some(record) => {
                let raw: [u8; 8] = record.value.as_ref().try_into().map_err(|_| {
                    Error::Encoding(format!(
                        "key generator of {} holds {} bytes, expected 8",
                        self.name,
                        record.value.len()
                    ))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn generator_op(&self, value: u64) -> RecordOp {
        RecordOp::Put(Record::new(
            generator_key(&self.tx.database, &self.name),
            Bytes::copy_from_slice(&value.to_be_bytes()),
        ))
    }

    fn index_entry(&self, index: &IndexMeta, value: &Key, primary: &Key) -> Bytes {
        index_entry_key(&self.tx.database, &self.name, &index.name, value, primary)
    }

    async fn read_record(&self, storage_key: Bytes) -> Result<Option<Map<String, Value>>> {
        match self.tx.storage.get(storage_key).await? {
            Some(record) => Ok(Some(serde_json::from_slice(&record.value)?)),
            None => Ok(None),
        }
    }
}

/// Extracts the indexed value of a record; records whose field is missing
/// or not a valid key are left out of the index.
fn index_value(fields: &Map<String, Value>, index: &IndexMeta) -> Option<Key> {
    fields
        .get(&index.key_path)
        .and_then(Key::from_json)
        .filter(Key::is_valid)
}

/// Accessor for one index of an object store.
pub struct Index<'a> {
    store: &'a ObjectStore<'a>,
    meta: &'a IndexMeta,
}

impl Index<'_> {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn unique(&self) -> bool {
        self.meta.unique
    }

    /// Returns the primary keys of records whose indexed value equals
    /// `value`, in primary key order.
    pub async fn get_all_keys(&self, value: &Key) -> Result<Vec<Key>> {
        let tx = self.store.tx;
        let prefix = index_value_prefix(&tx.database, &self.store.name, &self.meta.name, value);
        let entries = tx.storage.scan(PrefixRange::new(prefix)).await?;
        entries
            .iter()
            .map(|entry| decode_key(&mut entry.value.as_ref()))
            .collect()
    }

    /// Returns the primary key of the first record matching `value`.
    pub async fn get_key(&self, value: &Key) -> Result<Option<Key>> {
        Ok(self.get_all_keys(value).await?.into_iter().next())
    }

    /// Returns the first record, in primary key order, whose indexed value
    /// equals `value`.
    pub async fn get(&self, value: &Key) -> Result<Option<Value>> {
        match self.get_key(value).await? {
            Some(key) => self.store.get(&key).await,
            None => Ok(None),
        }
    }

    /// Returns every record whose indexed value equals `value`.
    pub async fn get_all(&self, value: &Key) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for key in self.get_all_keys(value).await? {
            if let Some(record) = self.store.get(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use common::storage::in_memory::InMemoryStorage;
    use serde_json::json;

    use super::*;
    use crate::connection::Connection;
    use crate::engine::{IndexParams, ObjectStoreEngine, StoreParams};

    async fn shop() -> Connection {
        let engine = ObjectStoreEngine::new(Arc::new(InMemoryStorage::new()));
        engine
            .open("shop", Some(1), |change| {
                change
                    .create_object_store("orders", StoreParams::new("id", true))?
                    .create_index("status", "status", IndexParams::default())?
                    .create_index("ref", "ref", IndexParams { unique: true })?;
                change.create_object_store("users", StoreParams::new("email", false))?;
                Ok(())
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn should_generate_keys_starting_at_one() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();

        // when
        let first = orders.add(json!({"status": "open"})).await.unwrap();
        let second = orders.add(json!({"status": "open"})).await.unwrap();

        // then
        assert_eq!(first, Key::Number(1.0));
        assert_eq!(second, Key::Number(2.0));
        assert_eq!(
            orders.get(&first).await.unwrap(),
            Some(json!({"id": 1, "status": "open"}))
        );
    }

    #[tokio::test]
    async fn should_advance_generator_past_explicit_keys() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();

        // when
        orders.add(json!({"id": 10.5})).await.unwrap();
        let generated = orders.add(json!({})).await.unwrap();

        // then
        assert_eq!(generated, Key::Number(11.0));
    }

    #[tokio::test]
    async fn should_reject_add_with_existing_key() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["users"], TransactionMode::ReadWrite).await.unwrap();
        let users = tx.object_store("users").unwrap();
        users.add(json!({"email": "a@x.io", "name": "A"})).await.unwrap();

        // when
        let result = users.add(json!({"email": "a@x.io", "name": "B"})).await;

        // then
        assert!(matches!(result, Err(Error::Constraint(_))));
        let stored = users.get(&Key::from("a@x.io")).await.unwrap().unwrap();
        assert_eq!(stored["name"], json!("A"));
    }

    #[tokio::test]
    async fn should_require_key_when_not_auto_increment() {
        let conn = shop().await;
        let tx = conn.transaction(&["users"], TransactionMode::ReadWrite).await.unwrap();
        let users = tx.object_store("users").unwrap();

        let missing = users.add(json!({"name": "A"})).await;
        let invalid = users.add(json!({"email": true})).await;
        let not_object = users.add(json!(["a@x.io"])).await;

        assert!(matches!(missing, Err(Error::Data(_))));
        assert!(matches!(invalid, Err(Error::Data(_))));
        assert!(matches!(not_object, Err(Error::Data(_))));
    }

    #[tokio::test]
    async fn should_upsert_with_put_and_move_index_entries() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();
        let key = orders.add(json!({"status": "open"})).await.unwrap();

        // when
        orders.put(json!({"id": 1, "status": "closed"})).await.unwrap();

        // then
        let status = orders.index("status").unwrap();
        assert_eq!(status.get(&Key::from("open")).await.unwrap(), None);
        assert_eq!(
            status.get(&Key::from("closed")).await.unwrap(),
            Some(json!({"id": 1, "status": "closed"}))
        );
        assert_eq!(orders.count().await.unwrap(), 1);
        assert_eq!(status.get_key(&Key::from("closed")).await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn should_enforce_unique_index() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();
        orders.add(json!({"ref": "A-1"})).await.unwrap();

        // when
        let duplicate = orders.add(json!({"ref": "A-1"})).await;
        let same_record = orders.put(json!({"id": 1, "ref": "A-1", "note": "x"})).await;

        // then
        assert!(matches!(duplicate, Err(Error::Constraint(_))));
        assert!(same_record.is_ok());
        assert_eq!(orders.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_return_first_match_in_primary_key_order() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();
        orders.add(json!({"id": 3, "status": "open"})).await.unwrap();
        orders.add(json!({"id": 2, "status": "open"})).await.unwrap();
        orders.add(json!({"id": 1, "status": "closed"})).await.unwrap();

        // when
        let status = orders.index("status").unwrap();
        let first = status.get(&Key::from("open")).await.unwrap();
        let all = status.get_all(&Key::from("open")).await.unwrap();

        // then
        assert_eq!(first, Some(json!({"id": 2, "status": "open"})));
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn should_list_records_in_key_order() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();
        orders.add(json!({"id": 20})).await.unwrap();
        orders.add(json!({"id": -1})).await.unwrap();
        orders.add(json!({"id": 3})).await.unwrap();

        // when
        let all = orders.get_all().await.unwrap();

        // then
        let ids: Vec<_> = all.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(-1), json!(3), json!(20)]);
    }

    #[tokio::test]
    async fn should_delete_idempotently_and_drop_index_entries() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        let orders = tx.object_store("orders").unwrap();
        let key = orders.add(json!({"status": "open", "ref": "R"})).await.unwrap();

        // when
        orders.delete(&key).await.unwrap();
        let again = orders.delete(&key).await;
        let reused = orders.add(json!({"ref": "R"})).await;

        // then
        assert!(again.is_ok());
        assert!(reused.is_ok());
        let status = orders.index("status").unwrap();
        assert_eq!(status.get(&Key::from("open")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_reject_writes_in_read_only_transaction() {
        // given
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadOnly).await.unwrap();
        let orders = tx.object_store("orders").unwrap();

        // when
        let add = orders.add(json!({"status": "open"})).await;
        let delete = orders.delete(&Key::from(1)).await;

        // then
        assert!(matches!(add, Err(Error::ReadOnly(_))));
        assert!(matches!(delete, Err(Error::ReadOnly(_))));
    }

    #[tokio::test]
    async fn should_reject_store_outside_scope_and_unknown_index() {
        let conn = shop().await;
        let tx = conn.transaction(&["orders"], TransactionMode::ReadOnly).await.unwrap();

        assert!(matches!(tx.object_store("users"), Err(Error::NotFound(_))));
        let orders = tx.object_store("orders").unwrap();
        assert!(matches!(orders.index("email"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn should_keep_data_across_connections() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let engine = ObjectStoreEngine::new(Arc::clone(&storage));
        let conn = engine
            .open("shop", Some(1), |change| {
                change.create_object_store("orders", StoreParams::new("id", true))?;
                Ok(())
            })
            .await
            .unwrap();
        let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await.unwrap();
        tx.object_store("orders").unwrap().add(json!({"a": 1})).await.unwrap();
        tx.commit().await.unwrap();
        conn.close();

        // when
        let reopened = engine.open("shop", Some(2), |_| Ok(())).await.unwrap();
        let tx = reopened.transaction(&["orders"], TransactionMode::ReadOnly).await.unwrap();
        let all = tx.object_store("orders").unwrap().get_all().await.unwrap();

        // then
        assert_eq!(all, vec![json!({"id": 1, "a": 1})]);
    }
}
