//! Persisted database catalog: version plus store and index definitions.

use std::collections::BTreeMap;

use bytes::Bytes;
use common::{Record, RecordOp, StorageRead};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::serde::catalog_key;

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    /// Record field whose value is indexed.
    pub key_path: String,
    pub unique: bool,
}

/// Definition of an object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Record field holding the primary key.
    pub key_path: String,
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexMeta>,
}

impl StoreMeta {
    pub fn index(&self, name: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|index| index.name == name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|index| index.name.clone()).collect()
    }
}

/// Everything the engine remembers about one database.
///
/// A database that has never been opened has version 0 and no stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DatabaseMeta {
    pub(crate) version: u64,
    #[serde(default)]
    pub(crate) stores: BTreeMap<String, StoreMeta>,
}

impl DatabaseMeta {
    pub(crate) async fn load(storage: &dyn StorageRead, database: &str) -> Result<Option<Self>> {
        match storage.get(catalog_key(database)).await? {
            Some(record) => Ok(Some(serde_json::from_slice(&record.value)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn to_op(&self, database: &str) -> Result<RecordOp> {
        let value = serde_json::to_vec(self)?;
        Ok(RecordOp::Put(Record::new(
            catalog_key(database),
            Bytes::from(value),
        )))
    }
}
