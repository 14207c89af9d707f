//! Table definitions and the in-memory schema registry.

use std::collections::HashMap;

use objectstore::IndexParams;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A declared column. Every column becomes a secondary index named after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    /// A non-unique column.
    Name(String),
    /// A column with explicit uniqueness.
    Descriptor {
        name: String,
        #[serde(default)]
        unique: bool,
    },
}

impl Column {
    pub fn unique(name: impl Into<String>) -> Self {
        Column::Descriptor {
            name: name.into(),
            unique: true,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Column::Name(name) => name,
            Column::Descriptor { name, .. } => name,
        }
    }

    pub(crate) fn index_params(&self) -> IndexParams {
        match self {
            Column::Name(_) => IndexParams::default(),
            Column::Descriptor { unique, .. } => IndexParams { unique: *unique },
        }
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::Name(name.to_string())
    }
}

impl From<String> for Column {
    fn from(name: String) -> Self {
        Column::Name(name)
    }
}

/// Everything needed to create a table.
///
/// Defaults to an auto-incremented `id` primary key and no columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub key_path: String,
    pub auto_increment: bool,
    pub columns: Vec<Column>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: "id".to_string(),
            auto_increment: true,
            columns: Vec::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    pub fn with_columns<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Column>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Column names in declaration order, duplicates included.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }
}

/// Column names remembered per table, independent of the indexes that exist
/// in the engine.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    tables: HashMap<String, Vec<String>>,
}

impl SchemaRegistry {
    /// Sets the columns of a table, replacing any earlier entry.
    pub(crate) fn register(&mut self, table: &str, columns: Vec<String>) {
        self.tables.insert(table.to_string(), columns);
    }

    pub(crate) fn get(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// Returns the fields of `record` missing from the table's schema.
    ///
    /// A table that was never registered accepts any field. A table
    /// registered with an empty column list rejects every field, so only an
    /// empty record passes. Schema columns absent from the record are not
    /// reported.
    pub(crate) fn invalid_keys(&self, table: &str, record: &Map<String, Value>) -> Vec<String> {
        match self.get(table) {
            Some(columns) => record
                .keys()
                .filter(|key| !columns.iter().any(|c| c == *key))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
