//! TableDb - schema-aware tables over a versioned object store.
//!
//! TableDb lets callers declare named tables with a primary key and
//! secondary indexes, then create, read, update and delete records without
//! writing transaction code against the engine. Field names of written
//! records are checked against the columns declared for the table.
//!
//! # Key Concepts
//!
//! - **Database**: A named database of tables. Creating a table raises the
//!   database version and reopens the connection.
//! - **ResponseMessage**: The envelope every operation reports through,
//!   with an HTTP-like [`Status`].
//! - **Lookup**: The result of a point lookup; a missing record is a normal
//!   outcome carrying a 404 envelope.
//! - **Memory**: A fixed single-table store of named values.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tabledb::{Config, Database, Lookup, TableDefinition};
//!
//! let db = Database::open(Config::new("shop")).await?;
//! db.create_table(TableDefinition::new("orders").with_columns(["status"]))
//!     .await?;
//!
//! db.create("orders", json!({"status": "open"})).await?;
//! if let Lookup::Found(order) = db.select_one("orders", "status", "open").await? {
//!     println!("order {}", order["id"]);
//! }
//! db.update("orders", "status", "open", json!({"status": "closed"}))
//!     .await?;
//! ```

mod config;
mod database;
mod error;
mod memory;
mod response;
mod schema;

pub use config::{Config, WriteOptions};
pub use database::{DEFAULT_DATABASE_NAME, Database, Record};
pub use error::{Error, Result};
pub use memory::{MEMORY_DATABASE_NAME, MEMORY_STORE_NAME, Memory};
pub use response::{Lookup, Outcome, ResponseMessage, Status};
pub use schema::{Column, TableDefinition};

pub use common::StorageConfig;
pub use objectstore::{Key, ObjectStoreEngine};
