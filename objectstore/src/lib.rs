//! Object Store - a versioned, transactional record store over byte storage.
//!
//! Object Store keeps named databases of object stores on top of the
//! [`common::Storage`] abstraction. Each database carries a version; raising
//! the version on open runs an upgrade callback, which is the only place
//! stores and indexes can be created. Records are JSON objects keyed by a
//! primary key field, optionally generated, with secondary indexes
//! maintained alongside them.
//!
//! # Key Concepts
//!
//! - **ObjectStoreEngine**: Opens databases, running the upgrade callback
//!   when the requested version exceeds the stored one.
//! - **Connection**: A database at a fixed version. Starts transactions
//!   until it is closed.
//! - **Transaction**: Read-only or read-write access to a set of stores.
//!   Read-write transactions on a database are serialized.
//! - **ObjectStore / Index**: Record operations (`add`, `put`, `get`,
//!   `get_all`, `delete`) and lookups by indexed value.
//!
//! # Example
//!
//! ```ignore
//! use objectstore::{IndexParams, ObjectStoreEngine, StoreParams, TransactionMode, Key};
//! use serde_json::json;
//!
//! let engine = ObjectStoreEngine::open_with_config(&StorageConfig::InMemory).await?;
//! let conn = engine
//!     .open("shop", Some(1), |change| {
//!         change
//!             .create_object_store("orders", StoreParams::new("id", true))?
//!             .create_index("status", "status", IndexParams::default())?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! let tx = conn.transaction(&["orders"], TransactionMode::ReadWrite).await?;
//! let orders = tx.object_store("orders")?;
//! let id = orders.add(json!({"status": "open"})).await?;
//! let open = orders.index("status")?.get(&Key::from("open")).await?;
//! tx.commit().await?;
//! ```

mod catalog;
mod connection;
mod engine;
mod error;
mod key;
mod serde;
mod transaction;

pub use catalog::{IndexMeta, StoreMeta};
pub use connection::{Connection, Durability, TransactionMode};
pub use engine::{IndexParams, ObjectStoreEngine, StoreBuilder, StoreParams, VersionChange};
pub use error::{Error, Result};
pub use key::Key;
pub use transaction::{Index, ObjectStore, Transaction};
