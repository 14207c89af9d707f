//! Shared storage plumbing for the table database workspace.
//!
//! Defines the byte-level [`Storage`] abstraction that the object store
//! engine encodes its catalog, records and index entries into, along with
//! an in-memory backend and the configuration used to pick a backend.

pub mod prefix;
pub mod storage;

pub use crate::prefix::PrefixRange;
pub use storage::config::StorageConfig;
pub use storage::factory::create_storage;
pub use storage::{
    Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
};
