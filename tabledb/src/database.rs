//! The table manager: versioned table creation and validated record access.

use objectstore::{
    Connection, Durability, Key, ObjectStoreEngine, StoreParams, Transaction, TransactionMode,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::config::{Config, WriteOptions};
use crate::error::{Error, Result};
use crate::response::{Lookup, Outcome, ResponseMessage};
use crate::schema::{SchemaRegistry, TableDefinition};

/// Name used by [`Config::default`].
pub const DEFAULT_DATABASE_NAME: &str = "memoryClientDatabase";

/// A stored record: field names mapped to JSON values.
pub type Record = Map<String, Value>;

/// The live connection, replaced on every table creation.
struct State {
    connection: Connection,
    /// Incremented each time `connection` is replaced.
    generation: u64,
    schemas: SchemaRegistry,
}

impl State {
    fn replace(&mut self, connection: Connection) {
        self.connection = connection;
        self.generation += 1;
    }
}

/// A named database of tables with a remembered schema per table.
///
/// Each table is an object store in the engine. Creating a table raises the
/// database version by one and reopens the connection; every other operation
/// runs one or two transactions on the current connection.
///
/// # Concurrency
///
/// Record operations hold a shared guard on the current connection for
/// their whole duration and may run concurrently. [`create_table`] takes the
/// guard exclusively, so it waits for in-flight operations to finish before
/// closing the connection, and operations issued meanwhile wait for the new
/// one.
///
/// # Status conventions
///
/// Operations report through [`ResponseMessage`]. Validation failures (400)
/// and engine failures (500) are returned as `Err`; a missing record (404)
/// is a normal `Ok` outcome.
///
/// [`create_table`]: Database::create_table
pub struct Database {
    name: String,
    engine: ObjectStoreEngine,
    durability: Durability,
    state: RwLock<State>,
}

impl Database {
    /// Opens the database named in `config`, building storage from its
    /// storage configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty name and
    /// [`Error::Storage`] if the engine cannot open the database.
    pub async fn open(config: Config) -> Result<Self> {
        validate_name(&config.name)?;
        let engine = ObjectStoreEngine::open_with_config(&config.storage).await?;
        Self::connect(config.name, engine, config.write).await
    }

    /// Opens a database on an existing engine with default write options.
    pub async fn with_engine(name: impl Into<String>, engine: ObjectStoreEngine) -> Result<Self> {
        Self::connect(name.into(), engine, WriteOptions::default()).await
    }

    async fn connect(name: String, engine: ObjectStoreEngine, write: WriteOptions) -> Result<Self> {
        validate_name(&name)?;
        // Continue from whatever version an earlier session left behind.
        let connection = engine.open(&name, None, |_| Ok(())).await?;
        tracing::info!(database = %name, version = connection.version(), "Database opened");
        Ok(Self {
            name,
            engine,
            durability: write.durability(),
            state: RwLock::new(State {
                connection,
                generation: 0,
                schemas: SchemaRegistry::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current database version.
    pub async fn version(&self) -> u64 {
        self.state.read().await.connection.version()
    }

    /// Number of times the connection has been replaced since open.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Columns registered for a table by the last [`create_table`] call.
    ///
    /// [`create_table`]: Database::create_table
    pub async fn schema(&self, table: &str) -> Option<Vec<String>> {
        self.state.read().await.schemas.get(table).map(<[String]>::to_vec)
    }

    /// Tables present in the engine at the current version.
    pub async fn table_names(&self) -> Vec<String> {
        self.state.read().await.connection.object_store_names()
    }

    /// Creates a table by reopening the database one version higher.
    ///
    /// The store and one index per column are created only if the table
    /// does not exist yet. The registered schema is replaced with the given
    /// columns either way, so repeating the call with different columns
    /// changes validation without changing the indexes.
    ///
    /// On failure the manager reopens at the engine's stored version and
    /// returns a 500 carrying the engine error.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %definition.name))]
    pub async fn create_table(&self, definition: TableDefinition) -> Outcome {
        let mut state = self.state.write().await;
        state.connection.close();
        let version = state.connection.version() + 1;

        let opened = self
            .engine
            .open(&self.name, Some(version), |change| {
                if change.contains(&definition.name) {
                    tracing::debug!("Table already exists, keeping its indexes");
                    return Ok(());
                }
                let mut store = change.create_object_store(
                    &definition.name,
                    StoreParams::new(definition.key_path.as_str(), definition.auto_increment),
                )?;
                for column in &definition.columns {
                    store.create_index(column.name(), column.name(), column.index_params())?;
                }
                Ok(())
            })
            .await;

        match opened {
            Ok(connection) => {
                state.replace(connection);
                let columns = definition.column_names();
                state.schemas.register(&definition.name, columns.clone());
                tracing::info!(database = %self.name, version, "Table created");
                Ok(ResponseMessage::created(format!(
                    "Table {} created successfully.",
                    definition.name
                ))
                .with_schema(columns))
            }
            Err(err) => {
                tracing::warn!(
                    database = %self.name,
                    version,
                    error = %err,
                    "Failed to create table"
                );
                self.reconcile(&mut state).await;
                Err(ResponseMessage::internal(
                    format!("Error creating table {}.", definition.name),
                    err,
                ))
            }
        }
    }

    /// Reopens at the stored version after a failed version change.
    async fn reconcile(&self, state: &mut State) {
        match self.engine.open(&self.name, None, |_| Ok(())).await {
            Ok(connection) => {
                tracing::info!(
                    database = %self.name,
                    version = connection.version(),
                    "Reopened database at stored version"
                );
                state.replace(connection);
            }
            Err(err) => {
                tracing::warn!(database = %self.name, error = %err, "Failed to reopen database");
            }
        }
    }

    /// Inserts a record.
    ///
    /// Once [`create_table`] has registered columns for the table, every
    /// field of `data` must be one of them; otherwise nothing is written and
    /// a 400 names the offending fields. A table registered with no columns
    /// therefore only accepts empty records. Tables this manager never
    /// registered (e.g. created by an earlier session) accept any field.
    /// Columns missing from `data` and the primary key field are not
    /// checked.
    ///
    /// A primary key collision is an engine failure (500).
    ///
    /// [`create_table`]: Database::create_table
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table))]
    pub async fn create(&self, table: &str, data: Value) -> Outcome {
        let Value::Object(record) = data else {
            return Err(ResponseMessage::bad_request("Record must be an object."));
        };

        let state = self.state.read().await;
        let invalid = state.schemas.invalid_keys(table, &record);
        if !invalid.is_empty() {
            tracing::debug!(invalid = ?invalid, "Rejected record with unknown fields");
            return Err(ResponseMessage::bad_request(format!(
                "invalid keys: {}",
                invalid.join(", ")
            )));
        }

        let key = self
            .insert(&state.connection, table, record)
            .await
            .map_err(|err| failure("Failed to create the record.", err))?;
        tracing::debug!(key = %key, "Record created");
        Ok(ResponseMessage::created("Record created successfully."))
    }

    /// Looks up the first record whose `index` field equals `value`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table, index = %index))]
    pub async fn select_one(
        &self,
        table: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> Outcome<Lookup<Record>> {
        let state = self.state.read().await;
        let found = self
            .find(&state.connection, table, Some(index), &value.into())
            .await
            .map_err(|err| failure("Error finding record.", err))?;
        Ok(found.map_or_else(Lookup::missing, Lookup::Found))
    }

    /// Looks up a record by primary key.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table))]
    pub async fn select_by_key(&self, table: &str, key: impl Into<Key>) -> Outcome<Lookup<Record>> {
        let state = self.state.read().await;
        let found = self
            .find(&state.connection, table, None, &key.into())
            .await
            .map_err(|err| failure("Error finding record.", err))?;
        Ok(found.map_or_else(Lookup::missing, Lookup::Found))
    }

    /// Returns every record of a table in primary key order.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table))]
    pub async fn select_all(&self, table: &str) -> Outcome<Vec<Record>> {
        let state = self.state.read().await;
        self.find_all(&state.connection, table)
            .await
            .map_err(|err| failure("Error getting data.", err))
    }

    /// Merges `new_data` over the record found by `index` = `value` and
    /// writes it back.
    ///
    /// Fields absent from `new_data` keep their stored values. Returns a 404
    /// without writing when no record matches. The read and the write are
    /// separate transactions, so concurrent updates of one record resolve
    /// as last writer wins.
    ///
    /// The merged record is written with `put`, keyed by whatever primary
    /// key it ends up with. If `new_data` sets the key path field to a new
    /// value, the record is copied under the new key and the old record
    /// stays in place.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table, index = %index))]
    pub async fn update(
        &self,
        table: &str,
        index: &str,
        value: impl Into<Key>,
        new_data: Value,
    ) -> Outcome {
        let Value::Object(changes) = new_data else {
            return Err(ResponseMessage::bad_request("Update data must be an object."));
        };

        let state = self.state.read().await;
        let existing = self
            .find(&state.connection, table, Some(index), &value.into())
            .await
            .map_err(|err| failure("Error updating data.", err))?;
        let Some(mut record) = existing else {
            return Ok(ResponseMessage::not_found("Record not found."));
        };

        record.extend(changes);
        self.replace(&state.connection, table, record)
            .await
            .map_err(|err| failure("Error updating data.", err))?;
        Ok(ResponseMessage::ok("Data updated successfully."))
    }

    /// Deletes a record by primary key. Succeeds whether or not it existed.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %table))]
    pub async fn delete(&self, table: &str, key: impl Into<Key>) -> Outcome {
        let state = self.state.read().await;
        self.remove(&state.connection, table, &key.into())
            .await
            .map_err(|err| failure("Error deleting data.", err))?;
        Ok(ResponseMessage::ok("Record deleted successfully."))
    }

    async fn begin(
        &self,
        connection: &Connection,
        table: &str,
        mode: TransactionMode,
    ) -> objectstore::Result<Transaction> {
        connection
            .transaction_with_durability(&[table], mode, self.durability)
            .await
    }

    async fn insert(
        &self,
        connection: &Connection,
        table: &str,
        record: Record,
    ) -> objectstore::Result<Key> {
        let tx = self.begin(connection, table, TransactionMode::ReadWrite).await?;
        let key = tx.object_store(table)?.add(Value::Object(record)).await?;
        tx.commit().await?;
        Ok(key)
    }

    async fn replace(
        &self,
        connection: &Connection,
        table: &str,
        record: Record,
    ) -> objectstore::Result<Key> {
        let tx = self.begin(connection, table, TransactionMode::ReadWrite).await?;
        let key = tx.object_store(table)?.put(Value::Object(record)).await?;
        tx.commit().await?;
        Ok(key)
    }

    async fn remove(
        &self,
        connection: &Connection,
        table: &str,
        key: &Key,
    ) -> objectstore::Result<()> {
        let tx = self.begin(connection, table, TransactionMode::ReadWrite).await?;
        tx.object_store(table)?.delete(key).await?;
        tx.commit().await
    }

    /// Finds a record by index value, or by primary key when `index` is
    /// `None`.
    async fn find(
        &self,
        connection: &Connection,
        table: &str,
        index: Option<&str>,
        key: &Key,
    ) -> objectstore::Result<Option<Record>> {
        let tx = self.begin(connection, table, TransactionMode::ReadOnly).await?;
        let store = tx.object_store(table)?;
        let found = match index {
            Some(index) => store.index(index)?.get(key).await?,
            None => store.get(key).await?,
        };
        found.map(into_record).transpose()
    }

    async fn find_all(
        &self,
        connection: &Connection,
        table: &str,
    ) -> objectstore::Result<Vec<Record>> {
        let tx = self.begin(connection, table, TransactionMode::ReadOnly).await?;
        let records = tx.object_store(table)?.get_all().await?;
        records.into_iter().map(into_record).collect()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("database name is required".to_string()));
    }
    Ok(())
}

fn into_record(value: Value) -> objectstore::Result<Record> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(objectstore::Error::Internal(format!(
            "stored record is not an object: {}",
            other
        ))),
    }
}

/// Converts an engine failure into a 500 envelope.
fn failure(message: &str, err: objectstore::Error) -> ResponseMessage {
    tracing::warn!(error = %err, "{}", message);
    ResponseMessage::internal(message, err)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::StorageError;
    use common::storage::in_memory::{FailingStorage, InMemoryStorage};
    use serde_json::json;

    use super::*;
    use crate::response::Status;
    use crate::schema::Column;

    fn engine() -> ObjectStoreEngine {
        ObjectStoreEngine::new(Arc::new(InMemoryStorage::new()))
    }

    async fn orders() -> Database {
        let db = Database::with_engine("shop", engine()).await.unwrap();
        db.create_table(TableDefinition::new("orders").with_columns(["status"]))
            .await
            .unwrap();
        db
    }

    async fn failing_orders() -> (Database, Arc<FailingStorage>) {
        let storage = FailingStorage::wrap(Arc::new(InMemoryStorage::new()));
        let db = Database::with_engine("shop", ObjectStoreEngine::new(storage.clone()))
            .await
            .unwrap();
        db.create_table(TableDefinition::new("orders").with_columns(["status"]))
            .await
            .unwrap();
        (db, storage)
    }

    fn io_error() -> StorageError {
        StorageError::Storage("io error".to_string())
    }

    #[tokio::test]
    async fn should_reject_empty_database_name() {
        let result = Database::with_engine("", engine()).await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn should_open_with_default_config() {
        let db = Database::open(Config::default()).await.unwrap();

        assert_eq!(db.name(), DEFAULT_DATABASE_NAME);
        assert_eq!(db.version().await, 1);
        assert_eq!(db.generation().await, 0);
    }

    #[tokio::test]
    async fn should_bump_version_and_register_schema_on_create_table() {
        // given
        let db = Database::with_engine("shop", engine()).await.unwrap();

        // when
        let response = db
            .create_table(
                TableDefinition::new("users")
                    .with_columns([Column::from("name"), Column::unique("email")]),
            )
            .await
            .unwrap();

        // then
        assert_eq!(response.status, Status::Created);
        assert_eq!(response.message, "Table users created successfully.");
        assert_eq!(
            response.schema,
            Some(vec!["name".to_string(), "email".to_string()])
        );
        assert_eq!(db.version().await, 2);
        assert_eq!(db.generation().await, 1);
        assert_eq!(db.table_names().await, vec!["users".to_string()]);
        assert_eq!(
            db.schema("users").await,
            Some(vec!["name".to_string(), "email".to_string()])
        );
    }

    #[tokio::test]
    async fn should_reject_unknown_fields_without_writing() {
        // given
        let db = orders().await;

        // when
        let result = db
            .create("orders", json!({"status": "open", "total": 3, "note": "x"}))
            .await;

        // then
        let response = result.unwrap_err();
        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.message, "invalid keys: note, total");
        assert!(db.select_all("orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_non_object_record() {
        let db = orders().await;

        let result = db.create("orders", json!(["open"])).await;

        assert_eq!(result.unwrap_err().status, Status::BadRequest);
    }

    #[tokio::test]
    async fn should_reject_every_field_for_zero_column_table() {
        // given
        let db = Database::with_engine("shop", engine()).await.unwrap();
        db.create_table(TableDefinition::new("orders")).await.unwrap();

        // when
        let rejected = db.create("orders", json!({"anything": 1})).await;
        let empty = db.create("orders", json!({})).await.unwrap();

        // then
        let response = rejected.unwrap_err();
        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.message, "invalid keys: anything");
        assert_eq!(empty.status, Status::Created);
    }

    #[tokio::test]
    async fn should_accept_any_field_for_unregistered_table() {
        // given
        let engine = engine();
        Database::with_engine("shop", engine.clone())
            .await
            .unwrap()
            .create_table(TableDefinition::new("orders").with_columns(["status"]))
            .await
            .unwrap();
        let reopened = Database::with_engine("shop", engine).await.unwrap();

        // when
        let created = reopened
            .create("orders", json!({"anything": 1}))
            .await
            .unwrap();

        // then
        assert!(reopened.schema("orders").await.is_none());
        assert_eq!(created.status, Status::Created);
    }

    #[tokio::test]
    async fn should_look_up_by_primary_key() {
        // given
        let db = orders().await;
        db.create("orders", json!({"status": "open"})).await.unwrap();

        // when
        let found = db.select_by_key("orders", 1).await.unwrap();
        let missing = db.select_by_key("orders", 2).await.unwrap();

        // then
        assert_eq!(
            found.found(),
            Some(json!({"id": 1, "status": "open"}).as_object().unwrap().clone())
        );
        assert_eq!(missing.status(), Status::NotFound);
    }

    #[tokio::test]
    async fn should_fail_with_500_on_primary_key_collision() {
        // given
        let db = Database::with_engine("shop", engine()).await.unwrap();
        db.create_table(
            TableDefinition::new("users")
                .with_key_path("email")
                .with_auto_increment(false)
                .with_columns(["email"]),
        )
        .await
        .unwrap();
        db.create("users", json!({"email": "a@b.c"})).await.unwrap();

        // when
        let result = db.create("users", json!({"email": "a@b.c"})).await;

        // then
        let response = result.unwrap_err();
        assert_eq!(response.status, Status::Internal);
        assert!(matches!(
            response.error,
            Some(objectstore::Error::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn should_fail_with_500_for_unknown_table_or_index() {
        let db = orders().await;

        let table = db.select_all("invoices").await;
        let index = db.select_one("orders", "customer", "x").await;

        assert!(matches!(
            table.unwrap_err().error,
            Some(objectstore::Error::NotFound(_))
        ));
        assert_eq!(index.unwrap_err().status, Status::Internal);
    }

    #[tokio::test]
    async fn should_return_404_from_update_of_missing_record() {
        // given
        let db = orders().await;

        // when
        let response = db
            .update("orders", "status", "open", json!({"status": "closed"}))
            .await
            .unwrap();

        // then
        assert_eq!(response.status, Status::NotFound);
        assert_eq!(response.message, "Record not found.");
    }

    #[tokio::test]
    async fn should_surface_read_failure_as_500() {
        // given
        let (db, storage) = failing_orders().await;
        storage.fail_read(io_error());

        // when
        let all = db.select_all("orders").await;
        let one = db.select_one("orders", "status", "open").await;

        // then
        let response = all.unwrap_err();
        assert_eq!(response.status, Status::Internal);
        assert_eq!(response.message, "Error getting data.");
        assert_eq!(
            response.error,
            Some(objectstore::Error::Storage("io error".to_string()))
        );
        assert_eq!(one.unwrap_err().status, Status::Internal);
    }

    #[tokio::test]
    async fn should_surface_write_failure_as_500() {
        // given
        let (db, storage) = failing_orders().await;
        db.create("orders", json!({"status": "open"})).await.unwrap();
        storage.fail_apply(io_error());

        // when
        let created = db.create("orders", json!({"status": "new"})).await;
        let updated = db
            .update("orders", "status", "open", json!({"status": "closed"}))
            .await;
        let deleted = db.delete("orders", 1).await;

        // then
        assert_eq!(created.unwrap_err().message, "Failed to create the record.");
        assert_eq!(updated.unwrap_err().message, "Error updating data.");
        assert_eq!(deleted.unwrap_err().message, "Error deleting data.");
        storage.clear_apply();
        assert_eq!(db.select_all("orders").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_surface_flush_failure_under_strict_durability() {
        // given
        let storage = FailingStorage::wrap(Arc::new(InMemoryStorage::new()));
        let engine = ObjectStoreEngine::new(storage.clone());
        let db = Database::connect(
            "shop".to_string(),
            engine,
            WriteOptions {
                await_durable: true,
            },
        )
        .await
        .unwrap();
        db.create_table(TableDefinition::new("orders").with_columns(["status"]))
            .await
            .unwrap();
        storage.fail_flush(io_error());

        // when
        let result = db.create("orders", json!({"status": "open"})).await;

        // then
        assert_eq!(result.unwrap_err().status, Status::Internal);
    }

    #[tokio::test]
    async fn should_reconcile_version_after_failed_create_table() {
        // given
        let (db, storage) = failing_orders().await;
        storage.fail_apply_once(io_error());

        // when
        let failed = db
            .create_table(TableDefinition::new("invoices"))
            .await
            .unwrap_err();

        // then
        assert_eq!(failed.status, Status::Internal);
        assert_eq!(failed.message, "Error creating table invoices.");
        assert_eq!(db.version().await, 2);
        assert_eq!(db.generation().await, 2);
        assert!(db.schema("invoices").await.is_none());

        let retried = db
            .create_table(TableDefinition::new("invoices"))
            .await
            .unwrap();
        assert_eq!(retried.status, Status::Created);
        assert_eq!(db.version().await, 3);
        assert_eq!(db.select_all("orders").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn should_fail_create_table_with_duplicate_columns() {
        // given
        let db = Database::with_engine("shop", engine()).await.unwrap();

        // when
        let result = db
            .create_table(TableDefinition::new("users").with_columns(["name", "name"]))
            .await;

        // then
        let response = result.unwrap_err();
        assert!(matches!(
            response.error,
            Some(objectstore::Error::Constraint(_))
        ));
        assert_eq!(db.version().await, 1);
        assert!(db.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn should_continue_from_stored_version_on_reopen() {
        // given
        let engine = engine();
        let first = Database::with_engine("shop", engine.clone()).await.unwrap();
        first
            .create_table(TableDefinition::new("orders"))
            .await
            .unwrap();
        first
            .create_table(TableDefinition::new("invoices"))
            .await
            .unwrap();

        // when
        let second = Database::with_engine("shop", engine).await.unwrap();
        let response = second
            .create_table(TableDefinition::new("refunds"))
            .await
            .unwrap();

        // then
        assert_eq!(response.status, Status::Created);
        assert_eq!(second.version().await, 4);
        assert_eq!(second.table_names().await.len(), 3);
    }

    #[tokio::test]
    async fn should_drain_in_flight_operations_before_create_table() {
        // given
        let db = Arc::new(orders().await);
        let reader = db.state.read().await;

        // when
        let creating = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.create_table(TableDefinition::new("invoices")).await })
        };
        tokio::task::yield_now().await;
        let finished_early = creating.is_finished();
        let generation_while_reading = reader.generation;
        drop(reader);

        // then
        assert!(!finished_early);
        assert_eq!(generation_while_reading, 1);
        assert!(creating.await.unwrap().is_ok());
        assert_eq!(db.generation().await, 2);
    }
}
