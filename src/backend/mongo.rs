//! MongoDB backend on top of the official driver.

use super::{Backend, DocumentStream};
use crate::client::{ClientOptions, DEFAULT_MAX_POOL_SIZE};
use crate::error::{BulkWriteFailure, Result, StoreError};
use crate::options::{
    AggregateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};
use crate::store::{DeleteResult, InsertManyResult, InsertOneResult, Namespace, UpdateResult};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::error::{Error as DriverError, ErrorKind as DriverErrorKind, WriteFailure};
use mongodb::options::{ClientOptions as DriverOptions, IndexOptions};
use mongodb::{Client, ClientSession, Collection, IndexModel};
use std::time::Duration;

/// Driver options for `uri` with the caller's overrides applied.
///
/// The driver parses the connection string; only fields set in `options`
/// replace what it found. The pool size falls back to
/// [`DEFAULT_MAX_POOL_SIZE`] when neither side sets one.
pub async fn driver_options(uri: &str, options: &ClientOptions) -> Result<DriverOptions> {
    let mut driver_options = DriverOptions::parse(uri)
        .await
        .map_err(|e| StoreError::connection(e.to_string()))?;

    driver_options.max_pool_size = options
        .max_pool_size
        .or(driver_options.max_pool_size)
        .or(Some(DEFAULT_MAX_POOL_SIZE));
    if let Some(min) = options.min_pool_size {
        driver_options.min_pool_size = Some(min);
    }
    if let Some(ms) = options.connect_timeout_ms {
        driver_options.connect_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(ms) = options.server_selection_timeout_ms {
        driver_options.server_selection_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(ref name) = options.app_name {
        driver_options.app_name = Some(name.clone());
    }

    Ok(driver_options)
}

/// A backend that talks to a MongoDB deployment.
#[derive(Debug, Clone)]
pub struct MongoBackend {
    client: Client,
    default_database: Option<String>,
}

impl MongoBackend {
    /// Build a driver client for `uri`.
    ///
    /// This does not touch the network; the first command (normally the
    /// connection's ping) does.
    pub async fn connect(uri: &str, options: &ClientOptions) -> Result<Self> {
        let driver_options = driver_options(uri, options).await?;
        let default_database = driver_options.default_database.clone();
        let client =
            Client::with_options(driver_options).map_err(|e| StoreError::connection(e.to_string()))?;

        Ok(Self {
            client,
            default_database,
        })
    }

    /// Wrap an existing driver client.
    pub fn from_client(client: Client) -> Self {
        let default_database = client.default_database().map(|db| db.name().to_string());
        Self {
            client,
            default_database,
        }
    }

    /// Get the underlying driver client (for advanced usage).
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Database named in the connection string path.
    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client.database(ns.database()).collection(ns.collection())
    }
}

#[async_trait]
impl Backend for MongoBackend {
    type Session = ClientSession;

    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| StoreError::connection(format!("ping failed: {}", e)))
    }

    async fn start_session(&self) -> Result<ClientSession> {
        self.client
            .start_session()
            .await
            .map_err(|e| StoreError::session(e.to_string()))
    }

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        options: &InsertOneOptions,
    ) -> Result<InsertOneResult> {
        let collection = self.collection(ns);
        let mut action = collection.insert_one(document);
        if let Some(bypass) = options.bypass_document_validation {
            action = action.bypass_document_validation(bypass);
        }

        let result = action.await.map_err(write_error)?;
        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(
        &self,
        ns: &Namespace,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult> {
        let collection = self.collection(ns);
        let mut action = collection
            .insert_many(documents)
            .ordered(options.is_ordered());
        if let Some(bypass) = options.bypass_document_validation {
            action = action.bypass_document_validation(bypass);
        }

        let result = action.await.map_err(write_error)?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);

        Ok(InsertManyResult {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOneOptions,
    ) -> Result<Option<Document>> {
        let collection = self.collection(ns);
        let mut action = collection.find_one(filter);
        if let Some(ref projection) = options.projection {
            action = action.projection(projection.clone());
        }

        action.await.map_err(read_error)
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOptions,
    ) -> Result<DocumentStream> {
        let collection = self.collection(ns);
        let mut action = collection.find(filter);
        if let Some(ref projection) = options.projection {
            action = action.projection(projection.clone());
        }
        if let Some(ref sort) = options.sort {
            action = action.sort(sort.clone());
        }
        if let Some(limit) = options.effective_limit() {
            action = action.limit(limit);
        }
        if let Some(skip) = options.effective_skip() {
            action = action.skip(skip);
        }
        if let Some(allow) = options.allow_disk_use {
            action = action.allow_disk_use(allow);
        }
        if let Some(batch_size) = options.batch_size {
            action = action.batch_size(batch_size);
        }

        let cursor = action.await.map_err(read_error)?;
        Ok(cursor.map_err(read_error).boxed())
    }

    async fn distinct(&self, ns: &Namespace, field: &str, filter: Document) -> Result<Vec<Bson>> {
        self.collection(ns)
            .distinct(field, filter)
            .await
            .map_err(read_error)
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        let collection = self.collection(ns);
        let mut action = collection.update_one(filter, update);
        if let Some(upsert) = options.upsert {
            action = action.upsert(upsert);
        }
        if let Some(bypass) = options.bypass_document_validation {
            action = action.bypass_document_validation(bypass);
        }

        let result = action.await.map_err(write_error)?;
        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        let result = self
            .collection(ns)
            .update_many(filter, update)
            .upsert(false)
            .bypass_document_validation(false)
            .await
            .map_err(write_error)?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        let result = self
            .collection(ns)
            .delete_one(filter)
            .await
            .map_err(write_error)?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        let result = self
            .collection(ns)
            .delete_many(filter)
            .await
            .map_err(write_error)?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64> {
        self.collection(ns)
            .count_documents(filter)
            .await
            .map_err(read_error)
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> Result<DocumentStream> {
        let collection = self.collection(ns);
        let mut action = collection.aggregate(pipeline);
        if let Some(allow) = options.allow_disk_use {
            action = action.allow_disk_use(allow);
        }
        if let Some(bypass) = options.bypass_document_validation {
            action = action.bypass_document_validation(bypass);
        }
        if let Some(batch_size) = options.batch_size {
            action = action.batch_size(batch_size);
        }

        let cursor = action.await.map_err(read_error)?;
        Ok(cursor.map_err(read_error).boxed())
    }

    async fn create_index(&self, ns: &Namespace, keys: Document, unique: bool) -> Result<String> {
        let model = IndexModel::builder()
            .keys(keys)
            .options(Some(IndexOptions::builder().unique(unique).build()))
            .build();

        let result = self
            .collection(ns)
            .create_index(model)
            .await
            .map_err(write_error)?;
        Ok(result.index_name)
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<()> {
        self.collection(ns).drop().await.map_err(write_error)
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Failures that do not depend on what the command was doing.
fn transport_error(err: &DriverError) -> Option<StoreError> {
    match err.kind.as_ref() {
        DriverErrorKind::Io(_)
        | DriverErrorKind::ServerSelection { .. }
        | DriverErrorKind::ConnectionPoolCleared { .. }
        | DriverErrorKind::Authentication { .. } => Some(StoreError::connection(err.to_string())),
        DriverErrorKind::BsonDeserialization(_) => Some(StoreError::decode(err.to_string())),
        DriverErrorKind::BsonSerialization(_) => {
            Some(StoreError::Serialization(err.to_string()))
        }
        DriverErrorKind::InvalidArgument { .. } => {
            Some(StoreError::invalid_argument(err.to_string()))
        }
        _ => None,
    }
}

fn read_error(err: DriverError) -> StoreError {
    transport_error(&err).unwrap_or_else(|| StoreError::query(err.to_string()))
}

fn write_error(err: DriverError) -> StoreError {
    if let Some(mapped) = transport_error(&err) {
        return mapped;
    }

    match err.kind.as_ref() {
        DriverErrorKind::Write(WriteFailure::WriteError(e)) => {
            StoreError::write(Some(e.code), e.message.clone())
        }
        DriverErrorKind::Write(WriteFailure::WriteConcernError(e)) => {
            StoreError::write(Some(e.code), e.message.clone())
        }
        DriverErrorKind::InsertMany(e) => {
            let failures: Vec<BulkWriteFailure> = e
                .write_errors
                .iter()
                .flatten()
                .map(|w| BulkWriteFailure {
                    index: w.index,
                    code: w.code,
                    message: w.message.clone(),
                })
                .collect();

            if failures.is_empty() {
                let code = e.write_concern_error.as_ref().map(|wc| wc.code);
                StoreError::write(code, err.to_string())
            } else {
                StoreError::BulkWrite { failures }
            }
        }
        DriverErrorKind::Command(e) => StoreError::write(Some(e.code), e.message.clone()),
        _ => StoreError::write(None, err.to_string()),
    }
}
