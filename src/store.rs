//! The document store: one uniform, option-driven call per engine primitive.

use crate::backend::{Backend, MongoBackend, Operation};
use crate::client::Connection;
use crate::cursor::ResultCursor;
use crate::error::{Result, StoreError};
use crate::options::{
    AggregateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};
use bson::{doc, Bson, Document};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// A (database, collection) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Result of an insert_one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The ID of the inserted document.
    pub inserted_id: Bson,
}

/// Result of an insert_many operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Inserted IDs, in the order the documents were submitted.
    pub inserted_ids: Vec<Bson>,
}

/// Result of an update operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Number of documents matched.
    pub matched_count: u64,
    /// Number of documents modified.
    pub modified_count: u64,
    /// The ID of the upserted document, if any.
    pub upserted_id: Option<Bson>,
}

/// Result of a delete operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    /// Number of documents deleted.
    pub deleted_count: u64,
}

/// Generic data access over one [`Connection`].
///
/// Every call names its target database and collection; nothing is cached
/// between calls beyond what the connection itself keeps. Each call holds
/// its own session for exactly its own duration.
///
/// # Example
///
/// ```ignore
/// use employee_store::{Connection, DocumentStore, bson::doc};
///
/// let connection = Connection::connect("mongodb://localhost:27017", 10).await?;
/// let store = DocumentStore::new(connection);
///
/// store.insert_one("hr", "employees", &doc! { "name": "Ann", "age": 30 }, None).await?;
/// let ann: Option<bson::Document> = store.find_one("hr", "employees", doc! { "name": "Ann" }, None).await?;
/// ```
pub struct DocumentStore<B: Backend = MongoBackend> {
    connection: Connection<B>,
    operation_timeout: Option<Duration>,
}

impl<B: Backend> Clone for DocumentStore<B> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl<B: Backend> fmt::Debug for DocumentStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("connection", &self.connection)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl<B: Backend> DocumentStore<B> {
    /// Create a store over `connection`, using its configured deadline.
    pub fn new(connection: Connection<B>) -> Self {
        let operation_timeout = connection.options().operation_timeout();
        Self {
            connection,
            operation_timeout,
        }
    }

    /// Override the per-operation deadline. `None` waits indefinitely.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection<B> {
        &self.connection
    }

    /// Run one backend call inside a session and under the deadline.
    async fn execute<'a, T, F, Fut>(
        &'a self,
        operation: Operation,
        ns: &Namespace,
        call: F,
    ) -> Result<T>
    where
        F: FnOnce(&'a B) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _session = self.connection.start_session().await.map_err(|e| {
            tracing::warn!(%operation, namespace = %ns, error = %e, "could not start session");
            e
        })?;

        let fut = call(self.connection.backend());
        let result = match self.operation_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            },
            None => fut.await,
        };

        match &result {
            Ok(_) => tracing::debug!(%operation, namespace = %ns, "operation completed"),
            Err(e) => tracing::warn!(%operation, namespace = %ns, error = %e, "operation failed"),
        }
        result
    }

    /// Insert a single document.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = store.insert_one("hr", "employees", &employee, None).await?;
    /// println!("Inserted ID: {:?}", result.inserted_id);
    /// ```
    pub async fn insert_one<T: Serialize>(
        &self,
        database: &str,
        collection: &str,
        document: &T,
        options: impl Into<Option<InsertOneOptions>>,
    ) -> Result<InsertOneResult> {
        let ns = Namespace::new(database, collection);
        let document = bson::to_document(document)?;
        let options = options.into().unwrap_or_default();

        self.execute(Operation::InsertOne, &ns, |backend| {
            backend.insert_one(&ns, document, &options)
        })
        .await
    }

    /// Insert multiple documents.
    ///
    /// With `ordered` (the default) the first failure stops the batch and
    /// later documents are never attempted. Unordered batches attempt every
    /// document. Either way failures come back as
    /// [`StoreError::BulkWrite`] listing the failed positions.
    pub async fn insert_many<T: Serialize>(
        &self,
        database: &str,
        collection: &str,
        documents: impl IntoIterator<Item = T>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        let ns = Namespace::new(database, collection);
        let documents: Vec<Document> = documents
            .into_iter()
            .map(|d| bson::to_document(&d))
            .collect::<std::result::Result<_, _>>()?;
        if documents.is_empty() {
            return Err(StoreError::invalid_argument(
                "insert_many requires at least one document",
            ));
        }
        let options = options.into().unwrap_or_default();

        self.execute(Operation::InsertMany, &ns, |backend| {
            backend.insert_many(&ns, documents, &options)
        })
        .await
    }

    /// Find a single document. `Ok(None)` when nothing matches.
    pub async fn find_one<T: DeserializeOwned>(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> Result<Option<T>> {
        let ns = Namespace::new(database, collection);
        let options = options.into().unwrap_or_default();

        let found = self
            .execute(Operation::FindOne, &ns, |backend| {
                backend.find_one(&ns, filter, &options)
            })
            .await?;

        match found {
            Some(document) => bson::from_document(document)
                .map(Some)
                .map_err(|e| StoreError::decode(e.to_string())),
            None => Ok(None),
        }
    }

    /// Find documents matching a filter.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let options = FindOptions::builder().sort(doc! { "age": -1 }).limit(10).build();
    /// let cursor = store.find::<Employee>("hr", "employees", doc! {}, options).await?;
    /// let employees = cursor.collect().await?;
    /// ```
    pub async fn find<T: DeserializeOwned>(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<ResultCursor<T>> {
        let ns = Namespace::new(database, collection);
        let options = options.into().unwrap_or_default();

        let stream = self
            .execute(Operation::Find, &ns, |backend| {
                backend.find(&ns, filter, &options)
            })
            .await?;

        Ok(ResultCursor::new(ns.to_string(), stream))
    }

    /// Get distinct values for a field among matching documents.
    pub async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::Distinct, &ns, |backend| {
            backend.distinct(&ns, field, filter)
        })
        .await
    }

    /// Update a single document.
    ///
    /// `update` lists the fields to set; it is always applied as `$set`,
    /// so fields it does not name keep their stored values.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = store.update_one(
    ///     "hr", "employees",
    ///     doc! { "name": "Ann" },
    ///     doc! { "age": 31 },
    ///     None,
    /// ).await?;
    /// ```
    pub async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> Result<UpdateResult> {
        let ns = Namespace::new(database, collection);
        let update = doc! { "$set": update };
        let options = options.into().unwrap_or_default();

        self.execute(Operation::UpdateOne, &ns, |backend| {
            backend.update_one(&ns, filter, update, &options)
        })
        .await
    }

    /// Update every matching document with `$set` semantics. Never upserts.
    pub async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        let ns = Namespace::new(database, collection);
        let update = doc! { "$set": update };

        self.execute(Operation::UpdateMany, &ns, |backend| {
            backend.update_many(&ns, filter, update)
        })
        .await
    }

    /// Delete a single document.
    pub async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::DeleteOne, &ns, |backend| {
            backend.delete_one(&ns, filter)
        })
        .await
    }

    /// Delete multiple documents.
    pub async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::DeleteMany, &ns, |backend| {
            backend.delete_many(&ns, filter)
        })
        .await
    }

    /// Count documents matching a filter.
    ///
    /// A failed count is an error; it is never reported as zero matches.
    pub async fn count(&self, database: &str, collection: &str, filter: Document) -> Result<u64> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::Count, &ns, |backend| {
            backend.count_documents(&ns, filter)
        })
        .await
    }

    /// Run an aggregation pipeline. Stages are passed through untouched.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pipeline = vec![
    ///     doc! { "$match": { "age": { "$gte": 30 } } },
    ///     doc! { "$sort": { "age": 1 } },
    /// ];
    /// let cursor = store.aggregate::<Document>("hr", "employees", pipeline, None).await?;
    /// ```
    pub async fn aggregate<T: DeserializeOwned>(
        &self,
        database: &str,
        collection: &str,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<ResultCursor<T>> {
        let ns = Namespace::new(database, collection);
        let pipeline: Vec<Document> = pipeline.into_iter().collect();
        let options = options.into().unwrap_or_default();

        let stream = self
            .execute(Operation::Aggregate, &ns, |backend| {
                backend.aggregate(&ns, pipeline, &options)
            })
            .await?;

        Ok(ResultCursor::new(ns.to_string(), stream))
    }

    /// Create an index and return its name.
    pub async fn create_index(
        &self,
        database: &str,
        collection: &str,
        keys: Document,
        unique: bool,
    ) -> Result<String> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::CreateIndex, &ns, |backend| {
            backend.create_index(&ns, keys, unique)
        })
        .await
    }

    /// Drop the collection.
    pub async fn drop_collection(&self, database: &str, collection: &str) -> Result<()> {
        let ns = Namespace::new(database, collection);

        self.execute(Operation::DropCollection, &ns, |backend| {
            backend.drop_collection(&ns)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::client::ClientOptions;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Employee {
        name: String,
        email: String,
        age: i32,
    }

    async fn store() -> DocumentStore<MemoryBackend> {
        let connection = Connection::open(MemoryBackend::new(), ClientOptions::default())
            .await
            .unwrap();
        DocumentStore::new(connection)
    }

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new("learn", "employees");
        assert_eq!(ns.to_string(), "learn.employees");
        assert_eq!(ns.database(), "learn");
        assert_eq!(ns.collection(), "employees");
    }

    #[test]
    fn test_update_result() {
        let result = UpdateResult {
            matched_count: 5,
            modified_count: 3,
            upserted_id: None,
        };
        assert_eq!(result.matched_count, 5);
        assert_eq!(result.modified_count, 3);
        assert!(result.upserted_id.is_none());
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = store().await;
        let ann = Employee {
            name: "Ann".to_string(),
            email: "a@x.com".to_string(),
            age: 30,
        };

        let inserted = store.insert_one("learn", "employees", &ann, None).await.unwrap();
        assert!(inserted.inserted_id.as_object_id().is_some());

        let found: Option<Employee> = store
            .find_one(
                "learn",
                "employees",
                doc! { "name": "Ann" },
                FindOneOptions::builder()
                    .projection(doc! { "_id": 0 })
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(found, Some(ann));
    }

    #[tokio::test]
    async fn test_find_one_decode_failure() {
        let store = store().await;
        store
            .insert_one("learn", "employees", &doc! { "name": "Bob" }, None)
            .await
            .unwrap();

        let err = store
            .find_one::<Employee>("learn", "employees", doc! { "name": "Bob" }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn test_update_wraps_in_set() {
        let store = store().await;
        store
            .insert_one(
                "learn",
                "employees",
                &doc! { "name": "Ann", "email": "a@x.com", "age": 30 },
                None,
            )
            .await
            .unwrap();

        // A bare field document would replace the record if it were sent as-is.
        let result = store
            .update_one("learn", "employees", doc! { "name": "Ann" }, doc! { "age": 31 }, None)
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);

        let stored: Document = store
            .find_one("learn", "employees", doc! { "name": "Ann" }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get_str("email").unwrap(), "a@x.com");
        assert_eq!(stored.get_i32("age").unwrap(), 31);
    }

    #[tokio::test]
    async fn test_insert_many_rejects_empty_batch() {
        let store = store().await;
        let err = store
            .insert_many("learn", "employees", Vec::<Document>::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(store.connection().active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_unserializable_payload_is_rejected_before_session() {
        let store = store().await;
        // A bare string is not a document.
        let err = store
            .insert_one("learn", "employees", &"just a string", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(store.connection().active_sessions(), 0);
    }
}
