//! Engine backends behind the document store.
//!
//! A [`Backend`] executes one primitive per call against a [`Namespace`]. It
//! receives payloads that are already BSON and update documents that already
//! carry their operators; shaping the caller's input is the store's job.

use crate::error::Result;
use crate::options::{
    AggregateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};
use crate::store::{DeleteResult, InsertManyResult, InsertOneResult, Namespace, UpdateResult};
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt;

pub mod memory;
pub mod mongo;

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;

/// Raw documents produced by a server-side cursor.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// The primitives a backend executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    StartSession,
    InsertOne,
    InsertMany,
    FindOne,
    Find,
    Distinct,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Count,
    Aggregate,
    CreateIndex,
    DropCollection,
}

impl Operation {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::StartSession => "start_session",
            Operation::InsertOne => "insert_one",
            Operation::InsertMany => "insert_many",
            Operation::FindOne => "find_one",
            Operation::Find => "find",
            Operation::Distinct => "distinct",
            Operation::UpdateOne => "update_one",
            Operation::UpdateMany => "update_many",
            Operation::DeleteOne => "delete_one",
            Operation::DeleteMany => "delete_many",
            Operation::Count => "count",
            Operation::Aggregate => "aggregate",
            Operation::CreateIndex => "create_index",
            Operation::DropCollection => "drop_collection",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document engine the store can drive.
///
/// Implementations must be safe to share between tasks; the store calls them
/// concurrently through one `Arc`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Engine-side session handle. Ending the session is tied to dropping it.
    type Session: Send + 'static;

    /// Verify the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Open a session for one operation.
    async fn start_session(&self) -> Result<Self::Session>;

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        options: &InsertOneOptions,
    ) -> Result<InsertOneResult>;

    async fn insert_many(
        &self,
        ns: &Namespace,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult>;

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOneOptions,
    ) -> Result<Option<Document>>;

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOptions,
    ) -> Result<DocumentStream>;

    async fn distinct(&self, ns: &Namespace, field: &str, filter: Document) -> Result<Vec<Bson>>;

    /// `update` is a full update document (operators included).
    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult>;

    /// `update` is a full update document (operators included).
    async fn update_many(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult>;

    async fn delete_one(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult>;

    async fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult>;

    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64>;

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> Result<DocumentStream>;

    /// Create an index and return its name.
    async fn create_index(&self, ns: &Namespace, keys: Document, unique: bool) -> Result<String>;

    async fn drop_collection(&self, ns: &Namespace) -> Result<()>;

    /// Release engine resources. Called once when the owning connection closes.
    async fn shutdown(&self) {}
}
