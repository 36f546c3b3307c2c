//! # employee-store
//!
//! A generic, option-driven document store over MongoDB, and the small
//! employee HTTP service built on it.
//!
//! ## Features
//!
//! - One uniform call per engine primitive: insert, find, distinct, update,
//!   delete, count, aggregate
//! - Typed payloads through `serde`, or raw `bson::Document`s
//! - Per-operation sessions and deadlines
//! - Lazy, forward-only cursors
//! - An in-memory backend for tests and local runs
//!
//! ## Quick Start
//!
//! ```ignore
//! use employee_store::{Connection, DocumentStore, bson::doc};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Employee {
//!     name: String,
//!     email: String,
//!     age: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> employee_store::Result<()> {
//!     let connection = Connection::connect("mongodb://localhost:27017", 10).await?;
//!     let store = DocumentStore::new(connection.clone());
//!
//!     store.insert_one("learn", "learn", &Employee {
//!         name: "Ann".to_string(),
//!         email: "a@x.com".to_string(),
//!         age: 30,
//!     }, None).await?;
//!
//!     let everyone: Vec<Employee> = store
//!         .find("learn", "learn", doc! {}, None)
//!         .await?
//!         .collect()
//!         .await?;
//!
//!     store.update_one("learn", "learn", doc! { "name": "Ann" }, doc! { "age": 31 }, None).await?;
//!     store.delete_many("learn", "learn", doc! { "name": "Ann" }).await?;
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod options;
pub mod service;
pub mod store;

// Re-export main types
pub use backend::{Backend, MemoryBackend, MongoBackend, Operation};
pub use client::{
    ClientOptions, ClientOptionsBuilder, Connection, OperationSession, DEFAULT_MAX_POOL_SIZE,
    DEFAULT_OPERATION_TIMEOUT_MS,
};
pub use config::Settings;
pub use cursor::ResultCursor;
pub use error::{BulkWriteFailure, ErrorKind, Result, StoreError};
pub use options::{
    AggregateOptions, AggregateOptionsBuilder, FindOneOptions, FindOneOptionsBuilder, FindOptions,
    FindOptionsBuilder, InsertManyOptions, InsertManyOptionsBuilder, InsertOneOptions,
    InsertOneOptionsBuilder, UpdateOptions, UpdateOptionsBuilder,
};
pub use store::{
    DeleteResult, DocumentStore, InsertManyResult, InsertOneResult, Namespace, UpdateResult,
};

// Re-export bson for convenience
pub use bson;
pub use bson::doc;

/// Prelude module for common imports.
pub mod prelude {
    pub use super::client::{ClientOptions, Connection};
    pub use super::cursor::ResultCursor;
    pub use super::error::{ErrorKind, Result, StoreError};
    pub use super::options::{
        AggregateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
        UpdateOptions,
    };
    pub use super::store::{
        DeleteResult, DocumentStore, InsertManyResult, InsertOneResult, UpdateResult,
    };
    pub use bson::{doc, Bson, Document};
    pub use serde::{Deserialize, Serialize};
}

/// Get the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }

    #[test]
    fn test_doc_macro() {
        let document = doc! {
            "name": "Ann",
            "age": 30,
            "active": true,
        };
        assert_eq!(document.get_str("name").unwrap(), "Ann");
        assert_eq!(document.get_i32("age").unwrap(), 30);
        assert!(document.get_bool("active").unwrap());
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _: Result<()> = Ok(());
        let _options = FindOptions::builder().limit(5).build();
        let _doc = doc! { "test": 1 };
    }

    #[test]
    fn test_error_kind_variants() {
        assert_eq!(StoreError::connection("x").kind(), ErrorKind::Connection);
        assert_eq!(StoreError::session("x").kind(), ErrorKind::Session);
        assert_eq!(StoreError::write(None, "x").kind(), ErrorKind::Write);
        assert_eq!(StoreError::query("x").kind(), ErrorKind::Query);
        assert_eq!(StoreError::decode("x").kind(), ErrorKind::Decode);
        assert_eq!(StoreError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(StoreError::invalid_argument("x").kind(), ErrorKind::Validation);
    }
}
