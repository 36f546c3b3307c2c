//! HTTP surface for employee records.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/` | greeting |
//! | GET | `/test` | liveness text |
//! | POST | `/add` | insert one employee |
//! | GET | `/getall` | list employees |
//! | GET | `/getone/{name}` | employee by name |
//! | PUT | `/update` | partial update by name |
//! | DELETE | `/delete/{name}` | delete every employee with that name |

pub mod employee;
pub mod response;

pub use employee::Employee;
pub use response::{ApiError, ApiResponse, Envelope};

use crate::backend::{Backend, MongoBackend};
use crate::store::DocumentStore;
use axum::routing::{delete, get, post, put};
use axum::Router;

/// Shared handler state: the store and the collection employees live in.
pub struct AppState<B: Backend = MongoBackend> {
    pub store: DocumentStore<B>,
    pub database: String,
    pub collection: String,
}

impl<B: Backend> AppState<B> {
    pub fn new(
        store: DocumentStore<B>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
        }
    }
}

/// Build the service router.
pub fn router<B: Backend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/", get(employee::hello))
        .route("/test", get(employee::test))
        .route("/add", post(employee::add_one::<B>))
        .route("/getall", get(employee::get_all::<B>))
        .route("/getone/{name}", get(employee::get_one::<B>))
        .route("/update", put(employee::update::<B>))
        .route("/delete/{name}", delete(employee::delete_by_name::<B>))
        .with_state(state)
}
