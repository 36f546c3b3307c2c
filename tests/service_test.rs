//! HTTP routes against the in-memory backend.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use employee_store::service::employee::{Deleted, Inserted, Updated};
use employee_store::service::{self, AppState, Employee, Envelope};
use employee_store::{
    doc, ClientOptions, Connection, DocumentStore, MemoryBackend, Operation, StoreError,
};
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

async fn app() -> (Router, MemoryBackend) {
    let backend = MemoryBackend::new();
    let connection = Connection::open(backend.clone(), ClientOptions::default())
        .await
        .unwrap();
    let state = AppState::new(DocumentStore::new(connection), "learn", "learn");
    (service::router(state), backend)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn envelope<T: DeserializeOwned>(bytes: &[u8]) -> Envelope<T> {
    serde_json::from_slice(bytes).unwrap()
}

fn ann() -> Employee {
    Employee {
        name: "Ann".to_string(),
        email: "a@x.com".to_string(),
        age: 30,
    }
}

#[tokio::test]
async fn test_hello_and_test_routes() {
    let (app, _) = app().await;

    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        envelope::<String>(&body),
        Envelope {
            status: 200,
            message: "Hello There!".to_string(),
            data: String::new(),
        }
    );

    let (status, body) = send(&app, Method::GET, "/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<String>(&body).unwrap(), "Testing...");
}

#[tokio::test]
async fn test_employee_lifecycle() {
    let (app, backend) = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/add",
        Some(r#"{"name":"Ann","email":"a@x.com","age":30}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let inserted: Envelope<Inserted> = envelope(&body);
    assert_eq!(inserted.data.inserted_id.len(), 24);
    assert_eq!(backend.documents("learn", "learn").len(), 1);

    let (status, body) = send(&app, Method::GET, "/getone/Ann", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope::<Employee>(&body).data, ann());

    let (status, body) = send(
        &app,
        Method::PUT,
        "/update",
        Some(r#"{"name":"Ann","email":"a@x.com","age":31}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        envelope::<Updated>(&body).data,
        Updated {
            matched_count: 1,
            modified_count: 1,
        }
    );

    let (_, body) = send(&app, Method::GET, "/getall", None).await;
    let all: Envelope<Vec<Employee>> = envelope(&body);
    assert_eq!(all.data, vec![Employee { age: 31, ..ann() }]);

    let (status, body) = send(&app, Method::DELETE, "/delete/Ann", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope::<Deleted>(&body).data, Deleted { deleted_count: 1 });

    let (status, body) = send(&app, Method::GET, "/getone/Ann", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let missing: Envelope<serde_json::Value> = envelope(&body);
    assert_eq!(missing.status, 404);
    assert_eq!(missing.data, serde_json::Value::Null);
}

#[tokio::test]
async fn test_getall_sorted_by_name() {
    let (app, _) = app().await;
    for body in [
        r#"{"name":"Cy","email":"c@x.com","age":41}"#,
        r#"{"name":"Ann","email":"a@x.com","age":30}"#,
    ] {
        let (status, _) = send(&app, Method::POST, "/add", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = send(&app, Method::GET, "/getall", None).await;
    let names: Vec<String> = envelope::<Vec<Employee>>(&body)
        .data
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["Ann", "Cy"]);
}

#[tokio::test]
async fn test_bad_bodies_are_rejected() {
    let (app, backend) = app().await;

    let (status, _) = send(&app, Method::POST, "/add", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::PUT, "/update", Some(r#"{"age":3}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope::<serde_json::Value>(&body).status, 400);

    assert!(backend.documents("learn", "learn").is_empty());
}

#[tokio::test]
async fn test_update_of_unknown_employee_is_not_found() {
    let (app, backend) = app().await;
    let (status, _) = send(
        &app,
        Method::PUT,
        "/update",
        Some(r#"{"name":"Zed","email":"z@x.com","age":50}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(backend.documents("learn", "learn").is_empty());
}

#[tokio::test]
async fn test_delete_of_unknown_employee_reports_zero() {
    let (app, _) = app().await;
    let (status, body) = send(&app, Method::DELETE, "/delete/Zed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope::<Deleted>(&body).data.deleted_count, 0);
}

#[tokio::test]
async fn test_duplicate_key_is_conflict() {
    let (app, backend) = app().await;
    let connection = Connection::open(backend.clone(), ClientOptions::default())
        .await
        .unwrap();
    DocumentStore::new(connection)
        .create_index("learn", "learn", doc! { "email": 1 }, true)
        .await
        .unwrap();

    let body = r#"{"name":"Ann","email":"a@x.com","age":30}"#;
    let (status, _) = send(&app, Method::POST, "/add", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, Method::POST, "/add", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_infrastructure_failures_are_unavailable() {
    let (app, backend) = app().await;

    backend.fail_next(Operation::StartSession, StoreError::session("pool exhausted"));
    let (status, _) = send(&app, Method::GET, "/getall", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    backend.fail_next(Operation::Find, StoreError::query("cursor killed"));
    let (status, body) = send(&app, Method::GET, "/getall", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(envelope::<serde_json::Value>(&body)
        .message
        .contains("cursor killed"));
}
