//! Store behavior against a live MongoDB deployment.
//!
//! Ignored by default. Run with `MONGO_URI` set and `--ignored`; each test
//! works in its own throwaway database.

use employee_store::prelude::*;
use employee_store::{bson::oid::ObjectId, MongoBackend};
use pretty_assertions::assert_eq;

const COLL: &str = "employees";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Employee {
    name: String,
    email: String,
    age: i32,
}

fn employee(name: &str, email: &str, age: i32) -> Employee {
    Employee {
        name: name.to_string(),
        email: email.to_string(),
        age,
    }
}

async fn store() -> Option<(DocumentStore<MongoBackend>, String)> {
    let uri = std::env::var("MONGO_URI").ok()?;
    let connection = Connection::new(&uri).await.unwrap();
    let database = format!("employee_store_{}", ObjectId::new().to_hex());
    Some((DocumentStore::new(connection), database))
}

#[tokio::test]
#[ignore]
async fn test_mongo_round_trip_by_unique_field() {
    let Some((store, db)) = store().await else {
        return;
    };
    store
        .create_index(&db, COLL, doc! { "email": 1 }, true)
        .await
        .unwrap();

    let ann = employee("Ann", "a@x.com", 30);
    store.insert_one(&db, COLL, &ann, None).await.unwrap();
    let found: Option<Employee> = store
        .find_one(&db, COLL, doc! { "email": "a@x.com" }, None)
        .await
        .unwrap();
    assert_eq!(found, Some(ann.clone()));

    let err = store.insert_one(&db, COLL, &ann, None).await.unwrap_err();
    assert!(err.is_duplicate_key());

    store.drop_collection(&db, COLL).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_mongo_ordered_insert_stops_at_duplicate() {
    let Some((store, db)) = store().await else {
        return;
    };
    store
        .create_index(&db, COLL, doc! { "email": 1 }, true)
        .await
        .unwrap();

    let batch = vec![
        employee("Ann", "a@x.com", 30),
        employee("Bob", "b@x.com", 25),
        employee("Ann again", "a@x.com", 31),
        employee("Cy", "c@x.com", 41),
    ];
    let err = store.insert_many(&db, COLL, batch, None).await.unwrap_err();
    match err {
        StoreError::BulkWrite { ref failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 2);
        }
        other => panic!("expected a bulk write error, got {other:?}"),
    }
    assert!(err.is_duplicate_key());
    assert_eq!(store.count(&db, COLL, doc! {}).await.unwrap(), 2);

    store.drop_collection(&db, COLL).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_mongo_count_with_bad_filter_is_query_error() {
    let Some((store, db)) = store().await else {
        return;
    };
    store
        .insert_one(&db, COLL, &employee("Ann", "a@x.com", 30), None)
        .await
        .unwrap();

    let err = store
        .count(&db, COLL, doc! { "age": { "$between": [1, 2] } })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);

    store.drop_collection(&db, COLL).await.unwrap();
}
