//! Employee records and their handlers.

use super::response::{ApiError, ApiResponse};
use super::AppState;
use crate::backend::Backend;
use crate::options::FindOptions;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use bson::{doc, Bson};
use serde::{Deserialize, Serialize};

/// An employee record. Missing JSON fields take their zero values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Employee {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub email: String,
    pub age: i32,
}

impl Employee {
    fn require_name(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("employee name is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inserted {
    pub inserted_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Updated {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted_count: u64,
}

fn read_body(body: Result<Json<Employee>, JsonRejection>) -> Result<Employee, ApiError> {
    let Json(employee) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    employee.require_name()?;
    Ok(employee)
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn hello() -> ApiResponse<&'static str> {
    ApiResponse::ok("Hello There!", "")
}

pub async fn test() -> Json<&'static str> {
    Json("Testing...")
}

pub async fn add_one<B: Backend>(
    State(state): State<AppState<B>>,
    body: Result<Json<Employee>, JsonRejection>,
) -> Result<ApiResponse<Inserted>, ApiError> {
    let employee = read_body(body)?;

    let result = state
        .store
        .insert_one(&state.database, &state.collection, &employee, None)
        .await?;

    let inserted_id = id_string(&result.inserted_id);
    tracing::info!(name = %employee.name, id = %inserted_id, "employee added");
    Ok(ApiResponse::created(
        "Employee added",
        Inserted { inserted_id },
    ))
}

pub async fn get_all<B: Backend>(
    State(state): State<AppState<B>>,
) -> Result<ApiResponse<Vec<Employee>>, ApiError> {
    let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
    let employees: Vec<Employee> = state
        .store
        .find(&state.database, &state.collection, doc! {}, options)
        .await?
        .collect()
        .await?;

    Ok(ApiResponse::ok(
        format!("Found {} employees", employees.len()),
        employees,
    ))
}

pub async fn get_one<B: Backend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Result<ApiResponse<Employee>, ApiError> {
    let employee: Option<Employee> = state
        .store
        .find_one(&state.database, &state.collection, doc! { "name": name.as_str() }, None)
        .await?;

    match employee {
        Some(employee) => Ok(ApiResponse::ok("Employee found", employee)),
        None => Err(ApiError::not_found(format!("no employee named {:?}", name))),
    }
}

pub async fn update<B: Backend>(
    State(state): State<AppState<B>>,
    body: Result<Json<Employee>, JsonRejection>,
) -> Result<ApiResponse<Updated>, ApiError> {
    let employee = read_body(body)?;

    let result = state
        .store
        .update_one(
            &state.database,
            &state.collection,
            doc! { "name": employee.name.as_str() },
            doc! {
                "name": employee.name.as_str(),
                "email": employee.email.as_str(),
                "age": employee.age,
            },
            None,
        )
        .await?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found(format!(
            "no employee named {:?}",
            employee.name
        )));
    }

    tracing::info!(name = %employee.name, modified = result.modified_count, "employee updated");
    Ok(ApiResponse::ok(
        "Employee updated",
        Updated {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        },
    ))
}

pub async fn delete_by_name<B: Backend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Result<ApiResponse<Deleted>, ApiError> {
    let result = state
        .store
        .delete_many(&state.database, &state.collection, doc! { "name": name.as_str() })
        .await?;

    tracing::info!(name = %name, deleted = result.deleted_count, "employees deleted");
    Ok(ApiResponse::ok(
        format!("Deleted {} record(s)", result.deleted_count),
        Deleted {
            deleted_count: result.deleted_count,
        },
    ))
}
