//! In-process backend.
//!
//! Holds collections in memory and evaluates a subset of the query language:
//!
//! - filters: field equality (with array containment), dotted paths, `$eq`,
//!   `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`, and the
//!   logical `$and`, `$or`, `$nor`
//! - projections: inclusion or exclusion, `_id` suppression
//! - updates: `$set`, `$unset`, upsert
//! - unique indexes, including the implicit one on `_id`
//! - pipeline stages: `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count`
//!
//! Anything outside that subset is rejected the way the server rejects an
//! unknown operator. Failures and latency can be injected per operation,
//! which is what the test suites use to exercise error paths.

use super::{Backend, DocumentStream, Operation};
use crate::error::{BulkWriteFailure, Result, StoreError};
use crate::options::{
    AggregateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};
use crate::store::{DeleteResult, InsertManyResult, InsertOneResult, Namespace, UpdateResult};
use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

const DUPLICATE_KEY: i32 = 11000;
const FAILED_TO_PARSE: i32 = 9;
const IMMUTABLE_FIELD: i32 = 66;
const PATH_NOT_VIABLE: i32 = 28;

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    fields: Vec<String>,
    unique: bool,
}

impl IndexSpec {
    fn key_of(&self, document: &Document) -> Vec<Bson> {
        self.fields
            .iter()
            .map(|f| lookup(document, f).cloned().unwrap_or(Bson::Null))
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    /// Reject `candidate` if it collides with another stored document on
    /// `_id` or on any unique index. `skip` is the candidate's own slot.
    fn check_unique(&self, ns: &Namespace, candidate: &Document, skip: Option<usize>) -> Result<()> {
        let others = self
            .documents
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, d)| d);

        if let Some(id) = candidate.get("_id") {
            for other in others.clone() {
                if other.get("_id").is_some_and(|existing| values_equal(existing, id)) {
                    return Err(duplicate_key(ns, "_id_", &["_id".to_string()], &[id.clone()]));
                }
            }
        }

        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index.key_of(candidate);
            for other in others.clone() {
                if keys_equal(&index.key_of(other), &key) {
                    return Err(duplicate_key(ns, &index.name, &index.fields, &key));
                }
            }
        }

        Ok(())
    }

    fn matching(&self, filter: &Document) -> Result<Vec<usize>> {
        let mut positions = Vec::new();
        for (i, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                positions.push(i);
            }
        }
        Ok(positions)
    }
}

#[derive(Default)]
struct Inner {
    collections: RwLock<HashMap<Namespace, MemoryCollection>>,
    faults: Mutex<HashMap<Operation, StoreError>>,
    delays: Mutex<HashMap<Operation, Duration>>,
    commands: AtomicU64,
}

/// An in-memory document engine.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: StoreError) {
        self.inner.faults.lock().insert(operation, error);
    }

    /// Delay every call of `operation` by `duration`.
    pub fn delay(&self, operation: Operation, duration: Duration) {
        self.inner.delays.lock().insert(operation, duration);
    }

    /// Number of data commands executed so far (pings and sessions excluded).
    pub fn commands_executed(&self) -> u64 {
        self.inner.commands.load(AtomicOrdering::SeqCst)
    }

    /// Snapshot of a collection in storage order.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .read()
            .get(&Namespace::new(database, collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    async fn enter(&self, operation: Operation) -> Result<()> {
        let delay = self.inner.delays.lock().get(&operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.inner.faults.lock().remove(&operation) {
            return Err(error);
        }

        if !matches!(operation, Operation::Ping | Operation::StartSession) {
            self.inner.commands.fetch_add(1, AtomicOrdering::SeqCst);
        }
        Ok(())
    }

    fn read_matching(&self, ns: &Namespace, filter: &Document) -> Result<Vec<Document>> {
        let collections = self.inner.collections.read();
        let Some(collection) = collections.get(ns) else {
            return Ok(Vec::new());
        };

        let positions = collection.matching(filter)?;
        Ok(positions
            .into_iter()
            .map(|i| collection.documents[i].clone())
            .collect())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("collections", &self.inner.collections.read().len())
            .field("commands", &self.commands_executed())
            .finish()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Session = ();

    async fn ping(&self) -> Result<()> {
        self.enter(Operation::Ping).await
    }

    async fn start_session(&self) -> Result<()> {
        self.enter(Operation::StartSession).await
    }

    async fn insert_one(
        &self,
        ns: &Namespace,
        document: Document,
        _options: &InsertOneOptions,
    ) -> Result<InsertOneResult> {
        self.enter(Operation::InsertOne).await?;

        let document = with_id(document);
        let mut collections = self.inner.collections.write();
        let collection = collections.entry(ns.clone()).or_default();
        collection.check_unique(ns, &document, None)?;

        let inserted_id = document.get("_id").cloned().unwrap_or(Bson::Null);
        collection.documents.push(document);
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(
        &self,
        ns: &Namespace,
        documents: Vec<Document>,
        options: &InsertManyOptions,
    ) -> Result<InsertManyResult> {
        self.enter(Operation::InsertMany).await?;

        let ordered = options.is_ordered();
        let mut collections = self.inner.collections.write();
        let collection = collections.entry(ns.clone()).or_default();

        let mut inserted_ids = Vec::new();
        let mut failures = Vec::new();
        for (index, document) in documents.into_iter().enumerate() {
            let document = with_id(document);
            match collection.check_unique(ns, &document, None) {
                Ok(()) => {
                    inserted_ids.push(document.get("_id").cloned().unwrap_or(Bson::Null));
                    collection.documents.push(document);
                }
                Err(e) => {
                    let (code, message) = match e {
                        StoreError::Write { code, message } => {
                            (code.unwrap_or(DUPLICATE_KEY), message)
                        }
                        other => (DUPLICATE_KEY, other.to_string()),
                    };
                    failures.push(BulkWriteFailure {
                        index,
                        code,
                        message,
                    });
                    if ordered {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(InsertManyResult { inserted_ids })
        } else {
            Err(StoreError::BulkWrite { failures })
        }
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOneOptions,
    ) -> Result<Option<Document>> {
        self.enter(Operation::FindOne).await?;

        let found = self.read_matching(ns, &filter)?.into_iter().next();
        match (found, &options.projection) {
            (Some(document), Some(projection)) => project(&document, projection).map(Some),
            (found, _) => Ok(found),
        }
    }

    async fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: &FindOptions,
    ) -> Result<DocumentStream> {
        self.enter(Operation::Find).await?;

        let mut documents = self.read_matching(ns, &filter)?;
        if let Some(ref sort) = options.sort {
            sort_documents(&mut documents, sort)?;
        }
        if let Some(skip) = options.effective_skip() {
            documents = documents.into_iter().skip(skip as usize).collect();
        }
        if let Some(limit) = options.effective_limit() {
            documents.truncate(limit as usize);
        }
        if let Some(ref projection) = options.projection {
            documents = documents
                .iter()
                .map(|d| project(d, projection))
                .collect::<Result<_>>()?;
        }

        Ok(futures::stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn distinct(&self, ns: &Namespace, field: &str, filter: Document) -> Result<Vec<Bson>> {
        self.enter(Operation::Distinct).await?;

        let mut values: Vec<Bson> = Vec::new();
        let mut push = |value: &Bson| {
            if !values.iter().any(|v| values_equal(v, value)) {
                values.push(value.clone());
            }
        };

        for document in self.read_matching(ns, &filter)? {
            match lookup(&document, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }
        Ok(values)
    }

    async fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        self.enter(Operation::UpdateOne).await?;

        let upsert = options.upsert.unwrap_or(false);
        let no_match = UpdateResult {
            matched_count: 0,
            modified_count: 0,
            upserted_id: None,
        };

        let mut collections = self.inner.collections.write();
        let collection = if upsert {
            collections.entry(ns.clone()).or_default()
        } else {
            match collections.get_mut(ns) {
                Some(collection) => collection,
                None => return Ok(no_match),
            }
        };

        if let Some(&position) = collection.matching(&filter)?.first() {
            let mut updated = collection.documents[position].clone();
            let changed = apply_update(&mut updated, &update)?;
            if changed {
                collection.check_unique(ns, &updated, Some(position))?;
                collection.documents[position] = updated;
            }
            return Ok(UpdateResult {
                matched_count: 1,
                modified_count: u64::from(changed),
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(no_match);
        }

        let mut seed = upsert_seed(&filter)?;
        apply_update(&mut seed, &update)?;
        let seed = with_id(seed);
        collection.check_unique(ns, &seed, None)?;

        let upserted_id = seed.get("_id").cloned();
        collection.documents.push(seed);
        Ok(UpdateResult {
            matched_count: 0,
            modified_count: 0,
            upserted_id,
        })
    }

    async fn update_many(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        self.enter(Operation::UpdateMany).await?;

        let mut collections = self.inner.collections.write();
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
                upserted_id: None,
            });
        };

        let positions = collection.matching(&filter)?;
        let mut modified_count = 0;
        for &position in &positions {
            let mut updated = collection.documents[position].clone();
            if apply_update(&mut updated, &update)? {
                collection.check_unique(ns, &updated, Some(position))?;
                collection.documents[position] = updated;
                modified_count += 1;
            }
        }

        Ok(UpdateResult {
            matched_count: positions.len() as u64,
            modified_count,
            upserted_id: None,
        })
    }

    async fn delete_one(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        self.enter(Operation::DeleteOne).await?;

        let mut collections = self.inner.collections.write();
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(DeleteResult { deleted_count: 0 });
        };

        match collection.matching(&filter)?.first() {
            Some(&position) => {
                collection.documents.remove(position);
                Ok(DeleteResult { deleted_count: 1 })
            }
            None => Ok(DeleteResult { deleted_count: 0 }),
        }
    }

    async fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<DeleteResult> {
        self.enter(Operation::DeleteMany).await?;

        let mut collections = self.inner.collections.write();
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(DeleteResult { deleted_count: 0 });
        };

        let positions = collection.matching(&filter)?;
        for &position in positions.iter().rev() {
            collection.documents.remove(position);
        }
        Ok(DeleteResult {
            deleted_count: positions.len() as u64,
        })
    }

    async fn count_documents(&self, ns: &Namespace, filter: Document) -> Result<u64> {
        self.enter(Operation::Count).await?;

        let collections = self.inner.collections.read();
        match collections.get(ns) {
            Some(collection) => Ok(collection.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        _options: &AggregateOptions,
    ) -> Result<DocumentStream> {
        self.enter(Operation::Aggregate).await?;

        let mut documents = self.documents(ns.database(), ns.collection());
        for stage in &pipeline {
            documents = run_stage(documents, stage)?;
        }

        Ok(futures::stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn create_index(&self, ns: &Namespace, keys: Document, unique: bool) -> Result<String> {
        self.enter(Operation::CreateIndex).await?;

        if keys.is_empty() {
            return Err(StoreError::write(Some(67), "index keys cannot be empty"));
        }
        let name = keys
            .iter()
            .map(|(field, direction)| match direction {
                Bson::String(kind) => format!("{}_{}", field, kind),
                other => format!("{}_{}", field, as_i64(other).unwrap_or(1)),
            })
            .collect::<Vec<_>>()
            .join("_");
        let spec = IndexSpec {
            name: name.clone(),
            fields: keys.keys().cloned().collect(),
            unique,
        };

        let mut collections = self.inner.collections.write();
        let collection = collections.entry(ns.clone()).or_default();
        if collection.indexes.iter().any(|i| i.name == name) {
            return Ok(name);
        }

        if unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for document in &collection.documents {
                let key = spec.key_of(document);
                if seen.iter().any(|k| keys_equal(k, &key)) {
                    return Err(duplicate_key(ns, &name, &spec.fields, &key));
                }
                seen.push(key);
            }
        }

        collection.indexes.push(spec);
        Ok(name)
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<()> {
        self.enter(Operation::DropCollection).await?;
        self.inner.collections.write().remove(ns);
        Ok(())
    }
}

fn duplicate_key(ns: &Namespace, index: &str, fields: &[String], key: &[Bson]) -> StoreError {
    let dup: Document = fields
        .iter()
        .cloned()
        .zip(key.iter().cloned())
        .collect();
    StoreError::write(
        Some(DUPLICATE_KEY),
        format!(
            "E11000 duplicate key error collection: {} index: {} dup key: {}",
            ns, index, dup
        ),
    )
}

/// Give a document an ObjectId `_id` in first position if it has none.
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut with_id = Document::new();
    with_id.insert("_id", ObjectId::new());
    with_id.extend(document);
    with_id
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> std::result::Result<(), String> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                other => Err(format!(
                    "Cannot create field '{}' in element {{{}: {}}}",
                    rest, head, other
                )),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((kx, vx), (ky, vy))| kx == ky && values_equal(vx, vy))
        }
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(vx, vy)| values_equal(vx, vy))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn keys_equal(a: &[Bson], b: &[Bson]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Ordering between values of the same kind; `None` across kinds.
fn compare_same_kind(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(_) => 9,
    }
}

/// Total order used for sorting: by kind first, then by value.
fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
        (Some(x), Some(y)) => compare_same_kind(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

fn sort_documents(documents: &mut [Document], sort: &Document) -> Result<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        match as_i64(direction) {
            Some(1) => keys.push((field.as_str(), false)),
            Some(-1) => keys.push((field.as_str(), true)),
            _ => {
                return Err(StoreError::query(format!(
                    "bad sort specification for field '{}': {}",
                    field, direction
                )))
            }
        }
    }

    documents.sort_by(|a, b| {
        keys.iter().fold(Ordering::Equal, |acc, (field, descending)| {
            acc.then_with(|| {
                let order = sort_order(lookup(a, field), lookup(b, field));
                if *descending {
                    order.reverse()
                } else {
                    order
                }
            })
        })
    });
    Ok(())
}

fn project(document: &Document, projection: &Document) -> Result<Document> {
    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (field, flag) in projection {
        if field == "_id" {
            include_id = truthy(flag);
        } else if truthy(flag) {
            included.push(field.as_str());
        } else {
            excluded.push(field.as_str());
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(StoreError::query(
            "cannot mix inclusion and exclusion in a projection",
        ));
    }

    if included.is_empty() {
        let mut out = document.clone();
        for field in excluded {
            unset_path(&mut out, field);
        }
        if !include_id {
            out.remove("_id");
        }
        return Ok(out);
    }

    let mut out = Document::new();
    if include_id {
        if let Some(id) = document.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for field in included {
        if let Some(value) = lookup(document, field) {
            set_path(&mut out, field, value.clone()).map_err(StoreError::query)?;
        }
    }
    Ok(out)
}

fn matches(document: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = clauses(key, condition)?;
                let mut all = true;
                for clause in clauses {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let clauses = clauses(key, condition)?;
                let mut any = false;
                for clause in clauses {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            op if op.starts_with('$') => {
                return Err(StoreError::query(format!("unknown top level operator: {}", op)))
            }
            path => field_matches(lookup(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, value: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = value else {
        return Err(StoreError::query(format!("{} must be an array", op)));
    };
    if items.is_empty() {
        return Err(StoreError::query(format!("{} must be a nonempty array", op)));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(StoreError::query(format!("{} entries must be documents", op))),
        })
        .collect()
}

fn is_operator_document(value: &Bson) -> bool {
    matches!(value, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    if let (true, Bson::Document(operators)) = (is_operator_document(condition), condition) {
        for (op, operand) in operators {
            if !operator_matches(value, op, operand)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    Ok(equals_or_contains(value, condition))
}

/// Equality, where an array field also matches any of its elements and a
/// missing field matches null.
fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn compare_matches(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_same_kind(item, operand).is_some_and(accept)),
        Some(actual) => compare_same_kind(actual, operand).is_some_and(accept),
        None => false,
    }
}

fn operator_matches(value: Option<&Bson>, op: &str, operand: &Bson) -> Result<bool> {
    let matched = match op {
        "$eq" => equals_or_contains(value, operand),
        "$ne" => !equals_or_contains(value, operand),
        "$gt" => compare_matches(value, operand, |o| o == Ordering::Greater),
        "$gte" => compare_matches(value, operand, |o| o != Ordering::Less),
        "$lt" => compare_matches(value, operand, |o| o == Ordering::Less),
        "$lte" => compare_matches(value, operand, |o| o != Ordering::Greater),
        "$in" | "$nin" => {
            let Bson::Array(candidates) = operand else {
                return Err(StoreError::query(format!("{} needs an array", op)));
            };
            let found = candidates
                .iter()
                .any(|candidate| equals_or_contains(value, candidate));
            if op == "$in" {
                found
            } else {
                !found
            }
        }
        "$exists" => value.is_some() == truthy(operand),
        other => return Err(StoreError::query(format!("unknown operator: {}", other))),
    };
    Ok(matched)
}

/// Apply an update document. Returns whether the document changed.
fn apply_update(document: &mut Document, update: &Document) -> Result<bool> {
    if update.is_empty() || update.keys().any(|k| !k.starts_with('$')) {
        return Err(StoreError::write(
            Some(FAILED_TO_PARSE),
            "update document requires atomic operators",
        ));
    }

    let before = document.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StoreError::write(
                Some(FAILED_TO_PARSE),
                format!("modifier {} expects a document", op),
            ));
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    if path == "_id" && before.get("_id").is_some_and(|id| !values_equal(id, value)) {
                        return Err(StoreError::write(
                            Some(IMMUTABLE_FIELD),
                            "performing an update on the path '_id' would modify the immutable field '_id'",
                        ));
                    }
                    set_path(document, path, value.clone())
                        .map_err(|m| StoreError::write(Some(PATH_NOT_VIABLE), m))?;
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(document, path);
                }
            }
            other => {
                return Err(StoreError::write(
                    Some(FAILED_TO_PARSE),
                    format!("unknown modifier: {}", other),
                ))
            }
        }
    }

    Ok(*document != before)
}

/// The document an upsert starts from: the filter's equality conditions.
fn upsert_seed(filter: &Document) -> Result<Document> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let value = if is_operator_document(condition) {
            match condition {
                Bson::Document(operators) => operators.get("$eq").cloned(),
                _ => None,
            }
        } else {
            Some(condition.clone())
        };
        if let Some(value) = value {
            set_path(&mut seed, key, value)
                .map_err(|m| StoreError::write(Some(PATH_NOT_VIABLE), m))?;
        }
    }
    Ok(seed)
}

fn stage_count(name: &str, value: &Bson) -> Result<usize> {
    match as_i64(value) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(StoreError::query(format!(
            "{} requires a non-negative number, got {}",
            name, value
        ))),
    }
}

fn run_stage(documents: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(StoreError::query(
            "a pipeline stage specification object must contain exactly one field",
        ));
    };

    match (name.as_str(), spec) {
        ("$match", Bson::Document(filter)) => {
            let mut kept = Vec::new();
            for document in documents {
                if matches(&document, filter)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        ("$sort", Bson::Document(sort)) => {
            let mut documents = documents;
            sort_documents(&mut documents, sort)?;
            Ok(documents)
        }
        ("$skip", value) => {
            let n = stage_count("$skip", value)?;
            Ok(documents.into_iter().skip(n).collect())
        }
        ("$limit", value) => {
            let n = stage_count("$limit", value)?;
            if n == 0 {
                return Err(StoreError::query("the limit must be positive"));
            }
            Ok(documents.into_iter().take(n).collect())
        }
        ("$project", Bson::Document(projection)) => documents
            .iter()
            .map(|d| project(d, projection))
            .collect(),
        ("$count", Bson::String(field)) => {
            if documents.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field.clone(), documents.len() as i64);
            Ok(vec![out])
        }
        (other, _) => Err(StoreError::query(format!(
            "unrecognized or malformed pipeline stage: {}",
            other
        ))),
    }
}
