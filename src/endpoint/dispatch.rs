//! The per-request state machine: method and primary-key shape select a handler, which
//! runs inside one session and is committed only when a mutating handler succeeds.

use super::auth::authorize;
use super::validation::validate_records;
use super::{Declared, Endpoint, HandlerContext, Reply};
use crate::coerce::{parse_text, Coercer};
use crate::config::{Relationship, SemanticType};
use crate::describe::describe_endpoint;
use crate::error::{ErrorKind, RestError};
use crate::idiom::Idiom;
use crate::query::{Predicate, Query};
use crate::request::{Method, Request, Response};
use crate::response::{Envelope, Outcome};
use crate::session::Session;
use crate::state::Shared;
use crate::value::{Record, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

type Object = Map<String, JsonValue>;
type Key = Vec<(String, Value)>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handles one request for `endpoint`. Every failure is rendered by the active idiom.
pub(crate) async fn dispatch(shared: &Shared, endpoint: &Endpoint, request: Request) -> Response {
    let idiom = shared.idiom.get();
    match run(shared, endpoint, idiom.as_ref(), &request).await {
        Ok(response) => response,
        Err(err) => {
            if err.kind == ErrorKind::Internal {
                tracing::error!(method = %request.method, path = %request.url, error = %err.message, "request failed");
            } else {
                tracing::debug!(method = %request.method, path = %request.url, status = err.status, error = %err.message, "request rejected");
            }
            idiom.error_to_response(&err)
        }
    }
}

async fn run(shared: &Shared, endpoint: &Endpoint, idiom: &dyn Idiom, request: &Request) -> Result<Response, RestError> {
    let method = request.method;
    if !endpoint.allows(method) {
        return Err(RestError::method_not_allowed(format!(
            "{} is not allowed on {}",
            method, endpoint.name
        )));
    }
    authorize(endpoint, request).await?;
    let payload = idiom.request_to_payload(request)?;
    let pks = path_keys(endpoint, request)?;
    let declared = endpoint.declared.get(&method);

    let mut session = shared.sessions.open().await?;
    let result = {
        let mut engine = Engine {
            shared,
            endpoint,
            idiom,
            request,
            session: session.as_mut(),
        };
        match declared {
            Some(d) => engine.declared(d, payload, pks).await,
            None => engine.builtin(payload, pks).await,
        }
    };
    match result {
        Ok((outcome, status)) => {
            let manual = declared.is_some_and(|d| d.manual_commit);
            if method.is_mutating() && !manual {
                session.commit().await?;
                tracing::debug!(endpoint = %endpoint.name, %method, "committed");
            } else {
                release(session.as_mut()).await;
            }
            idiom.data_to_response(outcome, request, status)
        }
        Err(err) => {
            release(session.as_mut()).await;
            Err(err)
        }
    }
}

async fn release(session: &mut dyn Session) {
    if let Err(e) = session.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

/// Primary key values from the path. `None` unless every key is present and non-empty.
fn path_keys(endpoint: &Endpoint, request: &Request) -> Result<Option<Key>, RestError> {
    let mut key = Vec::with_capacity(endpoint.primary_keys.len());
    for name in &endpoint.primary_keys {
        let Some(raw) = request.path_params.get(name).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let kind = endpoint
            .key_kind(name)
            .ok_or_else(|| RestError::internal(format!("unknown primary key {}", name)))?;
        key.push((name.clone(), parse_text(name, kind, raw)?));
    }
    Ok(if key.is_empty() { None } else { Some(key) })
}

fn without_window(query: Query) -> Query {
    Query {
        offset: None,
        limit: None,
        ..query
    }
}

fn require_object(payload: Option<JsonValue>) -> Result<Object, RestError> {
    match payload {
        Some(JsonValue::Object(map)) if !map.is_empty() => Ok(map),
        Some(JsonValue::Object(_)) | None => Err(RestError::bad_request("a non-empty payload is required")),
        Some(_) => Err(RestError::bad_request("payload must be an object")),
    }
}

/// `payload.objects` of batch verbs. An empty list is only accepted when `allow_empty`.
fn require_objects(payload: Option<JsonValue>, allow_empty: bool) -> Result<Vec<Object>, RestError> {
    let mut map = match payload {
        Some(JsonValue::Object(map)) => map,
        _ => return Err(RestError::bad_request("payload must be an object with an 'objects' list")),
    };
    let items = match map.remove("objects") {
        Some(JsonValue::Array(items)) if allow_empty || !items.is_empty() => items,
        Some(JsonValue::Array(_)) => return Err(RestError::bad_request("payload.objects must be a non-empty list")),
        _ => return Err(RestError::bad_request("payload.objects must be a list")),
    };
    items
        .into_iter()
        .map(|item| match item {
            JsonValue::Object(o) => Ok(o),
            _ => Err(RestError::bad_request("payload.objects must contain objects")),
        })
        .collect()
}

struct Engine<'a> {
    shared: &'a Shared,
    endpoint: &'a Endpoint,
    idiom: &'a dyn Idiom,
    request: &'a Request,
    session: &'a mut dyn Session,
}

impl<'a> Engine<'a> {
    fn coercer(&self) -> &'a dyn Coercer {
        self.shared.coercer_for(self.endpoint)
    }

    /// Endpoint refinement only.
    fn scoped_query(&self) -> Query {
        (self.endpoint.query_factory)(Query::new())
    }

    /// Endpoint refinement followed by the idiom's query parameters.
    fn effective_query(&self) -> Result<Query, RestError> {
        self.idiom.alter_query(self.request, &self.endpoint.model, self.scoped_query())
    }

    fn ordered_by_keys(&self, mut query: Query) -> Query {
        for pk in &self.endpoint.primary_keys {
            if self.endpoint.model.has_column(pk) {
                query = query.then_order_by(pk);
            }
        }
        query
    }

    /// Adds key equalities on columns; returns the property keys left for in-memory
    /// filtering.
    fn restrict(&self, query: Query, key: &[(String, Value)]) -> (Query, Key) {
        let (columns, properties): (Key, Key) =
            key.iter().cloned().partition(|(k, _)| self.endpoint.model.has_column(k));
        let query = if columns.is_empty() {
            query
        } else {
            query.filter(Predicate::all_eq(&columns))
        };
        (without_window(query), properties)
    }

    fn matches_key(&self, record: &Record, key: &[(String, Value)]) -> bool {
        key.iter().all(|(k, v)| self.endpoint.attribute(record, k).loosely_equals(v))
    }

    async fn fetch(&mut self, query: &Query, property_keys: &[(String, Value)]) -> Result<Vec<Record>, RestError> {
        let mut rows = self.session.fetch(&self.endpoint.model, query).await?;
        if !property_keys.is_empty() {
            rows.retain(|r| self.matches_key(r, property_keys));
        }
        Ok(rows)
    }

    async fn fetch_one(&mut self, key: &[(String, Value)]) -> Result<Option<Record>, RestError> {
        let (query, properties) = self.restrict(self.effective_query()?, key);
        Ok(self.fetch(&query, &properties).await?.into_iter().next())
    }

    /// Reads a written record back through the endpoint's refinement.
    async fn refetch(&mut self, stored: Record) -> Result<Record, RestError> {
        let key = self.endpoint.model.key_of(&stored);
        let query = self.scoped_query().filter(Predicate::all_eq(&key));
        let rows = self.session.fetch(&self.endpoint.model, &without_window(query)).await?;
        Ok(rows.into_iter().next().unwrap_or(stored))
    }

    fn render_attribute(&self, name: &str, record: &Record) -> JsonValue {
        let kind = self.endpoint.key_kind(name).cloned().unwrap_or(SemanticType::Opaque);
        let value = self.endpoint.attribute(record, name);
        self.coercer().serialize(name, &kind, &value).unwrap_or(JsonValue::Null)
    }

    fn render_key(&self, key: &[(String, Value)]) -> JsonValue {
        let mut out = Map::new();
        for (name, value) in key {
            let kind = self.endpoint.key_kind(name).cloned().unwrap_or(SemanticType::Opaque);
            out.insert(
                name.clone(),
                self.coercer().serialize(name, &kind, value).unwrap_or(JsonValue::Null),
            );
        }
        JsonValue::Object(out)
    }

    fn not_found(&self, key: &[(String, Value)]) -> RestError {
        RestError::not_found(format!("no {} matches the given primary key", self.endpoint.name))
            .with_extra("primary_key", self.render_key(key))
    }

    /// Fixed values always replace; defaults fill absent columns when `with_defaults`.
    fn apply_mutation_helpers(&self, object: &mut Object, with_defaults: bool) {
        let snapshot = object.clone();
        for (column, source) in &self.endpoint.fixed {
            object.insert(column.clone(), source.resolve(&snapshot));
        }
        if with_defaults {
            for (column, source) in &self.endpoint.defaults {
                if !object.contains_key(column) {
                    object.insert(column.clone(), source.resolve(&snapshot));
                }
            }
        }
    }

    fn validate(&self, records: &mut [Record]) -> Result<(), RestError> {
        let status = self
            .endpoint
            .validation_error_status
            .unwrap_or(self.shared.options.validation_error_status);
        validate_records(
            &self.endpoint.validators,
            &self.endpoint.primary_keys,
            &self.endpoint.model,
            records,
            status,
            |name, record| self.render_attribute(name, record),
        )
    }

    /// Path keys override whatever the payload left in key columns.
    fn pin_key(&self, record: &mut Record, key: &[(String, Value)]) {
        for (name, value) in key {
            if self.endpoint.model.has_column(name) {
                record.set(name.clone(), value.clone());
            }
        }
    }

    fn check_payload_key(&self, object: &Object, key: &[(String, Value)]) -> Result<(), RestError> {
        for (name, expected) in key {
            let Some(raw) = object.get(name) else {
                continue;
            };
            let kind = self.endpoint.key_kind(name).cloned().unwrap_or(SemanticType::Opaque);
            let given = self.coercer().deserialize(name, &kind, raw)?;
            if !given.loosely_equals(expected) {
                return Err(RestError::internal(format!(
                    "payload primary key {}={} does not match the path value {}",
                    name, given, expected
                )));
            }
        }
        Ok(())
    }

    async fn envelope(&mut self, rows: Vec<Record>, occurences: u64, single: bool) -> Result<Envelope, RestError> {
        let mut visited = vec![self.endpoint.name.clone()];
        let objects = serialize_records(self.shared, self.endpoint, &mut *self.session, &rows, &mut visited).await?;
        Ok(Envelope {
            primary_keys: self.endpoint.primary_keys.clone(),
            occurences,
            objects,
            offset: None,
            limit: None,
            single,
            relationships: relationship_keys(self.shared, self.endpoint),
        })
    }

    async fn listing(&mut self, rows: Vec<Record>, single: bool) -> Result<(Outcome, u16), RestError> {
        let n = rows.len() as u64;
        Ok((Outcome::Envelope(self.envelope(rows, n, single).await?), 200))
    }

    async fn declared(
        &mut self,
        declared: &Declared,
        payload: Option<JsonValue>,
        pks: Option<Key>,
    ) -> Result<(Outcome, u16), RestError> {
        let single = pks.is_some();
        let ctx = HandlerContext {
            request: self.request,
            payload,
            pks: pks.unwrap_or_default(),
            session: &mut *self.session,
            endpoint: self.endpoint,
        };
        match declared.handler.handle(ctx).await? {
            Reply::Raw(value) => Ok((Outcome::Raw(value), 200)),
            Reply::Records(rows) => self.listing(rows, single).await,
        }
    }

    async fn builtin(&mut self, payload: Option<JsonValue>, pks: Option<Key>) -> Result<(Outcome, u16), RestError> {
        match (self.request.method, pks) {
            (Method::Get, None) => self.get_all().await,
            (Method::Get, Some(key)) => self.get_one(&key).await,
            (Method::Post, None) => self.post(payload).await,
            (Method::Post, Some(_)) => Err(RestError::not_implemented(format!(
                "POST with a primary key is not supported on {}",
                self.endpoint.name
            ))),
            (Method::Put, None) => self.put_all(payload).await,
            (Method::Put, Some(key)) => self.replace_one(payload, &key, true).await,
            (Method::Patch, None) => self.patch_all(payload).await,
            (Method::Patch, Some(key)) => self.replace_one(payload, &key, false).await,
            (Method::Delete, None) => self.delete_all().await,
            (Method::Delete, Some(key)) => self.delete_one(&key).await,
            (Method::Options, _) => Ok((Outcome::Raw(describe_endpoint(self.shared, self.endpoint)), 200)),
        }
    }

    fn require_batch(&self) -> Result<(), RestError> {
        if self.endpoint.allow_batch {
            Ok(())
        } else {
            Err(RestError::batch_disallowed(format!(
                "{} without a primary key is disabled on {}",
                self.request.method, self.endpoint.name
            )))
        }
    }

    fn empty_is_404(&self) -> bool {
        self.endpoint.empty_get_is_404(self.shared.options.empty_get_as_404)
    }

    async fn get_all(&mut self) -> Result<(Outcome, u16), RestError> {
        let query = self.ordered_by_keys(self.effective_query()?);
        let rows = self.fetch(&query, &[]).await?;
        let total = self.session.count(&self.endpoint.model, &query.unpaginated()).await?;
        let mut env = self.envelope(rows, total, false).await?;
        env.offset = query.offset;
        env.limit = query.limit;
        let status = if total == 0 && self.empty_is_404() { 404 } else { 200 };
        Ok((Outcome::Envelope(env), status))
    }

    async fn get_one(&mut self, key: &[(String, Value)]) -> Result<(Outcome, u16), RestError> {
        let rows: Vec<Record> = self.fetch_one(key).await?.into_iter().collect();
        let status = if rows.is_empty() && self.empty_is_404() { 404 } else { 200 };
        let (outcome, _) = self.listing(rows, true).await?;
        Ok((outcome, status))
    }

    async fn post(&mut self, payload: Option<JsonValue>) -> Result<(Outcome, u16), RestError> {
        let mut object = require_object(payload)?;
        self.apply_mutation_helpers(&mut object, true);
        let columns = self.endpoint.visible_columns();
        let mut records = vec![self.coercer().create(&object, &columns)?];
        self.validate(&mut records)?;
        let mut stored = Vec::with_capacity(1);
        for record in records {
            stored.push(self.session.insert(&self.endpoint.model, record).await?);
        }
        self.session.flush().await?;
        let mut rows = Vec::with_capacity(stored.len());
        for record in stored {
            rows.push(self.refetch(record).await?);
        }
        self.listing(rows, false).await
    }

    /// Replaces the whole collection: the new objects are decoded and validated first,
    /// then every row of the effective query is deleted and the objects inserted.
    async fn put_all(&mut self, payload: Option<JsonValue>) -> Result<(Outcome, u16), RestError> {
        self.require_batch()?;
        let objects = require_objects(payload, true)?;
        let columns = self.endpoint.visible_columns();
        let mut records = Vec::with_capacity(objects.len());
        for mut object in objects {
            self.apply_mutation_helpers(&mut object, true);
            let mut record = Record::new();
            self.coercer().merge(&mut record, &object, &columns, true)?;
            records.push(record);
        }
        self.validate(&mut records)?;
        let query = self.effective_query()?;
        let removed = self.session.delete(&self.endpoint.model, &query).await?;
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.session.insert(&self.endpoint.model, record).await?);
        }
        self.session.flush().await?;
        tracing::debug!(endpoint = %self.endpoint.name, removed, inserted = stored.len(), "collection replaced");
        self.listing(stored, false).await
    }

    /// PUT (`blank` set) or PATCH on one record addressed by the path.
    async fn replace_one(
        &mut self,
        payload: Option<JsonValue>,
        key: &[(String, Value)],
        blank: bool,
    ) -> Result<(Outcome, u16), RestError> {
        let mut object = require_object(payload)?;
        self.check_payload_key(&object, key)?;
        self.apply_mutation_helpers(&mut object, blank);
        let columns = self.endpoint.visible_columns();
        let existing = self.fetch_one(key).await?;
        let endpoint = self.endpoint;
        let model = &endpoint.model;
        match existing {
            Some(original) => {
                let storage_key = model.key_of(&original);
                let mut record = original;
                self.coercer().merge(&mut record, &object, &columns, blank)?;
                self.pin_key(&mut record, key);
                let mut records = vec![record];
                self.validate(&mut records)?;
                for record in &records {
                    self.session.update(model, &storage_key, record).await?;
                }
            }
            None if !blank => return Err(self.not_found(key)),
            None => {
                let mut record = Record::new();
                self.coercer().merge(&mut record, &object, &columns, true)?;
                self.pin_key(&mut record, key);
                let mut records = vec![record];
                self.validate(&mut records)?;
                for record in records {
                    self.session.insert(model, record).await?;
                }
            }
        }
        self.session.flush().await?;
        let rows: Vec<Record> = self.fetch_one(key).await?.into_iter().collect();
        self.listing(rows, true).await
    }

    async fn patch_all(&mut self, payload: Option<JsonValue>) -> Result<(Outcome, u16), RestError> {
        self.require_batch()?;
        let objects = require_objects(payload, false)?;
        let mut wanted: Vec<(Key, Object)> = Vec::with_capacity(objects.len());
        for mut object in objects {
            let mut key = Vec::with_capacity(self.endpoint.primary_keys.len());
            for name in &self.endpoint.primary_keys {
                let raw = object
                    .get(name)
                    .ok_or_else(|| RestError::bad_request(format!("every object needs its primary key '{}'", name)))?;
                let kind = self.endpoint.key_kind(name).cloned().unwrap_or(SemanticType::Opaque);
                key.push((name.clone(), self.coercer().deserialize(name, &kind, raw)?));
            }
            self.apply_mutation_helpers(&mut object, false);
            wanted.push((key, object));
        }

        let endpoint = self.endpoint;
        let model = &endpoint.model;
        let any_of = Predicate::Or(
            wanted
                .iter()
                .map(|(key, _)| {
                    let columns: Key = key.iter().filter(|(k, _)| model.has_column(k)).cloned().collect();
                    Predicate::all_eq(&columns)
                })
                .collect(),
        );
        let query = without_window(self.effective_query()?.filter(any_of));
        let found = self.session.fetch(model, &query).await?;

        let columns = self.endpoint.visible_columns();
        let mut storage_keys = Vec::with_capacity(wanted.len());
        let mut records = Vec::with_capacity(wanted.len());
        for (key, object) in &wanted {
            let Some(original) = found.iter().find(|r| self.matches_key(r, key)) else {
                return Err(self.not_found(key));
            };
            storage_keys.push(model.key_of(original));
            let mut record = original.clone();
            self.coercer().merge(&mut record, object, &columns, false)?;
            records.push(record);
        }
        self.validate(&mut records)?;
        for (storage_key, record) in storage_keys.iter().zip(&records) {
            self.session.update(model, storage_key, record).await?;
        }
        self.session.flush().await?;
        self.listing(records, false).await
    }

    async fn delete_all(&mut self) -> Result<(Outcome, u16), RestError> {
        self.require_batch()?;
        let query = self.ordered_by_keys(self.effective_query()?);
        let rows = self.fetch(&query, &[]).await?;
        let n = rows.len() as u64;
        let env = self.envelope(rows.clone(), n, false).await?;
        let endpoint = self.endpoint;
        let model = &endpoint.model;
        for row in &rows {
            let by_key = Query::new().filter(Predicate::all_eq(&model.key_of(row)));
            self.session.delete(model, &by_key).await?;
        }
        self.session.flush().await?;
        Ok((Outcome::Envelope(env), 200))
    }

    async fn delete_one(&mut self, key: &[(String, Value)]) -> Result<(Outcome, u16), RestError> {
        let Some(row) = self.fetch_one(key).await? else {
            return Err(self.not_found(key));
        };
        let env = self.envelope(vec![row.clone()], 1, true).await?;
        let endpoint = self.endpoint;
        let model = &endpoint.model;
        let by_key = Query::new().filter(Predicate::all_eq(&model.key_of(&row)));
        self.session.delete(model, &by_key).await?;
        self.session.flush().await?;
        Ok((Outcome::Envelope(env), 200))
    }
}

fn relationship_keys(shared: &Shared, endpoint: &Endpoint) -> BTreeMap<String, Vec<String>> {
    endpoint
        .relationships
        .iter()
        .filter_map(|rel| {
            shared
                .endpoint(&rel.target)
                .map(|target| (rel.name.clone(), target.primary_keys.clone()))
        })
        .collect()
}

async fn fetch_related(
    session: &mut dyn Session,
    target: &Endpoint,
    relationship: &Relationship,
    row: &Record,
) -> Result<Vec<Record>, RestError> {
    let mut query = (target.query_factory)(Query::new());
    for (local, remote) in &relationship.pairs {
        let value = row.value(local);
        if value.is_null() {
            return Ok(Vec::new());
        }
        query = query.filter(Predicate::Eq(remote.clone(), value));
    }
    for pk in &target.primary_keys {
        if target.model.has_column(pk) {
            query = query.then_order_by(pk);
        }
    }
    Ok(session.fetch(&target.model, &query).await?)
}

/// Columns, properties, then relationships serialized through the related endpoint.
/// An endpoint already on the current path is rendered without its relationships.
fn serialize_records<'a>(
    shared: &'a Shared,
    endpoint: &'a Endpoint,
    session: &'a mut dyn Session,
    rows: &'a [Record],
    visited: &'a mut Vec<String>,
) -> BoxFuture<'a, Result<Vec<Object>, RestError>> {
    Box::pin(async move {
        let coercer = shared.coercer_for(endpoint);
        let columns = endpoint.visible_columns();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut object = coercer.serialize_record(row, &columns, &endpoint.properties)?;
            for rel in &endpoint.relationships {
                let Some(target) = shared.endpoint(&rel.target) else {
                    continue;
                };
                let related = fetch_related(&mut *session, target, rel, row).await?;
                let nested = if visited.contains(&target.name) {
                    let target_columns = target.visible_columns();
                    let target_coercer = shared.coercer_for(target);
                    related
                        .iter()
                        .map(|r| target_coercer.serialize_record(r, &target_columns, &target.properties))
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    visited.push(target.name.clone());
                    let nested = serialize_records(shared, target, &mut *session, &related, &mut *visited).await;
                    visited.pop();
                    nested?
                };
                object.insert(
                    rel.name.clone(),
                    JsonValue::Array(nested.into_iter().map(JsonValue::Object).collect()),
                );
            }
            out.push(object);
        }
        Ok(out)
    })
}
