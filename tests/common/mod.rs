//! Tree/fruit fixtures shared by the integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use entity_rest::coerce::seconds_to_duration;
use entity_rest::{
    Api, ApiOptions, AxumAdapter, ColumnSpec, Endpoint, MemoryStore, Model, Record, SemanticType, Value,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tower::ServiceExt;

pub fn tree_model() -> Model {
    Model::new("tree")
        .key_column(ColumnSpec::new("id", SemanticType::Integer).with_default())
        .column(ColumnSpec::new("name", SemanticType::String))
}

pub fn fruit_model() -> Model {
    Model::new("fruit")
        .key_column(ColumnSpec::new("fruit_id", SemanticType::Integer).with_default())
        .column(ColumnSpec::new("color", SemanticType::String))
        .column(ColumnSpec::new("size", SemanticType::Integer))
        .column(ColumnSpec::new("age", SemanticType::Duration))
        .column(ColumnSpec::new("tree_id", SemanticType::Integer))
}

fn fruit(id: i64, color: &str, size: i64, age_secs: f64, tree: Option<i64>) -> Record {
    let age = seconds_to_duration("age", age_secs).expect("fixture duration");
    Record::new()
        .with("fruit_id", id)
        .with("color", color)
        .with("size", size)
        .with("age", Value::Duration(age))
        .with("tree_id", tree)
}

/// Trees pine, maple, oak and five fruits.
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(
        &tree_model(),
        vec![
            Record::new().with("id", 1).with("name", "pine"),
            Record::new().with("id", 2).with("name", "maple"),
            Record::new().with("id", 3).with("name", "oak"),
        ],
    );
    store.seed(
        &fruit_model(),
        vec![
            fruit(1, "grey", 12, 1_041_300.0, Some(1)),
            fruit(2, "darkgreen", 8, 1_000_000.0, Some(2)),
            fruit(3, "brown", 7, 1_040_000.0, Some(1)),
            fruit(4, "yellow", 9, 900_000.0, Some(3)),
            fruit(5, "orangered", 100, 7200.000012, None),
        ],
    );
    store
}

pub fn tree_endpoint() -> Endpoint {
    Endpoint::new(tree_model())
}

pub fn fruit_endpoint() -> Endpoint {
    Endpoint::new(fruit_model()).allow_batch(true)
}

pub struct TestApi {
    pub router: Router,
    pub store: MemoryStore,
    pub api: Api,
}

pub fn mount(options: ApiOptions, endpoints: Vec<Endpoint>) -> TestApi {
    let store = seeded_store();
    let mut api = Api::new(options, Arc::new(store.clone()));
    for endpoint in endpoints {
        api.add(endpoint).expect("endpoint registers");
    }
    let mut adapter = AxumAdapter::new("http://localhost");
    api.mount(&mut adapter).expect("api mounts");
    TestApi {
        router: adapter.into_router(),
        store,
        api,
    }
}

pub fn default_api() -> TestApi {
    mount(ApiOptions::default(), vec![tree_endpoint(), fruit_endpoint()])
}

pub struct Sent {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub raw: Vec<u8>,
    pub body: JsonValue,
}

pub async fn send(router: &Router, method: Method, uri: &str, body: Option<JsonValue>) -> Sent {
    send_with(router, method, uri, body, &[]).await
}

pub async fn send_with(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<JsonValue>,
    headers: &[(&str, &str)],
) -> Sent {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let raw = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec();
    let body = serde_json::from_slice(&raw).unwrap_or(JsonValue::Null);
    Sent {
        status,
        headers,
        raw,
        body,
    }
}

/// Values of `field` across `objects`, in order.
pub fn column(body: &JsonValue, field: &str) -> Vec<JsonValue> {
    body["objects"]
        .as_array()
        .map(|objects| objects.iter().map(|o| o[field].clone()).collect())
        .unwrap_or_default()
}
