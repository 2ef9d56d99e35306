//! The json-server idiom end to end: bare arrays, `X-Total-Count`, query-string filters.

mod common;

use axum::http::{Method, StatusCode};
use common::{default_api, fruit_endpoint, mount, send, tree_endpoint, TestApi};
use entity_rest::{ApiOptions, JsonServerIdiom, Relationship};
use serde_json::{json, Value};
use std::sync::Arc;

fn json_server(app: TestApi) -> TestApi {
    app.api.set_idiom(Arc::new(JsonServerIdiom));
    app
}

fn ids(body: &Value) -> Vec<Value> {
    body.as_array()
        .map(|items| items.iter().map(|i| i["fruit_id"].clone()).collect())
        .unwrap_or_default()
}

fn total(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers.get("x-total-count").and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn range_filter_returns_bare_array_with_total() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?color_gte=forestgreen", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let items = resp.body.as_array().expect("bare array");
    let colors: Vec<&str> = items.iter().filter_map(|i| i["color"].as_str()).collect();
    assert_eq!(colors, vec!["grey", "yellow", "orangered"]);
    assert!(colors.iter().all(|c| *c >= "forestgreen"));
    assert_eq!(total(&resp.headers), Some("3"));
}

#[tokio::test]
async fn item_route_returns_a_single_object() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit/1", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["color"], json!("grey"));

    let resp = send(&app.router, Method::GET, "/api/fruit/9", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.body, json!({}));
}

#[tokio::test]
async fn sort_and_limit() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?_sort=size&_order=desc&_limit=2", None).await;
    assert_eq!(ids(&resp.body), vec![json!(5), json!(1)]);
    assert_eq!(total(&resp.headers), Some("5"));

    let resp = send(&app.router, Method::GET, "/api/fruit?_page=2&_limit=2", None).await;
    assert_eq!(ids(&resp.body), vec![json!(3), json!(4)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?_start=1&_end=3", None).await;
    assert_eq!(ids(&resp.body), vec![json!(2), json!(3)]);
}

#[tokio::test]
async fn full_text_and_equality_filters() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?q=ORANGE", None).await;
    assert_eq!(ids(&resp.body), vec![json!(5)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?tree_id=1&tree_id=3", None).await;
    assert_eq!(ids(&resp.body), vec![json!(1), json!(3), json!(4)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?weight=3", None).await;
    assert_eq!(total(&resp.headers), Some("5"));
}

#[tokio::test]
async fn relationships_collapse_to_keys() {
    let fruit = fruit_endpoint().relationship(Relationship::new("tree", "tree").on("tree_id", "id"));
    let app = json_server(mount(ApiOptions::default(), vec![tree_endpoint(), fruit]));
    let resp = send(&app.router, Method::GET, "/api/fruit/4", None).await;
    assert_eq!(resp.body["tree"], json!([3]));
}

#[tokio::test]
async fn array_payload_drives_batch_patch() {
    let app = json_server(default_api());
    let resp = send(
        &app.router,
        Method::PATCH,
        "/api/fruit",
        Some(json!([{"fruit_id": 2, "color": "olive"}])),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body[0]["color"], json!("olive"));

    let resp = send(&app.router, Method::GET, "/api/fruit?color=olive", None).await;
    assert_eq!(ids(&resp.body), vec![json!(2)]);
}

#[tokio::test]
async fn errors_keep_the_message_shape() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::PUT, "/api/tree", Some(json!([{"id": 1}]))).await;
    assert_eq!(resp.status, StatusCode::NOT_ACCEPTABLE);
    assert!(resp.body["message"].is_string());
}

#[tokio::test]
async fn upper_bound_filter() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?size_lte=9", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(ids(&resp.body), vec![json!(2), json!(3), json!(4)]);
    assert_eq!(total(&resp.headers), Some("3"));
}

#[tokio::test]
async fn like_filter_is_a_case_insensitive_regex() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?color_like=%5Egr", None).await;
    assert_eq!(ids(&resp.body), vec![json!(1)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?color_like=%5EGR", None).await;
    assert_eq!(ids(&resp.body), vec![json!(1)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?color_like=green", None).await;
    assert_eq!(ids(&resp.body), vec![json!(2)]);
}

#[tokio::test]
async fn malformed_like_pattern_is_a_client_error() {
    let app = json_server(default_api());
    let resp = send(&app.router, Method::GET, "/api/fruit?color_like=%28gr", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.body["message"].as_str().is_some_and(|m| m.contains("color_like")));
}
