//! End-to-end behaviour of the built-in handlers over the axum adapter.

mod common;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::{column, default_api, fruit_endpoint, fruit_model, mount, send, send_with, tree_endpoint, tree_model};
use entity_rest::{
    ApiOptions, DeclaredHandler, Endpoint, HandlerContext, HeaderGuard, Predicate, Property, Record, Relationship,
    Reply, RestError, SemanticType, Validatable, Value,
};
use serde_json::json;

#[tokio::test]
async fn get_collection_lists_every_tree() {
    let app = default_api();
    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["occurences"], json!(3));
    assert_eq!(resp.body["primary_keys"], json!(["id"]));
    assert_eq!(column(&resp.body, "name"), vec![json!("pine"), json!("maple"), json!("oak")]);
}

#[tokio::test]
async fn missing_item_is_404_only_when_configured() {
    let app = mount(ApiOptions::default().empty_get_as_404(true), vec![tree_endpoint()]);
    let resp = send(&app.router, Method::GET, "/api/tree/6", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.body["occurences"], json!(0));

    let app = default_api();
    let resp = send(&app.router, Method::GET, "/api/tree/6", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"], json!([]));
}

#[tokio::test]
async fn get_item_returns_one_record() {
    let app = default_api();
    let resp = send(&app.router, Method::GET, "/api/tree/2", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"], json!([{"id": 2, "name": "maple"}]));
}

#[tokio::test]
async fn post_assigns_the_next_key() {
    let app = default_api();
    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"], json!([{"id": 4, "name": "cedar"}]));

    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.body["occurences"], json!(4));
}

#[tokio::test]
async fn post_with_key_is_not_implemented() {
    let app = default_api();
    let resp = send(&app.router, Method::POST, "/api/tree/1", Some(json!({"name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn put_collection_replaces_everything_when_batch_is_allowed() {
    let app = default_api();
    let payload = json!({"objects": [{"id": 1, "name": "cedar"}, {"id": 2, "name": "mango"}]});
    let resp = send(&app.router, Method::PUT, "/api/tree", Some(payload.clone())).await;
    assert_eq!(resp.status, StatusCode::NOT_ACCEPTABLE);

    let app = mount(
        ApiOptions::default(),
        vec![tree_endpoint().allow_batch(true), fruit_endpoint()],
    );
    let resp = send(&app.router, Method::PUT, "/api/tree", Some(payload)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["occurences"], json!(2));

    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.body["occurences"], json!(2));
    assert_eq!(column(&resp.body, "name"), vec![json!("cedar"), json!("mango")]);
}

#[tokio::test]
async fn patch_collection_touches_only_named_fields() {
    let app = default_api();
    let payload = json!({"objects": [{"fruit_id": 1, "color": "blue"}, {"fruit_id": 3, "age": 1_038_540}]});
    let resp = send(&app.router, Method::PATCH, "/api/fruit", Some(payload)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["occurences"], json!(2));

    let resp = send(&app.router, Method::GET, "/api/fruit", None).await;
    let objects = resp.body["objects"].as_array().expect("objects");
    assert_eq!(objects.len(), 5);
    assert_eq!(objects[0]["color"], json!("blue"));
    assert_eq!(objects[0]["size"], json!(12));
    assert_eq!(objects[0]["age"].as_f64(), Some(1_041_300.0));
    assert_eq!(objects[2]["color"], json!("brown"));
    assert_eq!(objects[2]["age"].as_f64(), Some(1_038_540.0));
    assert_eq!(objects[1]["color"], json!("darkgreen"));
    assert_eq!(objects[4]["age"].as_f64(), Some(7200.000012));
    assert_eq!(objects[4]["tree_id"], json!(null));
}

#[tokio::test]
async fn patch_collection_requires_every_key_to_exist() {
    let app = default_api();
    let payload = json!({"objects": [{"fruit_id": 1, "color": "blue"}, {"fruit_id": 42, "color": "red"}]});
    let resp = send(&app.router, Method::PATCH, "/api/fruit", Some(payload)).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.body["primary_key"], json!({"fruit_id": 42}));

    let resp = send(&app.router, Method::GET, "/api/fruit/1", None).await;
    assert_eq!(resp.body["objects"][0]["color"], json!("grey"));

    let payload = json!({"objects": [{"color": "red"}]});
    let resp = send(&app.router, Method::PATCH, "/api/fruit", Some(payload)).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_item_blanks_omitted_columns_and_patch_keeps_them() {
    let app = default_api();
    let resp = send(&app.router, Method::PUT, "/api/fruit/1", Some(json!({"color": "red"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let fruit = &resp.body["objects"][0];
    assert_eq!(fruit["fruit_id"], json!(1));
    assert_eq!(fruit["color"], json!("red"));
    assert_eq!(fruit["size"], json!(null));
    assert_eq!(fruit["tree_id"], json!(null));

    let resp = send(&app.router, Method::PATCH, "/api/fruit/2", Some(json!({"color": "red"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let fruit = &resp.body["objects"][0];
    assert_eq!(fruit["color"], json!("red"));
    assert_eq!(fruit["size"], json!(8));
    assert_eq!(fruit["tree_id"], json!(2));
}

#[tokio::test]
async fn put_item_creates_missing_record_but_patch_does_not() {
    let app = default_api();
    let resp = send(&app.router, Method::PATCH, "/api/tree/9", Some(json!({"name": "birch"}))).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = send(&app.router, Method::PUT, "/api/tree/9", Some(json!({"name": "birch"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"], json!([{"id": 9, "name": "birch"}]));
    assert_eq!(app.store.rows(&tree_model()).len(), 4);
}

#[tokio::test]
async fn mismatched_payload_key_fails_before_any_write() {
    let app = default_api();
    let resp = send(&app.router, Method::PUT, "/api/tree/1", Some(json!({"id": 2, "name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

    let resp = send(&app.router, Method::GET, "/api/tree/1", None).await;
    assert_eq!(resp.body["objects"][0]["name"], json!("pine"));
    let resp = send(&app.router, Method::GET, "/api/tree/2", None).await;
    assert_eq!(resp.body["objects"][0]["name"], json!("maple"));
}

#[tokio::test]
async fn empty_payload_is_rejected() {
    let app = default_api();
    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({}))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = send(&app.router, Method::POST, "/api/tree", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_payload_is_bad_request() {
    let app = default_api();
    let resp = send(&app.router, Method::POST, "/api/fruit", Some(json!({"size": "huge"}))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["column"], json!("size"));

    let resp = send(&app.router, Method::POST, "/api/fruit", Some(json!({"color": "x", "size": 1e20}))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["column"], json!("size"));
    assert_eq!(app.store.rows(&fruit_model()).len(), 5);
}

#[tokio::test]
async fn delete_item_returns_the_removed_record() {
    let app = default_api();
    let resp = send(&app.router, Method::DELETE, "/api/fruit/5", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"][0]["color"], json!("orangered"));
    assert_eq!(app.store.rows(&fruit_model()).len(), 4);

    let resp = send(&app.router, Method::DELETE, "/api/fruit/5", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_collection_needs_batch() {
    let app = default_api();
    let resp = send(&app.router, Method::DELETE, "/api/tree", None).await;
    assert_eq!(resp.status, StatusCode::NOT_ACCEPTABLE);

    let resp = send(&app.router, Method::DELETE, "/api/fruit?limit=2", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(column(&resp.body, "fruit_id"), vec![json!(1), json!(2)]);
    assert_eq!(app.store.rows(&fruit_model()).len(), 3);
}

#[tokio::test]
async fn disabled_methods_are_not_routed() {
    let app = mount(
        ApiOptions::default(),
        vec![tree_endpoint().methods([entity_rest::Method::Get])],
    );
    let resp = send(&app.router, Method::DELETE, "/api/tree/1", None).await;
    assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
    let resp = send(&app.router, Method::GET, "/api/tree/1", None).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn pagination_reports_window_and_total() {
    let app = default_api();
    let resp = send(&app.router, Method::GET, "/api/fruit?offset=1&limit=2", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["occurences"], json!(5));
    assert_eq!(resp.body["offset"], json!(1));
    assert_eq!(resp.body["limit"], json!(2));
    assert_eq!(column(&resp.body, "fruit_id"), vec![json!(2), json!(3)]);

    let resp = send(&app.router, Method::GET, "/api/fruit?limit=many", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validators_reject_with_configured_status() {
    let tree = tree_endpoint()
        .validation_error_status(422)
        .validator("name", |f: Validatable<'_>| match &f.value {
            Value::String(s) if s.len() < 3 => Err(f.error("name is too short")),
            _ => Ok(f.value.clone()),
        });
    let app = mount(ApiOptions::default(), vec![tree]);
    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "ab"}))).await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.body["errors"][0]["fields"]["name"], json!("name is too short"));
    assert_eq!(app.store.rows(&tree_model()).len(), 3);
}

#[tokio::test]
async fn validators_may_transform_values() {
    let tree = tree_endpoint().validator("name", |f: Validatable<'_>| {
        Ok(Value::String(f.value.to_string().to_uppercase()))
    });
    let app = mount(ApiOptions::default(), vec![tree]);
    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "cedar"}))).await;
    assert_eq!(resp.body["objects"][0]["name"], json!("CEDAR"));
}

#[tokio::test]
async fn write_guard_protects_mutations_only() {
    let tree = tree_endpoint().write_auth(HeaderGuard::new("x-api-key", "secret"));
    let app = mount(ApiOptions::default(), vec![tree]);

    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = send_with(
        &app.router,
        Method::POST,
        "/api/tree",
        Some(json!({"name": "cedar"})),
        &[("X-Api-Key", "secret")],
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn defaults_fill_and_fixed_values_override() {
    let fruit = fruit_endpoint()
        .default_value("size", json!(1))
        .fixed_value("tree_id", json!(3));
    let app = mount(ApiOptions::default(), vec![fruit]);
    let resp = send(
        &app.router,
        Method::POST,
        "/api/fruit",
        Some(json!({"color": "teal", "tree_id": 1})),
    )
    .await;
    let created = &resp.body["objects"][0];
    assert_eq!(created["size"], json!(1));
    assert_eq!(created["tree_id"], json!(3));
    assert_eq!(created["fruit_id"], json!(6));
}

#[tokio::test]
async fn projection_hides_excluded_columns() {
    let fruit = fruit_endpoint().exclude(["age"]);
    let app = mount(ApiOptions::default(), vec![fruit]);
    let resp = send(&app.router, Method::GET, "/api/fruit/1", None).await;
    let object = resp.body["objects"][0].as_object().expect("object");
    assert!(!object.contains_key("age"));
    assert!(object.contains_key("fruit_id"));
}

#[tokio::test]
async fn properties_and_relationships_are_serialized() {
    let fruit = fruit_endpoint()
        .property(Property::new("big", SemanticType::Boolean, |r: &Record| {
            Value::Boolean(matches!(r.value("size"), Value::Integer(n) if n >= 10))
        }))
        .relationship(Relationship::new("tree", "tree").on("tree_id", "id"));
    let tree = tree_endpoint().relationship(Relationship::new("fruits", "fruit").on("id", "tree_id"));
    let app = mount(ApiOptions::default(), vec![tree, fruit]);

    let resp = send(&app.router, Method::GET, "/api/fruit/1", None).await;
    let object = &resp.body["objects"][0];
    assert_eq!(object["big"], json!(true));
    assert_eq!(object["tree"][0]["name"], json!("pine"));
    assert_eq!(object["tree"][0]["fruits"].as_array().map(Vec::len), Some(2));

    let resp = send(&app.router, Method::GET, "/api/fruit/5", None).await;
    assert_eq!(resp.body["objects"][0]["tree"], json!([]));
}

#[tokio::test]
async fn sub_endpoint_narrows_the_parent_query() {
    let fruit = fruit_endpoint();
    let big = fruit.sub(|q| q.filter(Predicate::Gte("size".into(), Value::Integer(10))));
    let heavy = fruit
        .sub(|q| q.filter(Predicate::Gte("size".into(), Value::Integer(50))))
        .named("heavy_fruit");
    let app = mount(ApiOptions::default(), vec![fruit, big, heavy]);
    let resp = send(&app.router, Method::GET, "/api/fruit_sub", None).await;
    assert_eq!(column(&resp.body, "fruit_id"), vec![json!(1), json!(5)]);

    let resp = send(&app.router, Method::GET, "/api/fruit_sub/2", None).await;
    assert_eq!(resp.body["objects"], json!([]));

    let resp = send(&app.router, Method::GET, "/api/heavy_fruit", None).await;
    assert_eq!(column(&resp.body, "fruit_id"), vec![json!(5)]);
}

struct PlantWillow;

#[async_trait]
impl DeclaredHandler for PlantWillow {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<Reply, RestError> {
        let stored = ctx
            .session
            .insert(&ctx.endpoint.model, Record::new().with("name", "willow"))
            .await?;
        Ok(Reply::Records(vec![stored]))
    }
}

#[tokio::test]
async fn manual_commit_handlers_leave_the_store_untouched() {
    let tree = tree_endpoint().declare(entity_rest::Method::Post, PlantWillow, true);
    let app = mount(ApiOptions::default(), vec![tree]);
    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "ignored"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"][0]["name"], json!("willow"));

    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.body["occurences"], json!(3));
}

#[tokio::test]
async fn declared_handlers_commit_by_default() {
    let mut app = mount(ApiOptions::default(), vec![tree_endpoint()]);
    app.api
        .declare("tree", entity_rest::Method::Post, PlantWillow, false)
        .expect("tree is registered");
    let mut adapter = entity_rest::AxumAdapter::new("http://localhost");
    app.api.mount(&mut adapter).expect("mounts");
    let router = adapter.into_router();

    let resp = send(&router, Method::POST, "/api/tree", Some(json!({"name": "ignored"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = send(&router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.body["occurences"], json!(4));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = default_api();
    let resp = send_with(&app.router, Method::GET, "/api/tree", None, &[("X-Request-Id", "req-42")]).await;
    assert_eq!(resp.headers.get("x-request-id").and_then(|v| v.to_str().ok()), Some("req-42"));

    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert!(resp.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn endpoints_with_unknown_keys_are_refused() {
    let mut api = entity_rest::Api::new(
        ApiOptions::default(),
        std::sync::Arc::new(entity_rest::MemoryStore::new()),
    );
    let err = api
        .add(Endpoint::new(tree_model()).primary_key(["name_id"]))
        .err()
        .expect("unknown key");
    assert!(matches!(err, entity_rest::ConfigError::UnknownPrimaryKey { .. }));

    api.add(tree_endpoint()).expect("first");
    let err = api.add(tree_endpoint()).err().expect("duplicate");
    assert_eq!(err, entity_rest::ConfigError::DuplicateEndpoint("tree".into()));
}

#[tokio::test]
async fn patch_item_with_mismatched_key_fails_before_any_write() {
    let app = default_api();
    let resp = send(&app.router, Method::PATCH, "/api/tree/1", Some(json!({"id": 2, "name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

    let names: Vec<Value> = app.store.rows(&tree_model()).iter().map(|r| r.value("name")).collect();
    assert_eq!(names, vec![Value::from("pine"), Value::from("maple"), Value::from("oak")]);
}

#[tokio::test]
async fn empty_batch_put_clears_the_collection() {
    let app = mount(ApiOptions::default(), vec![tree_endpoint().allow_batch(true)]);
    let resp = send(&app.router, Method::PUT, "/api/tree", Some(json!({"objects": []}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["occurences"], json!(0));
    assert!(app.store.rows(&tree_model()).is_empty());

    let resp = send(&app.router, Method::PATCH, "/api/tree", Some(json!({"objects": []}))).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

fn no_rotten_fruit() -> Endpoint {
    fruit_endpoint().validator("color", |f: Validatable<'_>| match &f.value {
        Value::String(s) if s == "rotten" => Err(f.error("rotten fruit is refused")),
        _ => Ok(f.value.clone()),
    })
}

#[tokio::test]
async fn one_invalid_object_aborts_the_whole_batch() {
    let app = mount(ApiOptions::default(), vec![no_rotten_fruit()]);
    let before = app.store.rows(&fruit_model());

    let resp = send(
        &app.router,
        Method::PUT,
        "/api/fruit",
        Some(json!({"objects": [{"color": "teal", "size": 1}, {"color": "rotten", "size": 2}]})),
    )
    .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.body["errors"].is_array());
    assert_eq!(app.store.rows(&fruit_model()), before);

    let resp = send(
        &app.router,
        Method::PATCH,
        "/api/fruit",
        Some(json!({"objects": [{"fruit_id": 1, "color": "teal"}, {"fruit_id": 2, "color": "rotten"}]})),
    )
    .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.rows(&fruit_model()), before);
}

#[tokio::test]
async fn read_guard_protects_reads_only() {
    let tree = tree_endpoint().read_auth(HeaderGuard::new("x-reader", "yes"));
    let app = mount(ApiOptions::default(), vec![tree]);

    let resp = send(&app.router, Method::GET, "/api/tree", None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let resp = send(&app.router, Method::GET, "/api/tree/1", None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let resp = send_with(&app.router, Method::GET, "/api/tree", None, &[("X-Reader", "yes")]).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = send(&app.router, Method::POST, "/api/tree", Some(json!({"name": "cedar"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn endpoint_guard_covers_every_method() {
    let tree = tree_endpoint().auth(|request: &entity_rest::Request, _: &Endpoint| -> Result<(), RestError> {
        match request.header("authorization") {
            Some("Bearer gardener") => Ok(()),
            _ => Err(RestError::forbidden("gardeners only")),
        }
    });
    let app = mount(ApiOptions::default(), vec![tree]);

    for (method, body) in [
        (Method::GET, None),
        (Method::POST, Some(json!({"name": "cedar"}))),
        (Method::DELETE, None),
    ] {
        let uri = if method == Method::DELETE { "/api/tree/1" } else { "/api/tree" };
        let resp = send(&app.router, method, uri, body).await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert_eq!(resp.body["message"], json!("gardeners only"));
    }
    assert_eq!(app.store.rows(&tree_model()).len(), 3);

    let resp = send_with(&app.router, Method::GET, "/api/tree", None, &[("Authorization", "Bearer gardener")]).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn patch_keeps_stored_values_over_defaults() {
    let fruit = fruit_endpoint().default_value("size", json!(1));
    let app = mount(ApiOptions::default(), vec![fruit]);
    let resp = send(&app.router, Method::PATCH, "/api/fruit/1", Some(json!({"color": "teal"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["objects"][0]["color"], json!("teal"));
    assert_eq!(resp.body["objects"][0]["size"], json!(12));
}
