//! Demo server: a tree/fruit orchard over PostgreSQL.
//!
//! Expects tables `tree(id serial primary key, name text)` and
//! `fruit(fruit_id serial primary key, color text, size integer, age interval, tree_id integer)`.

use entity_rest::{
    Api, ApiOptions, AxumAdapter, ColumnSpec, Endpoint, HeaderGuard, Idiom, JsonServerIdiom, Model,
    PgSessionFactory, Relationship, SemanticType, Validatable, Value, YamlIdiom,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn orchard() -> (Endpoint, Endpoint) {
    let tree = Model::new("tree")
        .key_column(ColumnSpec::new("id", SemanticType::Integer).with_default())
        .column(ColumnSpec::new("name", SemanticType::String));
    let fruit = Model::new("fruit")
        .key_column(ColumnSpec::new("fruit_id", SemanticType::Integer).with_default())
        .column(ColumnSpec::new("color", SemanticType::String))
        .column(ColumnSpec::new("size", SemanticType::Integer))
        .column(ColumnSpec::new("age", SemanticType::Duration))
        .column(ColumnSpec::new("tree_id", SemanticType::Integer));

    let tree = Endpoint::new(tree)
        .described("Trees of the orchard")
        .relationship(Relationship::new("fruits", "fruit").on("id", "tree_id"))
        .validator("name", |f: Validatable<'_>| match &f.value {
            Value::String(s) if s.trim().is_empty() => Err(f.error("name must not be blank")),
            _ => Ok(f.value.clone()),
        });
    let mut fruit = Endpoint::new(fruit)
        .described("Fruits, each hanging from at most one tree")
        .allow_batch(true)
        .relationship(Relationship::new("tree", "tree").on("tree_id", "id"));
    if let Ok(key) = std::env::var("ORCHARD_API_KEY") {
        fruit = fruit.write_auth(HeaderGuard::new("x-api-key", key));
    }
    (tree, fruit)
}

fn idiom_from_env() -> Option<Arc<dyn Idiom>> {
    match std::env::var("ENTITY_REST_IDIOM").ok()?.as_str() {
        "json-server" => Some(Arc::new(JsonServerIdiom)),
        "yaml" => Some(Arc::new(YamlIdiom)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("entity_rest=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/orchard".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let options = ApiOptions::from_env()?;
    let mut api = Api::new(options, Arc::new(PgSessionFactory::new(pool)));
    let (tree, fruit) = orchard();
    api.add(tree)?.add(fruit)?;
    if let Some(idiom) = idiom_from_env() {
        api.set_idiom(idiom);
    }

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let public_url = std::env::var("PUBLIC_URL").unwrap_or_else(|_| format!("http://{}", addr));
    let mut adapter = AxumAdapter::new(public_url);
    api.mount(&mut adapter)?;

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, adapter.into_router()).await?;
    Ok(())
}
