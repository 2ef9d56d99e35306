//! Bridge between the registry and a host HTTP framework.

mod axum;

pub use self::axum::AxumAdapter;

use crate::error::ConfigError;
use crate::request::{Method, Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A mounted route: framework-neutral request in, response out.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

pub trait Adapter {
    /// Registers `handler` for `method` on `path` and, when `parameters` is non-empty, on
    /// `path` followed by one segment per parameter. Registering the same (path, method)
    /// twice fails with [`ConfigError::DuplicateRoute`].
    fn register_route(
        &mut self,
        path: &str,
        method: Method,
        parameters: &[String],
        handler: Handler,
    ) -> Result<(), ConfigError>;

    /// Absolute URL of the API root mounted at `root`.
    fn external_url(&self, root: &str) -> String;
}
