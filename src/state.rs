//! State shared by every mounted route. Frozen at mount; only the idiom is swappable.

use crate::coerce::Coercer;
use crate::config::ApiOptions;
use crate::endpoint::Endpoint;
use crate::idiom::IdiomHandle;
use crate::session::SessionFactory;
use std::sync::Arc;

pub struct Shared {
    pub options: ApiOptions,
    /// Registration order.
    pub endpoints: Vec<Arc<Endpoint>>,
    pub sessions: Arc<dyn SessionFactory>,
    pub idiom: IdiomHandle,
    pub coercer: Arc<dyn Coercer>,
    /// Absolute URL of the API root.
    pub external_url: String,
}

impl Shared {
    pub fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn coercer_for<'a>(&'a self, endpoint: &'a Endpoint) -> &'a dyn Coercer {
        endpoint.coercer.as_deref().unwrap_or(self.coercer.as_ref())
    }

    pub fn root(&self) -> String {
        self.options.root()
    }

    pub fn endpoint_path(&self, endpoint: &Endpoint) -> String {
        format!("{}/{}", self.root(), endpoint.name)
    }
}
