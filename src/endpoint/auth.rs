//! Authorization guards. The universal guard runs first, then the read guard (GET) or the
//! write guard (PUT, POST, DELETE, PATCH).

use super::Endpoint;
use crate::error::RestError;
use crate::request::{Method, Request};
use async_trait::async_trait;

#[async_trait]
pub trait Guard: Send + Sync {
    async fn check(&self, request: &Request, endpoint: &Endpoint) -> Result<(), RestError>;
}

#[async_trait]
impl<F> Guard for F
where
    F: Fn(&Request, &Endpoint) -> Result<(), RestError> + Send + Sync,
{
    async fn check(&self, request: &Request, endpoint: &Endpoint) -> Result<(), RestError> {
        self(request, endpoint)
    }
}

/// Guard accepting requests that carry `header` with exactly `value`.
pub struct HeaderGuard {
    header: String,
    value: String,
}

impl HeaderGuard {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderGuard {
            header: header.into().to_ascii_lowercase(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Guard for HeaderGuard {
    async fn check(&self, request: &Request, _endpoint: &Endpoint) -> Result<(), RestError> {
        match request.header(&self.header) {
            Some(v) if v == self.value => Ok(()),
            _ => Err(RestError::forbidden(format!("missing or invalid {} header", self.header))),
        }
    }
}

pub(crate) async fn authorize(endpoint: &Endpoint, request: &Request) -> Result<(), RestError> {
    if let Some(guard) = &endpoint.auth {
        guard.check(request, endpoint).await?;
    }
    let scoped = match request.method {
        Method::Get => endpoint.read_auth.as_ref(),
        m if m.is_mutating() => endpoint.write_auth.as_ref(),
        _ => None,
    };
    if let Some(guard) = scoped {
        guard.check(request, endpoint).await?;
    }
    Ok(())
}
