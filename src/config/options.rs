//! Registry-wide options with environment overrides.

use crate::error::ConfigError;
use std::env;

/// `info` block of the OpenAPI document.
#[derive(Clone, Debug, PartialEq)]
pub struct Info {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
}

impl Default for Info {
    fn default() -> Self {
        Info {
            title: "entity-rest".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiOptions {
    /// Global path prefix, e.g. `/api`.
    pub path: String,
    /// Optional version segment appended to `path`.
    pub version: String,
    pub allow_options: bool,
    pub empty_get_as_404: bool,
    pub validation_error_status: u16,
    pub info: Info,
}

impl Default for ApiOptions {
    fn default() -> Self {
        ApiOptions {
            path: "/api".into(),
            version: String::new(),
            allow_options: true,
            empty_get_as_404: false,
            validation_error_status: 500,
            info: Info::default(),
        }
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidOption {
                name,
                message: format!("expected a boolean, got '{}'", other),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl ApiOptions {
    /// Defaults overridden by `ENTITY_REST_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ApiOptions::default();
        let validation_error_status = match env::var("ENTITY_REST_VALIDATION_STATUS") {
            Ok(v) => {
                let status: u16 = v.trim().parse().map_err(|_| ConfigError::InvalidOption {
                    name: "ENTITY_REST_VALIDATION_STATUS",
                    message: format!("expected an HTTP status, got '{}'", v),
                })?;
                if !(400..600).contains(&status) {
                    return Err(ConfigError::InvalidOption {
                        name: "ENTITY_REST_VALIDATION_STATUS",
                        message: format!("{} is not an error status", status),
                    });
                }
                status
            }
            Err(_) => defaults.validation_error_status,
        };
        let mut info = defaults.info;
        if let Ok(title) = env::var("ENTITY_REST_TITLE") {
            info.title = title;
        }
        Ok(ApiOptions {
            path: env::var("ENTITY_REST_PATH").unwrap_or(defaults.path),
            version: env::var("ENTITY_REST_VERSION").unwrap_or(defaults.version),
            allow_options: env_bool("ENTITY_REST_ALLOW_OPTIONS", defaults.allow_options)?,
            empty_get_as_404: env_bool("ENTITY_REST_EMPTY_GET_AS_404", defaults.empty_get_as_404)?,
            validation_error_status,
            info,
        })
    }

    /// `{path}/{version}` without a trailing slash; empty when mounted at `/`.
    pub fn root(&self) -> String {
        let mut segments: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        segments.extend(self.version.split('/').filter(|s| !s.is_empty()));
        if segments.is_empty() {
            String::new()
        } else {
            format!("/{}", segments.join("/"))
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn empty_get_as_404(mut self, on: bool) -> Self {
        self.empty_get_as_404 = on;
        self
    }

    pub fn validation_error_status(mut self, status: u16) -> Self {
        self.validation_error_status = status;
        self
    }

    pub fn allow_options(mut self, on: bool) -> Self {
        self.allow_options = on;
        self
    }
}
