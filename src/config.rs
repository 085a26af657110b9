//! Configuration for the stub server.
//!
//! Defines the endpoint list, how each endpoint is matched, and the canned
//! response it serves. A config is loaded once and never mutated afterwards.

use crate::headers::HeaderList;
use axum::http::Uri;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Leading character marking an endpoint URL as a regular expression.
pub const REGEX_SIGIL: char = '~';

/// Leading character marking response data as a file reference.
pub const FILE_SIGIL: char = '@';

/// Load-time configuration failure. Every variant is a `config_invalid` error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("url '{url}' is not valid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("url '{url}' is not a valid pattern: {source}")]
    InvalidPattern {
        url: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("endpoint {index}: {source}")]
    Endpoint {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    /// Error kind reported to operators.
    pub fn kind(&self) -> &'static str {
        "config_invalid"
    }
}

/// Main configuration for the stub server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubServerConfig {
    /// Endpoints in declaration order
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

impl StubServerConfig {
    pub fn new(endpoints: Vec<EndpointSpec>) -> Self {
        Self { endpoints }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.validate().map_err(|e| ConfigError::Endpoint {
                index,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}

/// A single configured endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    /// Request path with optional query string, or `~<regex>`
    #[serde(deserialize_with = "trimmed")]
    pub url: String,

    /// HTTP method, stored upper-case
    #[serde(default = "default_method", deserialize_with = "method")]
    pub method: String,

    /// Headers the request must carry; an empty value only requires presence
    #[serde(default)]
    pub headers: HeaderList,

    /// Response to serve
    #[serde(default)]
    pub response: ResponseSpec,
}

fn default_method() -> String {
    "GET".to_string()
}

fn trimmed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(String::deserialize(deserializer)?.trim().to_string())
}

fn method<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let method = String::deserialize(deserializer)?;
    Ok(normalize_method(&method))
}

fn normalize_method(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() {
        default_method()
    } else {
        method.to_uppercase()
    }
}

impl EndpointSpec {
    /// Create an endpoint with an empty `200` response.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            url: url.trim().to_string(),
            method: normalize_method(method),
            headers: HeaderList::new(),
            response: ResponseSpec::default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_response(mut self, response: ResponseSpec) -> Self {
        self.response = response;
        self
    }

    /// The regular expression source when the URL carries the regex sigil.
    pub fn url_pattern(&self) -> Option<&str> {
        self.url.strip_prefix(REGEX_SIGIL).map(str::trim)
    }

    pub fn is_regex(&self) -> bool {
        self.url_pattern().is_some()
    }

    /// Validate the endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.url_pattern() {
            Some(pattern) => {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    url: self.url.clone(),
                    source,
                })?;
            }
            None => {
                parse_request_uri(&self.url)?;
            }
        }
        self.response.validate()
    }
}

/// Parse a literal endpoint URL as an absolute request URI.
pub(crate) fn parse_request_uri(url: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let uri: Uri = url.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(e.to_string()))?;
    if uri.scheme().is_none() && !url.starts_with('/') {
        return Err(invalid("invalid URI for request".to_string()));
    }
    Ok(uri)
}

/// Canonical response definition.
///
/// In config documents `response` is either a bare string, used as `data`
/// with status `200`, or a mapping with `status_code`, `headers` and `data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct ResponseSpec {
    pub status_code: u16,
    pub headers: HeaderList,
    /// Empty, a template, or `@path` referencing a file
    pub data: String,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status_code: default_status(),
            headers: HeaderList::new(),
            data: String::new(),
        }
    }
}

fn default_status() -> u16 {
    200
}

/// Where a response body comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseData<'a> {
    Empty,
    File(&'a Path),
    Template(&'a str),
}

impl ResponseSpec {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn data(&self) -> ResponseData<'_> {
        if self.data.is_empty() {
            ResponseData::Empty
        } else if let Some(path) = self.data.strip_prefix(FILE_SIGIL) {
            ResponseData::File(Path::new(path.trim()))
        } else {
            ResponseData::Template(&self.data)
        }
    }

    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=599).contains(&self.status_code) {
            return Err(ConfigError::InvalidStatus(self.status_code));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FullResponse {
    #[serde(default = "default_status", alias = "statuscode")]
    status_code: u16,
    #[serde(default)]
    headers: HeaderList,
    #[serde(default)]
    data: String,
}

impl TryFrom<serde_json::Value> for ResponseSpec {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Self::default()),
            serde_json::Value::String(data) => Ok(Self::default().with_data(data)),
            value @ serde_json::Value::Object(_) => {
                let full: FullResponse =
                    serde_json::from_value(value).map_err(|e| format!("response: {e}"))?;
                Ok(Self {
                    status_code: full.status_code,
                    headers: full.headers,
                    data: full.data,
                })
            }
            _ => Err("response: expected a string or a mapping with status_code, headers and data"
                .to_string()),
        }
    }
}
