//! Inbound request as seen by the matcher and the renderer.

use crate::headers::HeaderList;
use crate::matcher::parse_query;

/// Request handed over by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubRequest {
    pub method: String,
    /// Escaped path plus optional query string, as received
    pub target: String,
    pub host: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_string(),
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Media type of the body, without parameters.
    pub fn media_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
    }

    /// Fields of a url-encoded form body.
    ///
    /// Only POST, PUT and PATCH bodies are read as forms.
    pub fn post_form(&self) -> Vec<(String, String)> {
        let reads_body = ["POST", "PUT", "PATCH"]
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&self.method));
        let is_form = self
            .media_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("application/x-www-form-urlencoded"));

        if reads_body && is_form {
            url::form_urlencoded::parse(&self.body)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Body form fields followed by query parameters.
    pub fn form(&self) -> Vec<(String, String)> {
        let mut form = self.post_form();
        if let Some((_, query)) = self.target.split_once('?') {
            form.extend(parse_query(query));
        }
        form
    }

    /// Request body parsed as JSON, when declared as `application/json`.
    pub fn json(&self) -> Option<serde_json::Value> {
        let is_json = self
            .media_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("application/json"));
        if !is_json || self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}
