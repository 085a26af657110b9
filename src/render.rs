//! Response rendering.
//!
//! Turns the selected endpoint and the request into the status, headers and
//! body sent back to the client.

use crate::config::ResponseData;
use crate::header_block;
use crate::headers::HeaderList;
use crate::matcher::Selection;
use crate::request::StubRequest;
use crate::template::{TemplateContext, TemplateEngine};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Kind of a request-time failure, sent as the `error` field of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No configured endpoint matched
    NotFound,
    /// A file-backed response could not be opened or read
    InvalidResponse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidResponse => "invalid_response",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidResponse => 500,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
    message: &'a str,
}

/// Fully materialized response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: HeaderList,
    /// `None` when nothing but status and headers is sent
    pub body: Option<Vec<u8>>,
}

impl RenderedResponse {
    /// JSON error response of the given kind.
    pub fn error(kind: ErrorKind, message: &str) -> Self {
        let payload = ErrorPayload {
            error: kind.as_str(),
            message,
        };
        let body = serde_json::to_vec(&payload).unwrap_or_default();

        Self {
            status: kind.status(),
            headers: HeaderList::new().with("Content-Type", "application/json"),
            body: Some(body),
        }
    }

    /// Response for a request no endpoint matched.
    pub fn not_found() -> Self {
        Self::error(ErrorKind::NotFound, "didn't match with any endpoint")
    }

    /// Body as text, lossily decoded.
    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// Renders endpoint responses.
#[derive(Default)]
pub struct Renderer {
    templates: TemplateEngine,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize the response of the selected endpoint for `request`.
    pub fn render(&self, selection: &Selection<'_>, request: &StubRequest) -> RenderedResponse {
        let response = &selection.endpoint.response;

        match response.data() {
            ResponseData::Empty => RenderedResponse {
                status: response.status_code,
                headers: response.headers.clone(),
                body: None,
            },
            ResponseData::Template(source) => RenderedResponse {
                status: response.status_code,
                headers: response.headers.clone(),
                body: Some(self.expand(source.as_bytes(), selection, request)),
            },
            ResponseData::File(path) => {
                let content = match read_response_file(path) {
                    Ok(content) => content,
                    Err(message) => {
                        warn!(
                            path = %path.display(),
                            error = %message,
                            "Cannot load response file"
                        );
                        return RenderedResponse::error(ErrorKind::InvalidResponse, &message);
                    }
                };

                // Embedded status and headers replace the configured ones.
                let (status, headers, body) = match header_block::parse(&content) {
                    Some(block) => {
                        debug!(
                            path = %path.display(),
                            status = block.status,
                            "Response file declares its own status"
                        );
                        let headers = if block.headers.is_empty() {
                            response.headers.clone()
                        } else {
                            block.headers
                        };
                        (block.status, headers, &content[block.body_offset..])
                    }
                    None => (response.status_code, response.headers.clone(), &content[..]),
                };

                RenderedResponse {
                    status,
                    headers,
                    body: Some(self.expand(body, selection, request)),
                }
            }
        }
    }

    /// Expand a body template. Bodies that are not UTF-8 are sent as they are.
    fn expand(&self, source: &[u8], selection: &Selection<'_>, request: &StubRequest) -> Vec<u8> {
        let Ok(source) = std::str::from_utf8(source) else {
            debug!(index = selection.index, "Binary response body, skipping template expansion");
            return source.to_vec();
        };
        if !source.contains("{{") {
            return source.as_bytes().to_vec();
        }

        let ctx = TemplateContext::new(request, selection.route_params.as_deref());
        self.templates.render_or_source(source, &ctx).into_bytes()
    }
}

fn read_response_file(path: &Path) -> Result<Vec<u8>, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open response file: {e}"))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)
        .map_err(|e| format!("cannot read response file: {e}"))?;
    Ok(content)
}
