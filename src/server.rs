//! Stub server: endpoint matching and rendering behind an axum HTTP layer.

use crate::config::{ConfigError, StubServerConfig};
use crate::headers::HeaderList;
use crate::matcher::{Matcher, Selection};
use crate::render::{ErrorKind, RenderedResponse, Renderer};
use crate::request::StubRequest;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Largest request body read for templates.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Serves configured endpoints.
///
/// The configuration is read-only once the server is built, so one instance
/// is shared by every request without locking.
pub struct StubServer {
    config: StubServerConfig,
    matcher: Matcher,
    renderer: Renderer,
}

impl StubServer {
    /// Create a new stub server with the given configuration.
    pub fn new(config: StubServerConfig) -> Self {
        let matcher = Matcher::new(&config.endpoints);

        info!(endpoints = config.endpoints.len(), "Stub server initialized");

        Self {
            config,
            matcher,
            renderer: Renderer::new(),
        }
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(StubServerConfig::from_yaml(yaml)?))
    }

    pub fn config(&self) -> &StubServerConfig {
        &self.config
    }

    /// Find the best endpoint for a request.
    pub fn find_endpoint(
        &self,
        method: &str,
        url: &str,
        headers: &HeaderList,
    ) -> Option<Selection<'_>> {
        self.matcher
            .find_endpoint(&self.config.endpoints, method, url, headers)
    }

    /// Match and render one request.
    pub fn handle(&self, request: &StubRequest) -> RenderedResponse {
        match self.find_endpoint(&request.method, &request.target, &request.headers) {
            Some(selection) => {
                info!(
                    method = %request.method,
                    target = %request.target,
                    endpoint = %selection.endpoint.url,
                    index = selection.index,
                    specificity = ?selection.specificity,
                    "Request matched endpoint"
                );
                self.renderer.render(&selection, request)
            }
            None => {
                warn!(
                    method = %request.method,
                    target = %request.target,
                    "No matching endpoint found"
                );
                RenderedResponse::not_found()
            }
        }
    }

    /// Build the axum router serving every method and path.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(handle_request)
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until SIGINT or SIGTERM.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` completes, then drain.
    pub async fn run_until<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(address = %addr, "HTTP server starting");

        let app = Arc::new(self).router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler.
async fn handle_request(State(server): State<Arc<StubServer>>, request: Request) -> Response {
    let request = into_stub_request(request).await;

    // Response files are read synchronously.
    match tokio::task::spawn_blocking(move || server.handle(&request)).await {
        Ok(rendered) => rendered.into_response(),
        Err(e) => {
            error!(error = %e, "Rendering task failed");
            RenderedResponse::error(ErrorKind::InvalidResponse, "response rendering failed")
                .into_response()
        }
    }
}

async fn into_stub_request(request: Request) -> StubRequest {
    let (parts, body) = request.into_parts();

    let target = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!(error = %e, "Cannot read request body, continuing without it");
            Vec::new()
        }
    };

    StubRequest {
        method: parts.method.as_str().to_string(),
        target,
        host,
        headers,
        body,
    }
}

impl IntoResponse for RenderedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or_else(|_| {
            warn!(status = self.status, "Invalid status code, sending 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });

        // Headers are all resolved before the status line goes out.
        let mut response = Response::new(self.body.map_or_else(Body::empty, Body::from));
        *response.status_mut() = status;
        for (name, value) in self.headers.iter() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().append(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid response header"),
            }
        }
        response
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StubServerConfig {
        let yaml = r#"
endpoints:
  - url: /users
    method: PUT
    response: "updated"

  - url: /users
    method: POST
    response:
      status_code: 201
      headers:
        Location: /users/1
      data: '{"id": 1}'

  - url: "~/users/([0-9]+)$"
    response: "user {{index .RouteParam 0}}"
"#;
        StubServerConfig::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_server_creation() {
        let server = StubServer::new(test_config());
        assert_eq!(server.config().endpoints.len(), 3);
    }

    #[test]
    fn test_handle_regex_endpoint() {
        let server = StubServer::new(test_config());
        let rendered = server.handle(&StubRequest::new("GET", "/users/7"));

        assert_eq!(rendered.status, 200);
        assert_eq!(rendered.body_text(), "user 7");
    }

    #[test]
    fn test_handle_structured_response() {
        let server = StubServer::new(test_config());
        let rendered = server.handle(&StubRequest::new("POST", "/users"));

        assert_eq!(rendered.status, 201);
        assert_eq!(rendered.headers.get("location"), Some("/users/1"));
        assert_eq!(rendered.body_text(), r#"{"id": 1}"#);
    }

    #[test]
    fn test_handle_falls_back_to_first_endpoint() {
        let server = StubServer::new(test_config());
        let rendered = server.handle(&StubRequest::new("DELETE", "/default"));
        assert_eq!(rendered.body_text(), "updated");
    }

    #[test]
    fn test_handle_without_endpoints() {
        let server = StubServer::new(StubServerConfig::default());
        let rendered = server.handle(&StubRequest::new("GET", "/test"));

        assert_eq!(rendered, RenderedResponse::not_found());
        assert!(server.find_endpoint("GET", "/test", &HeaderList::new()).is_none());
    }

    #[test]
    fn test_into_response_skips_invalid_headers() {
        let rendered = RenderedResponse {
            status: 202,
            headers: HeaderList::new()
                .with("X-Good", "1")
                .with("Bad Header", "2")
                .with("X-Multi", "a")
                .with("X-Multi", "b"),
            body: None,
        };

        let response = rendered.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-good").unwrap(), "1");
        assert_eq!(response.headers().get_all("x-multi").iter().count(), 2);
        assert_eq!(response.headers().len(), 3);
    }
}
