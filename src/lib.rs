//! Stubserver
//!
//! A configurable HTTP stub server. It loads a declarative list of endpoints
//! and answers every request with the canned response of the endpoint that
//! fits it best, so client applications can be developed and tested against
//! a fake backend.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, path, declared query parameters and headers
//! - **Regex URLs**: `~`-prefixed URLs match the full request target, captures feed templates
//! - **Static Responses**: Return fixed status, headers and body
//! - **Dynamic Templates**: Bodies are Handlebars templates over the request
//! - **File Responses**: `@path` bodies, optionally starting with their own status line and headers
//!
//! # Example Configuration
//!
//! ```yaml
//! endpoints:
//!   - url: /users/1
//!     response: '{"id": 1}'
//!
//!   - url: /users/1?field=address
//!     headers:
//!       X-Version: "2.0.0"
//!     response:
//!       status_code: 200
//!       headers:
//!         Content-Type: application/json
//!       data: "@responses/address.json"
//!
//!   - url: "~/users/([0-9]+)$"
//!     method: PUT
//!     response: '{"id": {{index .RouteParam 0}}, "method": "{{.Request.Method}}"}'
//! ```

pub mod config;
pub mod header_block;
pub mod headers;
pub mod matcher;
pub mod render;
pub mod request;
pub mod server;
pub mod template;

pub use config::{ConfigError, EndpointSpec, ResponseSpec, StubServerConfig};
pub use headers::HeaderList;
pub use matcher::{Matcher, Selection, Specificity};
pub use render::{RenderedResponse, Renderer};
pub use request::StubRequest;
pub use server::StubServer;
