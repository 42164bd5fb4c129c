//! Stubby
//!
//! A configurable HTTP stub server. Endpoints are declared in JSON or YAML
//! files; each request is matched against them in order and the first match
//! answers with a rendered response template.
//!
//! # Features
//!
//! - **URL Matching**: exact, regex or `{placeholder}` templates, on the raw
//!   or decoded path
//! - **Predicates**: `equalTo`, `matches`, `doesNotMatch`, `contains` and
//!   `doesNotContain` on path parameters, query parameters, headers and body
//! - **Templates**: Handlebars responses with access to captured values
//! - **Hot Reload**: configuration is re-read per request or on change
//!
//! # Example Configuration
//!
//! ```json
//! [
//!   {
//!     "name": "user-by-id",
//!     "request": {
//!       "method": "GET",
//!       "urlPathTemplate": "/users/{id}",
//!       "pathParameters": {"id": {"matches": "^[0-9]+$"}}
//!     },
//!     "response": {
//!       "status": 200,
//!       "body": "{\"id\": {{.Path.id}}}",
//!       "headers": {"Content-Type": "application/json"}
//!     }
//!   }
//! ]
//! ```

pub mod config;
pub mod error;
pub mod matcher;
pub mod request;
pub mod selector;
pub mod server;
pub mod template;

pub use config::{validate_endpoints, Endpoint, EndpointSource, FileEndpointSource};
pub use error::{Result, StubError};
pub use request::StubRequest;
pub use server::{ReloadPolicy, StubServer, DEFAULT_MAX_BODY_BYTES};
pub use template::TemplateEngine;
