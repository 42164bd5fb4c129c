//! Error types for stub matching and rendering.
//!
//! Every variant aborts the current matching pass. The HTTP layer logs the
//! error and answers `404 Not Found`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading endpoints, matching a request or rendering
/// a response.
#[derive(Debug, Error)]
pub enum StubError {
    /// The configuration path could not be read.
    #[error("failed to access config path {path}: {source}")]
    ConfigAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was named directly but has an unknown extension.
    #[error("config file must be a JSON or YAML file: {0}")]
    UnsupportedConfigFile(PathBuf),

    /// A configuration file is not a valid array of endpoints.
    #[error("error loading file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// A raw query pair did not split into exactly one key and one value.
    #[error("invalid query parameter: {0}")]
    MalformedQuery(String),

    /// The endpoint declares neither `body` nor `bodyFileName`.
    #[error("response body is empty for endpoint {endpoint:?}")]
    MissingResponseBody { endpoint: String },

    /// The file referenced by `bodyFileName` could not be read.
    #[error("failed to read body file {path}: {source}")]
    BodyFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured regular expression does not compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A `pathParameters` key has no `{key}` placeholder in the template.
    #[error("path parameter {name:?} not found in template {template:?}")]
    UnknownPathParameter { name: String, template: String },

    #[error("failed to parse response template: {0}")]
    TemplateParse(#[from] handlebars::TemplateError),

    #[error("failed to execute response template: {0}")]
    TemplateRender(#[from] handlebars::RenderError),

    /// The endpoint's status code or headers cannot be sent over HTTP.
    #[error("invalid response for endpoint {endpoint:?}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("matching task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("no matching endpoint found")]
    NoMatch,
}

pub type Result<T, E = StubError> = std::result::Result<T, E>;
