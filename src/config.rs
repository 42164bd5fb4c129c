//! Endpoint definitions and the loader that reads them from disk.
//!
//! An endpoint file holds a JSON (or YAML) array of endpoint objects:
//!
//! ```json
//! [
//!   {
//!     "name": "user-by-id",
//!     "request": {
//!       "method": "GET",
//!       "urlPathTemplate": "/users/{id}",
//!       "pathParameters": { "id": { "matches": "^[0-9]+$" } }
//!     },
//!     "response": { "status": 200, "body": "{\"id\": \"{{.Path.id}}\"}" }
//!   }
//! ]
//! ```

use crate::error::{Result, StubError};
use crate::matcher::compile_pattern;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// A configured predicate value. `equalTo` and friends accept strings as
/// well as bare numbers and booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

/// Five optional string predicates, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    /// Observed value must equal the rendering of this scalar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<Scalar>,

    /// Regex that must be found somewhere in the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Scalar>,

    /// Regex that must not be found anywhere in the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub does_not_match: Option<Scalar>,

    /// Literal substring that must be present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Scalar>,

    /// Literal substring that must be absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub does_not_contain: Option<Scalar>,
}

impl Matcher {
    /// A matcher with no predicate set accepts every value.
    pub fn is_empty(&self) -> bool {
        self.equal_to.is_none()
            && self.matches.is_none()
            && self.does_not_match.is_none()
            && self.contains.is_none()
            && self.does_not_contain.is_none()
    }

    /// Regex sources declared by this matcher.
    pub fn patterns(&self) -> impl Iterator<Item = String> + '_ {
        self.matches
            .iter()
            .chain(self.does_not_match.iter())
            .map(|p| p.to_string())
    }

    fn validate(&self) -> Result<()> {
        for pattern in self.patterns() {
            compile_pattern(&pattern)?;
        }
        Ok(())
    }
}

/// How the request URL is matched. Exactly one strategy is active.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlMatch {
    /// Exact equality against the raw path
    Url(String),
    /// Regex search against the raw path
    UrlPattern(String),
    /// Exact equality against the decoded path
    UrlPath(String),
    /// Regex search against the decoded path
    UrlPathPattern(String),
    /// Segment-wise match with `{name}` placeholders
    UrlPathTemplate(String),
}

impl UrlMatch {
    /// Pick the strategy from the five wire fields: the first non-empty one
    /// in `url`, `urlPattern`, `urlPath`, `urlPathPattern`, `urlPathTemplate`
    /// order wins.
    fn from_fields(
        url: String,
        url_pattern: String,
        url_path: String,
        url_path_pattern: String,
        url_path_template: String,
    ) -> Option<Self> {
        if !url.is_empty() {
            Some(UrlMatch::Url(url))
        } else if !url_pattern.is_empty() {
            Some(UrlMatch::UrlPattern(url_pattern))
        } else if !url_path.is_empty() {
            Some(UrlMatch::UrlPath(url_path))
        } else if !url_path_pattern.is_empty() {
            Some(UrlMatch::UrlPathPattern(url_path_pattern))
        } else if !url_path_template.is_empty() {
            Some(UrlMatch::UrlPathTemplate(url_path_template))
        } else {
            None
        }
    }
}

/// Request predicate of one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequestSpecWire", into = "RequestSpecWire")]
pub struct RequestSpec {
    /// HTTP method, compared exactly
    pub method: String,
    /// URL matching strategy (`None` never matches)
    pub url: Option<UrlMatch>,
    /// Placeholder constraints for [`UrlMatch::UrlPathTemplate`]
    pub path_parameters: BTreeMap<String, Matcher>,
    /// Query parameter constraints, evaluated on raw values
    pub query_parameters: BTreeMap<String, Matcher>,
    /// Header constraints
    pub headers: BTreeMap<String, Matcher>,
    /// Body constraint
    pub body: Matcher,
}

impl RequestSpec {
    fn validate(&self) -> Result<()> {
        match &self.url {
            Some(UrlMatch::UrlPattern(p)) | Some(UrlMatch::UrlPathPattern(p)) => {
                compile_pattern(p.trim_end_matches('/'))?;
            }
            Some(UrlMatch::UrlPathTemplate(template)) => {
                for name in self.path_parameters.keys() {
                    let placeholder = format!("{{{}}}", name);
                    if !template.split('/').any(|segment| segment == placeholder) {
                        return Err(StubError::UnknownPathParameter {
                            name: name.clone(),
                            template: template.clone(),
                        });
                    }
                }
            }
            _ => {}
        }

        self.path_parameters
            .values()
            .chain(self.query_parameters.values())
            .chain(self.headers.values())
            .chain(std::iter::once(&self.body))
            .try_for_each(Matcher::validate)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestSpecWire {
    #[serde(default, deserialize_with = "null_as_default")]
    method: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    url: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    url_pattern: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    url_path: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    url_path_pattern: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    url_path_template: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    path_parameters: BTreeMap<String, Matcher>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    query_parameters: BTreeMap<String, Matcher>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, Matcher>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Matcher::is_empty")]
    body: Matcher,
}

impl From<RequestSpecWire> for RequestSpec {
    fn from(wire: RequestSpecWire) -> Self {
        Self {
            method: wire.method,
            url: UrlMatch::from_fields(
                wire.url,
                wire.url_pattern,
                wire.url_path,
                wire.url_path_pattern,
                wire.url_path_template,
            ),
            path_parameters: wire.path_parameters,
            query_parameters: wire.query_parameters,
            headers: wire.headers,
            body: wire.body,
        }
    }
}

impl From<RequestSpec> for RequestSpecWire {
    fn from(spec: RequestSpec) -> Self {
        let mut wire = RequestSpecWire {
            method: spec.method,
            path_parameters: spec.path_parameters,
            query_parameters: spec.query_parameters,
            headers: spec.headers,
            body: spec.body,
            ..Default::default()
        };
        match spec.url {
            Some(UrlMatch::Url(v)) => wire.url = v,
            Some(UrlMatch::UrlPattern(v)) => wire.url_pattern = v,
            Some(UrlMatch::UrlPath(v)) => wire.url_path = v,
            Some(UrlMatch::UrlPathPattern(v)) => wire.url_path_pattern = v,
            Some(UrlMatch::UrlPathTemplate(v)) => wire.url_path_template = v,
            None => {}
        }
        wire
    }
}

/// Where the response template comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodySource<'a> {
    File(&'a Path),
    Inline(&'a str),
}

/// Response produced when an endpoint matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Template file; wins over `body` when non-empty
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub body_file_name: String,

    /// Inline template
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Headers added to the response
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: default_status(),
            body_file_name: String::new(),
            body: String::new(),
            headers: BTreeMap::new(),
        }
    }
}

impl ResponseSpec {
    pub fn body_source(&self) -> Option<BodySource<'_>> {
        if !self.body_file_name.is_empty() {
            Some(BodySource::File(Path::new(&self.body_file_name)))
        } else if !self.body.is_empty() {
            Some(BodySource::Inline(&self.body))
        } else {
            None
        }
    }

    /// Resolve the template text. Body files are read in full and closed
    /// before returning.
    pub fn load_body(&self, endpoint: &str) -> Result<String> {
        match self.body_source() {
            Some(BodySource::File(path)) => {
                fs::read_to_string(path).map_err(|source| StubError::BodyFileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Some(BodySource::Inline(body)) => Ok(body.to_string()),
            None => Err(StubError::MissingResponseBody {
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

/// One configured stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub request: RequestSpec,

    #[serde(default, deserialize_with = "null_as_default")]
    pub response: ResponseSpec,
}

impl Endpoint {
    /// Check everything that would otherwise only fail at request time:
    /// patterns compile, placeholders exist, a body source is declared and
    /// the status code is valid.
    pub fn validate(&self) -> Result<()> {
        self.request.validate()?;
        if self.response.body_source().is_none() {
            return Err(StubError::MissingResponseBody {
                endpoint: self.name.clone(),
            });
        }
        if !(100..=599).contains(&self.response.status) {
            return Err(StubError::InvalidResponse {
                endpoint: self.name.clone(),
                reason: format!("invalid status code: {}", self.response.status),
            });
        }
        Ok(())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Supported endpoint file formats, keyed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            _ => None,
        }
    }

    fn parse(self, content: &str) -> std::result::Result<Vec<Endpoint>, String> {
        match self {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Size and modification time of one config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Snapshot of a config tree used to detect edits.
pub type Fingerprint = Vec<FileStamp>;

/// Something that can produce the ordered endpoint list.
pub trait EndpointSource: Send + Sync {
    /// Load every endpoint, in evaluation order.
    fn load(&self) -> Result<Vec<Endpoint>>;

    /// Cheap change detector. `None` means the source cannot tell, and
    /// callers must reload.
    fn fingerprint(&self) -> Result<Option<Fingerprint>> {
        Ok(None)
    }
}

impl EndpointSource for Vec<Endpoint> {
    fn load(&self) -> Result<Vec<Endpoint>> {
        Ok(self.clone())
    }
}

/// Loads endpoints from a file or a directory tree.
///
/// Directories are walked depth-first. Entries of each directory are
/// visited in byte-wise file name order and a subdirectory is descended
/// into at its sorted position. Files with other extensions are skipped.
#[derive(Debug, Clone)]
pub struct FileEndpointSource {
    root: PathBuf,
}

impl FileEndpointSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Config files in load order.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let meta = fs::metadata(&self.root).map_err(|source| StubError::ConfigAccess {
            path: self.root.clone(),
            source,
        })?;

        if !meta.is_dir() {
            if ConfigFormat::from_path(&self.root).is_none() {
                return Err(StubError::UnsupportedConfigFile(self.root.clone()));
            }
            return Ok(vec![self.root.clone()]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| StubError::ConfigAccess {
                path: e.path().unwrap_or(&self.root).to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_dir() && ConfigFormat::from_path(entry.path()).is_some() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn load_file(path: &Path) -> Result<Vec<Endpoint>> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| StubError::UnsupportedConfigFile(path.to_path_buf()))?;
        let content = fs::read_to_string(path).map_err(|source| StubError::ConfigAccess {
            path: path.to_path_buf(),
            source,
        })?;
        format.parse(&content).map_err(|message| StubError::ConfigParse {
            path: path.to_path_buf(),
            message,
        })
    }
}

impl EndpointSource for FileEndpointSource {
    fn load(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::new();
        for path in self.files()? {
            let loaded = Self::load_file(&path)?;
            debug!(path = %path.display(), endpoints = loaded.len(), "Loaded config file");
            endpoints.extend(loaded);
        }
        Ok(endpoints)
    }

    fn fingerprint(&self) -> Result<Option<Fingerprint>> {
        self.files()?
            .into_iter()
            .map(|path| {
                let meta = fs::metadata(&path).map_err(|source| StubError::ConfigAccess {
                    path: path.clone(),
                    source,
                })?;
                Ok(FileStamp {
                    len: meta.len(),
                    modified: meta.modified().ok(),
                    path,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

/// Validate every endpoint, naming the first offender by position.
pub fn validate_endpoints(endpoints: &[Endpoint]) -> anyhow::Result<()> {
    for (i, endpoint) in endpoints.iter().enumerate() {
        endpoint
            .validate()
            .map_err(|e| anyhow::anyhow!("Endpoint {} ({:?}): {}", i, endpoint.name, e))?;
    }
    Ok(())
}
