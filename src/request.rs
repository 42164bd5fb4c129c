//! Snapshot of one inbound request, as seen by the matcher.

use crate::error::{Result, StubError};
use std::collections::HashMap;

/// Ordered query pairs. Repeated keys are kept; lookups return the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryValues(Vec<(String, String)>);

impl QueryValues {
    /// Split a raw query string on `&` and `=` without decoding anything.
    ///
    /// Every pair must have exactly one `=`; `a=1&b` and `a=1=2` are both
    /// rejected. An empty query has no pairs.
    pub fn parse_raw(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::default());
        }

        raw.split('&')
            .map(|pair| {
                let mut parts = pair.split('=');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(key), Some(value), None) => Ok((key.to_string(), value.to_string())),
                    _ => Err(StubError::MalformedQuery(pair.to_string())),
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Parse with `application/x-www-form-urlencoded` decoding.
    pub fn parse_decoded(raw: &str) -> Self {
        Self(
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect(),
        )
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value of every key.
    pub fn first_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        for (key, value) in &self.0 {
            values.entry(key.clone()).or_insert_with(|| value.clone());
        }
        values
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything the matcher may look at.
#[derive(Debug, Clone, Default)]
pub struct StubRequest {
    pub method: String,
    /// Path as it appeared on the request line
    pub raw_path: String,
    /// Percent-decoded path
    pub path: String,
    /// Query pairs exactly as sent
    pub raw_query: QueryValues,
    /// Form-decoded query pairs
    pub query: QueryValues,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubRequest {
    /// Build a request snapshot, decoding the path and parsing the query.
    ///
    /// Fails with [`StubError::MalformedQuery`] when the raw query does not
    /// split into `key=value` pairs.
    pub fn new(
        method: &str,
        raw_path: &str,
        raw_query: Option<&str>,
        headers: Vec<(String, String)>,
        body: &[u8],
    ) -> Result<Self> {
        let raw_query = raw_query.unwrap_or("");
        let decoded = urlencoding::decode_binary(raw_path.as_bytes());

        Ok(Self {
            method: method.to_string(),
            raw_path: raw_path.to_string(),
            path: String::from_utf8_lossy(&decoded).into_owned(),
            raw_query: QueryValues::parse_raw(raw_query)?,
            query: QueryValues::parse_decoded(raw_query),
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
