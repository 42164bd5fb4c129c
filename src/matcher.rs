//! Request matching logic.
//!
//! Evaluates [`Matcher`] predicates against single values and applies them
//! to the path, query, headers and body of a [`StubRequest`].

use crate::config::{Matcher, RequestSpec, UrlMatch};
use crate::error::{Result, StubError};
use crate::request::{QueryValues, StubRequest};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::error;

/// Values captured while matching, exposed to response templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchContext {
    /// Path parameters extracted from template matching
    pub path_params: HashMap<String, String>,
    /// First value of every decoded query parameter
    pub query_params: HashMap<String, String>,
}

/// Compile a configured regex. Nothing is cached: patterns are compiled
/// each time they are evaluated.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| StubError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Matcher {
    /// Check every configured predicate against `observed`.
    ///
    /// Regex predicates search for a match anywhere in the value; anchor
    /// the pattern to match the whole value.
    pub fn evaluate(&self, observed: &str) -> Result<bool> {
        if let Some(expected) = &self.equal_to {
            if observed != expected.to_string() {
                return Ok(false);
            }
        }
        if let Some(pattern) = &self.matches {
            if !compile_pattern(&pattern.to_string())?.is_match(observed) {
                return Ok(false);
            }
        }
        if let Some(pattern) = &self.does_not_match {
            if compile_pattern(&pattern.to_string())?.is_match(observed) {
                return Ok(false);
            }
        }
        if let Some(needle) = &self.contains {
            if !observed.contains(needle.to_string().as_str()) {
                return Ok(false);
            }
        }
        if let Some(needle) = &self.does_not_contain {
            if observed.contains(needle.to_string().as_str()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Match the request path against the endpoint's URL strategy.
///
/// Trailing slashes are ignored on both sides. Returns the extracted path
/// parameters on a match (always empty for non-template strategies).
pub fn resolve_path(
    spec: &RequestSpec,
    raw_path: &str,
    path: &str,
) -> Result<Option<HashMap<String, String>>> {
    let raw_path = raw_path.trim_end_matches('/');
    let path = path.trim_end_matches('/');

    let matched = match &spec.url {
        None => false,
        Some(UrlMatch::Url(url)) => raw_path == url.trim_end_matches('/'),
        Some(UrlMatch::UrlPattern(pattern)) => {
            compile_pattern(pattern.trim_end_matches('/'))?.is_match(raw_path)
        }
        Some(UrlMatch::UrlPath(url)) => path == url.trim_end_matches('/'),
        Some(UrlMatch::UrlPathPattern(pattern)) => {
            compile_pattern(pattern.trim_end_matches('/'))?.is_match(path)
        }
        Some(UrlMatch::UrlPathTemplate(template)) => {
            return match_template(template.trim_end_matches('/'), path, &spec.path_parameters);
        }
    };

    Ok(matched.then(HashMap::new))
}

fn match_template(
    template: &str,
    path: &str,
    parameters: &BTreeMap<String, Matcher>,
) -> Result<Option<HashMap<String, String>>> {
    let expected: Vec<&str> = template.split('/').collect();
    let actual: Vec<&str> = path.split('/').collect();
    if expected.len() != actual.len() {
        return Ok(None);
    }

    // placeholder name -> segment index
    let mut positions = HashMap::with_capacity(parameters.len());
    for name in parameters.keys() {
        let placeholder = format!("{{{}}}", name);
        match expected.iter().position(|segment| *segment == placeholder) {
            Some(index) => {
                positions.insert(name.as_str(), index);
            }
            None => {
                error!(parameter = %name, template = %template, "Path parameter not found in template");
                return Ok(None);
            }
        }
    }

    for (name, matcher) in parameters {
        if !matcher.evaluate(actual[positions[name.as_str()]])? {
            return Ok(None);
        }
    }

    Ok(Some(
        positions
            .into_iter()
            .map(|(name, index)| (name.to_string(), actual[index].to_string()))
            .collect(),
    ))
}

/// Check declared query parameters against the raw (undecoded) values.
///
/// A missing parameter is checked as the empty string. On a match the
/// first decoded value of every query key is returned, declared or not.
pub fn match_query(
    spec: &RequestSpec,
    raw: &QueryValues,
    decoded: &QueryValues,
) -> Result<Option<HashMap<String, String>>> {
    for (name, matcher) in &spec.query_parameters {
        if !matcher.evaluate(raw.first(name).unwrap_or(""))? {
            return Ok(None);
        }
    }
    Ok(Some(decoded.first_values()))
}

/// Check declared headers; a missing header is checked as the empty string.
pub fn match_headers(spec: &RequestSpec, request: &StubRequest) -> Result<bool> {
    for (name, matcher) in &spec.headers {
        if !matcher.evaluate(request.header(name).unwrap_or(""))? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn match_body(spec: &RequestSpec, body: &str) -> Result<bool> {
    spec.body.evaluate(body)
}

/// Conjoin method, path, query, header and body checks for one endpoint.
pub fn match_request(spec: &RequestSpec, request: &StubRequest) -> Result<Option<MatchContext>> {
    if request.method != spec.method {
        return Ok(None);
    }

    let Some(path_params) = resolve_path(spec, &request.raw_path, &request.path)? else {
        return Ok(None);
    };

    let Some(query_params) = match_query(spec, &request.raw_query, &request.query)? else {
        return Ok(None);
    };

    if !match_headers(spec, request)? {
        return Ok(None);
    }

    if !match_body(spec, &request.body)? {
        return Ok(None);
    }

    Ok(Some(MatchContext {
        path_params,
        query_params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scalar;

    fn matcher(json: &str) -> Matcher {
        serde_json::from_str(json).unwrap()
    }

    fn spec(json: &str) -> RequestSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_empty_matcher_accepts_anything() {
        let m = Matcher::default();
        assert!(m.is_empty());
        for value in ["", "anything", "{{}}", "日本語"] {
            assert!(m.evaluate(value).unwrap());
        }
    }

    #[test]
    fn test_equal_to() {
        let m = matcher(r#"{"equalTo": "123"}"#);
        assert!(m.evaluate("123").unwrap());
        assert!(!m.evaluate("1234").unwrap());

        let numeric = matcher(r#"{"equalTo": 123}"#);
        assert!(numeric.evaluate("123").unwrap());

        let boolean = Matcher {
            equal_to: Some(Scalar::Bool(true)),
            ..Default::default()
        };
        assert!(boolean.evaluate("true").unwrap());
    }

    #[test]
    fn test_matches_and_does_not_match() {
        let m = matcher(r#"{"matches": "^\\d{5}$"}"#);
        let not = matcher(r#"{"doesNotMatch": "^\\d{5}$"}"#);
        for (value, expected) in [("12345", true), ("1234", false), ("123456", false)] {
            assert_eq!(m.evaluate(value).unwrap(), expected, "matches {}", value);
            assert_eq!(not.evaluate(value).unwrap(), !expected, "doesNotMatch {}", value);
        }

        // Unanchored patterns search anywhere in the value
        let search = matcher(r#"{"matches": "b+"}"#);
        assert!(search.evaluate("abbbc").unwrap());
    }

    #[test]
    fn test_contains_ignores_regex_metacharacters() {
        let m = matcher(r#"{"contains": "a.b*"}"#);
        assert!(m.evaluate("xa.b*y").unwrap());
        assert!(!m.evaluate("aXbbb").unwrap());

        let not = matcher(r#"{"doesNotContain": "(x)"}"#);
        assert!(not.evaluate("x").unwrap());
        assert!(!not.evaluate("a(x)b").unwrap());
    }

    #[test]
    fn test_all_predicates_are_conjoined() {
        let m = matcher(
            r#"{"matches": "^user-", "doesNotMatch": "admin", "contains": "-", "doesNotContain": "root"}"#,
        );
        assert!(m.evaluate("user-42").unwrap());
        assert!(!m.evaluate("user-admin").unwrap());
        assert!(!m.evaluate("user-root").unwrap());
        assert!(!m.evaluate("guest-1").unwrap());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let m = matcher(r#"{"matches": "(unclosed"}"#);
        assert!(matches!(
            m.evaluate("x"),
            Err(StubError::InvalidPattern { pattern, .. }) if pattern == "(unclosed"
        ));
    }

    #[test]
    fn test_url_strategies() {
        let url = spec(r#"{"url": "/path"}"#);
        assert!(resolve_path(&url, "/path/", "/path/").unwrap().is_some());
        assert!(resolve_path(&url, "/path", "/path").unwrap().is_some());
        assert!(resolve_path(&url, "/path/sub", "/path/sub").unwrap().is_none());

        // `url` compares the raw path, `urlPath` the decoded one
        let raw = spec(r#"{"url": "/a%20b"}"#);
        assert!(resolve_path(&raw, "/a%20b", "/a b").unwrap().is_some());
        let decoded = spec(r#"{"urlPath": "/a b/"}"#);
        assert!(resolve_path(&decoded, "/a%20b", "/a b").unwrap().is_some());
        assert!(resolve_path(&decoded, "/a%20b", "/a%20b").unwrap().is_none());

        let pattern = spec(r#"{"urlPattern": "^/[a-zA-Z0-9]{3}$"}"#);
        assert!(resolve_path(&pattern, "/aA0/", "").unwrap().is_some());
        assert!(resolve_path(&pattern, "/aA01/", "").unwrap().is_none());

        let path_pattern = spec(r#"{"urlPathPattern": "^/[a-zA-Z0-9]{3}$"}"#);
        assert!(resolve_path(&path_pattern, "", "/aA0/").unwrap().is_some());
        assert!(resolve_path(&path_pattern, "", "/aA0a/").unwrap().is_none());

        let none = spec(r#"{"method": "GET"}"#);
        assert!(resolve_path(&none, "/", "/").unwrap().is_none());
    }

    #[test]
    fn test_invalid_url_pattern_is_an_error() {
        let pattern = spec(r#"{"urlPathPattern": "[a-"}"#);
        assert!(matches!(
            resolve_path(&pattern, "/x", "/x"),
            Err(StubError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_template_extracts_declared_parameters() {
        let users = spec(
            r#"{"urlPathTemplate": "/users/{id}", "pathParameters": {"id": {"equalTo": "42"}}}"#,
        );
        let params = resolve_path(&users, "/users/42", "/users/42").unwrap().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["id"], "42");

        assert!(resolve_path(&users, "/users/43", "/users/43").unwrap().is_none());
        assert!(resolve_path(&users, "/users/42/x", "/users/42/x").unwrap().is_none());
    }

    #[test]
    fn test_template_captures_unconstrained_parameters() {
        let two = spec(
            r#"{
                "urlPathTemplate": "/path/{param1}/{param2}/",
                "pathParameters": {"param1": {"matches": "^\\d+$"}, "param2": {}}
            }"#,
        );
        let params = resolve_path(&two, "", "/path/12345/abcde/").unwrap().unwrap();
        assert_eq!(params["param1"], "12345");
        assert_eq!(params["param2"], "abcde");

        assert!(resolve_path(&two, "", "/path/12a/abcde").unwrap().is_none());
    }

    #[test]
    fn test_template_only_checks_segment_count_and_placeholders() {
        let users = spec(
            r#"{"urlPathTemplate": "/users/{id}", "pathParameters": {"id": {"equalTo": "1"}}}"#,
        );
        let params = resolve_path(&users, "", "/orders/1").unwrap().unwrap();
        assert_eq!(params["id"], "1");
        assert!(resolve_path(&users, "", "/orders/2").unwrap().is_none());

        // Undeclared placeholders match any segment but are not extracted
        let loose = spec(r#"{"urlPathTemplate": "/users/{id}"}"#);
        let params = resolve_path(&loose, "", "/users/anything").unwrap().unwrap();
        assert!(params.is_empty());
        assert!(resolve_path(&loose, "", "/users/a/b").unwrap().is_none());
    }

    #[test]
    fn test_template_with_missing_placeholder_never_matches() {
        let broken = spec(r#"{"urlPathTemplate": "/users/{id}", "pathParameters": {"name": {}}}"#);
        assert!(resolve_path(&broken, "", "/users/1").unwrap().is_none());
    }

    #[test]
    fn test_query_uses_raw_values_but_returns_decoded() {
        let spec = spec(r#"{"queryParameters": {"q": {"equalTo": "a b"}}}"#);
        let raw = QueryValues::parse_raw("q=a%20b&other=x%2By").unwrap();
        let decoded = QueryValues::parse_decoded("q=a%20b&other=x%2By");
        assert!(match_query(&spec, &raw, &decoded).unwrap().is_none());

        let spec_raw: RequestSpec =
            serde_json::from_str(r#"{"queryParameters": {"q": {"equalTo": "a%20b"}}}"#).unwrap();
        let values = match_query(&spec_raw, &raw, &decoded).unwrap().unwrap();
        assert_eq!(values["q"], "a b");
        assert_eq!(values["other"], "x+y");
    }

    #[test]
    fn test_query_missing_key_is_empty_string() {
        let absent = spec(r#"{"queryParameters": {"page": {"doesNotMatch": "."}}}"#);
        let empty = QueryValues::default();
        assert!(match_query(&absent, &empty, &empty).unwrap().is_some());

        let required = spec(r#"{"queryParameters": {"page": {"matches": "^\\d+$"}}}"#);
        assert!(match_query(&required, &empty, &empty).unwrap().is_none());
    }

    #[test]
    fn test_headers() {
        let spec = spec(r#"{"headers": {"Authorization": {"matches": "^Bearer "}}}"#);
        let request = StubRequest::new(
            "GET",
            "/",
            None,
            vec![
                ("authorization".to_string(), "Bearer token".to_string()),
                ("Authorization".to_string(), "Basic xyz".to_string()),
                ("X-Ignored".to_string(), "1".to_string()),
            ],
            b"",
        )
        .unwrap();
        assert!(match_headers(&spec, &request).unwrap());

        let anonymous = StubRequest::new("GET", "/", None, vec![], b"").unwrap();
        assert!(!match_headers(&spec, &anonymous).unwrap());
    }

    #[test]
    fn test_body() {
        let spec = spec(r#"{"body": {"contains": "\"name\"", "doesNotContain": "password"}}"#);
        assert!(match_body(&spec, r#"{"name": "John"}"#).unwrap());
        assert!(!match_body(&spec, r#"{"name": "John", "password": "x"}"#).unwrap());
        assert!(!match_body(&spec, "").unwrap());
    }

    #[test]
    fn test_match_request_conjoins_all_facets() {
        let spec = spec(
            r#"{
                "method": "POST",
                "urlPathTemplate": "/orders/{id}",
                "pathParameters": {"id": {"matches": "^[0-9]+$"}},
                "queryParameters": {"dry": {"equalTo": "true"}},
                "headers": {"Content-Type": {"contains": "json"}},
                "body": {"matches": "\"qty\":\\s*\\d+"}
            }"#,
        );
        let build = |method: &str, path: &str, query: &str, body: &str| {
            StubRequest::new(
                method,
                path,
                Some(query),
                vec![("content-type".to_string(), "application/json".to_string())],
                body.as_bytes(),
            )
            .unwrap()
        };

        let ok = build("POST", "/orders/7", "dry=true&page=2", r#"{"qty": 3}"#);
        let context = match_request(&spec, &ok).unwrap().unwrap();
        assert_eq!(context.path_params["id"], "7");
        assert_eq!(context.query_params["page"], "2");

        assert!(match_request(&spec, &build("GET", "/orders/7", "dry=true", r#"{"qty": 3}"#))
            .unwrap()
            .is_none());
        assert!(match_request(&spec, &build("POST", "/orders/x", "dry=true", r#"{"qty": 3}"#))
            .unwrap()
            .is_none());
        assert!(match_request(&spec, &build("POST", "/orders/7", "dry=false", r#"{"qty": 3}"#))
            .unwrap()
            .is_none());
        assert!(match_request(&spec, &build("POST", "/orders/7", "dry=true", "{}"))
            .unwrap()
            .is_none());
    }
}
