//! First-match-wins endpoint selection.

use crate::config::Endpoint;
use crate::error::{Result, StubError};
use crate::matcher::{match_request, MatchContext};
use crate::request::StubRequest;
use tracing::{debug, info};

/// The endpoint chosen for a request.
#[derive(Debug)]
pub struct Selection<'a> {
    pub endpoint: &'a Endpoint,
    /// Unrendered response template
    pub response_body: String,
    pub context: MatchContext,
}

/// Return the first endpoint, in the given order, whose method, path, query,
/// header and body predicates all hold.
///
/// Each visited endpoint has its response body resolved before it is
/// matched, so an endpoint without a body (or with an unreadable body file)
/// aborts the whole selection even if a later endpoint would match.
pub fn select<'a>(endpoints: &'a [Endpoint], request: &StubRequest) -> Result<Selection<'a>> {
    for endpoint in endpoints {
        let response_body = endpoint.response.load_body(&endpoint.name)?;

        match match_request(&endpoint.request, request)? {
            Some(context) => {
                info!(endpoint = %endpoint.name, method = %request.method, path = %request.path, "Matched endpoint");
                return Ok(Selection {
                    endpoint,
                    response_body,
                    context,
                });
            }
            None => debug!(endpoint = %endpoint.name, "Endpoint did not match"),
        }
    }
    Err(StubError::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn endpoints(json: &str) -> Vec<Endpoint> {
        serde_json::from_str(json).unwrap()
    }

    fn get(path: &str) -> StubRequest {
        StubRequest::new("GET", path, None, vec![], b"").unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let endpoints = endpoints(
            r#"[
                {"name": "specific", "request": {"method": "GET", "urlPath": "/users/me"}, "response": {"body": "me"}},
                {"name": "catch-all", "request": {"method": "GET", "urlPathPattern": "^/users/"}, "response": {"body": "any"}},
                {"name": "also-specific", "request": {"method": "GET", "urlPath": "/users/me"}, "response": {"body": "never"}}
            ]"#,
        );

        let selection = select(&endpoints, &get("/users/me")).unwrap();
        assert_eq!(selection.endpoint.name, "specific");
        assert_eq!(selection.response_body, "me");

        let selection = select(&endpoints, &get("/users/other")).unwrap();
        assert_eq!(selection.endpoint.name, "catch-all");
    }

    #[test]
    fn test_no_match() {
        let endpoints = endpoints(
            r#"[{"name": "a", "request": {"method": "POST", "url": "/a"}, "response": {"body": "x"}}]"#,
        );
        assert!(matches!(select(&endpoints, &get("/a")), Err(StubError::NoMatch)));
        assert!(matches!(select(&[], &get("/a")), Err(StubError::NoMatch)));
    }

    #[test]
    fn test_missing_body_aborts_selection() {
        let endpoints = endpoints(
            r#"[
                {"name": "no-body", "request": {"method": "GET", "url": "/other"}, "response": {"status": 204}},
                {"name": "good", "request": {"method": "GET", "url": "/a"}, "response": {"body": "x"}}
            ]"#,
        );
        assert!(matches!(
            select(&endpoints, &get("/a")),
            Err(StubError::MissingResponseBody { endpoint }) if endpoint == "no-body"
        ));
    }

    #[test]
    fn test_endpoints_after_the_match_are_not_visited() {
        let endpoints = endpoints(
            r#"[
                {"name": "good", "request": {"method": "GET", "url": "/a"}, "response": {"body": "x"}},
                {"name": "no-body", "request": {"method": "GET", "url": "/a"}, "response": {}}
            ]"#,
        );
        assert_eq!(select(&endpoints, &get("/a")).unwrap().endpoint.name, "good");
    }

    #[test]
    fn test_endpoint_without_response_fails_only_when_reached() {
        let endpoints = endpoints(
            r#"[
                {"name": "good", "request": {"method": "GET", "url": "/a"}, "response": {"body": "x"}},
                {"name": "no-response", "request": {"method": "GET", "url": "/b"}}
            ]"#,
        );
        assert_eq!(select(&endpoints, &get("/a")).unwrap().endpoint.name, "good");
        assert!(matches!(
            select(&endpoints, &get("/b")),
            Err(StubError::MissingResponseBody { endpoint }) if endpoint == "no-response"
        ));
    }

    #[test]
    fn test_body_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"id\": \"{{{{.Path.id}}}}\"}}").unwrap();

        let endpoint = Endpoint {
            name: "file".to_string(),
            description: String::new(),
            request: serde_json::from_str(
                r#"{"method": "GET", "urlPathTemplate": "/items/{id}", "pathParameters": {"id": {}}}"#,
            )
            .unwrap(),
            response: serde_json::from_value(serde_json::json!({
                "bodyFileName": file.path().to_string_lossy(),
                "body": "ignored"
            }))
            .unwrap(),
        };

        let endpoints = vec![endpoint];
        let selection = select(&endpoints, &get("/items/5")).unwrap();
        assert_eq!(selection.response_body, r#"{"id": "{{.Path.id}}"}"#);
        assert_eq!(selection.context.path_params["id"], "5");
    }

    #[test]
    fn test_invalid_pattern_propagates() {
        let endpoints = endpoints(
            r#"[{"name": "bad", "request": {"method": "GET", "url": "/a", "body": {"matches": "("}}, "response": {"body": "x"}}]"#,
        );
        assert!(matches!(
            select(&endpoints, &get("/a")),
            Err(StubError::InvalidPattern { .. })
        ));
    }
}
