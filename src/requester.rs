#![forbid(unsafe_code)]

//! Conversion request plumbing shared by the upstream adapters.
//!
//! The field names and headers are upstream specific and live in the
//! adapters; this module only knows how to send a request on the session and
//! turn whatever comes back into JSON.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::debug;
use ureq::Request;

use crate::error::{GrabError, GrabResult, describe_transport};
use crate::session::Session;

static BRACED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("braced json regex"));

/// Decoded body plus the status it came with.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// Parses a response body as JSON, falling back to the outermost `{...}` span
/// when the endpoint wraps its JSON in notices or markup.
pub fn decode_json_body(text: &str) -> GrabResult<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }
    let Some(span) = BRACED_JSON.find(text) else {
        return Err(GrabError::upstream(None, "response body is not JSON"));
    };
    serde_json::from_str::<Value>(span.as_str())
        .map_err(|err| GrabError::upstream(None, format!("malformed JSON in response: {err}")))
}

/// Sends a prepared request and decodes the body. Non-2xx answers become
/// [`GrabError::Upstream`] carrying the status.
pub fn send(request: Request, form: Option<&[(&str, &str)]>) -> GrabResult<UpstreamResponse> {
    let url = request.url().to_string();
    let result = match form {
        Some(fields) => request.send_form(fields),
        None => request.call(),
    };
    let response = result.map_err(|err| {
        let (status, message) = describe_transport(err);
        GrabError::upstream(status, format!("{url}: {message}"))
    })?;
    let status = response.status();
    let text = response
        .into_string()
        .map_err(|err| GrabError::upstream(Some(status), format!("reading body: {err}")))?;
    debug!(%url, status, bytes = text.len(), "upstream responded");
    let body = decode_json_body(&text)?;
    Ok(UpstreamResponse { status, body })
}

/// Form-encoded POST on the session.
pub fn post_form(
    session: &Session,
    url: &str,
    headers: &[(&str, &str)],
    form: &[(&str, &str)],
) -> GrabResult<UpstreamResponse> {
    let mut request = session.post(url, session.config().request_timeout);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    send(request, Some(form))
}

/// GET on the session with optional query parameters.
pub fn get_json(
    session: &Session,
    url: &str,
    headers: &[(&str, &str)],
    query: &[(&str, &str)],
) -> GrabResult<UpstreamResponse> {
    get_json_within(session, url, headers, query, session.config().request_timeout)
}

/// [`get_json`] with an explicit overall timeout.
pub fn get_json_within(
    session: &Session,
    url: &str,
    headers: &[(&str, &str)],
    query: &[(&str, &str)],
    timeout: Duration,
) -> GrabResult<UpstreamResponse> {
    let mut request = session.get(url, timeout);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    for (name, value) in query {
        request = request.query(name, value);
    }
    send(request, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_upstream;
    use axum::{Router, http::StatusCode, routing::get, routing::post};
    use serde_json::json;

    #[test]
    fn decodes_plain_json() {
        let value = decode_json_body(r#"{"ok": true}"#).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn extracts_json_wrapped_in_noise() {
        let text = "<br /><b>Notice</b>: undefined index\n{\"medias\": [{\"url\": \"x\"}]}\n<!-- cache -->";
        let value = decode_json_body(text).unwrap();
        assert_eq!(value["medias"][0]["url"], "x");
    }

    #[test]
    fn gives_up_on_text_without_json() {
        let err = decode_json_body("<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, GrabError::Upstream { status: None, .. }));
    }

    #[test]
    fn gives_up_on_broken_braces() {
        let err = decode_json_body("oops {not: json}").unwrap_err();
        assert!(err.to_string().contains("malformed JSON"));
    }

    #[test]
    fn post_form_sends_fields_and_headers() {
        let app = Router::new().route(
            "/ajax",
            post(
                |headers: axum::http::HeaderMap, body: String| async move {
                    let requested_with = headers
                        .get("x-requested-with")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    axum::Json(json!({ "body": body, "xrw": requested_with }))
                },
            ),
        );
        let base = spawn_upstream(app);
        let session = Session::default();
        let response = post_form(
            &session,
            &format!("{base}/ajax"),
            &[("X-Requested-With", "XMLHttpRequest")],
            &[("action", "get_info"), ("url", "https://a/b")],
        )
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["xrw"], "XMLHttpRequest");
        assert_eq!(
            response.body["body"],
            "action=get_info&url=https%3A%2F%2Fa%2Fb"
        );
    }

    #[test]
    fn error_status_surfaces_as_upstream_error() {
        let app = Router::new().route(
            "/info",
            get(|| async { (StatusCode::FORBIDDEN, "{\"error\": \"nope\"}") }),
        );
        let base = spawn_upstream(app);
        let err = get_json(&Session::default(), &format!("{base}/info"), &[], &[]).unwrap_err();
        assert!(matches!(
            err,
            GrabError::Upstream {
                status: Some(403),
                ..
            }
        ));
    }
}
