//! Gateway dispatcher: resolves an incoming request against a project's
//! route table and shapes the function's return value into an HTTP
//! response.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::error::{DaemonError, Result};
use crate::gateway::compiler::find_match;
use crate::invoke::GatewayContext;
use crate::router::AppState;
use crate::types::InvocationStatus;

/// Builds the HTTP event object passed to the function as `INPUT_JSON`.
fn build_event(
    method: &Method,
    matched_path: &str,
    params: Vec<(String, String)>,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    content_type: Option<&str>,
) -> Value {
    let params_obj: serde_json::Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let mut query_obj = serde_json::Map::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            query_obj.insert(
                urlencoding_decode(key),
                Value::String(urlencoding_decode(value)),
            );
        }
    }

    let mut headers_obj = serde_json::Map::new();
    for (name, value) in headers.iter() {
        if let Ok(value_str) = value.to_str() {
            headers_obj.insert(name.as_str().to_lowercase(), Value::String(value_str.to_string()));
        }
    }

    let body_value = parse_body(body, content_type);

    json!({
        "method": method.as_str(),
        "path": matched_path,
        "params": Value::Object(params_obj),
        "query": Value::Object(query_obj),
        "headers": Value::Object(headers_obj),
        "body": body_value,
    })
}

/// Parses the request body into the function's `body` field: JSON if
/// `Content-Type` says so and the bytes actually parse, otherwise raw text
/// if the bytes are valid non-empty UTF-8, otherwise `null`. A JSON-labeled
/// body that fails to parse falls through to the text branch rather than
/// going straight to `null`.
fn parse_body(body: &[u8], content_type: Option<&str>) -> Value {
    let claims_json = content_type
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    if claims_json {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return value;
        }
    }

    if body.is_empty() {
        return Value::Null;
    }

    match std::str::from_utf8(body) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::Null,
    }
}

/// Minimal percent-decoding for query string keys/values; the gateway only
/// needs to decode `%xx` triples and `+`, not a full URL-parsing crate.
fn urlencoding_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut bytes = input.bytes().peekable();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{}{}", hi as char, lo as char), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
                out.push('%');
            }
            other => out.push(other as char),
        }
    }
    out
}

/// Shapes a function's return value into the dispatcher's HTTP response.
///
/// Header entries are validated as proper header name/value pairs and
/// skipped (never panicked on) if a function emits something the `http`
/// crate rejects (e.g. a name/value containing `\n`). If the function
/// already set its own `Content-Type`, the `text/plain`/`application/json`
/// default is not appended on top of it.
fn shape_response(output: Value) -> Response {
    if let Value::Object(ref map) = output {
        if map.contains_key("statusCode") || map.contains_key("headers") || map.contains_key("body") {
            let status_code = map
                .get("statusCode")
                .and_then(Value::as_u64)
                .unwrap_or(200) as u16;
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::OK);

            let mut builder = Response::builder().status(status);
            let mut has_content_type = false;
            if let Some(Value::Object(headers)) = map.get("headers") {
                for (name, value) in headers {
                    let Some(value_str) = value.as_str() else {
                        continue;
                    };
                    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                        continue;
                    };
                    let Ok(header_value) = HeaderValue::from_str(value_str) else {
                        continue;
                    };
                    if header_name == axum::http::header::CONTENT_TYPE {
                        has_content_type = true;
                    }
                    builder = builder.header(header_name, header_value);
                }
            }

            let body = map.get("body").cloned().unwrap_or(Value::Null);
            let (default_content_type, body) = match body {
                Value::String(text) => ("text/plain", axum::body::Body::from(text)),
                other => ("application/json", axum::body::Body::from(other.to_string())),
            };
            if !has_content_type {
                builder = builder.header("content-type", default_content_type);
            }

            return builder.body(body).unwrap_or_else(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("invalid response headers: {e}"),
                )
                    .into_response()
            });
        }
    }

    (StatusCode::OK, axum::Json(output)).into_response()
}

/// Splits `/gateway/<slug>[/<rest>]` into the project slug and the match
/// target. The leading `/gateway` prefix is stripped by the router mount
/// point, so `uri_path` here starts at the slug.
fn split_slug_and_rest(uri_path: &str) -> (String, String) {
    let trimmed = uri_path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((slug, rest)) if !rest.is_empty() => (slug.to_string(), format!("/{rest}")),
        Some((slug, _)) => (slug.to_string(), "/".to_string()),
        None => (trimmed.to_string(), "/".to_string()),
    }
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    // Body size is capped by `RequestBodyLimitLayer` in `router::build_router`
    // (scoped to the gateway routes), not re-checked here.
    let mount_stripped = uri.path().strip_prefix("/gateway").unwrap_or(uri.path());
    let (slug, matched_path) = split_slug_and_rest(mount_stripped);

    let project = state
        .db
        .get_project_by_slug(&slug)
        .await?
        .ok_or_else(|| DaemonError::NotFound(format!("no project with slug {slug}")))?;

    let path_segments: Vec<&str> = matched_path.split('/').filter(|s| !s.is_empty()).collect();

    let compiled = state.route_cache.get(&state.db, &project.id).await?;
    let (matched, params) = find_match(&compiled, &method, &path_segments)
        .ok_or_else(|| DaemonError::NotFound("no matching route".to_string()))?;

    let function = state
        .db
        .get_function(&matched.route.function_id)
        .await?
        .ok_or_else(|| DaemonError::NotFound("function for route not found".to_string()))?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let event = build_event(
        &method,
        &matched_path,
        params,
        query.as_deref(),
        &headers,
        &body,
        content_type,
    );

    // Spawned rather than awaited inline: a dropped client connection drops
    // this handler's future, but the spawned task still runs the container
    // to completion and records the Invocation (§5 client-cancellation
    // semantics — only the response is discarded).
    let engine = state.engine.clone();
    let gateway_method = method.as_str().to_string();
    let gateway_path = matched_path.clone();
    let outcome = tokio::spawn(async move {
        engine
            .invoke(
                &function,
                event,
                Some(GatewayContext {
                    method: gateway_method,
                    path: gateway_path,
                }),
            )
            .await
    })
    .await
    .map_err(|e| DaemonError::Internal(format!("invocation task panicked: {e}")))??;

    match outcome.status {
        InvocationStatus::Success => Ok(shape_response(outcome.output.unwrap_or(Value::Null))),
        InvocationStatus::Timeout => Ok((
            StatusCode::GATEWAY_TIMEOUT,
            axum::Json(json!({ "error": outcome.error.unwrap_or_default() })),
        )
            .into_response()),
        InvocationStatus::Error => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({ "error": outcome.error.unwrap_or_default() })),
        )
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_slug_and_rest_handles_bare_slug() {
        assert_eq!(split_slug_and_rest("/api"), ("api".to_string(), "/".to_string()));
    }

    #[test]
    fn split_slug_and_rest_handles_nested_path() {
        assert_eq!(
            split_slug_and_rest("/api/users/me"),
            ("api".to_string(), "/users/me".to_string())
        );
    }

    #[test]
    fn urlencoding_decode_handles_plus_and_percent() {
        assert_eq!(urlencoding_decode("a+b%20c"), "a b c");
        assert_eq!(urlencoding_decode("plain"), "plain");
    }

    #[test]
    fn build_event_lowercases_header_names_and_parses_json_body() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Trace-Id", "abc".parse().unwrap());
        let event = build_event(
            &Method::GET,
            "/widgets/42",
            vec![("id".to_string(), "42".to_string())],
            Some("page=2&page=3"),
            &headers,
            br#"{"n":1}"#,
            Some("application/json"),
        );
        assert_eq!(event["headers"]["x-trace-id"], "abc");
        assert_eq!(event["query"]["page"], "3");
        assert_eq!(event["body"], json!({"n": 1}));
        assert_eq!(event["params"]["id"], "42");
    }

    #[test]
    fn shape_response_defaults_to_200_json_for_bare_values() {
        let response = shape_response(json!({"echo": 1}));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn shape_response_honors_explicit_status_code() {
        let response = shape_response(json!({"statusCode": 201, "body": {"id": 1}}));
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn shape_response_does_not_duplicate_explicit_content_type() {
        let response = shape_response(json!({
            "headers": {"content-type": "text/csv"},
            "body": "a,b,c",
        }));
        let values: Vec<_> = response
            .headers()
            .get_all(axum::http::header::CONTENT_TYPE)
            .iter()
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "text/csv");
    }

    #[test]
    fn shape_response_skips_invalid_header_entries_without_panicking() {
        let response = shape_response(json!({
            "headers": {"x-bad\nname": "v", "x-ok": "fine"},
            "body": "hi",
        }));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ok").unwrap(), "fine");
    }

    #[test]
    fn parse_body_falls_back_to_text_when_json_labeled_body_is_invalid() {
        let value = parse_body(b"not json", Some("application/json"));
        assert_eq!(value, Value::String("not json".to_string()));
    }

    #[test]
    fn parse_body_is_null_for_empty_body() {
        assert_eq!(parse_body(b"", Some("application/json")), Value::Null);
        assert_eq!(parse_body(b"", None), Value::Null);
    }

    #[test]
    fn parse_body_parses_valid_json() {
        assert_eq!(parse_body(br#"{"n":1}"#, Some("application/json")), json!({"n": 1}));
    }
}
