//! Shared HTTP plumbing for the device-code and token endpoints.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;

use crate::error::AuthError;

const MAX_BODY_CONTEXT: usize = 512;
const SECRET_KEYS: &[&str] = &["device_code", "access_token", "refresh_token", "id_token"];

/// OAuth error codes meaning the application itself was refused.
const CLIENT_REJECTION_CODES: &[&str] = &[
    "unauthorized_client",
    "invalid_client",
    "incorrect_client_credentials",
    "device_flow_disabled",
];

/// Build the HTTP client used for provider calls.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("devicelink/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// A provider response: status, headers and raw body.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The OAuth `error` field, if the body is a JSON error object.
    pub fn oauth_error(&self) -> Option<(String, Option<String>)> {
        let value = self.json()?;
        let error = value.get("error")?.as_str()?.to_string();
        let description = value
            .get("error_description")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        Some((error, description))
    }
}

/// POST a form and collect the response. Transport failures map to
/// `NETWORK_UNREACHABLE` / `NETWORK_TIMEOUT`; any status is returned as-is.
pub async fn post_form(
    client: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<RawResponse, AuthError> {
    let resp = client
        .post(url)
        .header(ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(transport_error)?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.text().await.map_err(transport_error)?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn transport_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::NetworkTimeout(err.to_string())
    } else {
        AuthError::NetworkUnreachable(err.to_string())
    }
}

/// Map a non-success response to a distinct error kind.
pub fn classify_failure(resp: &RawResponse) -> AuthError {
    let status = resp.status.as_u16();
    let body = redact_body(&resp.body);

    if let Some((error, _)) = resp.oauth_error() {
        if CLIENT_REJECTION_CODES.contains(&error.as_str()) {
            return AuthError::ClientIdUnauthorized { status, body };
        }
    }

    if resp.status == StatusCode::TOO_MANY_REQUESTS || is_exhausted_rate_limit(resp) {
        return AuthError::RateLimited {
            status,
            retry_after_secs: retry_after_secs(&resp.headers),
            body,
        };
    }

    match resp.status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AuthError::ClientIdUnauthorized { status, body }
        }
        _ => AuthError::Http { status, body },
    }
}

fn is_exhausted_rate_limit(resp: &RawResponse) -> bool {
    resp.status == StatusCode::FORBIDDEN
        && resp
            .headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Strip secret fields from a response body and bound its length so it can
/// travel inside an error message or log line.
pub fn redact_body(body: &str) -> String {
    let text = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(mut value) => {
            redact_value(&mut value);
            value.to_string()
        }
        Err(_) => body.trim().to_string(),
    };
    truncate(&text, MAX_BODY_CONTEXT)
}

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    *inner = serde_json::Value::String("[redacted]".to_string());
                } else {
                    redact_value(inner);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
