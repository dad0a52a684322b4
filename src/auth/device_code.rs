//! OAuth 2.0 Device Authorization Grant (RFC 8628) client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::http::{build_client, classify_failure, post_form, redact_body, RawResponse};
use super::token::StoredToken;
use crate::config::{ClientId, ProviderEndpoints};
use crate::error::AuthError;
use crate::util::retry::RetryPolicy;

/// RFC 8628 §3.2 default polling interval.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// RFC 8628 §3.5 increment applied on `slow_down`.
pub const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// Longest poll interval honored, whatever the provider asks for.
pub const MAX_INTERVAL_SECS: u64 = 15 * 60;

/// Device codes claiming a longer lifetime are rejected as malformed.
pub const MAX_EXPIRES_IN_SECS: u64 = 24 * 60 * 60;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Result of a device-code request. Lives in memory only.
///
/// `device_code` is the polling secret; it is redacted from `Debug` output
/// and never written to the state file or log.
#[derive(Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in_secs: u64,
    pub poll_interval_secs: u64,
    pub issued_at: DateTime<Utc>,
}

impl DeviceAuthorization {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = self.expires_in_secs.min(MAX_EXPIRES_IN_SECS) as i64;
        self.issued_at
            .checked_add_signed(chrono::Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Debug for DeviceAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuthorization")
            .field("device_code", &"[redacted]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in_secs", &self.expires_in_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

/// Starts device flows against the provider's device-code endpoint.
pub struct DeviceFlowInitiator {
    client: reqwest::Client,
    device_code_url: String,
    retry: RetryPolicy,
}

impl DeviceFlowInitiator {
    pub fn new(endpoints: &ProviderEndpoints) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            device_code_url: endpoints.device_code_url.clone(),
            retry: RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Request a device code. One POST; only provider-side 5xx responses
    /// are retried, connection failures surface immediately.
    pub async fn initiate(
        &self,
        client_id: &ClientId,
        scopes: &[String],
    ) -> Result<DeviceAuthorization, AuthError> {
        let scope = scopes.join(" ");
        let form = [("client_id", client_id.as_str()), ("scope", scope.as_str())];

        let client = &self.client;
        let url = self.device_code_url.as_str();
        let form = &form;

        let resp = self
            .retry
            .execute(is_server_error, move || async move {
                let resp = post_form(client, url, form).await?;
                if resp.status.is_success() {
                    Ok(resp)
                } else {
                    Err(classify_failure(&resp))
                }
            })
            .await
            .map_err(|err| {
                tracing::warn!(code = %err.code(), client_id = %client_id, "Device code request failed");
                err
            })?;

        let authorization = parse_device_code(&resp)?;
        tracing::info!(
            client_id = %client_id,
            user_code = %authorization.user_code,
            expires_in = authorization.expires_in_secs,
            interval = authorization.poll_interval_secs,
            "Device flow initiated"
        );
        Ok(authorization)
    }
}

fn is_server_error(err: &AuthError) -> bool {
    matches!(err, AuthError::Http { status, .. } if *status >= 500)
}

fn parse_device_code(resp: &RawResponse) -> Result<DeviceAuthorization, AuthError> {
    let status = resp.status.as_u16();

    // Some providers answer 200 with an OAuth error object.
    if resp.oauth_error().is_some() {
        return Err(classify_failure(resp));
    }

    let payload: DeviceCodeResponse =
        serde_json::from_str(&resp.body).map_err(|err| AuthError::MalformedResponse {
            status,
            message: format!("{err}; body: {}", redact_body(&resp.body)),
        })?;

    if payload.device_code.is_empty() || payload.user_code.is_empty() {
        return Err(AuthError::MalformedResponse {
            status,
            message: "device_code or user_code is empty".to_string(),
        });
    }
    if payload.expires_in == 0 || payload.expires_in > MAX_EXPIRES_IN_SECS {
        return Err(AuthError::MalformedResponse {
            status,
            message: format!(
                "expires_in {} outside 1..={MAX_EXPIRES_IN_SECS}",
                payload.expires_in
            ),
        });
    }

    Ok(DeviceAuthorization {
        device_code: payload.device_code,
        user_code: payload.user_code,
        verification_uri: payload.verification_uri,
        expires_in_secs: payload.expires_in,
        poll_interval_secs: payload
            .interval
            .filter(|i| *i > 0)
            .unwrap_or(DEFAULT_INTERVAL_SECS)
            .min(MAX_INTERVAL_SECS),
        issued_at: Utc::now(),
    })
}

/// Outcome of one token-endpoint poll. Protocol states, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    /// Provider asked to back off; `interval_secs` is its suggestion, if any.
    SlowDown { interval_secs: Option<u64> },
    Authorized(StoredToken),
    Denied,
    Expired,
}

/// One poll of the token endpoint.
#[async_trait]
pub trait TokenPoller: Send + Sync {
    async fn poll(&self, client_id: &ClientId, device_code: &str)
        -> Result<PollOutcome, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    interval: Option<u64>,
}

/// [`TokenPoller`] backed by the provider's token endpoint.
pub struct HttpTokenPoller {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenPoller {
    pub fn new(endpoints: &ProviderEndpoints) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            token_url: endpoints.token_url.clone(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl TokenPoller for HttpTokenPoller {
    async fn poll(
        &self,
        client_id: &ClientId,
        device_code: &str,
    ) -> Result<PollOutcome, AuthError> {
        let resp = post_form(
            &self.client,
            &self.token_url,
            &[
                ("client_id", client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", DEVICE_GRANT_TYPE),
            ],
        )
        .await?;

        // RFC 8628 answers pending/denied with 400; GitHub uses 200. Both
        // carry the same JSON, so inspect the body before the status.
        let payload = match serde_json::from_str::<TokenResponse>(&resp.body) {
            Ok(payload) if payload.access_token.is_some() || payload.error.is_some() => payload,
            _ if !resp.status.is_success() => return Err(classify_failure(&resp)),
            _ => {
                return Err(AuthError::MalformedResponse {
                    status: resp.status.as_u16(),
                    message: format!(
                        "token response has neither access_token nor error; body: {}",
                        redact_body(&resp.body)
                    ),
                })
            }
        };

        if let Some(access_token) = payload.access_token.filter(|t| !t.is_empty()) {
            return Ok(PollOutcome::Authorized(StoredToken::new(
                access_token,
                payload.token_type.unwrap_or_else(|| "bearer".to_string()),
                payload.scope.unwrap_or_default(),
            )));
        }

        match payload.error.as_deref() {
            Some("authorization_pending") => Ok(PollOutcome::Pending),
            Some("slow_down") => Ok(PollOutcome::SlowDown {
                interval_secs: payload.interval,
            }),
            Some("access_denied") => Ok(PollOutcome::Denied),
            Some("expired_token") => Ok(PollOutcome::Expired),
            Some(_) if resp.status.as_u16() >= 500 || resp.status.as_u16() == 429 => {
                Err(classify_failure(&resp))
            }
            Some(other) => {
                if let err @ AuthError::ClientIdUnauthorized { .. } = classify_failure(&resp) {
                    return Err(err);
                }
                Err(AuthError::TokenEndpointRejected {
                    error: other.to_string(),
                    description: payload.error_description,
                })
            }
            None => Err(AuthError::MalformedResponse {
                status: resp.status.as_u16(),
                message: "empty access_token".to_string(),
            }),
        }
    }
}

/// Next poll interval after a `slow_down`: never lower than the current one,
/// never above [`MAX_INTERVAL_SECS`].
pub fn slowed_interval(current_secs: u64, suggested_secs: Option<u64>) -> u64 {
    let bumped = current_secs.saturating_add(SLOW_DOWN_INCREMENT_SECS);
    bumped
        .max(suggested_secs.unwrap_or(0))
        .min(MAX_INTERVAL_SECS)
}
