mod support;

use std::collections::HashSet;
use std::time::Duration;

use devicelink::auth::device_code::{MAX_EXPIRES_IN_SECS, MAX_INTERVAL_SECS};
use devicelink::auth::{DeviceFlowInitiator, HttpTokenPoller, PollOutcome, TokenPoller};
use devicelink::config::ProviderEndpoints;
use devicelink::error::{AuthError, ErrorCode};
use devicelink::util::retry::RetryPolicy;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::client_id;

const DEVICE_PATH: &str = "/login/device/code";
const TOKEN_PATH: &str = "/login/oauth/access_token";

fn scopes() -> Vec<String> {
    vec!["public_repo".to_string(), "read:user".to_string()]
}

fn initiator(server: &MockServer) -> DeviceFlowInitiator {
    DeviceFlowInitiator::new(&ProviderEndpoints::with_base_url(&server.uri())).with_retry(
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: false,
        },
    )
}

async fn initiate_with(response: ResponseTemplate) -> Result<(), AuthError> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .respond_with(response)
        .mount(&server)
        .await;
    initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .map(|_| ())
}

#[tokio::test]
async fn initiate_success_returns_codes_and_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .and(header("accept", "application/json"))
        .and(body_string_contains("client_id=Iv1.0123456789abcdef"))
        .and(body_string_contains("scope=public_repo+read%3Auser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900,
            "interval": 7
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .expect("device code");

    assert_eq!(auth.device_code, "device-123");
    assert_eq!(auth.user_code, "ABCD-EFGH");
    assert_eq!(auth.verification_uri, "https://github.com/login/device");
    assert_eq!(auth.expires_in_secs, 900);
    assert_eq!(auth.poll_interval_secs, 7);
    assert!(auth.expires_at() > chrono::Utc::now());
}

#[tokio::test]
async fn missing_interval_defaults_to_five_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900
        })))
        .mount(&server)
        .await;

    let auth = initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .unwrap();
    assert_eq!(auth.poll_interval_secs, 5);
}

#[tokio::test]
async fn implausible_lifetime_is_malformed_response() {
    for expires_in in [json!(0), json!(10_000_000_000_000u64), json!(u64::MAX)] {
        let err = initiate_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://github.com/login/device",
            "expires_in": expires_in
        })))
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedResponse, "expires_in {expires_in}");
    }
}

#[tokio::test]
async fn huge_interval_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://github.com/login/device",
            "expires_in": MAX_EXPIRES_IN_SECS,
            "interval": u64::MAX
        })))
        .mount(&server)
        .await;

    let auth = initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .unwrap();
    assert_eq!(auth.poll_interval_secs, MAX_INTERVAL_SECS);
    assert!(auth.expires_at() > chrono::Utc::now() + chrono::Duration::hours(23));
}

#[tokio::test]
async fn disabled_device_flow_is_client_id_unauthorized() {
    let err = initiate_with(ResponseTemplate::new(400).set_body_json(json!({
        "error": "device_flow_disabled",
        "error_description": "Device Flow must be explicitly enabled for this App"
    })))
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ClientIdUnauthorized);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let err = initiate_with(
        ResponseTemplate::new(429)
            .insert_header("retry-after", "42")
            .set_body_string("slow down"),
    )
    .await
    .unwrap_err();
    match err {
        AuthError::RateLimited {
            status,
            retry_after_secs,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(retry_after_secs, Some(42));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_primary_rate_limit_on_403_is_rate_limited() {
    let err = initiate_with(
        ResponseTemplate::new(403)
            .insert_header("x-ratelimit-remaining", "0")
            .set_body_string("{}"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimited);
}

#[tokio::test]
async fn garbage_body_is_malformed_response() {
    let err = initiate_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedResponse);
}

#[tokio::test]
async fn empty_user_code_is_malformed_response() {
    let err = initiate_with(ResponseTemplate::new(200).set_body_json(json!({
        "device_code": "device-123",
        "user_code": "",
        "verification_uri": "https://github.com/login/device",
        "expires_in": 900
    })))
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedResponse);
}

#[tokio::test]
async fn unexpected_status_is_http_code_with_body() {
    let err = initiate_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Http(404));
    assert_eq!(err.code().to_string(), "HTTP_404");
    assert!(err.to_string().contains("Not Found"));
}

#[tokio::test]
async fn server_errors_are_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&server)
        .await;

    let err = initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Http(503));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let err = initiator(&server)
        .initiate(&client_id(), &scopes())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ClientIdUnauthorized);
}

#[tokio::test]
async fn unreachable_host_is_network_unreachable() {
    // Nothing listens on port 1.
    let endpoints = ProviderEndpoints::with_base_url("http://127.0.0.1:1");
    let err = DeviceFlowInitiator::new(&endpoints)
        .initiate(&client_id(), &scopes())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NetworkUnreachable);
}

#[tokio::test]
async fn every_initiation_failure_has_a_distinct_code() {
    let cases = [
        ResponseTemplate::new(400).set_body_json(json!({"error": "unauthorized_client"})),
        ResponseTemplate::new(429).set_body_string("{}"),
        ResponseTemplate::new(200).set_body_string("not json"),
        ResponseTemplate::new(418).set_body_string("teapot"),
    ];
    let mut codes = HashSet::new();
    for response in cases {
        codes.insert(initiate_with(response).await.unwrap_err().code());
    }
    let unreachable = DeviceFlowInitiator::new(&ProviderEndpoints::with_base_url("http://127.0.0.1:1"))
        .initiate(&client_id(), &scopes())
        .await
        .unwrap_err();
    codes.insert(unreachable.code());
    assert_eq!(codes.len(), 5, "codes collapsed: {codes:?}");
}

#[tokio::test]
async fn error_context_never_contains_device_code() {
    let err = initiate_with(ResponseTemplate::new(500).set_body_json(json!({
        "device_code": "leaky-device-code",
        "message": "internal"
    })))
    .await
    .unwrap_err();
    assert!(!err.to_string().contains("leaky-device-code"));
}

async fn poll_with(response: ResponseTemplate) -> Result<PollOutcome, AuthError> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code",
        ))
        .and(body_string_contains("device_code=dc-secret-3f9a"))
        .respond_with(response)
        .expect(1)
        .mount(&server)
        .await;
    HttpTokenPoller::new(&ProviderEndpoints::with_base_url(&server.uri()))
        .poll(&client_id(), support::DEVICE_CODE)
        .await
}

#[tokio::test]
async fn poll_pending_with_github_200() {
    let outcome = poll_with(
        ResponseTemplate::new(200).set_body_json(json!({"error": "authorization_pending"})),
    )
    .await
    .unwrap();
    assert_eq!(outcome, PollOutcome::Pending);
}

#[tokio::test]
async fn poll_pending_with_rfc_400() {
    let outcome = poll_with(
        ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
    )
    .await
    .unwrap();
    assert_eq!(outcome, PollOutcome::Pending);
}

#[tokio::test]
async fn poll_slow_down_carries_interval() {
    let outcome = poll_with(
        ResponseTemplate::new(200).set_body_json(json!({"error": "slow_down", "interval": 10})),
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        PollOutcome::SlowDown {
            interval_secs: Some(10)
        }
    );
}

#[tokio::test]
async fn poll_denied_and_expired() {
    let denied = poll_with(
        ResponseTemplate::new(200).set_body_json(json!({"error": "access_denied"})),
    )
    .await
    .unwrap();
    assert_eq!(denied, PollOutcome::Denied);

    let expired = poll_with(
        ResponseTemplate::new(400).set_body_json(json!({"error": "expired_token"})),
    )
    .await
    .unwrap();
    assert_eq!(expired, PollOutcome::Expired);
}

#[tokio::test]
async fn poll_success_returns_token() {
    let outcome = poll_with(ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "tok_abc",
        "token_type": "bearer",
        "scope": "public_repo,read:user"
    })))
    .await
    .unwrap();
    match outcome {
        PollOutcome::Authorized(token) => {
            assert_eq!(token.access_token, "tok_abc");
            assert_eq!(token.scopes(), vec!["public_repo", "read:user"]);
        }
        other => panic!("expected Authorized, got {other:?}"),
    }
}

#[tokio::test]
async fn poll_bad_client_credentials_is_client_id_unauthorized() {
    let err = poll_with(
        ResponseTemplate::new(200)
            .set_body_json(json!({"error": "incorrect_client_credentials"})),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ClientIdUnauthorized);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn poll_unknown_error_is_rejected_not_transient() {
    let err = poll_with(ResponseTemplate::new(400).set_body_json(json!({
        "error": "unsupported_grant_type",
        "error_description": "grant type not supported"
    })))
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TokenEndpointRejected);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn poll_gateway_error_is_transient() {
    let err = poll_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Http(502));
    assert!(err.is_transient());
}
