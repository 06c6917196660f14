use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use ferry_dap::token::payload_hash;
use ferry_dap::{KeyCache, KeySource, TokenVerifier};
use ferry_inspector::mock::MockInspector;
use serde_json::{json, Value};

use crate::harness::{bun_like, launch_args, session_config, RuntimeScript, TestClient};

const CODE: &str = "console.log('signed');\n";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn sign(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signed = format!("{header}.{payload}");
    let signature = signing_key().sign(signed.as_bytes());
    format!("{signed}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

fn client() -> TestClient {
    let keys = KeyCache::new(KeySource::Static(signing_key().verifying_key()));
    let mut config = session_config();
    config.verifier = Arc::new(TokenVerifier::new(Some(Arc::new(keys)), true));
    TestClient::start(config)
}

/// Launch `CODE`; the mock is returned so the runtime connection outlives the call.
async fn launch_with_token(
    client: &mut TestClient,
    token: Option<String>,
) -> (ferry_dap::dap::Response, MockInspector) {
    let mock = bun_like(RuntimeScript::default()).await;
    client.initialize().await;
    let mut args = launch_args(&mock, CODE);
    if let Some(token) = token {
        args["token"] = json!(token);
    }
    let response = client.request("launch", args).await;
    if !response.success {
        client.settle(Duration::from_millis(200)).await;
        assert!(mock.calls().is_empty(), "runtime must not start");
    }
    (response, mock)
}

#[tokio::test]
async fn valid_token_allows_launch() {
    let token = sign(json!({
        "exp": now() + 300,
        "code_hash": payload_hash(CODE),
        "email": "dev@example.com",
        "workspace_id": "ws-1",
    }));
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, Some(token)).await;
    assert!(response.success, "{:?}", response.message);
    client.event("stopped").await;
}

#[tokio::test]
async fn missing_token_is_rejected_without_terminating() {
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, None).await;
    assert!(!response.success);
    assert_eq!(
        response.message.as_deref(),
        Some("Debug token required. Please provide a valid debug session token.")
    );
    assert!(client.events_named("terminated").is_empty());

    // A rejected launch does not count as launched.
    let stack = client.request("stackTrace", json!({"threadId": 1})).await;
    assert_eq!(stack.message.as_deref(), Some("not launched"));
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let token = sign(json!({"exp": now() - 120, "code_hash": payload_hash(CODE)}));
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, Some(token)).await;
    assert!(!response.success);
    let message = response.message.unwrap();
    assert!(message.starts_with("Token expired: "), "{message}");
    assert!(client.events_named("terminated").is_empty());
}

#[tokio::test]
async fn token_for_other_code_is_rejected() {
    let token = sign(json!({"exp": now() + 300, "code_hash": payload_hash("console.log('other');\n")}));
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, Some(token)).await;
    assert_eq!(
        response.message.as_deref(),
        Some("Code hash mismatch - payload was modified after signing")
    );
}

#[tokio::test]
async fn garbage_token_is_a_format_error() {
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, Some("not-a-jwt".to_owned())).await;
    assert_eq!(response.message.as_deref(), Some("Invalid JWT format"));
}

#[tokio::test]
async fn unverifiable_evaluate_token_still_evaluates() {
    let launch_token = sign(json!({"exp": now() + 300, "code_hash": payload_hash(CODE)}));
    let mut client = client();
    let (response, _mock) = launch_with_token(&mut client, Some(launch_token)).await;
    assert!(response.success);
    client.event("stopped").await;

    let response = client
        .request("evaluate", json!({"expression": "1 + 1", "frameId": 1, "token": "bogus"}))
        .await;
    assert!(response.success);
}
