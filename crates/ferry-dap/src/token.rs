//! Signed debug token verification.
//!
//! Tokens are compact JWTs signed with Ed25519 (`header.payload.signature`,
//! base64url without padding). A token binds one payload, the launched code or
//! an evaluated expression, through a truncated SHA-256 hash carried in its
//! claims. The public key comes from a JWKS document and is cached until
//! explicitly invalidated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use ferry_config::AuthConfig;

/// Bytes of the SHA-256 digest kept in token claims.
const HASH_PREFIX_BYTES: usize = 16;

const JWKS_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Debug token required. Please provide a valid debug session token.")]
    Missing,
    #[error("Invalid JWT format")]
    Format,
    #[error("Invalid JWT signature")]
    Signature,
    #[error("Token expired: {0} seconds ago")]
    Expired(i64),
    #[error("{0} hash mismatch - payload was modified after signing")]
    HashMismatch(TokenKind),
    #[error("Token is missing the {0} hash claim")]
    MissingHash(TokenKind),
    #[error("Invalid JWT claims: {0}")]
    Claims(String),
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),
}

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Launching a script; binds `code_hash`.
    Launch,
    /// Evaluating an expression; binds `expression_hash`.
    Evaluate,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TokenKind::Launch => "Code",
            TokenKind::Evaluate => "Expression",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    pub exp: i64,
    #[serde(default)]
    pub code_hash: Option<String>,
    #[serde(default)]
    pub expression_hash: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl Claims {
    fn hash_for(&self, kind: TokenKind) -> Option<&str> {
        match kind {
            TokenKind::Launch => self.code_hash.as_deref(),
            TokenKind::Evaluate => self.expression_hash.as_deref(),
        }
    }
}

/// Lowercase hex of the first 16 bytes of `SHA-256(payload)`.
pub fn payload_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(&digest[..HASH_PREFIX_BYTES])
}

#[derive(Debug, Deserialize)]
struct Jwks {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kty: String,
    #[serde(default)]
    crv: String,
    #[serde(default)]
    x: String,
}

fn key_from_jwks(jwks: Jwks) -> Result<VerifyingKey, TokenError> {
    let jwk = jwks
        .keys
        .into_iter()
        .find(|key| key.kty == "OKP" && key.crv == "Ed25519")
        .ok_or_else(|| TokenError::KeyUnavailable("JWKS has no Ed25519 key".to_owned()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(jwk.x.trim_end_matches('='))
        .map_err(|err| TokenError::KeyUnavailable(format!("invalid key encoding: {err}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TokenError::KeyUnavailable("Ed25519 key must be 32 bytes".to_owned()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|err| TokenError::KeyUnavailable(format!("invalid Ed25519 key: {err}")))
}

#[derive(Debug, Clone)]
pub enum KeySource {
    Jwks { url: Url, http: reqwest::Client },
    Static(VerifyingKey),
}

type KeyFetch = Shared<BoxFuture<'static, Result<VerifyingKey, TokenError>>>;

/// Process-wide public key cache.
///
/// At most one fetch is in flight; concurrent callers await the same one.
/// Failed fetches are not cached.
pub struct KeyCache {
    source: KeySource,
    cached: RwLock<Option<VerifyingKey>>,
    in_flight: Mutex<Option<KeyFetch>>,
    fetches: Arc<AtomicUsize>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("source", &self.source)
            .field("cached", &self.cached.read().is_some())
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    pub fn new(source: KeySource) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            in_flight: Mutex::new(None),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn jwks(url: Url, http: reqwest::Client) -> Self {
        Self::new(KeySource::Jwks { url, http })
    }

    /// The verification key, fetching it on first use.
    pub async fn get(&self) -> Result<VerifyingKey, TokenError> {
        if let Some(key) = self.cached.read().clone() {
            return Ok(key);
        }

        let fetch = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = fetch_key(self.source.clone(), self.fetches.clone())
                        .boxed()
                        .shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;
        {
            let mut slot = self.in_flight.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&fetch)) {
                *slot = None;
            }
        }
        if let Ok(key) = &result {
            *self.cached.write() = Some(key.clone());
        }
        result
    }

    /// Drop the cached key; the next [`KeyCache::get`] fetches again.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

async fn fetch_key(source: KeySource, fetches: Arc<AtomicUsize>) -> Result<VerifyingKey, TokenError> {
    fetches.fetch_add(1, Ordering::Relaxed);
    match source {
        KeySource::Static(key) => Ok(key),
        KeySource::Jwks { url, http } => {
            tracing::debug!(target: "ferry.dap", %url, "fetching token signing key");
            let unavailable = |err: reqwest::Error| TokenError::KeyUnavailable(err.to_string());
            let response = http.get(url.clone()).send().await.map_err(unavailable)?;
            let status = response.status();
            if !status.is_success() {
                return Err(TokenError::KeyUnavailable(format!(
                    "JWKS endpoint {url} returned {status}"
                )));
            }
            let jwks: Jwks = response.json().await.map_err(unavailable)?;
            let key = key_from_jwks(jwks)?;
            tracing::info!(target: "ferry.dap", %url, "token signing key loaded");
            Ok(key)
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Check signature and expiry of a compact token; returns its claims.
pub fn decode_token(token: &str, key: &VerifyingKey, now: i64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Format);
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Format)?;
    let signature = Signature::from_slice(&signature).map_err(|_| TokenError::Signature)?;
    let signed = format!("{header}.{payload}");
    key.verify(signed.as_bytes(), &signature)
        .map_err(|_| TokenError::Signature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Format)?;
    let claims: Claims =
        serde_json::from_slice(&payload).map_err(|err| TokenError::Claims(err.to_string()))?;

    if claims.exp < now {
        return Err(TokenError::Expired(now - claims.exp));
    }
    Ok(claims)
}

/// Gatekeeper for launches and evaluations.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: Option<Arc<KeyCache>>,
    require_signed: bool,
}

impl TokenVerifier {
    pub fn new(keys: Option<Arc<KeyCache>>, require_signed: bool) -> Self {
        Self {
            keys,
            require_signed,
        }
    }

    /// Build the verifier described by the `[auth]` configuration.
    pub fn from_config(auth: &AuthConfig) -> Result<Self, reqwest::Error> {
        let keys = match auth.jwks_url() {
            Some(url) => {
                let http = reqwest::Client::builder()
                    .timeout(JWKS_FETCH_TIMEOUT)
                    .build()?;
                Some(Arc::new(KeyCache::jwks(url, http)))
            }
            None => None,
        };
        if auth.require_signed_requests && keys.is_none() {
            tracing::warn!(
                target: "ferry.dap",
                "signed requests are required but no base URL is configured; every code launch will be rejected"
            );
        }
        Ok(Self::new(keys, auth.require_signed_requests))
    }

    /// A verifier that accepts every launch.
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    pub fn requires_signed_requests(&self) -> bool {
        self.require_signed
    }

    pub async fn verify(&self, token: &str, payload: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        self.verify_at(token, payload, kind, unix_now()).await
    }

    pub async fn verify_at(
        &self,
        token: &str,
        payload: &str,
        kind: TokenKind,
        now: i64,
    ) -> Result<Claims, TokenError> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            TokenError::KeyUnavailable("no signing key source configured".to_owned())
        })?;
        let key = keys.get().await?;
        let claims = decode_token(token, &key, now)?;

        let expected = claims
            .hash_for(kind)
            .ok_or(TokenError::MissingHash(kind))?;
        if expected != payload_hash(payload) {
            return Err(TokenError::HashMismatch(kind));
        }
        Ok(claims)
    }

    /// Decide whether `code` may be launched.
    pub async fn authorize_launch(&self, token: Option<&str>, code: &str) -> Result<(), TokenError> {
        if !self.require_signed {
            tracing::warn!(
                target: "ferry.dap",
                "signed debug requests are disabled; launching without token verification"
            );
            return Ok(());
        }
        let token = token.filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;
        let claims = self.verify(token, code, TokenKind::Launch).await?;
        tracing::info!(
            target: "ferry.dap",
            email = claims.email.as_deref().unwrap_or("-"),
            workspace_id = claims.workspace_id.as_deref().unwrap_or("-"),
            job_id = claims.job_id.as_deref().unwrap_or("-"),
            "debug launch authorized"
        );
        Ok(())
    }

    /// Record an evaluation attempt. Never blocks the evaluation.
    pub async fn audit_expression(&self, token: Option<&str>, expression: &str) {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::debug!(target: "ferry.dap", "evaluate request without token");
            return;
        };
        match self.verify(token, expression, TokenKind::Evaluate).await {
            Ok(claims) => tracing::info!(
                target: "ferry.dap",
                email = claims.email.as_deref().unwrap_or("-"),
                workspace_id = claims.workspace_id.as_deref().unwrap_or("-"),
                "expression evaluation audited"
            ),
            Err(err) => tracing::warn!(
                target: "ferry.dap",
                error = %err,
                "expression token did not verify; evaluating anyway"
            ),
        }
    }
}
