use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use wolf_config::ServiceAccountCredential;
use wolf_core::{current_unix_timestamp, is_expired_unix, truncate_for_error};

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: u64 = 3_600;
const REFRESH_SKEW_SECONDS: u64 = 60;

/// Supplies bearer tokens for Drive requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed bearer token, mainly for tests and pre-minted tokens.
#[derive(Clone)]
pub struct StaticAccessToken(String);

impl StaticAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticAccessToken([REDACTED])")
    }
}

#[async_trait]
impl AccessTokenSource for StaticAccessToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_unix: u64,
}

/// Exchanges a signed service-account assertion for OAuth access tokens and
/// caches each token until shortly before it expires.
pub struct ServiceAccountTokenSource {
    http: reqwest::Client,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(credential: &ServiceAccountCredential, request_timeout: Duration) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(credential.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM key")?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()
            .context("failed to create oauth token client")?;
        Ok(Self {
            http,
            client_email: credential.client_email.clone(),
            token_uri: credential.token_uri.clone(),
            signing_key,
            cached: Mutex::new(None),
        })
    }

    fn signed_assertion(&self, now: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now.saturating_add(ASSERTION_LIFETIME_SECONDS),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("failed to sign service account assertion")
    }

    async fn exchange(&self, now: u64) -> Result<CachedToken> {
        let assertion = self.signed_assertion(now)?;
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("oauth token request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "oauth token exchange failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 400)
            );
        }
        let parsed = response
            .json::<TokenResponse>()
            .await
            .context("failed to decode oauth token response")?;
        let lifetime = parsed.expires_in.unwrap_or(ASSERTION_LIFETIME_SECONDS);
        tracing::debug!(client_email = %self.client_email, lifetime, "minted drive access token");
        Ok(CachedToken {
            token: parsed.access_token,
            expires_unix: now.saturating_add(lifetime),
        })
    }
}

impl fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = current_unix_timestamp();
        if let Some(token) = cached.as_ref() {
            let refresh_at = token.expires_unix.saturating_sub(REFRESH_SKEW_SECONDS);
            if !is_expired_unix(Some(refresh_at), now) {
                return Ok(token.token.clone());
            }
        }
        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
