//! Client-credentials token acquisition.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{InvocationError, Result};

/// Tokens are refreshed this long before the issuer says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Source of short-lived bearer tokens for outbound calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire_token(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    valid_until: Instant,
}

/// OAuth2 client-credentials exchange against a token endpoint.
pub struct ClientCredentialsProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| InvocationError::AuthenticationFailed(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(InvocationError::AuthenticationFailed(format!(
                "token endpoint returned {status}"
            )));
        }

        resp.json::<TokenResponse>().await.map_err(|e| {
            InvocationError::AuthenticationFailed(format!("token response parse failed: {e}"))
        })
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn acquire_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            if Instant::now() < c.valid_until {
                return Ok(c.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        debug!(expires_in = ?fresh.expires_in, "Acquired access token");

        *cached = fresh.expires_in.map(|secs| CachedToken {
            token: fresh.access_token.clone(),
            valid_until: Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN),
        });
        Ok(fresh.access_token)
    }
}
