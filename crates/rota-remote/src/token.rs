//! Bearer credentials with caching.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{RemoteError, require};

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where API clients get their bearer token.
pub enum TokenSource {
    /// A long-lived token from configuration.
    Static(String),
    /// OAuth client-credentials grant, cached until shortly before expiry.
    ClientCredentials(ClientCredentials),
}

pub struct ClientCredentials {
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    3600
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.debug_tuple("Static").field(&"[REDACTED]").finish(),
            Self::ClientCredentials(credentials) => f
                .debug_struct("ClientCredentials")
                .field("token_url", &credentials.token_url)
                .field("client_id", &credentials.client_id)
                .field("client_secret", &"[REDACTED]")
                .finish_non_exhaustive(),
        }
    }
}

impl TokenSource {
    pub fn fixed(token: impl Into<String>) -> Result<Self, RemoteError> {
        let token = token.into();
        require(&token, "token cannot be empty")?;
        Ok(Self::Static(token))
    }

    pub fn client_credentials(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let token_url = token_url.into();
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        require(&token_url, "token URL cannot be empty")?;
        require(&client_id, "client id cannot be empty")?;
        require(&client_secret, "client secret cannot be empty")?;
        Ok(Self::ClientCredentials(ClientCredentials {
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }))
    }

    /// Current bearer token, fetching a new one when the cache is stale.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String, RemoteError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ClientCredentials(credentials) => credentials.bearer(http).await,
        }
    }

    /// Drops a cached token the server rejected.
    pub async fn invalidate(&self) {
        if let Self::ClientCredentials(credentials) = self {
            credentials.cached.lock().await.take();
        }
    }
}

impl ClientCredentials {
    async fn bearer(&self, http: &reqwest::Client) -> Result<String, RemoteError> {
        // Held across the fetch so concurrent callers share one refresh.
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let response = http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .query(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Unauthorized {
                message: format!("token endpoint returned {status}"),
            });
        }
        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;
        tracing::debug!(expires_in = payload.expires_in, "fetched access token");

        let value = payload.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(payload.expires_in),
        });
        Ok(value)
    }
}
