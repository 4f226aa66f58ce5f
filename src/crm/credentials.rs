use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_derive::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::CrmError;

/// Refresh when the cached token has less than this left.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, CrmError>;
}

/// Token issued out of band, e.g. from the developer console.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String, CrmError> {
        if self.0.is_empty() {
            return Err(CrmError::Auth("no access token configured".to_string()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    access_token: Option<String>,
    expires_at: Option<Instant>,
    refresh_token: String,
}

impl TokenState {
    fn current(&self) -> Option<&str> {
        let expires_at = self.expires_at?;
        if expires_at.saturating_duration_since(Instant::now()) < REFRESH_MARGIN {
            return None;
        }
        self.access_token.as_deref()
    }
}

/// OAuth2 refresh-token grant. Tokens live in memory only; a rotated refresh
/// token replaces the configured one for the life of the process.
pub struct RefreshingToken {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<TokenState>,
}

impl RefreshingToken {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            state: Mutex::new(TokenState {
                access_token: None,
                expires_at: None,
                refresh_token: refresh_token.into(),
            }),
        }
    }

    #[tracing::instrument(skip(self, state))]
    async fn refresh(&self, state: &mut TokenState) -> Result<String, CrmError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Error refreshing token: {} {}", status, body);
            return Err(CrmError::Auth(format!("token endpoint returned {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CrmError::Parse(e.to_string()))?;

        let expires_in = Duration::from_secs(token.expires_in.unwrap_or(3600));
        info!(
            "Token refreshed, new expiration is in {} seconds",
            expires_in.as_secs()
        );

        if let Some(rotated) = token.refresh_token {
            state.refresh_token = rotated;
        }
        state.expires_at = Some(Instant::now() + expires_in);
        state.access_token = Some(token.access_token.clone());
        Ok(token.access_token)
    }
}

#[async_trait]
impl CredentialProvider for RefreshingToken {
    async fn access_token(&self) -> Result<String, CrmError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.current() {
            return Ok(token.to_string());
        }
        self.refresh(&mut state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturedRequest, spawn_mock_server};
    use axum::Router;
    use axum::routing::post;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").access_token().await.unwrap(), "abc");
        assert!(matches!(
            StaticToken::new("").access_token().await,
            Err(CrmError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_caches_and_rotates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bodies: Arc<Mutex<Vec<CapturedRequest>>> = Arc::default();
        let (c, b) = (calls.clone(), bodies.clone());
        let app = Router::new().route(
            "/token",
            post(move |req: axum::extract::Request| {
                let (c, b) = (c.clone(), b.clone());
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    b.lock().await.push(CapturedRequest::read(req).await);
                    axum::Json(json!({
                        "access_token": format!("at_{n}"),
                        "expires_in": 3600,
                        "refresh_token": format!("rt_{n}")
                    }))
                }
            }),
        );
        let base = spawn_mock_server(app).await;

        let provider = RefreshingToken::new(
            Client::new(),
            format!("{base}/token"),
            "app",
            "secret",
            "rt_initial",
        );

        assert_eq!(provider.access_token().await.unwrap(), "at_0");
        assert_eq!(provider.access_token().await.unwrap(), "at_0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let bodies = bodies.lock().await;
        assert!(bodies[0].body.contains("grant_type=refresh_token"));
        assert!(bodies[0].body.contains("refresh_token=rt_initial"));
        assert!(bodies[0].header("authorization").unwrap().starts_with("Basic "));
        drop(bodies);

        assert_eq!(provider.state.lock().await.refresh_token, "rt_0");
    }

    #[tokio::test]
    async fn test_refresh_near_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let app = Router::new().route(
            "/token",
            post(move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    // Shorter than the refresh margin, so every call refreshes.
                    axum::Json(json!({"access_token": format!("at_{n}"), "expires_in": 30}))
                }
            }),
        );
        let base = spawn_mock_server(app).await;
        let provider =
            RefreshingToken::new(Client::new(), format!("{base}/token"), "app", "s", "rt");

        assert_eq!(provider.access_token().await.unwrap(), "at_0");
        assert_eq!(provider.access_token().await.unwrap(), "at_1");
        assert_eq!(provider.state.lock().await.refresh_token, "rt");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_error() {
        let app = Router::new().route(
            "/token",
            post(|| async { (axum::http::StatusCode::BAD_REQUEST, "invalid_grant") }),
        );
        let base = spawn_mock_server(app).await;
        let provider =
            RefreshingToken::new(Client::new(), format!("{base}/token"), "app", "s", "rt");

        assert!(matches!(
            provider.access_token().await,
            Err(CrmError::Auth(_))
        ));
    }
}
