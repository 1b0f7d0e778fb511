//! Bearer-token validation against an external auth service.

use reqwest::{StatusCode, header};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token validation failed with status code: {}", .0.as_u16())]
    Rejected(StatusCode),
    #[error("authentication error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("authentication error: invalid user data: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Validates tokens by forwarding them to `auth_api_url`.
#[derive(Clone, Debug)]
pub struct AuthClient {
    http: reqwest::Client,
    auth_api_url: String,
}

impl AuthClient {
    pub fn new(auth_api_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            auth_api_url: auth_api_url.into(),
        })
    }

    pub fn auth_api_url(&self) -> &str {
        &self.auth_api_url
    }

    /// Check `token` (with or without a `Bearer ` prefix).
    ///
    /// A 200 response yields the service's user data; any other status or a
    /// transport failure is an error. Nothing here panics or retries.
    pub async fn validate_token(&self, token: &str) -> Result<Value, AuthError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let response = self
            .http
            .get(&self.auth_api_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!("auth service answered {}", status);
            return Err(AuthError::Rejected(status));
        }

        response.json::<Value>().await.map_err(AuthError::Decode)
    }

    /// User data for a valid token, `None` otherwise.
    pub async fn user_info(&self, token: &str) -> Option<Value> {
        self.validate_token(token).await.ok()
    }
}

/// Tenant carried in the auth service's user data (`tenantId`), if any.
pub fn tenant_id(user_data: &Value) -> Option<String> {
    user_data
        .get("tenantId")
        .and_then(Value::as_str)
        .filter(|tenant| !tenant.is_empty())
        .map(str::to_string)
}
