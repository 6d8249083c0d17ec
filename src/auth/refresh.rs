// Refresh grant against the provider token endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::codec::{CodecError, DecryptionError};
use super::types::{RefreshRequest, RefreshResponse, RefreshedToken};

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Maximum length for provider error bodies kept in errors and logs
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a refresh attempt did not produce a usable access token.
///
/// Every variant ends the session the same way; `kind()` tells them apart in logs.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Refresh token could not be decrypted: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("Refreshed token could not be encrypted: {0}")]
    Encryption(#[from] CodecError),

    #[error("Token endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Token endpoint rejected refresh: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint returned an unreadable response: {0}")]
    MalformedResponse(String),

    #[error("Token endpoint response does not contain access_token")]
    MissingAccessToken,
}

impl RefreshError {
    /// Short machine-readable kind for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::Decryption(_) => "decryption",
            RefreshError::Encryption(_) => "encryption",
            RefreshError::Transport(_) => "transport",
            RefreshError::Rejected { .. } => "rejected",
            RefreshError::MalformedResponse(_) => "malformed_response",
            RefreshError::MissingAccessToken => "missing_access_token",
        }
    }
}

/// Exchanges a refresh token for a new access token.
///
/// Implementations make exactly one attempt; retrying is up to whoever
/// calls again on a later request.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError>;
}

/// Build the token endpoint URL from the configured base URL
pub fn token_endpoint_url(base_url: &str) -> String {
    format!("{}/token", base_url.trim_end_matches('/'))
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Refresher that POSTs a form-encoded refresh grant over HTTP
pub struct HttpTokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenRefresher {
    pub fn new(
        token_endpoint_base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client for token refresh")?;

        Ok(Self {
            client,
            token_url: token_endpoint_url(token_endpoint_base_url),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        tracing::info!(url = %self.token_url, "Refreshing access token");

        let form = RefreshRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "refresh_token",
            refresh_token,
        };

        let response = self
            .client
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await
            .map_err(RefreshError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            // OAuth2 error bodies carry error / error_description
            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
                if let Some(error_code) = error_json.get("error").and_then(|v| v.as_str()) {
                    tracing::warn!(
                        status = %status,
                        error = error_code,
                        description = error_json
                            .get("error_description")
                            .and_then(|v| v.as_str())
                            .unwrap_or(""),
                        "Token endpoint rejected refresh"
                    );
                }
            }

            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&error_text),
            });
        }

        let body = response.text().await.map_err(RefreshError::Transport)?;
        let data: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

        let access_token = match data.access_token {
            Some(token) if !token.is_empty() => token,
            _ => return Err(RefreshError::MissingAccessToken),
        };

        let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        tracing::info!(expires_in, "Access token refreshed");

        Ok(RefreshedToken {
            access_token,
            expires_in,
            refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
        })
    }
}
