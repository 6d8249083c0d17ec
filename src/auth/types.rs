// Credential types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plaintext token pair, only ever held in server memory
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token material as issued by the provider at the end of the consent flow
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds; missing counts as already expired
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

/// Providers disagree on whether `expires_in` is a number or a numeric string
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Encrypted token pair as carried inside the session artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedTokenPair {
    pub access_token_cipher: String,
    pub refresh_token_cipher: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl EncryptedTokenPair {
    /// The exact boundary counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Error tag persisted in the session artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionErrorTag {
    RefreshAccessTokenError,
}

impl std::fmt::Display for SessionErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionErrorTag::RefreshAccessTokenError => write!(f, "RefreshAccessTokenError"),
        }
    }
}

/// Lifecycle state of a session's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Token pair just captured from the provider
    Issued,
    /// Access token present and not yet expired
    Valid,
    /// Expiry reached, refresh not yet attempted
    Expired,
    /// Refresh succeeded; the session is valid again
    Refreshed,
    /// Refresh failed; the stale access token must not be used
    RefreshFailed,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::Issued => "issued",
            CredentialState::Valid => "valid",
            CredentialState::Expired => "expired",
            CredentialState::Refreshed => "refreshed",
            CredentialState::RefreshFailed => "refresh_failed",
        }
    }
}

/// Refresh grant form body
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
}

/// Token endpoint response to a refresh grant
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
    /// Present only when the provider rotates refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Token data produced by a successful refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}
