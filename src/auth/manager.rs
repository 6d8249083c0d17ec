use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;

use super::codec::{CodecError, DecryptionError, TokenCodec};
use super::refresh::{RefreshError, TokenRefresher};
use super::types::{
    CredentialState, EncryptedTokenPair, ProviderTokens, RefreshedToken, SessionErrorTag,
};

/// Upper bound on a provider-reported token lifetime (10 years)
const MAX_EXPIRES_IN_SECS: u64 = 10 * 365 * 24 * 3600;

/// Result of running the lifecycle for one request
#[derive(Debug)]
pub enum RequestOutcome {
    /// Access token still valid; the stored pair is returned untouched
    Valid {
        stored: EncryptedTokenPair,
        access_token: String,
    },
    /// Access token was expired and has been replaced
    Refreshed {
        stored: EncryptedTokenPair,
        access_token: String,
    },
    /// Refresh did not succeed; the stored pair is returned untouched and
    /// the caller must re-authenticate
    RefreshFailed {
        stored: EncryptedTokenPair,
        error: SessionErrorTag,
        reason: RefreshError,
    },
}

impl RequestOutcome {
    pub fn state(&self) -> CredentialState {
        match self {
            RequestOutcome::Valid { .. } => CredentialState::Valid,
            RequestOutcome::Refreshed { .. } => CredentialState::Refreshed,
            RequestOutcome::RefreshFailed { .. } => CredentialState::RefreshFailed,
        }
    }

    pub fn stored(&self) -> &EncryptedTokenPair {
        match self {
            RequestOutcome::Valid { stored, .. }
            | RequestOutcome::Refreshed { stored, .. }
            | RequestOutcome::RefreshFailed { stored, .. } => stored,
        }
    }

    /// Usable plaintext access token, never present after a failed refresh
    pub fn access_token(&self) -> Option<&str> {
        match self {
            RequestOutcome::Valid { access_token, .. }
            | RequestOutcome::Refreshed { access_token, .. } => Some(access_token),
            RequestOutcome::RefreshFailed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<SessionErrorTag> {
        match self {
            RequestOutcome::RefreshFailed { error, .. } => Some(*error),
            _ => None,
        }
    }
}

/// Credential lifecycle manager
///
/// Holds no per-session state: every call works purely from the encrypted
/// pair it is handed, so concurrent requests carrying the same stale session
/// each refresh independently.
#[derive(Clone)]
pub struct CredentialManager {
    codec: TokenCodec,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialManager {
    pub fn new(codec: TokenCodec, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { codec, refresher }
    }

    #[cfg(test)]
    pub(crate) fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Capture the provider's initial tokens at login
    pub fn on_login(&self, tokens: &ProviderTokens) -> Result<EncryptedTokenPair, CodecError> {
        self.on_login_at(tokens, now_millis())
    }

    pub fn on_login_at(
        &self,
        tokens: &ProviderTokens,
        now: DateTime<Utc>,
    ) -> Result<EncryptedTokenPair, CodecError> {
        let expires_at = expires_after(now, tokens.expires_in.unwrap_or(0));

        let stored = EncryptedTokenPair {
            access_token_cipher: self.codec.encrypt(&tokens.access_token)?,
            refresh_token_cipher: self.codec.encrypt(&tokens.refresh_token)?,
            expires_at,
        };

        tracing::info!(
            state = CredentialState::Issued.as_str(),
            expires_at = %expires_at.to_rfc3339(),
            "Captured provider tokens"
        );

        Ok(stored)
    }

    /// Hand back a valid access token for the stored pair, refreshing first
    /// when it has expired.
    ///
    /// Fails only when the access token of a still-valid pair cannot be
    /// decrypted; every refresh-path failure is a [`RequestOutcome::RefreshFailed`].
    pub async fn on_request(
        &self,
        stored: EncryptedTokenPair,
    ) -> Result<RequestOutcome, DecryptionError> {
        self.on_request_at(stored, now_millis()).await
    }

    pub async fn on_request_at(
        &self,
        stored: EncryptedTokenPair,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome, DecryptionError> {
        if !stored.is_expired_at(now) {
            let access_token = self.codec.decrypt(&stored.access_token_cipher)?;
            tracing::debug!(
                state = CredentialState::Valid.as_str(),
                expires_at = %stored.expires_at.to_rfc3339(),
                "Access token still valid"
            );
            return Ok(RequestOutcome::Valid {
                stored,
                access_token,
            });
        }

        tracing::debug!(
            state = CredentialState::Expired.as_str(),
            expired_at = %stored.expires_at.to_rfc3339(),
            "Access token expired, attempting refresh"
        );

        match self.refresh(&stored, now).await {
            Ok((refreshed, access_token)) => {
                tracing::info!(
                    state = CredentialState::Refreshed.as_str(),
                    expires_at = %refreshed.expires_at.to_rfc3339(),
                    "Session credentials refreshed"
                );
                Ok(RequestOutcome::Refreshed {
                    stored: refreshed,
                    access_token,
                })
            }
            Err(reason) => {
                tracing::warn!(
                    state = CredentialState::RefreshFailed.as_str(),
                    kind = reason.kind(),
                    error = %reason,
                    "Failed to refresh access token"
                );
                Ok(RequestOutcome::RefreshFailed {
                    stored,
                    error: SessionErrorTag::RefreshAccessTokenError,
                    reason,
                })
            }
        }
    }

    /// Decrypt a stored pair without touching expiry
    #[cfg(test)]
    pub(crate) fn open(
        &self,
        stored: &EncryptedTokenPair,
    ) -> Result<super::types::TokenPair, DecryptionError> {
        Ok(super::types::TokenPair {
            access_token: self.codec.decrypt(&stored.access_token_cipher)?,
            refresh_token: self.codec.decrypt(&stored.refresh_token_cipher)?,
            expires_at: stored.expires_at,
        })
    }

    async fn refresh(
        &self,
        stored: &EncryptedTokenPair,
        now: DateTime<Utc>,
    ) -> Result<(EncryptedTokenPair, String), RefreshError> {
        let refresh_token = self.codec.decrypt(&stored.refresh_token_cipher)?;

        let RefreshedToken {
            access_token,
            expires_in,
            refresh_token: rotated,
        } = self.refresher.refresh(&refresh_token).await?;

        let refresh_token_cipher = match rotated {
            Some(token) => self.codec.encrypt(&token)?,
            None => stored.refresh_token_cipher.clone(),
        };

        let refreshed = EncryptedTokenPair {
            access_token_cipher: self.codec.encrypt(&access_token)?,
            refresh_token_cipher,
            expires_at: expires_after(now, expires_in),
        };

        Ok((refreshed, access_token))
    }
}

/// Current time at the millisecond precision the session artifact keeps
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn expires_after(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let secs = expires_in.min(MAX_EXPIRES_IN_SECS) as i64;
    now + Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum StubReply {
        Succeed(RefreshedToken),
        Reject(u16),
    }

    struct StubRefresher {
        reply: StubReply,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl StubRefresher {
        fn new(reply: StubReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for StubRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_string());
            match &self.reply {
                StubReply::Succeed(token) => Ok(token.clone()),
                StubReply::Reject(status) => Err(RefreshError::Rejected {
                    status: *status,
                    body: r#"{"error":"invalid_grant"}"#.to_string(),
                }),
            }
        }
    }

    fn succeed_with(access_token: &str, expires_in: u64) -> Arc<StubRefresher> {
        StubRefresher::new(StubReply::Succeed(RefreshedToken {
            access_token: access_token.to_string(),
            expires_in,
            refresh_token: None,
        }))
    }

    fn manager(refresher: Arc<StubRefresher>) -> CredentialManager {
        let codec = TokenCodec::new("lifecycle-test-secret-value").unwrap();
        CredentialManager::new(codec, refresher)
    }

    fn login_tokens(expires_in: Option<u64>) -> ProviderTokens {
        ProviderTokens {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_in,
        }
    }

    #[test]
    fn test_login_capture() {
        let manager = manager(succeed_with("unused", 0));
        let now = now_millis();

        let stored = manager.on_login_at(&login_tokens(Some(3600)), now).unwrap();
        let pair = manager.open(&stored).unwrap();

        assert_eq!(pair.access_token, "A1");
        assert_eq!(pair.refresh_token, "R1");
        assert_eq!(
            stored.expires_at.timestamp_millis(),
            now.timestamp_millis() + 3_600_000
        );
    }

    #[test]
    fn test_login_without_expires_in_is_already_expired() {
        let manager = manager(succeed_with("unused", 0));
        let now = now_millis();

        let stored = manager.on_login_at(&login_tokens(None), now).unwrap();
        assert!(stored.is_expired_at(now));
    }

    #[tokio::test]
    async fn test_valid_read_is_idempotent() {
        let refresher = succeed_with("A2", 3600);
        let manager = manager(refresher.clone());
        let now = now_millis();
        let stored = manager.on_login_at(&login_tokens(Some(3600)), now).unwrap();

        let first = manager.on_request_at(stored.clone(), now).await.unwrap();
        let second = manager
            .on_request_at(first.stored().clone(), now)
            .await
            .unwrap();

        assert_eq!(first.state(), CredentialState::Valid);
        assert_eq!(second.state(), CredentialState::Valid);
        assert_eq!(first.stored(), &stored);
        assert_eq!(second.stored(), &stored);
        assert_eq!(
            serde_json::to_vec(first.stored()).unwrap(),
            serde_json::to_vec(second.stored()).unwrap()
        );
        assert_eq!(first.access_token(), Some("A1"));
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_expiry_boundary_takes_refresh_path() {
        let refresher = succeed_with("A2", 3600);
        let manager = manager(refresher.clone());
        let now = now_millis();
        let mut stored = manager.on_login_at(&login_tokens(Some(3600)), now).unwrap();
        stored.expires_at = now;

        let outcome = manager.on_request_at(stored, now).await.unwrap();

        assert_eq!(outcome.state(), CredentialState::Refreshed);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_successful_refresh() {
        let refresher = succeed_with("A2", 3600);
        let manager = manager(refresher.clone());
        let now = now_millis();
        let mut stored = manager.on_login_at(&login_tokens(Some(3600)), now).unwrap();
        stored.expires_at = now - Duration::minutes(5);

        let outcome = manager.on_request_at(stored.clone(), now).await.unwrap();

        let RequestOutcome::Refreshed {
            stored: refreshed,
            access_token,
        } = outcome
        else {
            panic!("expected refreshed outcome");
        };
        assert_eq!(access_token, "A2");
        assert_eq!(manager.codec().decrypt(&refreshed.access_token_cipher).unwrap(), "A2");
        assert_eq!(
            refreshed.expires_at.timestamp_millis(),
            now.timestamp_millis() + 3_600_000
        );
        // Refresh token is carried over untouched when the provider does not rotate it
        assert_eq!(refreshed.refresh_token_cipher, stored.refresh_token_cipher);
        assert_eq!(refresher.seen.lock().unwrap().as_slice(), ["R1".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let refresher = StubRefresher::new(StubReply::Succeed(RefreshedToken {
            access_token: "A2".to_string(),
            expires_in: 60,
            refresh_token: Some("R2".to_string()),
        }));
        let manager = manager(refresher);
        let now = now_millis();
        let stored = manager.on_login_at(&login_tokens(Some(0)), now).unwrap();

        let outcome = manager.on_request_at(stored, now).await.unwrap();
        let pair = manager.open(outcome.stored()).unwrap();

        assert_eq!(pair.access_token, "A2");
        assert_eq!(pair.refresh_token, "R2");
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_unchanged_pair() {
        let refresher = StubRefresher::new(StubReply::Reject(400));
        let manager = manager(refresher.clone());
        let now = now_millis();
        let stored = manager.on_login_at(&login_tokens(Some(0)), now).unwrap();

        let outcome = manager.on_request_at(stored.clone(), now).await.unwrap();

        assert_eq!(outcome.state(), CredentialState::RefreshFailed);
        assert_eq!(outcome.stored(), &stored);
        assert_eq!(outcome.error(), Some(SessionErrorTag::RefreshAccessTokenError));
        assert_eq!(outcome.access_token(), None);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecryptable_refresh_token_fails_without_provider_call() {
        let refresher = succeed_with("A2", 3600);
        let manager = manager(refresher.clone());
        let now = now_millis();
        let mut stored = manager.on_login_at(&login_tokens(Some(0)), now).unwrap();
        stored.refresh_token_cipher = "Zm9yZWlnbg==".to_string();

        let outcome = manager.on_request_at(stored.clone(), now).await.unwrap();

        match outcome {
            RequestOutcome::RefreshFailed { stored: kept, reason, .. } => {
                assert_eq!(kept, stored);
                assert_eq!(reason.kind(), "decryption");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_undecryptable_access_token_on_valid_pair() {
        let manager = manager(succeed_with("A2", 3600));
        let now = now_millis();
        let mut stored = manager.on_login_at(&login_tokens(Some(3600)), now).unwrap();
        stored.access_token_cipher = "garbage!".to_string();

        let err = manager.on_request_at(stored, now).await.unwrap_err();
        assert_eq!(err, DecryptionError::InvalidEncoding);
    }

    #[tokio::test]
    async fn test_pair_from_other_secret_is_rejected() {
        let now = now_millis();
        let issuer = manager(succeed_with("A2", 3600));
        let stored = issuer.on_login_at(&login_tokens(Some(3600)), now).unwrap();

        let other = CredentialManager::new(
            TokenCodec::new("a-completely-different-secret").unwrap(),
            succeed_with("A2", 3600),
        );

        assert_eq!(
            other.on_request_at(stored, now).await.unwrap_err(),
            DecryptionError::Authentication
        );
    }

    #[tokio::test]
    async fn test_concurrent_stale_requests_each_refresh() {
        let refresher = succeed_with("A2", 3600);
        let manager = manager(refresher.clone());
        let now = now_millis();
        let stored = manager.on_login_at(&login_tokens(Some(0)), now).unwrap();

        let (a, b) = tokio::join!(
            manager.on_request_at(stored.clone(), now),
            manager.on_request_at(stored.clone(), now)
        );

        assert_eq!(a.unwrap().state(), CredentialState::Refreshed);
        assert_eq!(b.unwrap().state(), CredentialState::Refreshed);
        assert_eq!(refresher.calls(), 2);
    }

    #[test]
    fn test_expires_after_clamps_huge_lifetimes() {
        let now = now_millis();
        let far = expires_after(now, u64::MAX);
        assert_eq!(far, now + Duration::seconds(MAX_EXPIRES_IN_SECS as i64));
    }
}
