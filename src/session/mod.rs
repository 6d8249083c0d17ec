//! Session artifact handling.
//!
//! The session is a signed token held by the client in a cookie. It carries
//! the encrypted token pair, so every request rebuilds its credential state
//! from the artifact alone:
//! - `SessionSigner`: signs and verifies the artifact (HS256)
//! - `CookieSettings`: reads and writes the session cookie
//! - `SessionManager`: ties the artifact to the credential lifecycle

mod claims;
mod cookie;

pub use claims::{SessionClaims, SessionError, SessionSigner, SessionUser};
pub use cookie::CookieSettings;

use chrono::{DateTime, Utc};

use crate::auth::{
    now_millis, CredentialManager, CredentialState, EncryptedTokenPair, ProviderTokens,
    RequestOutcome, SessionErrorTag,
};
use crate::error::ApiError;

/// Per-request view of an authenticated session
#[derive(Clone)]
pub struct SessionContext {
    pub user: SessionUser,
    pub tokens: EncryptedTokenPair,
    pub error: Option<SessionErrorTag>,
    pub state: CredentialState,
    /// When the session artifact itself expires
    pub expires: DateTime<Utc>,
    access_token: Option<String>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user)
            .field("tokens", &self.tokens)
            .field("error", &self.error)
            .field("state", &self.state)
            .field("expires", &self.expires)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SessionContext {
    fn from_claims(
        claims: &SessionClaims,
        state: CredentialState,
        access_token: Option<String>,
    ) -> Self {
        Self {
            user: claims.user(),
            tokens: claims.tokens.clone(),
            error: claims.error,
            state,
            expires: claims.expires(),
            access_token,
        }
    }

    /// Plaintext access token, absent once a refresh has failed
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// A currently-valid access token for the session, or `Unauthorized`.
///
/// This is the one capability downstream provider calls consume.
pub fn current_access_token(session: Option<&SessionContext>) -> Result<String, ApiError> {
    let session = session.ok_or_else(|| ApiError::unauthorized("No active session"))?;

    if session.error.is_some() || session.state == CredentialState::RefreshFailed {
        return Err(ApiError::unauthorized(
            "Session credentials could not be refreshed, sign in again",
        ));
    }

    session
        .access_token()
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("No access token available"))
}

/// What a request's session cookie resolved to
#[derive(Debug)]
pub enum SessionResolution {
    /// Unusable artifact (bad signature, expired, foreign ciphertext); clear it
    Invalid,
    /// Session found; `reissued` holds a new artifact when the stored one changed
    Active {
        context: SessionContext,
        reissued: Option<String>,
    },
}

/// Session manager
/// Issues artifacts at login and resolves them on every request
#[derive(Clone)]
pub struct SessionManager {
    signer: SessionSigner,
    credentials: CredentialManager,
    cookies: CookieSettings,
}

impl SessionManager {
    pub fn new(signer: SessionSigner, credentials: CredentialManager, cookies: CookieSettings) -> Self {
        Self {
            signer,
            credentials,
            cookies,
        }
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    /// Start a session from the provider tokens handed over by the consent flow
    pub fn login(
        &self,
        user: SessionUser,
        tokens: &ProviderTokens,
    ) -> Result<(SessionContext, String), ApiError> {
        let stored = self.credentials.on_login(tokens)?;
        let fresh = !stored.is_expired_at(now_millis());

        let (claims, artifact) = self.signer.issue(&user, stored, None)?;
        tracing::info!(user = %user.id, "Session established");

        let access_token = fresh.then(|| tokens.access_token.clone());
        let context = SessionContext::from_claims(&claims, CredentialState::Issued, access_token);

        Ok((context, artifact))
    }

    /// Resolve a session artifact, refreshing its access token when expired
    pub async fn resume(&self, artifact: &str) -> SessionResolution {
        let claims = match self.signer.verify(artifact) {
            Ok(claims) => claims,
            Err(SessionError::Expired) => {
                tracing::debug!("Session artifact expired");
                return SessionResolution::Invalid;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected session artifact");
                return SessionResolution::Invalid;
            }
        };

        // A failed refresh is terminal for the session
        if claims.error.is_some() {
            tracing::debug!(user = %claims.sub, "Session is marked as errored");
            let context =
                SessionContext::from_claims(&claims, CredentialState::RefreshFailed, None);
            return SessionResolution::Active {
                context,
                reissued: None,
            };
        }

        let outcome = match self.credentials.on_request(claims.tokens.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(user = %claims.sub, error = %e, "Session tokens could not be decrypted");
                return SessionResolution::Invalid;
            }
        };

        let state = outcome.state();
        let user = claims.user();
        match outcome {
            RequestOutcome::Valid { access_token, .. } => SessionResolution::Active {
                context: SessionContext::from_claims(&claims, state, Some(access_token)),
                reissued: None,
            },
            RequestOutcome::Refreshed {
                stored,
                access_token,
            } => self.reissue(&user, stored, None, state, Some(access_token), &claims),
            RequestOutcome::RefreshFailed { stored, error, .. } => {
                self.reissue(&user, stored, Some(error), state, None, &claims)
            }
        }
    }

    fn reissue(
        &self,
        user: &SessionUser,
        stored: EncryptedTokenPair,
        error: Option<SessionErrorTag>,
        state: CredentialState,
        access_token: Option<String>,
        previous: &SessionClaims,
    ) -> SessionResolution {
        match self.signer.issue(user, stored, error) {
            Ok((claims, artifact)) => SessionResolution::Active {
                context: SessionContext::from_claims(&claims, state, access_token),
                reissued: Some(artifact),
            },
            Err(e) => {
                // The client keeps its old artifact; the next request starts over from it
                tracing::error!(user = %user.id, error = %e, "Failed to re-issue session");
                let mut context = SessionContext::from_claims(previous, state, access_token);
                context.error = error;
                SessionResolution::Active {
                    context,
                    reissued: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RefreshError, RefreshedToken, TokenCodec, TokenRefresher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SECRET: &str = "session-manager-test-secret";

    struct FixedRefresher {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(RefreshedToken {
                    access_token: "A2".to_string(),
                    expires_in: 3600,
                    refresh_token: None,
                })
            } else {
                Err(RefreshError::Rejected {
                    status: 400,
                    body: String::new(),
                })
            }
        }
    }

    fn sessions(succeed: bool) -> (SessionManager, Arc<FixedRefresher>) {
        let refresher = Arc::new(FixedRefresher {
            succeed,
            calls: AtomicUsize::new(0),
        });
        let credentials =
            CredentialManager::new(TokenCodec::new(SECRET).unwrap(), refresher.clone());
        let manager = SessionManager::new(
            SessionSigner::new(SECRET, 3600),
            credentials,
            CookieSettings::new(false, 3600),
        );
        (manager, refresher)
    }

    fn user() -> SessionUser {
        SessionUser {
            id: "user-1".to_string(),
            name: Some("Ada".to_string()),
            email: None,
            picture: None,
        }
    }

    fn tokens(expires_in: u64) -> ProviderTokens {
        ProviderTokens {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_in: Some(expires_in),
        }
    }

    fn active(resolution: SessionResolution) -> (SessionContext, Option<String>) {
        match resolution {
            SessionResolution::Active { context, reissued } => (context, reissued),
            SessionResolution::Invalid => panic!("expected an active session"),
        }
    }

    #[test]
    fn test_current_access_token_without_session() {
        assert!(matches!(
            current_access_token(None),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_login_context() {
        let (manager, _) = sessions(true);
        let (context, artifact) = manager.login(user(), &tokens(3600)).unwrap();

        assert_eq!(context.state, CredentialState::Issued);
        assert_eq!(context.user, user());
        assert_eq!(current_access_token(Some(&context)).unwrap(), "A1");
        assert_eq!(artifact.split('.').count(), 3);
    }

    #[test]
    fn test_login_with_expired_token_has_no_access_token() {
        let (manager, _) = sessions(true);
        let (context, _) = manager.login(user(), &tokens(0)).unwrap();

        assert!(matches!(
            current_access_token(Some(&context)),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_valid_session_is_not_reissued() {
        let (manager, refresher) = sessions(true);
        let (_, artifact) = manager.login(user(), &tokens(3600)).unwrap();

        let (context, reissued) = active(manager.resume(&artifact).await);

        assert_eq!(context.state, CredentialState::Valid);
        assert_eq!(reissued, None);
        assert_eq!(current_access_token(Some(&context)).unwrap(), "A1");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_refreshes_expired_session() {
        let (manager, refresher) = sessions(true);
        let (_, artifact) = manager.login(user(), &tokens(0)).unwrap();

        let (context, reissued) = active(manager.resume(&artifact).await);

        assert_eq!(context.state, CredentialState::Refreshed);
        assert_eq!(current_access_token(Some(&context)).unwrap(), "A2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // The re-issued artifact is valid on its own
        let (context, reissued_again) = active(manager.resume(&reissued.unwrap()).await);
        assert_eq!(context.state, CredentialState::Valid);
        assert_eq!(reissued_again, None);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_terminal() {
        let (manager, refresher) = sessions(false);
        let (_, artifact) = manager.login(user(), &tokens(0)).unwrap();

        let (context, reissued) = active(manager.resume(&artifact).await);
        assert_eq!(context.state, CredentialState::RefreshFailed);
        assert_eq!(context.error, Some(SessionErrorTag::RefreshAccessTokenError));
        assert!(current_access_token(Some(&context)).is_err());

        let reissued = reissued.expect("errored session is re-issued with its tag");
        let (context, _) = active(manager.resume(&reissued).await);
        assert_eq!(context.state, CredentialState::RefreshFailed);
        assert!(current_access_token(Some(&context)).is_err());

        // No second provider call for an errored session
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_rejects_foreign_artifact() {
        let (manager, _) = sessions(true);
        let other = SessionManager::new(
            SessionSigner::new("some-other-secret-value", 3600),
            CredentialManager::new(
                TokenCodec::new("some-other-secret-value").unwrap(),
                Arc::new(FixedRefresher {
                    succeed: true,
                    calls: AtomicUsize::new(0),
                }),
            ),
            CookieSettings::new(false, 3600),
        );
        let (_, artifact) = other.login(user(), &tokens(3600)).unwrap();

        assert!(matches!(
            manager.resume(&artifact).await,
            SessionResolution::Invalid
        ));
    }

    #[test]
    fn test_context_debug_redacts_token() {
        let (manager, _) = sessions(true);
        let (context, _) = manager.login(user(), &tokens(3600)).unwrap();

        let rendered = format!("{:?}", context);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"A1\""));
    }

    #[tokio::test]
    async fn test_resume_rejects_signed_artifact_with_malformed_claims() {
        let (manager, refresher) = sessions(true);
        let (_, artifact) = manager.login(user(), &tokens(0)).unwrap();
        let claims = manager.signer.verify(&artifact).unwrap();
        let valid = serde_json::to_value(&claims).unwrap();

        let mut missing_expiry = valid.clone();
        missing_expiry.as_object_mut().unwrap().remove("expiresAt");

        let mut unknown_error = valid;
        unknown_error["error"] = serde_json::json!("Foo");

        for claims in [missing_expiry, unknown_error] {
            let artifact = manager.signer.sign_raw(&claims);
            assert!(matches!(
                manager.resume(&artifact).await,
                SessionResolution::Invalid
            ));
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }
}
