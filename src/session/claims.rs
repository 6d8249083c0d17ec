// Signed session artifact

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::auth::{EncryptedTokenPair, SessionErrorTag};

/// Key derivation label, keeps the signing key distinct from the token cipher key
const SIGNING_CONTEXT: &[u8] = b"sealed-session/session-signing\0";

/// Upper bound on the session max age (10 years)
const MAX_SESSION_AGE_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to sign session: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("Session has expired")]
    Expired,

    #[error("Session is invalid: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Identity of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Claims carried by the session artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub tokens: EncryptedTokenPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionErrorTag>,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn user(&self) -> SessionUser {
        SessionUser {
            id: self.sub.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            picture: self.picture.clone(),
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// Signs and verifies session artifacts (HS256)
#[derive(Clone)]
pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    max_age: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, max_age_secs: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SIGNING_CONTEXT);
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
            validation,
            max_age: Duration::seconds(max_age_secs.min(MAX_SESSION_AGE_SECS) as i64),
        }
    }

    pub fn max_age_secs(&self) -> i64 {
        self.max_age.num_seconds()
    }

    /// Sign a fresh artifact; every issue restarts the session max age
    pub fn issue(
        &self,
        user: &SessionUser,
        tokens: EncryptedTokenPair,
        error: Option<SessionErrorTag>,
    ) -> Result<(SessionClaims, String), SessionError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            picture: user.picture.clone(),
            tokens,
            error,
            iat: now.timestamp(),
            exp: (now + self.max_age).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(SessionError::Sign)?;

        Ok((claims, token))
    }

    /// Sign arbitrary claims with the session key
    #[cfg(test)]
    pub(crate) fn sign_raw(&self, claims: &serde_json::Value) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .expect("test claims are serializable")
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid(e),
            })
    }
}
