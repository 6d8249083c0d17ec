// Request extractors for downstream handlers

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;
use crate::session::{current_access_token, SessionContext};

/// A currently-valid provider access token for the request's session.
///
/// Requires the session middleware; rejects with 401 when the session is
/// missing, has no access token, or its refresh failed.
pub struct AccessToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        current_access_token(parts.extensions.get::<SessionContext>()).map(AccessToken)
    }
}

/// The request's session, if any
pub struct MaybeSession(pub Option<SessionContext>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(parts.extensions.get::<SessionContext>().cloned()))
    }
}
