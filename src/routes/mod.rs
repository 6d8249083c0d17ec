use axum::{
    extract::State,
    handler::Handler,
    http::{header, HeaderMap},
    middleware::{self as axum_middleware},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{CredentialManager, HttpTokenRefresher, ProviderTokens, TokenCodec};
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::extract::MaybeSession;
use crate::middleware;
use crate::session::{CookieSettings, SessionContext, SessionManager, SessionSigner, SessionUser};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the session stack from validated configuration
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let codec = TokenCodec::new(&config.encryption_secret)?;
        let refresher = HttpTokenRefresher::new(
            &config.token_endpoint_base_url,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.http_request_timeout,
        )?;
        tracing::debug!(url = refresher.token_url(), "Token endpoint configured");

        let credentials = CredentialManager::new(codec, Arc::new(refresher));
        let signer = SessionSigner::new(&config.encryption_secret, config.session_max_age);
        let cookies = CookieSettings::new(config.secure_cookies(), signer.max_age_secs());

        Ok(Self {
            sessions: Arc::new(SessionManager::new(signer, credentials, cookies)),
            config: Arc::new(config),
        })
    }
}

/// Provider token response handed over at the end of the consent flow
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(flatten)]
    pub tokens: ProviderTokens,
    pub user: SessionUser,
}

impl LoginRequest {
    fn validate(&self) -> Result<()> {
        if self.tokens.access_token.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "access_token cannot be empty".to_string(),
            ));
        }
        if self.tokens.refresh_token.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "refresh_token cannot be empty".to_string(),
            ));
        }
        if self.user.id.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "user.id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Health check routes (no session required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Session routes
///
/// Reading the session goes through the session middleware. Login capture does
/// not: an old cookie sent along with a login must not trigger a refresh.
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/auth/session",
            get(get_session_handler.layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::session_middleware,
            )))
            .post(create_session_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the application with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(auth_routes(state))
        .layer(middleware::cors_layer())
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Sealed Session is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// Public view of a session; never includes token material
fn session_view(session: &SessionContext) -> Value {
    let mut view = json!({
        "user": session.user,
        "expires": session.expires.to_rfc3339(),
        "accessTokenExpiresAt": session.tokens.expires_at.timestamp_millis(),
    });
    if let Some(error) = session.error {
        view["error"] = json!(error);
    }
    view
}

/// GET /api/auth/session - Current session
///
/// The session middleware has already refreshed the access token when it was
/// due. Returns `{}` when there is no session.
async fn get_session_handler(MaybeSession(session): MaybeSession) -> Json<Value> {
    match session {
        Some(session) => Json(session_view(&session)),
        None => Json(json!({})),
    }
}

/// POST /api/auth/session - Capture the provider tokens and start a session
async fn create_session_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    request.validate()?;

    let (session, artifact) = state.sessions.login(request.user, &request.tokens)?;

    let mut headers = HeaderMap::new();
    match state.sessions.cookies().issue(&artifact) {
        Some(cookie) => {
            headers.insert(header::SET_COOKIE, cookie);
        }
        None => {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "Session artifact is not a valid cookie value"
            )));
        }
    }

    Ok((headers, Json(session_view(&session))).into_response())
}
