// Session and CORS middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{Any, CorsLayer};

use crate::routes::AppState;
use crate::session::SessionResolution;

/// Session middleware
///
/// Resolves the session cookie, runs the credential lifecycle and places the
/// resulting `SessionContext` in the request extensions. A re-issued artifact
/// is written back with `Set-Cookie`; an unusable one is cleared. Requests
/// without a cookie pass through untouched.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let cookies = state.sessions.cookies();

    let Some(artifact) = cookies.read(request.headers()) else {
        return next.run(request).await;
    };

    let set_cookie = match state.sessions.resume(&artifact).await {
        SessionResolution::Active { context, reissued } => {
            tracing::debug!(
                user = %context.user.id,
                state = context.state.as_str(),
                "Session resolved"
            );
            request.extensions_mut().insert(context);
            reissued.and_then(|artifact| cookies.issue(&artifact))
        }
        SessionResolution::Invalid => {
            tracing::debug!(
                method = %request.method(),
                path = request.uri().path(),
                "Clearing unusable session cookie"
            );
            Some(cookies.clear())
        }
    };

    let mut response = next.run(request).await;

    // A handler that set its own session cookie wins
    if let Some(value) = set_cookie {
        if !response.headers().contains_key(header::SET_COOKIE) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }

    response
}

/// Create CORS middleware layer
///
/// Configures CORS to allow all origins, methods, and headers.
/// Handles OPTIONS preflight requests automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
