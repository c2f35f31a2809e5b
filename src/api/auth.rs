//! Session authentication middleware.
//!
//! Resolves the `X-Session-Token` header (or the `session` cookie) through
//! the users table into an [`Identity`] request extension. Routes mounted
//! outside this layer (health, OpenAPI) stay anonymous.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::types::{Identity, Role};

use super::AppState;

/// Middleware resolving the session token into an Identity
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = header_token(&request).or_else(|| cookie_token(&request));

    let Some(token) = token else {
        return unauthorized_response("Missing session token");
    };

    let user = match state.downloader.db.find_user_by_token(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => return unauthorized_response("Invalid session token"),
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": {"code": "store_unavailable", "message": "session lookup failed"}})),
            )
                .into_response();
        }
    };

    let identity = Identity {
        user_id: user.id,
        role: Role::from_db(&user.role),
    };
    request.extensions_mut().insert(identity);

    next.run(request).await
}

fn header_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-session-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Pull `session=<token>` out of the Cookie header
fn cookie_token(request: &Request) -> Option<String> {
    let cookies = request.headers().get("cookie")?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == "session" {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn unauthorized_response(message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "code": "unauthorized",
            "message": message
        }
    }));

    (StatusCode::UNAUTHORIZED, body).into_response()
}
