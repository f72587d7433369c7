//! Request authentication for the `/api` routes

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::model::User;
use crate::state::AppState;

/// The user a request is authenticated as, if any
///
/// Inserted into every `/api` request by [`authenticate`]. Anonymous requests
/// carry `CurrentUser(None)`; handlers that need a user call [`CurrentUser::require`].
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

impl CurrentUser {
    pub fn require(self) -> Result<User, AppError> {
        self.0.ok_or(AppError::Unauthorized)
    }
}

/// Middleware resolving the request's bearer token or session cookie
///
/// Never rejects; an invalid or missing token just leaves the request anonymous.
pub async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let user = state.auth.authenticate_request(&headers, None);
    if let Some(user) = &user {
        tracing::debug!(user_id = %user.id, "request authenticated");
    }

    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

/// True when a TLS-terminating proxy reports the original request as https
pub fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

