//! HTTP request handlers
//!
//! Thin glue between axum and the services in [`AppState`]. Every `/api`
//! handler receives the [`CurrentUser`] resolved by the auth middleware;
//! errors turn into JSON responses through [`AppError`]'s `IntoResponse`.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, Html, IntoResponse, Response},
    Extension, Json,
};

use crate::error::AppError;
use crate::middleware::{is_secure, CurrentUser};
use crate::model::{
    AddShortLinkInput, AddUserInput, ChangePasswordInput, MeParams, RemoveShortLinksInput,
    SignInInput, SignInOutput, UserOutput,
};
use crate::page::{refresh_value, render_landing};
use crate::state::AppState;

/// Signs up a new user
///
/// # Response
///
/// - **201 Created** - `{ "user": {...}, "password": "..." }`
/// - **400 Bad Request** - invalid username or username taken
pub async fn add_user(
    State(state): State<AppState>,
    Json(payload): Json<AddUserInput>,
) -> Result<impl IntoResponse, AppError> {
    let output = state.auth.add_user(payload).await?;
    Ok((StatusCode::CREATED, Json(output)))
}

/// Signs in and sets the session cookie
///
/// The cookie is marked `Secure` only when a proxy reports the original
/// request as https through `X-Forwarded-Proto`.
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignInInput>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state.auth.sign_in(payload, is_secure(&headers)).await?;

    let output = SignInOutput {
        user: UserOutput::from(&signed_in.user),
        token: signed_in.token,
    };
    Ok((
        AppendHeaders([(header::SET_COOKIE, signed_in.cookie.to_string())]),
        Json(output),
    ))
}

pub async fn sign_out(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = state.auth.sign_out();
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
    )
}

/// Returns the authenticated user, or `null`
///
/// A `token` query parameter overrides the request's header and cookie.
pub async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Query(params): Query<MeParams>,
) -> Json<Option<UserOutput>> {
    let user = match params.token.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => state.auth.authenticate_request(&headers, Some(token)),
        None => current.0,
    };
    Json(user.as_ref().map(UserOutput::from))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<ChangePasswordInput>,
) -> Result<Json<UserOutput>, AppError> {
    let user = current.require()?;
    let user = state.auth.change_password(&user, &payload.password).await?;
    Ok(Json(UserOutput::from(&user)))
}

/// Lists the current user's short links, newest first
pub async fn list_short_links(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require()?;

    let mut short_links = state.links.load_short_links_by_user_id(&user.id)?;
    short_links.reverse();
    let details = state.links.describe(short_links)?;

    Ok(Json(details))
}

/// Creates a short link
///
/// # Request Body
///
/// ```json
/// { "full_link": "https://example.com/article", "slug": "optional-custom" }
/// ```
///
/// # Response
///
/// - **201 Created** - `{ "short_link": {...} }`
/// - **400 Bad Request** - malformed link or slug
/// - **401 Unauthorized** - not signed in
/// - **422 Unprocessable Entity** - the link could not be fetched
pub async fn add_short_link(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<AddShortLinkInput>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require()?;
    let output = state.links.add_short_link(payload, &user).await?;
    Ok((StatusCode::CREATED, Json(output)))
}

/// Removes short links owned by the current user; foreign ids are skipped
pub async fn remove_short_links(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(payload): Json<RemoveShortLinksInput>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require()?;
    let output = state.links.remove_short_links(payload, &user).await?;
    Ok(Json(output))
}

/// Loads one of the current user's short links with metas and view count
///
/// Links of other users answer 404 like missing ones.
pub async fn get_short_link(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require()?;

    let short_link = state.links.load_short_link_by_id(&id)?;
    if short_link.user_id != user.id {
        return Err(AppError::short_link_not_found(&id));
    }

    let detail = state
        .links
        .describe(vec![short_link])?
        .pop()
        .ok_or_else(|| AppError::short_link_not_found(&id))?;
    Ok(Json(detail))
}

/// Public landing page of a short link
///
/// Re-emits the target's title and meta tags for link previews and sends
/// the browser on with a `Refresh` header. Every hit records a view.
pub async fn landing(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let Some(resolved) = state.links.get_short_link_by_slug(&slug).await? else {
        return Ok((StatusCode::NOT_FOUND, "Short link not found").into_response());
    };

    if let Err(error) = state.links.record_view_of_short_link(&resolved.short_link) {
        tracing::warn!(slug = %slug, error = %error, "recording view failed");
    }

    let page = Html(render_landing(&resolved).into_string());
    match HeaderValue::from_str(&refresh_value(&resolved.short_link.full_link)) {
        Ok(refresh) => Ok(([(header::REFRESH, refresh)], page).into_response()),
        Err(_) => Ok(page.into_response()),
    }
}
