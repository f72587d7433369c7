//! Session tokens and how they travel
//!
//! Tokens are HS256 JWTs signed with the owning user's derived key, so a
//! password change invalidates them. A request may carry the token as an
//! explicit argument, as `Authorization: Bearer <token>` or as the
//! [`TOKEN_COOKIE_NAME`] cookie, in that order of precedence.

use axum::http::{header, HeaderMap};
use chrono::Utc;
use cookie::Cookie;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::User;

pub const TOKEN_COOKIE_NAME: &str = "CYToken";

/// 8 hours in seconds
pub const TOKEN_EXPIRES_IN: i64 = 28800;

pub const TOKEN_TYPE: &str = "Bearer";
pub const TOKEN_AUDIENCE: &str = "user";
pub const TOKEN_ISSUER: &str = env!("CARGO_PKG_NAME");

const COOKIE_PATH: &str = "/";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// issuer
    pub iss: String,

    /// subject (user id)
    pub sub: String,

    /// audience
    pub aud: String,

    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn for_user(user: &User) -> Self {
        let now = Utc::now().timestamp();
        Self {
            iss: TOKEN_ISSUER.to_string(),
            sub: user.id.clone(),
            aud: TOKEN_AUDIENCE.to_string(),
            username: user.username.clone(),
            iat: now,
            exp: now + TOKEN_EXPIRES_IN,
        }
    }
}

/// Signs a fresh token for `user` with the user's derived key
pub fn issue_token(user: &User) -> Result<String, AppError> {
    let claims = TokenClaims::for_user(user);
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(&user.derived_key),
    )?;
    Ok(token)
}

/// Reads the claims without checking the signature
///
/// Only used to find out whose key the token must be verified against.
pub fn decode_unverified(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => Some(data.claims),
        Err(error) => {
            tracing::debug!(error = %error, "malformed token");
            None
        }
    }
}

/// Checks signature, expiry, audience and issuer against `secret`
pub fn verify_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    validation.set_issuer(&[TOKEN_ISSUER]);

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(secret), &validation) {
        Ok(data) => Some(data.claims),
        Err(error) => {
            tracing::debug!(error = %error, "token rejected");
            None
        }
    }
}

/// Picks the request's token: `explicit`, then the bearer header, then the cookie
pub fn extract_token(headers: &HeaderMap, explicit: Option<&str>) -> Option<String> {
    if let Some(token) = explicit.filter(|token| !token.is_empty()) {
        return Some(token.to_string());
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .filter(|(kind, token)| *kind == TOKEN_TYPE && !token.is_empty())
        .map(|(_, token)| token.to_string());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value).filter_map(Result::ok))
        .find(|cookie| cookie.name() == TOKEN_COOKIE_NAME && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

/// HTTP-only session cookie holding `token`
///
/// `secure` should be true only when the inbound connection was TLS.
pub fn session_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE_NAME, token.to_string()))
        .path(COOKIE_PATH)
        .http_only(true)
        .max_age(cookie::time::Duration::seconds(TOKEN_EXPIRES_IN))
        .secure(secure)
        .build()
}

/// Empty session cookie that replaces the current one
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE_NAME, "")).path(COOKIE_PATH).build()
}
