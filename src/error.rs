//! Error types shared by every service and their HTTP representation
//!
//! All fallible operations in the crate return [`AppError`]. Handlers return it
//! directly and axum turns it into a JSON body of the form
//! `{"error": "...", "code": "..."}`.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Why an outbound fetch of a full link did not produce a usable response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unreachable {
    /// The request never produced a response (DNS, connect, TLS, timeout...)
    Network(String),

    /// The target answered with a non-success status
    Status { code: u16, text: String },
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(cause) => write!(f, "Error: {cause}"),
            Self::Status { code, text } => write!(f, "Response: {code} {text}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad password or argument supplied by the caller
    #[error("{0}")]
    InvalidInput(String),

    /// The full link is not a valid absolute URL
    #[error("Invalid link '{0}'")]
    InvalidLink(String),

    /// The full link could not be fetched or answered with a non-2xx status
    #[error("{reason}\nfrom: {url}")]
    LinkUnreachable { url: String, reason: Unreachable },

    #[error("Could not generate a unique slug after {attempts} attempts")]
    SlugCollisionExhausted { attempts: usize },

    /// Sign-in failure; never says which of username/password was wrong
    #[error("Could not sign-in, The username '{0}' or password is incorrect.")]
    SignIn(String),

    /// Uniqueness or format violation, message passed through verbatim
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("User is not authenticated")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn short_link_not_found(id: &str) -> Self {
        Self::NotFound(format!(
            "Could not resolve to a ShortLink with the id of '{id}'"
        ))
    }

    pub fn user_not_found(id: &str) -> Self {
        Self::NotFound(format!("Could not resolve to a User with the id of '{id}'"))
    }

    pub fn unreachable_network(url: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Self::LinkUnreachable {
            url: url.to_string(),
            reason: Unreachable::Network(cause.to_string()),
        }
    }

    /// `reason` is the phrase the server sent; the canonical one is used without it
    pub fn unreachable_status(
        url: impl fmt::Display,
        status: StatusCode,
        reason: Option<&str>,
    ) -> Self {
        let text = reason.or(status.canonical_reason()).unwrap_or_default();
        Self::LinkUnreachable {
            url: url.to_string(),
            reason: Unreachable::Status {
                code: status.as_u16(),
                text: text.to_string(),
            },
        }
    }

    /// Machine-readable code used in the JSON body
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidLink(_) => "invalid_link",
            Self::LinkUnreachable { .. } => "link_unreachable",
            Self::SlugCollisionExhausted { .. } => "slug_collision_exhausted",
            Self::SignIn(_) => "sign_in",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Token(_) => "token_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::InvalidLink(_) | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::LinkUnreachable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SlugCollisionExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::SignIn(_) | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Serialization(_) | Self::Token(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// redb splits its errors per operation; funnel them all through redb::Error.
macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AppError {
                fn from(err: $ty) -> Self {
                    Self::Storage(redb::Error::from(err))
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let exposed = matches!(self, Self::SlugCollisionExhausted { .. });
        let message = if status.is_server_error() && !exposed {
            tracing::error!(error = %self, code = self.code(), "request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({
                "error": message,
                "code": self.code(),
            })),
        )
            .into_response()
    }
}
