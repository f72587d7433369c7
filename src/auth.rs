//! Authentication service: sign-up, sign-in, sign-out and token checks

use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use chrono::Utc;
use cookie::Cookie;
use uuid::Uuid;
use validator::Validate;

use crate::database::Database;
use crate::error::AppError;
use crate::model::{
    first_validation_message, AddUserInput, AddUserOutput, NewUser, SignInInput, User, UserOutput,
};
use crate::password::{PasswordEngine, VerifyTiming};
use crate::token::{
    clear_session_cookie, decode_unverified, extract_token, issue_token, session_cookie,
    verify_token,
};

/// Result of a successful sign-in
#[derive(Debug)]
pub struct SignedIn {
    pub user: User,
    pub token: String,

    /// Session cookie for the response; the caller decides whether to send it
    pub cookie: Cookie<'static>,
}

pub struct AuthService {
    db: Arc<Database>,
    engine: PasswordEngine,
    timing: VerifyTiming,
}

impl AuthService {
    pub fn new(db: Arc<Database>, engine: PasswordEngine) -> Self {
        Self {
            db,
            engine,
            timing: VerifyTiming::new(),
        }
    }

    pub fn timing(&self) -> &VerifyTiming {
        &self.timing
    }

    /// Looks up `username` and checks `password`
    ///
    /// An unknown username resolves to `None` only after sleeping for the
    /// average verification time, so both failure paths take about as long.
    pub async fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(user) = self.db.find_user_by_username(username)? else {
            tokio::time::sleep(self.timing.average()).await;
            return Ok(None);
        };

        let start = Instant::now();
        let ok = self.engine.verify_password(&user, password).await;
        let average = self.timing.record(start.elapsed());

        tracing::debug!(
            verify_avg_ms = average.as_secs_f64() * 1000.0,
            verify_count = self.timing.count(),
            "verify user"
        );

        Ok(ok.then_some(user))
    }

    /// Signs in and issues a token plus its session cookie
    ///
    /// `secure` marks the cookie `Secure`; pass true only for TLS requests.
    pub async fn sign_in(&self, input: SignInInput, secure: bool) -> Result<SignedIn, AppError> {
        let SignInInput { username, password } = input;

        let Some(user) = self.verify_user(&username, &password).await? else {
            tracing::warn!(username = %username, "sign-in failed");
            return Err(AppError::SignIn(username));
        };

        let token = issue_token(&user)?;
        let cookie = session_cookie(&token, secure);

        tracing::info!(username = %username, "sign-in");
        Ok(SignedIn { user, token, cookie })
    }

    /// Cookie that clears the session
    pub fn sign_out(&self) -> Cookie<'static> {
        clear_session_cookie()
    }

    /// Creates a user; the generated output echoes the password once
    pub async fn add_user(&self, input: AddUserInput) -> Result<AddUserOutput, AppError> {
        let AddUserInput { name, username, password } = input;

        let new_user = NewUser::new(name, username);
        new_user
            .validate()
            .map_err(|errors| AppError::Validation(first_validation_message(&errors)))?;

        let material = self.engine.derive_password(&password, None).await?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: new_user.name,
            username: new_user.username,
            salt: material.salt,
            derived_key: material.derived_key,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match self.db.insert_user(&user) {
            Ok(()) => Ok(AddUserOutput {
                user: UserOutput::from(&user),
                password,
            }),
            Err(error @ AppError::Validation(_)) => Err(error),
            Err(error) => {
                tracing::error!(username = %user.username, error = %error, "add user failed");
                Err(error)
            }
        }
    }

    /// Replaces a user's password material
    ///
    /// Every token issued before is signed with the old key and stops verifying.
    pub async fn change_password(&self, user: &User, password: &str) -> Result<User, AppError> {
        let material = self.engine.derive_password(password, None).await?;

        let mut user = user.clone();
        user.salt = material.salt;
        user.derived_key = material.derived_key;
        user.updated_at = Utc::now();
        self.db.update_user(&user)?;

        tracing::info!(user_id = %user.id, "password changed");
        Ok(user)
    }

    /// Resolves a token to its user, or `None` for anything invalid
    ///
    /// The subject is read first without verification to find whose key
    /// signs the token, then the signature is checked against that key.
    pub fn authenticate(&self, token: &str) -> Option<User> {
        let claims = decode_unverified(token)?;

        let user = match self.db.find_user_by_id(&claims.sub) {
            Ok(user) => user?,
            Err(error) => {
                tracing::warn!(id = %claims.sub, error = %error, "authenticate lookup failed");
                return None;
            }
        };

        verify_token(token, &user.derived_key).map(|_| user)
    }

    /// Authenticates a request from `explicit`, its bearer header or its cookie
    pub fn authenticate_request(
        &self,
        headers: &HeaderMap,
        explicit: Option<&str>,
    ) -> Option<User> {
        let token = extract_token(headers, explicit)?;
        self.authenticate(&token)
    }

    pub fn load_user_by_id(&self, id: &str) -> Result<User, AppError> {
        self.db
            .find_users_by_ids(&[id.to_string()])?
            .pop()
            .flatten()
            .ok_or_else(|| AppError::user_not_found(id))
    }
}
