//! scrypt password derivation and verification
//!
//! A user's password is never stored. Instead a random [`SALT_LEN`] byte salt
//! and the [`KEY_LEN`] byte scrypt output are kept. The derived key also signs
//! the user's session tokens (see [`crate::token`]), so changing the password
//! invalidates every token issued before.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use scrypt::Params;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::model::{User, KEY_LEN, SALT_LEN};

/// Salt and derived key of one password
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordMaterial {
    pub salt: Vec<u8>,
    pub derived_key: Vec<u8>,
}

/// Derives and verifies scrypt password material
///
/// Derivation is CPU and memory heavy, so the async methods run it on the
/// blocking thread pool.
#[derive(Debug, Clone, Copy)]
pub struct PasswordEngine {
    params: Params,
}

impl PasswordEngine {
    /// Engine with cost N = 2^`log_n`, r = 8, p = 1
    pub fn new(log_n: u8) -> Result<Self, AppError> {
        let params = Params::new(log_n, 8, 1, KEY_LEN)
            .map_err(|err| AppError::InvalidInput(format!("Bad scrypt parameters: {err}")))?;
        Ok(Self { params })
    }

    /// Derives a key for `password`
    ///
    /// A fresh salt is drawn unless `salt` is given with the right length.
    pub async fn derive_password(
        &self,
        password: &str,
        salt: Option<&[u8]>,
    ) -> Result<PasswordMaterial, AppError> {
        let engine = *self;
        let password = password.to_string();
        let salt = salt.map(<[u8]>::to_vec);
        tokio::task::spawn_blocking(move || engine.derive_blocking(&password, salt.as_deref()))
            .await?
    }

    /// Re-derives `candidate` with the user's stored salt and compares
    ///
    /// Never fails: missing or wrong-length material, or a derivation error,
    /// yields `false`. The comparison is constant-time.
    pub async fn verify_password(&self, user: &User, candidate: &str) -> bool {
        if user.salt.len() != SALT_LEN || user.derived_key.len() != KEY_LEN {
            return false;
        }

        match self.derive_password(candidate, Some(user.salt.as_slice())).await {
            Ok(derived) => {
                bool::from(derived.salt.ct_eq(&user.salt))
                    & bool::from(derived.derived_key.ct_eq(&user.derived_key))
            }
            Err(error) => {
                tracing::warn!(user_id = %user.id, error = %error, "password verification failed");
                false
            }
        }
    }

    fn derive_blocking(
        &self,
        password: &str,
        salt: Option<&[u8]>,
    ) -> Result<PasswordMaterial, AppError> {
        if password.is_empty() {
            return Err(AppError::InvalidInput("Bad password".to_string()));
        }

        let salt = match salt {
            Some(salt) if salt.len() == SALT_LEN => salt.to_vec(),
            _ => {
                let mut fresh = vec![0u8; SALT_LEN];
                rand::rng().fill(&mut fresh[..]);
                fresh
            }
        };

        let mut derived_key = vec![0u8; KEY_LEN];
        scrypt::scrypt(password.as_bytes(), &salt, &self.params, &mut derived_key)
            .map_err(|err| AppError::Internal(format!("scrypt: {err}")))?;

        Ok(PasswordMaterial { salt, derived_key })
    }
}

/// Running average of successful-lookup verification latency
///
/// One instance lives for the whole process inside the auth service and is
/// shared by every request. Sign-ins for unknown usernames wait for the
/// current average so response time does not reveal whether the name exists.
#[derive(Debug, Default)]
pub struct VerifyTiming {
    state: Mutex<TimingState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct TimingState {
    average: Duration,
    count: u32,
}

impl VerifyTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn average(&self) -> Duration {
        self.lock().average
    }

    pub fn count(&self) -> u32 {
        self.lock().count
    }

    /// Folds `elapsed` into the average and returns the new average
    pub fn record(&self, elapsed: Duration) -> Duration {
        let mut state = self.lock();
        let total = state.average * state.count + elapsed;
        state.count = state.count.saturating_add(1);
        state.average = total / state.count;
        state.average
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimingState> {
        // the state is two plain numbers, a poisoned lock still holds valid data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
