//! Random slug generation
//!
//! A slug is `3 * length_factor` random bytes encoded as URL-safe base64, so
//! every slug is a multiple of four characters long. On a collision the length
//! factor grows by one, which shrinks the odds of another collision
//! exponentially. Growth stops at [`MAX_LENGTH_FACTOR`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;

use crate::error::AppError;

/// Largest length factor tried before giving up (24 random bytes)
pub const MAX_LENGTH_FACTOR: usize = 8;

/// Generates a slug for which `exists` returns `false`
///
/// `exists` is asked about every candidate and is normally a lookup in the
/// slug index of the same write transaction that will insert the link.
pub fn gen_slug<F>(exists: F) -> Result<String, AppError>
where
    F: FnMut(&str) -> Result<bool, AppError>,
{
    gen_slug_with(&mut rand::rng(), exists)
}

/// [`gen_slug`] with an explicit random source
pub fn gen_slug_with<R, F>(rng: &mut R, mut exists: F) -> Result<String, AppError>
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> Result<bool, AppError>,
{
    for length_factor in 1..=MAX_LENGTH_FACTOR {
        let mut buf = vec![0u8; 3 * length_factor];
        rng.fill(&mut buf[..]);
        let slug = url_safe_base64(&buf);

        if !exists(&slug)? {
            return Ok(slug);
        }

        tracing::debug!(slug = %slug, length_factor, "slug collision, growing length");
    }

    Err(AppError::SlugCollisionExhausted {
        attempts: MAX_LENGTH_FACTOR,
    })
}

/// Base64 with `+` → `-`, `/` → `_` and `=` → `~`
pub fn url_safe_base64(bytes: &[u8]) -> String {
    STANDARD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            '=' => '~',
            other => other,
        })
        .collect()
}

/// Whether `slug` only uses characters [`url_safe_base64`] can produce
pub fn is_url_safe(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '~'))
}
