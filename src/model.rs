//! Data models for the short link application
//!
//! The structs here are both the stored records (serialized to JSON inside
//! redb) and the building blocks of API payloads. Types that must not leak
//! to callers, such as a user's password material, have a dedicated output
//! type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// Length in bytes of a user's random salt
pub const SALT_LEN: usize = 16;

/// Length in bytes of a user's derived key
pub const KEY_LEN: usize = 64;

/// A registered user
///
/// `salt` and `derived_key` are stored base64 encoded. They are never
/// serialized into API responses; use [`UserOutput`] for that.
#[derive(Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,

    /// Name for display, defaults to the username's local part
    pub name: String,

    /// Unique, email-shaped login name
    pub username: String,

    /// [`SALT_LEN`] random bytes
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,

    /// [`KEY_LEN`] bytes from scrypt; doubles as the token signing secret
    #[serde(with = "base64_bytes")]
    pub derived_key: Vec<u8>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when the user is soft-deleted; such users are invisible to lookups
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // hide content
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("salt", &format_args!("Vec<u8>({})", self.salt.len()))
            .field("derived_key", &format_args!("Vec<u8>({})", self.derived_key.len()))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Fields of a user before password material is attached, validated on sign-up
#[derive(Debug, Clone, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "Validation notEmpty on name failed"))]
    pub name: String,

    #[validate(
        email(message = "Validation isEmail on username failed"),
        length(min = 3, max = 255, message = "Validation len on username failed")
    )]
    pub username: String,
}

impl NewUser {
    /// Builds a new user, defaulting `name` from the username's local part
    pub fn new(name: Option<String>, username: String) -> Self {
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| username.split('@').next().unwrap_or_default().to_string());
        Self { name, username }
    }
}

/// First human readable message out of a validator error set
pub fn first_validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|err| err.message.as_ref().map(|msg| msg.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

/// A shortened link owned by a user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShortLink {
    pub id: String,

    /// Unique, URL-safe path segment
    pub slug: String,

    /// The link this short link points to
    pub full_link: String,

    /// Owner
    pub user_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The semantic content of a meta row, tagged by its HTML element name
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "tag_name")]
pub enum MetaTag {
    /// `<title>` inside `<head>`
    #[serde(rename = "TITLE")]
    Title { raw_text: String },

    /// `<meta>` with a relevant `property` or `name`
    #[serde(rename = "META")]
    Meta {
        content: String,
        property: Option<String>,
        name: Option<String>,
    },
}

impl MetaTag {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Title { .. } => "TITLE",
            Self::Meta { .. } => "META",
        }
    }
}

/// A meta tag captured from a short link's target page
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShortLinkMeta {
    pub id: String,
    pub short_link_id: String,

    #[serde(flatten)]
    pub tag: MetaTag,

    pub created_at: DateTime<Utc>,
}

/// One public resolution of a slug
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShortLinkView {
    pub id: String,
    pub short_link_id: String,
    pub created_at: DateTime<Utc>,
}

/// A short link together with its metas, as held by the slug cache
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResolvedShortLink {
    #[serde(flatten)]
    pub short_link: ShortLink,
    pub meta_list: Vec<ShortLinkMeta>,
}

/// Public view of a user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserOutput {
    pub id: String,
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserOutput {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            username: user.username.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// A short link with everything a client renders
#[derive(Serialize, Debug, Clone)]
pub struct ShortLinkDetail {
    #[serde(flatten)]
    pub short_link: ShortLink,

    /// Complete short URL, e.g. "http://localhost:8080/abcd"
    pub short_url: String,

    pub meta_list: Vec<ShortLinkMeta>,
    pub view_count: u64,
}

/// Request payload for signing up
///
/// # Example
/// ```json
/// { "username": "alice@example.com", "password": "hunter2", "name": "Alice" }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct AddUserInput {
    /// Display name; defaults from the username when omitted
    pub name: Option<String>,
    pub username: String,
    pub password: String,
}

/// Response of a successful sign-up
///
/// The plaintext password is echoed back exactly once so the caller can show it.
#[derive(Serialize, Debug, Clone)]
pub struct AddUserOutput {
    pub user: UserOutput,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SignInInput {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct SignInOutput {
    pub user: UserOutput,
    pub token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChangePasswordInput {
    pub password: String,
}

/// Request payload for creating a short link
///
/// # Example
/// ```json
/// { "full_link": "https://example.com/article", "slug": "my-article" }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct AddShortLinkInput {
    pub full_link: String,

    /// Optional custom slug; a random one is generated when absent or empty
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct AddShortLinkOutput {
    pub short_link: ShortLink,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RemoveShortLinksInput {
    pub short_link_id_list: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoveShortLinksOutput {
    pub removed_count: usize,
}

/// Query parameters of `GET /api/me`
#[derive(Deserialize, Debug, Default)]
pub struct MeParams {
    /// Token to authenticate instead of the request's header or cookie
    pub token: Option<String>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
