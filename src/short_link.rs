//! Short link service: creation pipeline, removal, lookups and views
//!
//! Creating a short link:
//! 1. Parse the full link as an absolute URL
//! 2. Fetch it; network failures and non-2xx answers reject the request
//! 3. Store the short link (slug generated unless one was supplied)
//! 4. Best effort: parse the body's meta tags and store them. Failures here
//!    are logged and never undo step 3

use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use reqwest::{header, Client, Response, Url};

use crate::cache::ShortLinkCache;
use crate::config::Config;
use crate::database::Database;
use crate::error::AppError;
use crate::meta::{looks_like_html, parse_meta_from_html};
use crate::model::{
    AddShortLinkInput, AddShortLinkOutput, RemoveShortLinksInput, RemoveShortLinksOutput,
    ResolvedShortLink, ShortLink, ShortLinkDetail, ShortLinkMeta, ShortLinkView, User,
};
use crate::slug::is_url_safe;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct ShortLinkService {
    db: Arc<Database>,
    http: Client,
    cache: ShortLinkCache<Database>,
    base_url: String,
    max_body_bytes: usize,
}

impl ShortLinkService {
    pub fn new(db: Arc<Database>, config: &Config) -> Result<Self, AppError> {
        let mut builder = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(USER_AGENT);
        if !config.fetch_via_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|err| AppError::Internal(format!("building http client: {err}")))?;

        let cache = ShortLinkCache::new(
            Arc::clone(&db),
            config.cache_max_entries,
            config.cache_ttl,
        );

        Ok(Self {
            db,
            http,
            cache,
            base_url: config.base_url.clone(),
            max_body_bytes: config.fetch_max_body_bytes,
        })
    }

    /// Creates a short link for `input.full_link`, owned by `user`
    ///
    /// Fails without storing anything when the link is malformed,
    /// unreachable or answers with a non-success status. Metas are stored
    /// afterwards and are not part of the output.
    pub async fn add_short_link(
        &self,
        input: AddShortLinkInput,
        user: &User,
    ) -> Result<AddShortLinkOutput, AppError> {
        const TAG: &str = "add_short_link";
        let AddShortLinkInput { full_link, slug } = input;

        let url = Url::parse(&full_link).map_err(|error| {
            tracing::warn!(tag = TAG, full_link = %full_link, error = %error, "invalid link");
            AppError::InvalidLink(full_link.clone())
        })?;

        let slug = slug.filter(|slug| !slug.is_empty());
        if let Some(slug) = slug.as_deref() {
            if !is_url_safe(slug) {
                return Err(AppError::Validation(
                    "slug may only contain letters, digits, '-', '_' and '~'".to_string(),
                ));
            }
            if self.db.slug_exists(slug)? {
                return Err(AppError::Validation("slug must be unique".to_string()));
            }
        }

        let response = self.http.get(url.clone()).send().await.map_err(|error| {
            tracing::warn!(tag = TAG, full_link = %full_link, error = %error, "fetch failed");
            AppError::unreachable_network(&full_link, &error)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let reason = response
                .extensions()
                .get::<hyper::ext::ReasonPhrase>()
                .and_then(|phrase| std::str::from_utf8(phrase.as_bytes()).ok());
            tracing::warn!(tag = TAG, url = %url, status = %status, "fetch not ok");
            return Err(AppError::unreachable_status(&url, status, reason));
        }

        let short_link = self
            .db
            .insert_short_link(&full_link, &user.id, slug.as_deref())?;

        match self.store_metas(&short_link, response).await {
            Ok(count) => {
                tracing::debug!(tag = TAG, id = %short_link.id, count, "metas stored");
            }
            Err(error) => {
                tracing::warn!(
                    tag = TAG,
                    id = %short_link.id,
                    error = %error,
                    "meta extraction failed"
                );
            }
        }

        tracing::info!(
            tag = TAG,
            id = %short_link.id,
            slug = %short_link.slug,
            user_id = %user.id,
            "short link added"
        );
        Ok(AddShortLinkOutput { short_link })
    }

    async fn store_metas(
        &self,
        short_link: &ShortLink,
        response: Response,
    ) -> Result<usize, AppError> {
        let encoding = response_encoding(&response);
        let Some(body) = read_body_capped(response, self.max_body_bytes).await? else {
            tracing::debug!(id = %short_link.id, "body over the size cap, metas skipped");
            return Ok(0);
        };

        let (html, _, _) = encoding.decode(&body);
        if !looks_like_html(&html) {
            return Ok(0);
        }

        let tags = parse_meta_from_html(&html);
        let created = self.db.insert_metas(&short_link.id, &tags)?;
        Ok(created.len())
    }

    /// Removes the listed short links owned by `user`; others are ignored
    pub async fn remove_short_links(
        &self,
        input: RemoveShortLinksInput,
        user: &User,
    ) -> Result<RemoveShortLinksOutput, AppError> {
        let removed = self
            .db
            .remove_short_links(&input.short_link_id_list, &user.id)?;

        for short_link in &removed {
            self.cache.invalidate(&short_link.slug).await;
        }

        Ok(RemoveShortLinksOutput {
            removed_count: removed.len(),
        })
    }

    pub fn load_short_link_by_id(&self, id: &str) -> Result<ShortLink, AppError> {
        self.db
            .find_short_links_by_ids(&[id.to_string()])?
            .pop()
            .flatten()
            .ok_or_else(|| AppError::short_link_not_found(id))
    }

    /// Resolves a slug through the cache
    pub async fn get_short_link_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<ResolvedShortLink>, AppError> {
        self.cache.get(slug).await
    }

    /// Appends a view; every resolution counts
    pub fn record_view_of_short_link(
        &self,
        short_link: &ShortLink,
    ) -> Result<ShortLinkView, AppError> {
        self.db.insert_view(&short_link.id)
    }

    pub fn load_short_links_by_user_id(&self, user_id: &str) -> Result<Vec<ShortLink>, AppError> {
        Ok(self
            .db
            .find_short_links_by_user_ids(&[user_id.to_string()])?
            .pop()
            .unwrap_or_default())
    }

    pub fn count_views(&self, short_link: &ShortLink) -> Result<u64, AppError> {
        self.db.count_views(&short_link.id)
    }

    pub fn load_short_link_metas(
        &self,
        short_link: &ShortLink,
    ) -> Result<Vec<ShortLinkMeta>, AppError> {
        Ok(self
            .db
            .find_metas_by_short_link_ids(&[short_link.id.clone()])?
            .pop()
            .unwrap_or_default())
    }

    /// Adds short URL, metas and view count; metas for all links come from one query
    pub fn describe(&self, short_links: Vec<ShortLink>) -> Result<Vec<ShortLinkDetail>, AppError> {
        let ids: Vec<String> = short_links.iter().map(|link| link.id.clone()).collect();
        let metas = self.db.find_metas_by_short_link_ids(&ids)?;

        short_links
            .into_iter()
            .zip(metas)
            .map(|(short_link, meta_list)| {
                Ok(ShortLinkDetail {
                    short_url: self.short_url(&short_link),
                    view_count: self.count_views(&short_link)?,
                    meta_list,
                    short_link,
                })
            })
            .collect()
    }

    pub fn short_url(&self, short_link: &ShortLink) -> String {
        format!("{}/{}", self.base_url, short_link.slug)
    }
}

/// Reads the body chunk by chunk; `None` once it grows past `max_bytes`
///
/// Stops reading at the first chunk over the cap, dropping the rest of the
/// response unread.
async fn read_body_capped(
    mut response: Response,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, AppError> {
    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Ok(None);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| AppError::Internal(format!("reading body: {err}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Some(body))
}

/// Encoding named by the `Content-Type` charset, UTF-8 otherwise
///
/// A byte order mark in the body still wins when decoding.
fn response_encoding(response: &Response) -> &'static Encoding {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .and_then(|content_type| {
            content_type
                .get_param(mime::CHARSET)
                .and_then(|charset| Encoding::for_label(charset.as_str().as_bytes()))
        })
        .unwrap_or(UTF_8)
}
