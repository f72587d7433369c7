//! Database initialization, table definitions and queries
//!
//! Storage is an embedded redb file. Every entity is stored as a JSON string
//! in its own table, and secondary index tables make lookups by slug, by
//! username and by owner cheap. Secondary keys use the composite
//! `"{prefix}:{suffix}"` format so a prefix becomes a range query.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::cache::SlugSource;
use crate::error::AppError;
use crate::model::{MetaTag, ResolvedShortLink, ShortLink, ShortLinkMeta, ShortLinkView, User};
use crate::slug::gen_slug;

/// Users by id
///
/// Key: user id (UUID)
/// Value: JSON-serialized User
pub const TABLE_USERS: TableDefinition<&str, &str> = TableDefinition::new("users_v1");

/// Unique index on username
///
/// Key: username
/// Value: user id
pub const TABLE_USERS_BY_USERNAME: TableDefinition<&str, &str> =
    TableDefinition::new("users_by_username_v1");

/// Short links by id
///
/// Key: short link id (UUID)
/// Value: JSON-serialized ShortLink
pub const TABLE_SHORT_LINKS: TableDefinition<&str, &str> = TableDefinition::new("short_links_v1");

/// Unique index on slug
///
/// Key: slug
/// Value: short link id
pub const TABLE_SHORT_LINKS_BY_SLUG: TableDefinition<&str, &str> =
    TableDefinition::new("short_links_by_slug_v1");

/// Owner index
///
/// Key: "{user_id}:{created_at_micros}:{short_link_id}", chronological per user
/// Value: short link id
pub const TABLE_SHORT_LINKS_BY_USER: TableDefinition<&str, &str> =
    TableDefinition::new("short_links_by_user_v1");

/// Metas of a short link
///
/// Key: "{short_link_id}:{seq:08}", document order per link
/// Value: JSON-serialized ShortLinkMeta
pub const TABLE_SHORT_LINK_METAS: TableDefinition<&str, &str> =
    TableDefinition::new("short_link_metas_v1");

/// Views of a short link
///
/// Key: "{short_link_id}:{view_id}"
/// Value: JSON-serialized ShortLinkView
pub const TABLE_SHORT_LINK_VIEWS: TableDefinition<&str, &str> =
    TableDefinition::new("short_link_views_v1");

/// Handle to the embedded database
pub struct Database {
    db: redb::Database,
}

/// Creates or opens the database file and makes sure every table exists
///
/// # Example
///
/// ```no_run
/// # use shortlinks::database::init_db;
/// let db = init_db("data.db").expect("Failed to initialize database");
/// ```
pub fn init_db(db_path: &str) -> Result<Database, redb::Error> {
    let db = redb::Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_USERS)?;
        write_txn.open_table(TABLE_USERS_BY_USERNAME)?;
        write_txn.open_table(TABLE_SHORT_LINKS)?;
        write_txn.open_table(TABLE_SHORT_LINKS_BY_SLUG)?;
        write_txn.open_table(TABLE_SHORT_LINKS_BY_USER)?;
        write_txn.open_table(TABLE_SHORT_LINK_METAS)?;
        write_txn.open_table(TABLE_SHORT_LINK_VIEWS)?;
    }
    write_txn.commit()?;

    Ok(Database { db })
}

/// Bounds of a range query matching every key that starts with `"{prefix}:"`
///
/// `{` sorts after every character used in ids, digits and `:`.
fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{prefix}:"), format!("{prefix}:{{"))
}

fn owner_key(link: &ShortLink) -> String {
    format!(
        "{}:{:020}:{}",
        link.user_id,
        link.created_at.timestamp_micros(),
        link.id
    )
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, AppError> {
    Ok(serde_json::from_str(raw)?)
}

/// Keys in first-seen order without duplicates
fn dedup(keys: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    keys.iter()
        .map(String::as_str)
        .filter(|key| seen.insert(*key))
        .collect()
}

impl Database {
    // ---- users -------------------------------------------------------------

    /// Inserts a new user, enforcing username uniqueness
    pub fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let json = serde_json::to_string(user)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut by_username = write_txn.open_table(TABLE_USERS_BY_USERNAME)?;
            if by_username.get(user.username.as_str())?.is_some() {
                return Err(AppError::Validation("username must be unique".to_string()));
            }
            by_username.insert(user.username.as_str(), user.id.as_str())?;

            let mut users = write_txn.open_table(TABLE_USERS)?;
            users.insert(user.id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;

        Ok(())
    }

    /// Overwrites a stored user record (password changes, soft delete)
    pub fn update_user(&self, user: &User) -> Result<(), AppError> {
        let json = serde_json::to_string(user)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(TABLE_USERS)?;
            if users.get(user.id.as_str())?.is_none() {
                return Err(AppError::user_not_found(&user.id));
            }
            users.insert(user.id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;

        Ok(())
    }

    /// Marks a user deleted; the row stays but lookups no longer see it
    pub fn soft_delete_user(&self, id: &str) -> Result<bool, AppError> {
        let Some(mut user) = self.find_user_by_id(id)? else {
            return Ok(false);
        };
        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        self.update_user(&user)?;
        Ok(true)
    }

    pub fn find_user_by_id(&self, id: &str) -> Result<Option<User>, AppError> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(TABLE_USERS)?;
        let user = match users.get(id)? {
            Some(value) => Some(from_json::<User>(value.value())?),
            None => None,
        };
        Ok(user.filter(|user| user.deleted_at.is_none()))
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        match self.find_user_id_by_username(username)? {
            Some(id) => self.find_user_by_id(&id),
            None => Ok(None),
        }
    }

    fn find_user_id_by_username(&self, username: &str) -> Result<Option<String>, AppError> {
        let read_txn = self.db.begin_read()?;
        let by_username = read_txn.open_table(TABLE_USERS_BY_USERNAME)?;
        let id = by_username.get(username)?.map(|id| id.value().to_string());
        Ok(id)
    }

    /// Batch lookup: one result per key, in key order, `None` for misses
    pub fn find_users_by_ids(&self, ids: &[String]) -> Result<Vec<Option<User>>, AppError> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(TABLE_USERS)?;

        let mut found = HashMap::new();
        for id in dedup(ids) {
            if let Some(value) = users.get(id)? {
                let user: User = from_json(value.value())?;
                if user.deleted_at.is_none() {
                    found.insert(id, user);
                }
            }
        }

        Ok(ids.iter().map(|id| found.get(id.as_str()).cloned()).collect())
    }

    // ---- short links -------------------------------------------------------

    pub fn slug_exists(&self, slug: &str) -> Result<bool, AppError> {
        let read_txn = self.db.begin_read()?;
        let by_slug = read_txn.open_table(TABLE_SHORT_LINKS_BY_SLUG)?;
        let exists = by_slug.get(slug)?.is_some();
        Ok(exists)
    }

    /// Inserts a short link owned by `user_id`
    ///
    /// Without a `slug` a unique one is generated inside the same write
    /// transaction. A taken custom slug is a validation error.
    pub fn insert_short_link(
        &self,
        full_link: &str,
        user_id: &str,
        slug: Option<&str>,
    ) -> Result<ShortLink, AppError> {
        let write_txn = self.db.begin_write()?;
        let short_link = {
            let mut by_slug = write_txn.open_table(TABLE_SHORT_LINKS_BY_SLUG)?;

            let slug = match slug {
                Some(slug) => {
                    if by_slug.get(slug)?.is_some() {
                        return Err(AppError::Validation("slug must be unique".to_string()));
                    }
                    slug.to_string()
                }
                None => gen_slug(|candidate| Ok(by_slug.get(candidate)?.is_some()))?,
            };

            let now = Utc::now();
            let short_link = ShortLink {
                id: Uuid::new_v4().to_string(),
                slug,
                full_link: full_link.to_string(),
                user_id: user_id.to_string(),
                created_at: now,
                updated_at: now,
            };
            let json = serde_json::to_string(&short_link)?;

            by_slug.insert(short_link.slug.as_str(), short_link.id.as_str())?;

            let mut links = write_txn.open_table(TABLE_SHORT_LINKS)?;
            links.insert(short_link.id.as_str(), json.as_str())?;

            let mut by_user = write_txn.open_table(TABLE_SHORT_LINKS_BY_USER)?;
            by_user.insert(owner_key(&short_link).as_str(), short_link.id.as_str())?;

            short_link
        };
        write_txn.commit()?;

        tracing::debug!(id = %short_link.id, slug = %short_link.slug, "short link stored");
        Ok(short_link)
    }

    /// Batch lookup: one result per key, in key order, `None` for misses
    pub fn find_short_links_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Option<ShortLink>>, AppError> {
        let read_txn = self.db.begin_read()?;
        let links = read_txn.open_table(TABLE_SHORT_LINKS)?;

        let mut found = HashMap::new();
        for id in dedup(ids) {
            if let Some(value) = links.get(id)? {
                found.insert(id, from_json::<ShortLink>(value.value())?);
            }
        }

        Ok(ids.iter().map(|id| found.get(id.as_str()).cloned()).collect())
    }

    /// Batch lookup by owner: one (possibly empty) list per key, oldest first
    pub fn find_short_links_by_user_ids(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<Vec<ShortLink>>, AppError> {
        let read_txn = self.db.begin_read()?;
        let by_user = read_txn.open_table(TABLE_SHORT_LINKS_BY_USER)?;
        let links = read_txn.open_table(TABLE_SHORT_LINKS)?;

        let mut found: HashMap<&str, Vec<ShortLink>> = HashMap::new();
        for user_id in dedup(user_ids) {
            let (start, end) = prefix_range(user_id);
            let mut owned = Vec::new();
            for entry in by_user.range(start.as_str()..end.as_str())? {
                let (_, id) = entry?;
                if let Some(value) = links.get(id.value())? {
                    owned.push(from_json::<ShortLink>(value.value())?);
                }
            }
            found.insert(user_id, owned);
        }

        Ok(user_ids
            .iter()
            .map(|user_id| found.get(user_id.as_str()).cloned().unwrap_or_default())
            .collect())
    }

    /// Loads a short link by slug together with its metas
    pub fn find_short_link_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<ResolvedShortLink>, AppError> {
        let read_txn = self.db.begin_read()?;
        let by_slug = read_txn.open_table(TABLE_SHORT_LINKS_BY_SLUG)?;
        let links = read_txn.open_table(TABLE_SHORT_LINKS)?;
        let metas = read_txn.open_table(TABLE_SHORT_LINK_METAS)?;

        let Some(id) = by_slug.get(slug)?.map(|id| id.value().to_string()) else {
            return Ok(None);
        };
        let Some(short_link) = links
            .get(id.as_str())?
            .map(|value| from_json::<ShortLink>(value.value()))
            .transpose()?
        else {
            return Ok(None);
        };

        let (start, end) = prefix_range(&id);
        let mut meta_list = Vec::new();
        for entry in metas.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            meta_list.push(from_json::<ShortLinkMeta>(value.value())?);
        }

        Ok(Some(ResolvedShortLink {
            short_link,
            meta_list,
        }))
    }

    /// Deletes the listed short links that belong to `user_id`
    ///
    /// Ids that do not exist or belong to someone else are skipped. Slug and
    /// owner index entries, metas and views go with each link. Returns the
    /// removed links.
    pub fn remove_short_links(
        &self,
        ids: &[String],
        user_id: &str,
    ) -> Result<Vec<ShortLink>, AppError> {
        let write_txn = self.db.begin_write()?;
        let mut removed = Vec::new();
        {
            let mut links = write_txn.open_table(TABLE_SHORT_LINKS)?;
            let mut by_slug = write_txn.open_table(TABLE_SHORT_LINKS_BY_SLUG)?;
            let mut by_user = write_txn.open_table(TABLE_SHORT_LINKS_BY_USER)?;
            let mut metas = write_txn.open_table(TABLE_SHORT_LINK_METAS)?;
            let mut views = write_txn.open_table(TABLE_SHORT_LINK_VIEWS)?;

            for id in dedup(ids) {
                let record = links.get(id)?.map(|value| value.value().to_string());
                let Some(record) = record else {
                    continue;
                };
                let link: ShortLink = from_json(&record)?;
                if link.user_id != user_id {
                    continue;
                }

                links.remove(id)?;
                by_slug.remove(link.slug.as_str())?;
                by_user.remove(owner_key(&link).as_str())?;

                let (start, end) = prefix_range(id);
                let meta_keys = metas
                    .range(start.as_str()..end.as_str())?
                    .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                for key in meta_keys {
                    metas.remove(key.as_str())?;
                }

                let view_keys = views
                    .range(start.as_str()..end.as_str())?
                    .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                for key in view_keys {
                    views.remove(key.as_str())?;
                }

                removed.push(link);
            }
        }
        write_txn.commit()?;

        Ok(removed)
    }

    // ---- metas -------------------------------------------------------------

    /// Bulk-creates meta rows for a short link, keeping the given order
    pub fn insert_metas(
        &self,
        short_link_id: &str,
        tags: &[MetaTag],
    ) -> Result<Vec<ShortLinkMeta>, AppError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let write_txn = self.db.begin_write()?;
        let mut created = Vec::with_capacity(tags.len());
        {
            let mut metas = write_txn.open_table(TABLE_SHORT_LINK_METAS)?;

            let (start, end) = prefix_range(short_link_id);
            let existing = metas.range(start.as_str()..end.as_str())?.count();

            let now = Utc::now();
            for (offset, tag) in tags.iter().enumerate() {
                let meta = ShortLinkMeta {
                    id: Uuid::new_v4().to_string(),
                    short_link_id: short_link_id.to_string(),
                    tag: tag.clone(),
                    created_at: now,
                };
                let key = format!("{short_link_id}:{:08}", existing + offset);
                let json = serde_json::to_string(&meta)?;
                metas.insert(key.as_str(), json.as_str())?;
                created.push(meta);
            }
        }
        write_txn.commit()?;

        Ok(created)
    }

    /// Batch lookup: one (possibly empty) list per short link id, in document order
    pub fn find_metas_by_short_link_ids(
        &self,
        short_link_ids: &[String],
    ) -> Result<Vec<Vec<ShortLinkMeta>>, AppError> {
        let read_txn = self.db.begin_read()?;
        let metas = read_txn.open_table(TABLE_SHORT_LINK_METAS)?;

        let mut found: HashMap<&str, Vec<ShortLinkMeta>> = HashMap::new();
        for id in dedup(short_link_ids) {
            let (start, end) = prefix_range(id);
            let mut list = Vec::new();
            for entry in metas.range(start.as_str()..end.as_str())? {
                let (_, value) = entry?;
                list.push(from_json::<ShortLinkMeta>(value.value())?);
            }
            found.insert(id, list);
        }

        Ok(short_link_ids
            .iter()
            .map(|id| found.get(id.as_str()).cloned().unwrap_or_default())
            .collect())
    }

    // ---- views -------------------------------------------------------------

    /// Appends one view event
    pub fn insert_view(&self, short_link_id: &str) -> Result<ShortLinkView, AppError> {
        let view = ShortLinkView {
            id: Uuid::new_v4().to_string(),
            short_link_id: short_link_id.to_string(),
            created_at: Utc::now(),
        };
        let key = format!("{short_link_id}:{}", view.id);
        let json = serde_json::to_string(&view)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut views = write_txn.open_table(TABLE_SHORT_LINK_VIEWS)?;
            views.insert(key.as_str(), json.as_str())?;
        }
        write_txn.commit()?;

        Ok(view)
    }

    pub fn count_views(&self, short_link_id: &str) -> Result<u64, AppError> {
        let read_txn = self.db.begin_read()?;
        let views = read_txn.open_table(TABLE_SHORT_LINK_VIEWS)?;
        let (start, end) = prefix_range(short_link_id);
        let count = views.range(start.as_str()..end.as_str())?.count();
        Ok(count as u64)
    }
}

impl SlugSource for Database {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<ResolvedShortLink>, AppError> {
        self.find_short_link_by_slug(slug)
    }
}
