use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("forbidden")]
    Forbidden,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Fails with Conflict when the email is already registered.
    async fn create_account(&self, new: NewAccount) -> RepoResult<Account>;
    async fn get_account(&self, id: Id) -> RepoResult<Account>;
    async fn find_account_by_email(&self, email: &str) -> RepoResult<Option<Account>>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Account>;
    async fn set_password(&self, id: Id, hash: String, salt: String) -> RepoResult<()>;
    /// Idempotent: reporting twice leaves a single entry.
    async fn add_report(&self, reported: Id, reporter: Id) -> RepoResult<()>;
    /// Append-only, deduplicated. The sole gate for rating eligibility.
    async fn add_received_service(&self, recipient: Id, provider: Id) -> RepoResult<()>;
    /// Cascading deletion: reassign authored comments to the sentinel,
    /// drop owned listings with their comments, drop ratings either way,
    /// then the account row. All-or-nothing.
    async fn delete_account(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ListingRepo: Send + Sync {
    async fn create_listing(&self, owner_id: Id, new: NewListing) -> RepoResult<Listing>;
    async fn get_listing(&self, id: Id) -> RepoResult<Listing>;
    async fn get_listing_details(&self, id: Id) -> RepoResult<ListingDetails>;
    async fn update_listing(&self, id: Id, upd: UpdateListing) -> RepoResult<Listing>;
    /// Deletes the listing's comments first, then the listing itself.
    async fn delete_listing(&self, id: Id) -> RepoResult<()>;
    async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>>;
    async fn set_listing_status(&self, id: Id, is_open: bool) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list_comments(&self, listing_id: Id) -> RepoResult<Vec<Comment>>;
    async fn add_comment(&self, listing_id: Id, author_id: Id, text: String) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn update_comment(&self, id: Id, text: String) -> RepoResult<()>;
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
    /// Set-level no-op when already liked.
    async fn like_comment(&self, id: Id, account_id: Id) -> RepoResult<()>;
    /// Set-level no-op when not liked.
    async fn unlike_comment(&self, id: Id, account_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait RatingRepo: Send + Sync {
    async fn get_rating(&self, rated_id: Id, rater_id: Id) -> RepoResult<Option<f64>>;
    async fn can_rate(&self, rated_id: Id, rater_id: Id) -> RepoResult<bool>;
    /// Insert-or-update the unique (rated, rater) pair, then recompute the
    /// rated account's average as a fresh arithmetic mean and persist it.
    /// Fails with Forbidden when the rater is not in the rated account's
    /// received-service set (enforced here, not only at the check endpoint).
    async fn rate(&self, rated_id: Id, rater_id: Id, value: f64) -> RepoResult<f64>;
}

#[async_trait]
pub trait ModerationRepo: Send + Sync {
    /// Non-admin accounts, sentinel excluded, by report volume descending.
    async fn list_users(&self) -> RepoResult<Vec<ModeratedAccount>>;
    async fn get_reporters(&self, id: Id) -> RepoResult<Vec<ReporterInfo>>;
}

pub trait Repo: AccountRepo + ListingRepo + CommentRepo + RatingRepo + ModerationRepo {}

impl<T> Repo for T where T: AccountRepo + ListingRepo + CommentRepo + RatingRepo + ModerationRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        accounts: HashMap<Id, Account>,
        listings: HashMap<Id, Listing>,
        comments: HashMap<Id, Comment>,
        ratings: Vec<RatingRecord>,
        next_id: Id,
    }

    impl State {
        /// The sentinel row exists from the first start and survives every
        /// snapshot; it is never created through registration.
        fn ensure_sentinel(&mut self) {
            self.accounts
                .entry(SENTINEL_ACCOUNT_ID)
                .or_insert_with(|| Account {
                    id: SENTINEL_ACCOUNT_ID,
                    username: "deleted_user".into(),
                    email: String::new(),
                    password_hash: String::new(),
                    salt: String::new(),
                    role: Role::User,
                    about: None,
                    phone: None,
                    profile_picture: None,
                    resume: None,
                    rating: 0.0,
                    report_ids: Vec::new(),
                    received_service_ids: Vec::new(),
                    created_at: Utc::now(),
                });
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("TT_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            let mut state = match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!(
                            "[inmem] Failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            };
            state.ensure_sentinel();
            state
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn matches(listing: &Listing, f: &ListingFilter) -> bool {
            let category_ok = match f.category.as_deref() {
                Some(cat) if cat != crate::taxonomy::ALL_CATEGORIES => {
                    // single category: listing must contain ALL requested subs
                    listing.category == cat
                        && f.subcategories
                            .iter()
                            .all(|s| listing.subcategories.contains(s))
                }
                // "All": any overlap with the requested subs suffices
                _ => {
                    f.subcategories.is_empty()
                        || f.subcategories
                            .iter()
                            .any(|s| listing.subcategories.contains(s))
                }
            };
            category_ok
                && f.listing_type.map_or(true, |t| listing.listing_type == t)
                && f.owner_id.map_or(true, |o| listing.owner_id == o)
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AccountRepo for InMemRepo {
        async fn create_account(&self, new: NewAccount) -> RepoResult<Account> {
            let mut s = self.state.write().unwrap();
            if s.accounts
                .values()
                .any(|a| a.id != SENTINEL_ACCOUNT_ID && a.email == new.email)
            {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let account = Account {
                id,
                username: new.username,
                email: new.email,
                password_hash: new.password_hash,
                salt: new.salt,
                role: new.role,
                about: None,
                phone: None,
                profile_picture: None,
                resume: None,
                rating: 0.0,
                report_ids: Vec::new(),
                received_service_ids: Vec::new(),
                created_at: Utc::now(),
            };
            s.accounts.insert(id, account.clone());
            drop(s);
            self.persist();
            Ok(account)
        }

        async fn get_account(&self, id: Id) -> RepoResult<Account> {
            let s = self.state.read().unwrap();
            s.accounts.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_account_by_email(&self, email: &str) -> RepoResult<Option<Account>> {
            let s = self.state.read().unwrap();
            Ok(s.accounts
                .values()
                .find(|a| a.id != SENTINEL_ACCOUNT_ID && a.email == email)
                .cloned())
        }

        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Account> {
            let mut s = self.state.write().unwrap();
            let account = s.accounts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(username) = upd.username {
                account.username = username;
            }
            if let Some(about) = upd.about {
                account.about = Some(about);
            }
            if let Some(phone) = upd.phone {
                account.phone = Some(phone);
            }
            if let Some(picture) = upd.profile_picture {
                account.profile_picture = Some(picture);
            }
            if let Some(resume) = upd.resume {
                account.resume = Some(resume);
            }
            let updated = account.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn set_password(&self, id: Id, hash: String, salt: String) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let account = s.accounts.get_mut(&id).ok_or(RepoError::NotFound)?;
            account.password_hash = hash;
            account.salt = salt;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn add_report(&self, reported: Id, reporter: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let account = s.accounts.get_mut(&reported).ok_or(RepoError::NotFound)?;
            if !account.report_ids.contains(&reporter) {
                account.report_ids.push(reporter);
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn add_received_service(&self, recipient: Id, provider: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let account = s.accounts.get_mut(&recipient).ok_or(RepoError::NotFound)?;
            if !account.received_service_ids.contains(&provider) {
                account.received_service_ids.push(provider);
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn delete_account(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if id == SENTINEL_ACCOUNT_ID || !s.accounts.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            // single write section keeps the cascade all-or-nothing
            for c in s.comments.values_mut() {
                if c.author_id == id {
                    c.author_id = SENTINEL_ACCOUNT_ID;
                }
            }
            let owned: Vec<Id> = s
                .listings
                .values()
                .filter(|l| l.owner_id == id)
                .map(|l| l.id)
                .collect();
            s.comments.retain(|_, c| !owned.contains(&c.listing_id));
            s.listings.retain(|_, l| l.owner_id != id);
            s.ratings.retain(|r| r.rated_id != id && r.rater_id != id);
            s.accounts.remove(&id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ListingRepo for InMemRepo {
        async fn create_listing(&self, owner_id: Id, new: NewListing) -> RepoResult<Listing> {
            let mut s = self.state.write().unwrap();
            if !s.accounts.contains_key(&owner_id) {
                return Err(RepoError::NotFound);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let listing = Listing {
                id,
                owner_id,
                listing_type: new.listing_type,
                title: new.title,
                description: new.description,
                category: new.category,
                subcategories: new.subcategories,
                compensation: new.compensation,
                is_open: true,
                created_at: now,
                updated_at: now,
            };
            s.listings.insert(id, listing.clone());
            drop(s);
            self.persist();
            Ok(listing)
        }

        async fn get_listing(&self, id: Id) -> RepoResult<Listing> {
            let s = self.state.read().unwrap();
            s.listings.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_listing_details(&self, id: Id) -> RepoResult<ListingDetails> {
            let s = self.state.read().unwrap();
            let listing = s.listings.get(&id).cloned().ok_or(RepoError::NotFound)?;
            let owner = s
                .accounts
                .get(&listing.owner_id)
                .ok_or(RepoError::NotFound)?;
            Ok(ListingDetails {
                owner_name: owner.username.clone(),
                owner_email: owner.email.clone(),
                owner_phone: owner.phone.clone(),
                listing,
            })
        }

        async fn update_listing(&self, id: Id, upd: UpdateListing) -> RepoResult<Listing> {
            let mut s = self.state.write().unwrap();
            let listing = s.listings.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title {
                listing.title = title;
            }
            if let Some(description) = upd.description {
                listing.description = description;
            }
            if let Some(category) = upd.category {
                listing.category = category;
            }
            if let Some(subcategories) = upd.subcategories {
                listing.subcategories = subcategories;
            }
            if let Some(compensation) = upd.compensation {
                listing.compensation = Some(compensation);
            }
            listing.updated_at = Utc::now();
            let updated = listing.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_listing(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.listings.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.comments.retain(|_, c| c.listing_id != id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .listings
                .values()
                .filter(|l| Self::matches(l, filter))
                .cloned()
                .collect();
            match filter.sort {
                SortKey::CreatedAt => v.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
                SortKey::Title => v.sort_by(|a, b| b.title.cmp(&a.title)),
            }
            Ok(v)
        }

        async fn set_listing_status(&self, id: Id, is_open: bool) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let listing = s.listings.get_mut(&id).ok_or(RepoError::NotFound)?;
            listing.is_open = is_open;
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, listing_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .comments
                .values()
                .filter(|c| c.listing_id == listing_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(v)
        }

        async fn add_comment(
            &self,
            listing_id: Id,
            author_id: Id,
            text: String,
        ) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.listings.contains_key(&listing_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                listing_id,
                author_id,
                text,
                likes: Vec::new(),
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_comment(&self, id: Id, text: String) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.text = text;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.comments.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn like_comment(&self, id: Id, account_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            if !comment.likes.contains(&account_id) {
                comment.likes.push(account_id);
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn unlike_comment(&self, id: Id, account_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.likes.retain(|l| *l != account_id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl RatingRepo for InMemRepo {
        async fn get_rating(&self, rated_id: Id, rater_id: Id) -> RepoResult<Option<f64>> {
            let s = self.state.read().unwrap();
            Ok(s.ratings
                .iter()
                .find(|r| r.rated_id == rated_id && r.rater_id == rater_id)
                .map(|r| r.value))
        }

        async fn can_rate(&self, rated_id: Id, rater_id: Id) -> RepoResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.accounts
                .get(&rated_id)
                .map(|a| a.received_service_ids.contains(&rater_id))
                .unwrap_or(false))
        }

        async fn rate(&self, rated_id: Id, rater_id: Id, value: f64) -> RepoResult<f64> {
            let mut s = self.state.write().unwrap();
            // a missing rated account is simply ineligible, same as canRate
            let eligible = s
                .accounts
                .get(&rated_id)
                .map(|a| a.received_service_ids.contains(&rater_id))
                .unwrap_or(false);
            if !eligible {
                return Err(RepoError::Forbidden);
            }
            match s
                .ratings
                .iter_mut()
                .find(|r| r.rated_id == rated_id && r.rater_id == rater_id)
            {
                Some(existing) => existing.value = value,
                None => s.ratings.push(RatingRecord {
                    rated_id,
                    rater_id,
                    value,
                }),
            }
            // fresh arithmetic mean over every rating for this account
            let values: Vec<f64> = s
                .ratings
                .iter()
                .filter(|r| r.rated_id == rated_id)
                .map(|r| r.value)
                .collect();
            let average = values.iter().sum::<f64>() / values.len() as f64;
            if let Some(account) = s.accounts.get_mut(&rated_id) {
                account.rating = average;
            }
            drop(s);
            self.persist();
            Ok(average)
        }
    }

    #[async_trait]
    impl ModerationRepo for InMemRepo {
        async fn list_users(&self) -> RepoResult<Vec<ModeratedAccount>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<ModeratedAccount> = s
                .accounts
                .values()
                .filter(|a| a.role == Role::User && a.id != SENTINEL_ACCOUNT_ID)
                .map(|a| ModeratedAccount {
                    id: a.id,
                    username: a.username.clone(),
                    email: a.email.clone(),
                    rating: a.rating,
                    report_count: a.report_ids.len(),
                })
                .collect();
            v.sort_by(|a, b| b.report_count.cmp(&a.report_count));
            Ok(v)
        }

        async fn get_reporters(&self, id: Id) -> RepoResult<Vec<ReporterInfo>> {
            let s = self.state.read().unwrap();
            let target = s.accounts.get(&id).ok_or(RepoError::NotFound)?;
            Ok(target
                .report_ids
                .iter()
                .filter_map(|rid| s.accounts.get(rid))
                .map(|a| ReporterInfo {
                    id: a.id,
                    username: a.username.clone(),
                    email: a.email.clone(),
                })
                .collect())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres, QueryBuilder, Row};

    const ACCOUNT_COLS: &str = "id, username, email, password, salt, role, about, phone, \
         profile_picture, resume, rating, report_ids, received_service_ids, created_at";
    const LISTING_COLS: &str = "id, owner_id, listing_type, title, description, category, \
         subcategories, compensation, is_open, created_at, updated_at";
    const COMMENT_COLS: &str = "id, listing_id, author_id, text, likes, created_at";

    fn map_db_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepoError::Conflict
            }
            _ => RepoError::Internal(e.to_string()),
        }
    }

    #[derive(sqlx::FromRow)]
    struct AccountRow {
        id: i64,
        username: String,
        email: String,
        password: String,
        salt: String,
        role: String,
        about: Option<String>,
        phone: Option<String>,
        profile_picture: Option<String>,
        resume: Option<String>,
        rating: f64,
        report_ids: Vec<i64>,
        received_service_ids: Vec<i64>,
        created_at: DateTime<Utc>,
    }

    impl From<AccountRow> for Account {
        fn from(r: AccountRow) -> Self {
            Account {
                id: r.id,
                username: r.username,
                email: r.email,
                password_hash: r.password,
                salt: r.salt,
                role: Role::parse(&r.role).unwrap_or(Role::User),
                about: r.about,
                phone: r.phone,
                profile_picture: r.profile_picture,
                resume: r.resume,
                rating: r.rating,
                report_ids: r.report_ids,
                received_service_ids: r.received_service_ids,
                created_at: r.created_at,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct ListingRow {
        id: i64,
        owner_id: i64,
        listing_type: String,
        title: String,
        description: String,
        category: String,
        subcategories: Vec<String>,
        compensation: Option<String>,
        is_open: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl From<ListingRow> for Listing {
        fn from(r: ListingRow) -> Self {
            Listing {
                id: r.id,
                owner_id: r.owner_id,
                listing_type: ListingType::parse(&r.listing_type).unwrap_or(ListingType::Offer),
                title: r.title,
                description: r.description,
                category: r.category,
                subcategories: r.subcategories,
                compensation: r.compensation,
                is_open: r.is_open,
                created_at: r.created_at,
                updated_at: r.updated_at,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct CommentRow {
        id: i64,
        listing_id: i64,
        author_id: i64,
        text: String,
        likes: Vec<i64>,
        created_at: DateTime<Utc>,
    }

    impl From<CommentRow> for Comment {
        fn from(r: CommentRow) -> Self {
            Comment {
                id: r.id,
                listing_id: r.listing_id,
                author_id: r.author_id,
                text: r.text,
                likes: r.likes,
                created_at: r.created_at,
            }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl AccountRepo for PgRepo {
        async fn create_account(&self, new: NewAccount) -> RepoResult<Account> {
            let row = sqlx::query_as::<_, AccountRow>(&format!(
                "INSERT INTO accounts (username, email, password, salt, role) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLS}"
            ))
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(&new.salt)
            .bind(new.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn get_account(&self, id: Id) -> RepoResult<Account> {
            let row = sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLS} FROM accounts WHERE id = $1"
            ))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn find_account_by_email(&self, email: &str) -> RepoResult<Option<Account>> {
            let row = sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLS} FROM accounts WHERE email = $1 AND id <> $2"
            ))
            .bind(email)
            .bind(SENTINEL_ACCOUNT_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.map(Into::into))
        }

        async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Account> {
            let row = sqlx::query_as::<_, AccountRow>(&format!(
                "UPDATE accounts SET \
                   username = COALESCE($2, username), \
                   about = COALESCE($3, about), \
                   phone = COALESCE($4, phone), \
                   profile_picture = COALESCE($5, profile_picture), \
                   resume = COALESCE($6, resume) \
                 WHERE id = $1 RETURNING {ACCOUNT_COLS}"
            ))
            .bind(id)
            .bind(upd.username.as_ref())
            .bind(upd.about.as_ref())
            .bind(upd.phone.as_ref())
            .bind(upd.profile_picture.as_ref())
            .bind(upd.resume.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn set_password(&self, id: Id, hash: String, salt: String) -> RepoResult<()> {
            let res = sqlx::query("UPDATE accounts SET password = $2, salt = $3 WHERE id = $1")
                .bind(id)
                .bind(&hash)
                .bind(&salt)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn add_report(&self, reported: Id, reporter: Id) -> RepoResult<()> {
            // atomic conditional append: concurrent reports both land, dupes don't
            let res = sqlx::query(
                "UPDATE accounts SET report_ids = array_append(report_ids, $2) \
                 WHERE id = $1 AND NOT (report_ids @> ARRAY[$2]::bigint[])",
            )
            .bind(reported)
            .bind(reporter)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                // either already reported (fine) or no such account
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
                        .bind(reported)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(map_db_err)?;
                if !exists {
                    return Err(RepoError::NotFound);
                }
            }
            Ok(())
        }

        async fn add_received_service(&self, recipient: Id, provider: Id) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE accounts SET received_service_ids = array_append(received_service_ids, $2) \
                 WHERE id = $1 AND NOT (received_service_ids @> ARRAY[$2]::bigint[])",
            )
            .bind(recipient)
            .bind(provider)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
                        .bind(recipient)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(map_db_err)?;
                if !exists {
                    return Err(RepoError::NotFound);
                }
            }
            Ok(())
        }

        async fn delete_account(&self, id: Id) -> RepoResult<()> {
            if id == SENTINEL_ACCOUNT_ID {
                return Err(RepoError::NotFound);
            }
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let locked: Option<i64> =
                sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
            if locked.is_none() {
                return Err(RepoError::NotFound);
            }
            sqlx::query("UPDATE comments SET author_id = $2 WHERE author_id = $1")
                .bind(id)
                .bind(SENTINEL_ACCOUNT_ID)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            sqlx::query(
                "DELETE FROM comments WHERE listing_id IN \
                 (SELECT id FROM listings WHERE owner_id = $1)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            sqlx::query("DELETE FROM listings WHERE owner_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            sqlx::query("DELETE FROM ratings WHERE rated_id = $1 OR rater_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            sqlx::query("DELETE FROM accounts WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl ListingRepo for PgRepo {
        async fn create_listing(&self, owner_id: Id, new: NewListing) -> RepoResult<Listing> {
            let row = sqlx::query_as::<_, ListingRow>(&format!(
                "INSERT INTO listings \
                   (owner_id, listing_type, title, description, category, subcategories, compensation) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {LISTING_COLS}"
            ))
            .bind(owner_id)
            .bind(new.listing_type.as_str())
            .bind(&new.title)
            .bind(&new.description)
            .bind(&new.category)
            .bind(&new.subcategories)
            .bind(new.compensation.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn get_listing(&self, id: Id) -> RepoResult<Listing> {
            let row = sqlx::query_as::<_, ListingRow>(&format!(
                "SELECT {LISTING_COLS} FROM listings WHERE id = $1"
            ))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn get_listing_details(&self, id: Id) -> RepoResult<ListingDetails> {
            let row = sqlx::query(
                "SELECT l.id, l.owner_id, l.listing_type, l.title, l.description, l.category, \
                        l.subcategories, l.compensation, l.is_open, l.created_at, l.updated_at, \
                        a.username AS owner_name, a.email AS owner_email, a.phone AS owner_phone \
                 FROM listings l JOIN accounts a ON l.owner_id = a.id WHERE l.id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            let listing = Listing {
                id: row.get("id"),
                owner_id: row.get("owner_id"),
                listing_type: ListingType::parse(row.get::<&str, _>("listing_type"))
                    .unwrap_or(ListingType::Offer),
                title: row.get("title"),
                description: row.get("description"),
                category: row.get("category"),
                subcategories: row.get("subcategories"),
                compensation: row.get("compensation"),
                is_open: row.get("is_open"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            Ok(ListingDetails {
                listing,
                owner_name: row.get("owner_name"),
                owner_email: row.get("owner_email"),
                owner_phone: row.get("owner_phone"),
            })
        }

        async fn update_listing(&self, id: Id, upd: UpdateListing) -> RepoResult<Listing> {
            let row = sqlx::query_as::<_, ListingRow>(&format!(
                "UPDATE listings SET \
                   title = COALESCE($2, title), \
                   description = COALESCE($3, description), \
                   category = COALESCE($4, category), \
                   subcategories = COALESCE($5, subcategories), \
                   compensation = COALESCE($6, compensation), \
                   updated_at = now() \
                 WHERE id = $1 RETURNING {LISTING_COLS}"
            ))
            .bind(id)
            .bind(upd.title.as_ref())
            .bind(upd.description.as_ref())
            .bind(upd.category.as_ref())
            .bind(upd.subcategories.as_ref())
            .bind(upd.compensation.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn delete_listing(&self, id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            sqlx::query("DELETE FROM comments WHERE listing_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            let res = sqlx::query("DELETE FROM listings WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            tx.commit().await.map_err(map_db_err)?;
            Ok(())
        }

        async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>> {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("SELECT {LISTING_COLS} FROM listings WHERE TRUE"));
            match filter.category.as_deref() {
                Some(cat) if cat != crate::taxonomy::ALL_CATEGORIES => {
                    qb.push(" AND category = ").push_bind(cat.to_string());
                    if !filter.subcategories.is_empty() {
                        // single category: must contain ALL requested subs
                        qb.push(" AND subcategories @> ")
                            .push_bind(filter.subcategories.clone());
                    }
                }
                _ => {
                    if !filter.subcategories.is_empty() {
                        // "All": ANY overlap suffices
                        qb.push(" AND subcategories && ")
                            .push_bind(filter.subcategories.clone());
                    }
                }
            }
            if let Some(t) = filter.listing_type {
                qb.push(" AND listing_type = ").push_bind(t.as_str());
            }
            if let Some(owner) = filter.owner_id {
                qb.push(" AND owner_id = ").push_bind(owner);
            }
            qb.push(match filter.sort {
                SortKey::CreatedAt => " ORDER BY created_at DESC",
                SortKey::Title => " ORDER BY title DESC",
            });
            let rows: Vec<ListingRow> = qb
                .build_query_as()
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(rows.into_iter().map(Into::into).collect())
        }

        async fn set_listing_status(&self, id: Id, is_open: bool) -> RepoResult<()> {
            let res = sqlx::query("UPDATE listings SET is_open = $2 WHERE id = $1")
                .bind(id)
                .bind(is_open)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, listing_id: Id) -> RepoResult<Vec<Comment>> {
            let rows = sqlx::query_as::<_, CommentRow>(&format!(
                "SELECT {COMMENT_COLS} FROM comments WHERE listing_id = $1 ORDER BY created_at ASC"
            ))
            .bind(listing_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(rows.into_iter().map(Into::into).collect())
        }

        async fn add_comment(
            &self,
            listing_id: Id,
            author_id: Id,
            text: String,
        ) -> RepoResult<Comment> {
            let row = sqlx::query_as::<_, CommentRow>(&format!(
                "INSERT INTO comments (listing_id, author_id, text) \
                 VALUES ($1, $2, $3) RETURNING {COMMENT_COLS}"
            ))
            .bind(listing_id)
            .bind(author_id)
            .bind(&text)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                // FK violation on listing_id
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                    RepoError::NotFound
                }
                _ => map_db_err(e),
            })?;
            Ok(row.into())
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let row = sqlx::query_as::<_, CommentRow>(&format!(
                "SELECT {COMMENT_COLS} FROM comments WHERE id = $1"
            ))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(row.into())
        }

        async fn update_comment(&self, id: Id, text: String) -> RepoResult<()> {
            let res = sqlx::query("UPDATE comments SET text = $2 WHERE id = $1")
                .bind(id)
                .bind(&text)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn like_comment(&self, id: Id, account_id: Id) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE comments SET likes = array_append(likes, $2) \
                 WHERE id = $1 AND NOT (likes @> ARRAY[$2]::bigint[])",
            )
            .bind(id)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM comments WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(map_db_err)?;
                if !exists {
                    return Err(RepoError::NotFound);
                }
            }
            Ok(())
        }

        async fn unlike_comment(&self, id: Id, account_id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE comments SET likes = array_remove(likes, $2) WHERE id = $1")
                .bind(id)
                .bind(account_id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RatingRepo for PgRepo {
        async fn get_rating(&self, rated_id: Id, rater_id: Id) -> RepoResult<Option<f64>> {
            sqlx::query_scalar("SELECT value FROM ratings WHERE rated_id = $1 AND rater_id = $2")
                .bind(rated_id)
                .bind(rater_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn can_rate(&self, rated_id: Id, rater_id: Id) -> RepoResult<bool> {
            sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM accounts \
                 WHERE id = $1 AND received_service_ids @> ARRAY[$2]::bigint[])",
            )
            .bind(rated_id)
            .bind(rater_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn rate(&self, rated_id: Id, rater_id: Id, value: f64) -> RepoResult<f64> {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            // row lock serializes concurrent upsert + recompute per account
            let eligible: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM accounts \
                 WHERE id = $1 AND received_service_ids @> ARRAY[$2]::bigint[] FOR UPDATE",
            )
            .bind(rated_id)
            .bind(rater_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if eligible.is_none() {
                // missing account and ineligible rater look the same, as canRate
                return Err(RepoError::Forbidden);
            }
            sqlx::query(
                "INSERT INTO ratings (rated_id, rater_id, value) VALUES ($1, $2, $3) \
                 ON CONFLICT (rated_id, rater_id) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(rated_id)
            .bind(rater_id)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            let average: f64 = sqlx::query_scalar(
                "SELECT AVG(value)::double precision FROM ratings WHERE rated_id = $1",
            )
            .bind(rated_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
            sqlx::query("UPDATE accounts SET rating = $2 WHERE id = $1")
                .bind(rated_id)
                .bind(average)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(average)
        }
    }

    #[async_trait]
    impl ModerationRepo for PgRepo {
        async fn list_users(&self) -> RepoResult<Vec<ModeratedAccount>> {
            let rows = sqlx::query_as::<_, AccountRow>(&format!(
                "SELECT {ACCOUNT_COLS} FROM accounts \
                 WHERE role = 'user' AND id <> $1 \
                 ORDER BY cardinality(report_ids) DESC",
            ))
            .bind(SENTINEL_ACCOUNT_ID)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(rows
                .into_iter()
                .map(|r| ModeratedAccount {
                    id: r.id,
                    username: r.username,
                    email: r.email,
                    rating: r.rating,
                    report_count: r.report_ids.len(),
                })
                .collect())
        }

        async fn get_reporters(&self, id: Id) -> RepoResult<Vec<ReporterInfo>> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            if !exists {
                return Err(RepoError::NotFound);
            }
            let rows: Vec<(i64, String, String)> = sqlx::query_as(
                "SELECT id, username, email FROM accounts \
                 WHERE id = ANY(SELECT unnest(report_ids) FROM accounts WHERE id = $1)",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(rows
                .into_iter()
                .map(|(id, username, email)| ReporterInfo {
                    id,
                    username,
                    email,
                })
                .collect())
        }
    }
}
