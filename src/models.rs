use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Reserved account that authored comments are reassigned to when their real
/// author is deleted. Excluded from listings and can never authenticate.
pub const SENTINEL_ACCOUNT_ID: Id = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Offer,
    Request,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Offer => "offer",
            ListingType::Request => "request",
        }
    }

    pub fn parse(s: &str) -> Option<ListingType> {
        match s {
            "offer" => Some(ListingType::Offer),
            "request" => Some(ListingType::Request),
            _ => None,
        }
    }
}

/// Full account row. Only ever serialized internally (snapshots); API
/// responses go through [`AccountView`] so hash and salt never leave the
/// process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub role: Role,
    pub about: Option<String>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub resume: Option<String>,
    pub rating: f64,
    pub report_ids: Vec<Id>,
    pub received_service_ids: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

/// Public account snapshot returned by profile and admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountView {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub about: Option<String>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub resume: Option<String>,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        AccountView {
            id: a.id,
            username: a.username.clone(),
            email: a.email.clone(),
            role: a.role,
            about: a.about.clone(),
            phone: a.phone.clone(),
            profile_picture: a.profile_picture.clone(),
            resume: a.resume.clone(),
            rating: a.rating,
            created_at: a.created_at,
        }
    }
}

/// Row shape for the admin user list, ordered by report volume.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModeratedAccount {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub rating: f64,
    pub report_count: usize,
}

/// Reporter identity returned to admins.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReporterInfo {
    pub id: Id,
    pub username: String,
    pub email: String,
}

/// Internal payload for account creation; hash and salt are produced by the
/// registration handler, never accepted over the wire.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub role: Role,
}

/// Partial profile update. `profile_picture`/`resume` are set by the upload
/// handler after storing the files, not taken from the JSON body.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateProfile {
    pub username: Option<String>,
    pub about: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_deserializing)]
    pub profile_picture: Option<String>,
    #[serde(skip_deserializing)]
    pub resume: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Listing {
    pub id: Id,
    pub owner_id: Id,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub title: String,
    pub description: String,
    pub category: String,
    pub subcategories: Vec<String>,
    pub compensation: Option<String>,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewListing {
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub title: String,
    pub description: String,
    pub category: String,
    pub subcategories: Vec<String>,
    pub compensation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateListing {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategories: Option<Vec<String>>,
    pub compensation: Option<String>,
}

/// Listing plus owner contact fields, for the details page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingDetails {
    #[serde(flatten)]
    pub listing: Listing,
    pub owner_name: String,
    pub owner_email: String,
    pub owner_phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CreatedAt,
    Title,
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::CreatedAt
    }
}

/// Listing query filter. Subcategory semantics are asymmetric on purpose:
/// under `All` a listing matches on ANY overlap, under a single category it
/// must contain ALL requested subcategories.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub category: Option<String>,
    pub subcategories: Vec<String>,
    pub listing_type: Option<ListingType>,
    pub owner_id: Option<Id>,
    pub sort: SortKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    pub id: Id,
    pub listing_id: Id,
    pub author_id: Id,
    pub text: String,
    pub likes: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    pub rated_id: Id,
    pub rater_id: Id,
    pub value: f64,
}
