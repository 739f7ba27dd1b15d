use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{create_token, Auth};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::*;
use crate::password::{hash_password, verify_password};
use crate::rate_limit::RateLimiterFacade;
use crate::realtime::{CommentEvent, CommentEventKind, EventBus};
use crate::repo::Repo;
use crate::storage::{is_local_upload, UploadStore, UploadStoreError};
use crate::taxonomy;

const UPLOAD_SIZE_LIMIT: usize = 5 * 1024 * 1024;
const ALLOWED_UPLOAD_MIME: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
];

const MIN_PASSWORD_LEN: usize = 4;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,4}$").unwrap()
});

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/logout").route(web::post().to(logout)))
            .service(web::resource("/categories").route(web::get().to(list_categories)))
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(get_profile))
                    .route(web::put().to(update_profile))
                    .route(web::delete().to(delete_account)),
            )
            .service(web::resource("/users/{id}/password").route(web::put().to(change_password)))
            .service(web::resource("/users/{id}/report").route(web::post().to(report_user)))
            .service(
                web::resource("/users/{id}/rating")
                    .route(web::get().to(get_rating))
                    .route(web::post().to(rate_user)),
            )
            .service(web::resource("/users/{id}/can-rate").route(web::get().to(can_rate)))
            .service(
                web::resource("/listings")
                    .route(web::get().to(list_listings))
                    .route(web::post().to(create_listing)),
            )
            .service(
                web::resource("/listings/{id}")
                    .route(web::get().to(get_listing))
                    .route(web::put().to(update_listing))
                    .route(web::delete().to(delete_listing)),
            )
            .service(web::resource("/listings/{id}/status").route(web::put().to(set_listing_status)))
            .service(
                web::resource("/listings/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(add_comment)),
            )
            .service(
                web::resource("/comments/{id}")
                    .route(web::put().to(edit_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(
                web::resource("/comments/{id}/like")
                    .route(web::post().to(like_comment))
                    .route(web::delete().to(unlike_comment)),
            )
            .service(web::resource("/comments/{id}/accept").route(web::post().to(accept_comment)))
            .service(web::resource("/admin/users").route(web::get().to(admin_list_users)))
            .service(
                web::resource("/admin/users/{id}/reporters")
                    .route(web::get().to(admin_get_reporters)),
            )
            .service(web::resource("/admin/users/{id}").route(web::delete().to(admin_delete_user))),
    );
    // uploads live outside /api/v1 so <img src="/uploads/{name}"> works
    cfg.route("/uploads/{name}", web::get().to(get_upload));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub uploads: Arc<dyn UploadStore>,
    pub events: Arc<EventBus>,
    pub limits: RateLimiterFacade,
}

// ---------------- request/response bodies ----------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: AccountView,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequest {
    pub is_open: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RateRequest {
    pub value: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RatingValueResponse {
    pub value: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CanRateResponse {
    pub can_rate: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RatingAverageResponse {
    pub average: f64,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub category: Option<String>,
    /// Comma separated subcategory names.
    pub subcategories: Option<String>,
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub owner_id: Option<Id>,
    pub sort: Option<SortKey>,
}

// ---------------- helpers ----------------

fn client_ip(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn rate_limited() -> HttpResponse {
    HttpResponse::TooManyRequests().json(ApiErrorBody {
        error: "rate limited".into(),
    })
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn non_empty(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Remove the file an upload field used to point at. Names are content
/// addressed, so a re-upload of identical bytes yields the same path — in
/// that case there is nothing to replace and the file must stay.
async fn remove_replaced_upload(state: &AppState, old: Option<&str>, new: &str) {
    let Some(old) = old else { return };
    if old == new || !is_local_upload(old) {
        return;
    }
    if let Err(e) = state.uploads.delete(old).await {
        log::warn!("failed to remove replaced upload {old}: {e}");
    }
}

// ---------------- identity & access ----------------

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many registrations"),
    )
)]
pub async fn register(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_register(&client_ip(&req)) {
        return Ok(rate_limited());
    }
    let username = non_empty(&body.username, "username")?;
    let email = body.email.trim().to_string();
    if !EMAIL_RE.is_match(&email) {
        return Err(ApiError::Validation("email is not valid".into()));
    }
    validate_password(&body.password)?;
    let (password_hash, salt) = hash_password(&body.password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    let account = data
        .repo
        .create_account(NewAccount {
            username,
            email,
            password_hash,
            salt,
            role: Role::User,
        })
        .await?;
    let token = create_token(&account).map_err(|e| {
        log::error!("token creation failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: AccountView::from(&account),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Bad credentials"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_login(&client_ip(&req)) {
        return Ok(rate_limited());
    }
    // unknown email and wrong password are indistinguishable to the caller
    let account = data
        .repo
        .find_account_by_email(body.email.trim())
        .await?
        .ok_or(ApiError::Auth)?;
    if !verify_password(&body.password, &account.password_hash) {
        return Err(ApiError::Auth);
    }
    let token = create_token(&account).map_err(|e| {
        log::error!("token creation failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: AccountView::from(&account),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 204, description = "Logged out"))
)]
pub async fn logout(_auth: Auth) -> Result<HttpResponse, ApiError> {
    // tokens are stateless; the client discards its copy
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account profile", body = AccountView),
        (status = 404, description = "No such account"),
    )
)]
pub async fn get_profile(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let account = data.repo.get_account(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(AccountView::from(&account)))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Profile updated", body = AccountView),
        (status = 403, description = "Not your profile"),
        (status = 413, description = "Upload too large"),
        (status = 415, description = "Unsupported upload type"),
    )
)]
pub async fn update_profile(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let id = path.into_inner();
    auth.0.ensure_self(id)?;
    let current = data.repo.get_account(id).await?;

    let mut upd = UpdateProfile::default();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        let Some(name) = field.content_disposition().get_name().map(str::to_string) else {
            continue;
        };
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = |bytes: Vec<u8>| {
            String::from_utf8(bytes)
                .map_err(|_| ApiError::Validation("text field must be UTF-8".into()))
        };
        match name.as_str() {
            "username" => upd.username = Some(non_empty(&text(bytes)?, "username")?),
            "about" => upd.about = Some(text(bytes)?),
            "phone" => upd.phone = Some(text(bytes)?),
            "profile_picture" | "resume" => {
                let mime = infer::get(&bytes)
                    .map(|t| t.mime_type().to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                if !ALLOWED_UPLOAD_MIME.contains(&mime.as_str()) {
                    return Ok(HttpResponse::UnsupportedMediaType().finish());
                }
                let public_path = data.uploads.save(&bytes).await.map_err(|e| {
                    log::error!("upload save failed: {e}");
                    ApiError::Internal
                })?;
                if name == "profile_picture" {
                    upd.profile_picture = Some(public_path);
                } else {
                    upd.resume = Some(public_path);
                }
            }
            _ => {}
        }
    }

    // replaced files are removed; externally hosted URLs are left alone
    if let Some(new_path) = upd.profile_picture.as_deref() {
        remove_replaced_upload(&data, current.profile_picture.as_deref(), new_path).await;
    }
    if let Some(new_path) = upd.resume.as_deref() {
        remove_replaced_upload(&data, current.resume.as_deref(), new_path).await;
    }
    let account = data.repo.update_profile(id, upd).await?;
    Ok(HttpResponse::Ok().json(AccountView::from(&account)))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/password",
    request_body = ChangePasswordRequest,
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 200, description = "Password changed", body = MessageBody),
        (status = 401, description = "Current password wrong"),
        (status = 403, description = "Not your account"),
    )
)]
pub async fn change_password(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.0.ensure_self(id)?;
    let account = data.repo.get_account(id).await?;
    if !verify_password(&body.current_password, &account.password_hash) {
        return Err(ApiError::Auth);
    }
    validate_password(&body.new_password)?;
    let (hash, salt) = hash_password(&body.new_password).map_err(|e| {
        log::error!("password hashing failed: {e}");
        ApiError::Internal
    })?;
    data.repo.set_password(id, hash, salt).await?;
    Ok(HttpResponse::Ok().json(MessageBody {
        message: "password updated".into(),
    }))
}

/// Shared by self-service and admin deletion. Stored files go first; a
/// failure there or anywhere in the cascade surfaces as one DeletionError.
async fn delete_account_flow(data: &AppState, id: Id) -> Result<HttpResponse, ApiError> {
    let account = data.repo.get_account(id).await?;
    for path in [&account.profile_picture, &account.resume]
        .into_iter()
        .flatten()
    {
        if !is_local_upload(path) {
            continue;
        }
        match data.uploads.delete(path).await {
            Ok(()) | Err(UploadStoreError::NotFound) => {}
            Err(e) => {
                log::error!("file cleanup failed for account {id}: {e}");
                return Err(ApiError::Deletion);
            }
        }
    }
    data.repo.delete_account(id).await.map_err(|e| {
        log::error!("account cascade failed for {id}: {e}");
        ApiError::Deletion
    })?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 403, description = "Not your account"),
        (status = 500, description = "Cascade failed"),
    )
)]
pub async fn delete_account(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.0.ensure_self_or_admin(id)?;
    delete_account_flow(&data, id).await
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/report",
    params(("id" = Id, Path, description = "Reported account id")),
    responses(
        (status = 204, description = "Report recorded"),
        (status = 404, description = "No such account"),
    )
)]
pub async fn report_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .add_report(path.into_inner(), auth.0.account_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- taxonomy ----------------

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    responses((status = 200, description = "Category taxonomy"))
)]
pub async fn list_categories() -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(&*taxonomy::TAXONOMY))
}

// ---------------- listings ----------------

#[utoipa::path(
    get,
    path = "/api/v1/listings",
    params(
        ("category" = Option<String>, Query, description = "Category name or All"),
        ("subcategories" = Option<String>, Query, description = "Comma separated subcategories"),
        ("type" = Option<String>, Query, description = "offer or request"),
        ("owner_id" = Option<i64>, Query, description = "Filter by owner"),
        ("sort" = Option<String>, Query, description = "created_at or title"),
    ),
    responses(
        (status = 200, description = "Listings", body = [Listing]),
        (status = 400, description = "Bad filter"),
    )
)]
pub async fn list_listings(
    data: web::Data<AppState>,
    query: web::Query<ListingQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    if let Some(cat) = query.category.as_deref() {
        if !taxonomy::is_known_category(cat) {
            return Err(ApiError::Validation(format!("unknown category '{cat}'")));
        }
    }
    let listing_type = match query.listing_type.as_deref() {
        Some(s) => Some(
            ListingType::parse(s)
                .ok_or_else(|| ApiError::Validation(format!("unknown listing type '{s}'")))?,
        ),
        None => None,
    };
    let subcategories = query
        .subcategories
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let filter = ListingFilter {
        category: query.category,
        subcategories,
        listing_type,
        owner_id: query.owner_id,
        sort: query.sort.unwrap_or_default(),
    };
    let listings = data.repo.list_listings(&filter).await?;
    Ok(HttpResponse::Ok().json(listings))
}

#[utoipa::path(
    post,
    path = "/api/v1/listings",
    request_body = NewListing,
    responses(
        (status = 201, description = "Listing created", body = Listing),
        (status = 400, description = "Validation failed"),
    )
)]
pub async fn create_listing(
    auth: Auth,
    data: web::Data<AppState>,
    body: web::Json<NewListing>,
) -> Result<HttpResponse, ApiError> {
    let mut new = body.into_inner();
    new.title = non_empty(&new.title, "title")?;
    new.description = non_empty(&new.description, "description")?;
    taxonomy::validate_selection(&new.category, &new.subcategories)
        .map_err(ApiError::Validation)?;
    let listing = data.repo.create_listing(auth.0.account_id, new).await?;
    Ok(HttpResponse::Created().json(listing))
}

#[utoipa::path(
    get,
    path = "/api/v1/listings/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing with owner contact", body = ListingDetails),
        (status = 404, description = "No such listing"),
    )
)]
pub async fn get_listing(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let details = data.repo.get_listing_details(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

#[utoipa::path(
    put,
    path = "/api/v1/listings/{id}",
    request_body = UpdateListing,
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing updated", body = Listing),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such listing"),
    )
)]
pub async fn update_listing(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<UpdateListing>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let existing = data.repo.get_listing(id).await?;
    auth.0.ensure_self(existing.owner_id)?;
    let mut upd = body.into_inner();
    if let Some(title) = upd.title.take() {
        upd.title = Some(non_empty(&title, "title")?);
    }
    if let Some(description) = upd.description.take() {
        upd.description = Some(non_empty(&description, "description")?);
    }
    // validate the classification the listing will end up with
    if upd.category.is_some() || upd.subcategories.is_some() {
        let category = upd.category.as_deref().unwrap_or(&existing.category);
        let subcategories = upd
            .subcategories
            .as_deref()
            .unwrap_or(&existing.subcategories);
        taxonomy::validate_selection(category, subcategories).map_err(ApiError::Validation)?;
    }
    let listing = data.repo.update_listing(id, upd).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    delete,
    path = "/api/v1/listings/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 204, description = "Listing deleted"),
        (status = 403, description = "Not the owner"),
    )
)]
pub async fn delete_listing(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let existing = data.repo.get_listing(id).await?;
    auth.0.ensure_self_or_admin(existing.owner_id)?;
    data.repo.delete_listing(id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    put,
    path = "/api/v1/listings/{id}/status",
    request_body = StatusRequest,
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 204, description = "Status set"),
        (status = 403, description = "Not the owner"),
    )
)]
pub async fn set_listing_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let existing = data.repo.get_listing(id).await?;
    auth.0.ensure_self(existing.owner_id)?;
    data.repo.set_listing_status(id, body.is_open).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- comments ----------------

#[utoipa::path(
    get,
    path = "/api/v1/listings/{id}/comments",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Comments in thread order", body = [Comment]),
        (status = 404, description = "No such listing"),
    )
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_listing(id).await?;
    let comments = data.repo.list_comments(id).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    post,
    path = "/api/v1/listings/{id}/comments",
    request_body = CommentRequest,
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 400, description = "Empty text"),
        (status = 403, description = "Listing is closed"),
        (status = 429, description = "Too many comments"),
    )
)]
pub async fn add_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_comment(&client_ip(&req)) {
        return Ok(rate_limited());
    }
    let id = path.into_inner();
    let text = non_empty(&body.text, "text")?;
    let listing = data.repo.get_listing(id).await?;
    if !listing.is_open {
        return Err(ApiError::Forbidden);
    }
    let comment = data.repo.add_comment(id, auth.0.account_id, text).await?;
    data.events.emit(CommentEvent {
        listing_id: id,
        comment_id: comment.id,
        author_id: comment.author_id,
        kind: CommentEventKind::Created,
    });
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    put,
    path = "/api/v1/comments/{id}",
    request_body = CommentRequest,
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment edited"),
        (status = 403, description = "Not the author"),
    )
)]
pub async fn edit_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let text = non_empty(&body.text, "text")?;
    let comment = data.repo.get_comment(id).await?;
    auth.0.ensure_self(comment.author_id)?;
    data.repo.update_comment(id, text).await?;
    data.events.emit(CommentEvent {
        listing_id: comment.listing_id,
        comment_id: id,
        author_id: comment.author_id,
        kind: CommentEventKind::Updated,
    });
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment deleted"),
        (status = 403, description = "Not the author"),
    )
)]
pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let comment = data.repo.get_comment(id).await?;
    auth.0.ensure_self_or_admin(comment.author_id)?;
    data.repo.delete_comment(id).await?;
    data.events.emit(CommentEvent {
        listing_id: comment.listing_id,
        comment_id: id,
        author_id: comment.author_id,
        kind: CommentEventKind::Deleted,
    });
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{id}/like",
    params(("id" = Id, Path, description = "Comment id")),
    responses((status = 204, description = "Liked"))
)]
pub async fn like_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .like_comment(path.into_inner(), auth.0.account_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}/like",
    params(("id" = Id, Path, description = "Comment id")),
    responses((status = 204, description = "Unliked"))
)]
pub async fn unlike_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .unlike_comment(path.into_inner(), auth.0.account_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{id}/accept",
    params(("id" = Id, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Service relationship recorded"),
        (status = 400, description = "Own or orphaned comment"),
        (status = 403, description = "Not the listing owner"),
    )
)]
pub async fn accept_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(path.into_inner()).await?;
    let listing = data.repo.get_listing(comment.listing_id).await?;
    auth.0.ensure_self(listing.owner_id)?;
    if comment.author_id == listing.owner_id {
        return Err(ApiError::Validation("cannot accept your own comment".into()));
    }
    if comment.author_id == SENTINEL_ACCOUNT_ID {
        return Err(ApiError::Validation(
            "comment author no longer exists".into(),
        ));
    }
    // offer: the owner received the service from the commenter;
    // request: the commenter received it from the owner
    let (recipient, provider) = match listing.listing_type {
        ListingType::Offer => (listing.owner_id, comment.author_id),
        ListingType::Request => (comment.author_id, listing.owner_id),
    };
    data.repo.add_received_service(recipient, provider).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- ratings ----------------

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/rating",
    params(("id" = Id, Path, description = "Rated account id")),
    responses((status = 200, description = "Caller's rating of the account", body = RatingValueResponse))
)]
pub async fn get_rating(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let value = data
        .repo
        .get_rating(path.into_inner(), auth.0.account_id)
        .await?;
    Ok(HttpResponse::Ok().json(RatingValueResponse { value }))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/can-rate",
    params(("id" = Id, Path, description = "Rated account id")),
    responses((status = 200, description = "Eligibility", body = CanRateResponse))
)]
pub async fn can_rate(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let can_rate = data
        .repo
        .can_rate(path.into_inner(), auth.0.account_id)
        .await?;
    Ok(HttpResponse::Ok().json(CanRateResponse { can_rate }))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/rating",
    request_body = RateRequest,
    params(("id" = Id, Path, description = "Rated account id")),
    responses(
        (status = 200, description = "New average", body = RatingAverageResponse),
        (status = 400, description = "Value out of range"),
        (status = 403, description = "No accepted service relationship"),
    )
)]
pub async fn rate_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    body: web::Json<RateRequest>,
) -> Result<HttpResponse, ApiError> {
    if !(1.0..=5.0).contains(&body.value) {
        return Err(ApiError::Validation(
            "rating value must be between 1 and 5".into(),
        ));
    }
    let average = data
        .repo
        .rate(path.into_inner(), auth.0.account_id, body.value)
        .await?;
    Ok(HttpResponse::Ok().json(RatingAverageResponse { average }))
}

// ---------------- admin moderation ----------------

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    responses(
        (status = 200, description = "Users by report volume", body = [ModeratedAccount]),
        (status = 403, description = "Admins only"),
    )
)]
pub async fn admin_list_users(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let users = data.repo.list_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{id}/reporters",
    params(("id" = Id, Path, description = "Reported account id")),
    responses(
        (status = 200, description = "Who reported this account", body = [ReporterInfo]),
        (status = 403, description = "Admins only"),
    )
)]
pub async fn admin_get_reporters(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let reporters = data.repo.get_reporters(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(reporters))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{id}",
    params(("id" = Id, Path, description = "Account id")),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 403, description = "Admins only"),
        (status = 500, description = "Cascade failed"),
    )
)]
pub async fn admin_delete_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    delete_account_flow(&data, path.into_inner()).await
}

// ---------------- uploads ----------------

pub async fn get_upload(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let name = path.into_inner();
    match data.uploads.load(&name).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(UploadStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("upload load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
