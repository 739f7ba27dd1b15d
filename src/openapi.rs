use utoipa::OpenApi;

use crate::models::{
    AccountView, Comment, Listing, ListingDetails, ModeratedAccount, NewListing, ReporterInfo,
    UpdateListing, UpdateProfile,
};
use crate::routes::{
    AuthResponse, CanRateResponse, ChangePasswordRequest, CommentRequest, LoginRequest,
    MessageBody, RateRequest, RatingAverageResponse, RatingValueResponse, RegisterRequest,
    StatusRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::logout,
        crate::routes::get_profile,
        crate::routes::update_profile,
        crate::routes::change_password,
        crate::routes::delete_account,
        crate::routes::report_user,
        crate::routes::list_categories,
        crate::routes::list_listings,
        crate::routes::create_listing,
        crate::routes::get_listing,
        crate::routes::update_listing,
        crate::routes::delete_listing,
        crate::routes::set_listing_status,
        crate::routes::list_comments,
        crate::routes::add_comment,
        crate::routes::edit_comment,
        crate::routes::delete_comment,
        crate::routes::like_comment,
        crate::routes::unlike_comment,
        crate::routes::accept_comment,
        crate::routes::get_rating,
        crate::routes::can_rate,
        crate::routes::rate_user,
        crate::routes::admin_list_users,
        crate::routes::admin_get_reporters,
        crate::routes::admin_delete_user,
    ),
    components(schemas(
        AccountView, UpdateProfile, ModeratedAccount, ReporterInfo,
        Listing, NewListing, UpdateListing, ListingDetails, Comment,
        RegisterRequest, LoginRequest, AuthResponse, ChangePasswordRequest,
        MessageBody, StatusRequest, CommentRequest, RateRequest,
        RatingValueResponse, CanRateResponse, RatingAverageResponse,
    )),
    tags(
        (name = "auth", description = "Registration and sessions"),
        (name = "users", description = "Profiles, reports and ratings"),
        (name = "listings", description = "Service offers and requests"),
        (name = "comments", description = "Negotiation threads"),
        (name = "admin", description = "Moderation"),
    )
)]
pub struct ApiDoc;
