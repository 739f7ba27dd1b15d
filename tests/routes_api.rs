#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use talenttrade::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use talenttrade::realtime::EventBus;
use talenttrade::repo::inmem::InMemRepo;
use talenttrade::storage::FsUploadStore;
use talenttrade::{config, AppState, SecurityHeaders};

// Helper to ensure JWT secret present & unique temp dirs per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("TT_DATA_DIR", tempfile::tempdir().unwrap().path());
    std::env::set_var("TT_UPLOAD_DIR", tempfile::tempdir().unwrap().path());
}

fn state(rate_limited: bool) -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        uploads: Arc::new(FsUploadStore::new()),
        events: Arc::new(EventBus::new()),
        limits: RateLimiterFacade::new(
            InMemoryRateLimiter::new(rate_limited),
            RateLimitConfig::from_env(),
        ),
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(web::Data::new($state))
                .configure(config),
        )
        .await
    };
}

#[actix_web::test]
#[serial]
async fn register_and_login_flow() {
    setup_env();
    let app = app!(state(false));

    // register
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"ann","email":"ann@example.com","password":"s3cret"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let ann_id = body["user"]["id"].as_i64().unwrap();
    assert!(body["token"].as_str().unwrap().len() > 20);
    // hash and salt never leave the process
    assert!(body["user"].get("password_hash").is_none());
    assert!(body["user"].get("salt").is_none());

    // duplicate email
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"ann2","email":"ann@example.com","password":"s3cret"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // malformed email / short password
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"bob","email":"not-an-email","password":"s3cret"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"bob","email":"bob@example.com","password":"abc"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // login returns the registered id
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ann@example.com","password":"s3cret"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["id"].as_i64().unwrap(), ann_id);

    // wrong password and unknown email are the same status
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ann@example.com","password":"wrong"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ghost@example.com","password":"s3cret"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn marketplace_flow_listing_comment_accept_rate() {
    setup_env();
    let app = app!(state(false));

    // two participants
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"owner","email":"owner@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let owner_token = body["token"].as_str().unwrap().to_string();
    let owner_id = body["user"]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"buyer","email":"buyer@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let buyer_token = body["token"].as_str().unwrap().to_string();

    // creating a listing requires auth
    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .set_json(json!({"type":"offer","title":"Math tutoring","description":"algebra and up",
            "category":"Students","subcategories":["Tutoring"],"compensation":"$20/hr"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"type":"offer","title":"Math tutoring","description":"algebra and up",
            "category":"Students","subcategories":["Tutoring"],"compensation":"$20/hr"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let listing: serde_json::Value = test::read_body_json(resp).await;
    let listing_id = listing["id"].as_i64().unwrap();
    assert_eq!(listing["type"], "offer");
    assert_eq!(listing["is_open"], true);

    // foreign subcategory is rejected by the taxonomy
    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"type":"offer","title":"x","description":"y",
            "category":"Students","subcategories":["Plumbing"]}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // filtered listing query
    let req = test::TestRequest::get()
        .uri("/api/v1/listings?category=Students&subcategories=Tutoring&type=offer")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let found: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(found.as_array().unwrap().len(), 1);

    // details carry owner contact fields
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/listings/{listing_id}"))
        .to_request();
    let details: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(details["owner_email"], "owner@example.com");

    // only the owner can edit
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/listings/{listing_id}"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"title":"hijacked"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // commenting on a closed listing is rejected
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/listings/{listing_id}/status"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"is_open": false}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/listings/{listing_id}/comments"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"text":"still open?"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/listings/{listing_id}/status"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"is_open": true}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // comment, like, edit
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/listings/{listing_id}/comments"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"text":"I'd like two sessions a week"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let comment: serde_json::Value = test::read_body_json(resp).await;
    let comment_id = comment["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/listings/{listing_id}/comments"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"text":"   "}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/like"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // only the author edits
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/comments/{comment_id}"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"text":"rewritten"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/comments/{comment_id}"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"text":"three sessions actually"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // accept: only the listing owner, never their own comment
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/accept"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // rating before accept is forbidden
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{owner_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"value": 4.5}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/accept"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // offer semantics: the commenter may now rate the owner
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{owner_id}/can-rate"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["can_rate"], true);

    // bounds are enforced server-side
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{owner_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"value": 6.0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{owner_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .set_json(json!({"value": 4.5}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["average"].as_f64().unwrap(), 4.5);

    // the new average is visible on the public profile
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{owner_id}"))
        .to_request();
    let profile: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(profile["rating"].as_f64().unwrap(), 4.5);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{owner_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {buyer_token}")))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["value"].as_f64().unwrap(), 4.5);
}

#[actix_web::test]
#[serial]
async fn request_listing_accept_lets_the_owner_rate_the_commenter() {
    setup_env();
    let app = app!(state(false));

    // owner posts a request; helper offers to do the work in a comment
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"owner","email":"owner@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let owner_token = body["token"].as_str().unwrap().to_string();
    let owner_id = body["user"]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"helper","email":"helper@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let helper_token = body["token"].as_str().unwrap().to_string();
    let helper_id = body["user"]["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/listings")
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"type":"request","title":"Fix my sink","description":"leaky trap",
            "category":"HomeServices","subcategories":["Plumbing"]}))
        .to_request();
    let listing: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let listing_id = listing["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/listings/{listing_id}/comments"))
        .insert_header(("Authorization", format!("Bearer {helper_token}")))
        .set_json(json!({"text":"I can do it tomorrow"}))
        .to_request();
    let comment: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let comment_id = comment["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/comments/{comment_id}/accept"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    // request semantics: the commenter received the service from the owner,
    // so the owner gets to rate the commenter and not the other way around
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{helper_id}/can-rate"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["can_rate"], true);
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{owner_id}/can-rate"))
        .insert_header(("Authorization", format!("Bearer {helper_token}")))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["can_rate"], false);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{owner_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {helper_token}")))
        .set_json(json!({"value": 5.0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{helper_id}/rating"))
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .set_json(json!({"value": 5.0}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["average"].as_f64().unwrap(), 5.0);
}

// Helper to build a multipart body with provided bytes under one field name
fn build_multipart(field: &str, file_name: &str, bytes: &[u8], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

// Minimal 1x1 PNG (transparent)
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

#[actix_web::test]
#[serial]
async fn reuploading_identical_picture_keeps_the_stored_file() {
    setup_env();
    let app = app!(state(false));
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"ann","email":"ann@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let token = body["token"].as_str().unwrap().to_string();
    let id = body["user"]["id"].as_i64().unwrap();

    // first upload
    let (ct, payload) = build_multipart("profile_picture", "me.png", &sample_png(), "XBOUNDARY");
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", ct))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let profile: serde_json::Value = test::read_body_json(resp).await;
    let first_path = profile["profile_picture"].as_str().unwrap().to_string();
    let req = test::TestRequest::get().uri(&first_path).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // re-uploading the same bytes maps to the same content-addressed path,
    // which must survive the replacement pass
    let (ct, payload) = build_multipart("profile_picture", "me.png", &sample_png(), "XBOUNDARY");
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", ct))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let profile: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(profile["profile_picture"].as_str().unwrap(), first_path);
    let req = test::TestRequest::get().uri(&first_path).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // a different picture still replaces and removes the old file
    let mut other = sample_png();
    other.extend_from_slice(b"v2");
    let (ct, payload) = build_multipart("profile_picture", "me.png", &other, "XBOUNDARY");
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{id}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", ct))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let profile: serde_json::Value = test::read_body_json(resp).await;
    let second_path = profile["profile_picture"].as_str().unwrap().to_string();
    assert_ne!(second_path, first_path);
    let req = test::TestRequest::get().uri(&second_path).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get().uri(&first_path).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn categories_endpoint_serves_taxonomy() {
    setup_env();
    let app = app!(state(false));
    let req = test::TestRequest::get().uri("/api/v1/categories").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    // security headers ride along on every response
    assert!(resp.headers().contains_key("content-security-policy"));
    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    let body: serde_json::Value = test::read_body_json(resp).await;
    let subs = body["Students"].as_array().unwrap();
    assert!(subs.iter().any(|s| s == "Tutoring"));
}

#[actix_web::test]
#[serial]
async fn login_attempts_are_rate_limited() {
    setup_env();
    std::env::set_var("RL_LOGIN_LIMIT", "2");
    let app = app!(state(true));
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(json!({"email":"ghost@example.com","password":"nope"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ghost@example.com","password":"nope"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
    std::env::remove_var("RL_LOGIN_LIMIT");
}

#[actix_web::test]
#[serial]
async fn change_password_requires_current() {
    setup_env();
    let app = app!(state(false));
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"username":"ann","email":"ann@example.com","password":"s3cret"}))
        .to_request();
    let body: serde_json::Value = test::read_body_json(test::call_service(&app, req).await).await;
    let token = body["token"].as_str().unwrap().to_string();
    let id = body["user"]["id"].as_i64().unwrap();

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{id}/password"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({"current_password":"wrong","new_password":"newpass"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/users/{id}/password"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({"current_password":"s3cret","new_password":"newpass"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // old credential is dead, new one works
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ann@example.com","password":"s3cret"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"email":"ann@example.com","password":"newpass"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}
