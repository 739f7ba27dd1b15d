use actix_web::{dev::Payload, test, FromRequest};
use talenttrade::auth::{create_token_for, Auth};
use talenttrade::models::{Role, SENTINEL_ACCOUNT_ID};
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
async fn token_roundtrip_ok() {
    set_secret();
    let token = create_token_for(42, "ann@x.com", Role::User).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.account_id, 42);
    assert_eq!(auth.0.role, Role::User);
    assert!(!auth.0.is_admin());
}

#[actix_web::test]
async fn admin_token_carries_role() {
    set_secret();
    let token = create_token_for(7, "root@x.com", Role::Admin).expect("token");
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert!(auth.0.is_admin());
    assert!(auth.0.ensure_self_or_admin(9999).is_ok());
    assert!(auth.0.ensure_self(9999).is_err());
}

#[actix_web::test]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn extractor_rejects_missing_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn sentinel_subject_never_authenticates() {
    set_secret();
    let token = create_token_for(SENTINEL_ACCOUNT_ID, "", Role::User).expect("token");
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}
