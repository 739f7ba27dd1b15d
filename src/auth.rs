use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::ApiError;
use crate::models::{Account, Id, Role, SENTINEL_ACCOUNT_ID};

/// Session tokens expire after one hour.
const TOKEN_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

/// Authenticated identity, produced once by token validation and passed
/// explicitly into handlers. Never stored in shared mutable state.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub account_id: Id,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Guard for operations that act on a specific account: the caller must
    /// be that account, or an admin when the operation allows it.
    pub fn ensure_self(&self, target: Id) -> Result<(), ApiError> {
        if self.account_id == target {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    pub fn ensure_self_or_admin(&self, target: Id) -> Result<(), ApiError> {
        if self.account_id == target || self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

fn secret() -> String {
    env::var("JWT_SECRET").expect("JWT_SECRET not set")
}

/// Create a session token for an account.
pub fn create_token(account: &Account) -> Result<String, jsonwebtoken::errors::Error> {
    create_token_for(account.id, &account.email, account.role)
}

pub fn create_token_for(
    account_id: Id,
    email: &str,
    role: Role,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(TOKEN_TTL_HOURS))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: account_id.to_string(),
        email: email.to_string(),
        role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret().as_bytes()),
    )
}

/// Validate a token and return its claims.
fn decode_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret().as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding a validated [`AuthContext`].
pub struct Auth(pub AuthContext);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            let ctx = decode_token(bearer.token())
                .ok()
                .and_then(|claims| {
                    let account_id = claims.sub.parse::<Id>().ok()?;
                    Some(AuthContext {
                        account_id,
                        role: claims.role,
                    })
                })
                // the sentinel account must never match real authentication
                .filter(|ctx| ctx.account_id != SENTINEL_ACCOUNT_ID);
            return match ctx {
                Some(ctx) => ready(Ok(Auth(ctx))),
                None => ready(Err(actix_web::error::ErrorUnauthorized("Invalid token"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}
