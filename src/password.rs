//! Password hashing with Argon2id. The PHC string already embeds the salt;
//! the generated salt is additionally returned so the account row keeps the
//! salt column the original schema carried.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

#[derive(thiserror::Error, Debug)]
#[error("password hashing failed")]
pub struct PasswordError;

/// Hash a password, returning `(phc_hash, salt)`.
pub fn hash_password(password: &str) -> Result<(String, String), PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| PasswordError)?;
    Ok((hash.to_string(), salt.to_string()))
}

/// Constant-contract verify: any parse or mismatch is just `false`, so the
/// caller cannot distinguish "no such user" from "wrong password".
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let (hash, salt) = hash_password("hunter2!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!salt.is_empty());
        assert!(verify_password("hunter2!", &hash));
        assert!(!verify_password("hunter3!", &hash));
    }

    #[test]
    fn empty_stored_hash_never_verifies() {
        // the sentinel account row has an empty hash
        assert!(!verify_password("anything", ""));
    }
}
