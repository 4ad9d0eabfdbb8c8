//! # Credentials
//!
//! Password hashing (Argon2id, PHC strings), mock OTP codes, and opaque
//! session tokens. Session tokens are 256 random bits rendered as hex; only
//! their SHA-256 digest is kept server-side.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AppError;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Check a password against a stored PHC string. Malformed hashes never
/// verify.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// A six-digit one-time code in 100000..=999999.
pub fn generate_otp_code() -> String {
    rand::thread_rng().gen_range(100_000u32..=999_999).to_string()
}

/// Constant-time comparison of a submitted OTP code with the issued one.
pub fn otp_matches(submitted: &str, issued: &str) -> bool {
    let (a, b) = (submitted.trim().as_bytes(), issued.as_bytes());
    if a.len() != b.len() {
        let _ = b.ct_eq(b);
        return false;
    }
    a.ct_eq(b).into()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A fresh opaque bearer token.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Server-side key for a session token.
pub fn token_digest(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}
