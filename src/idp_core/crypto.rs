//! Cryptographic helpers (random identifiers, PKCE, secret hashing) using `ring`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use super::error::KeyError;
use super::types::CodeChallengeMethod;

/// Bytes of entropy in every code and refresh token.
pub const TOKEN_BYTES: usize = 32;

/// Generate an opaque 256-bit identifier, base64url without padding.
pub fn random_token() -> Result<String, KeyError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; TOKEN_BYTES];
    rng.fill(&mut buf).map_err(|_| KeyError::Random)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Generate a PKCE code challenge from the given verifier using SHA-256 and base64url (no padding).
pub fn pkce_code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// RFC 7636 shape check shared by challenges and verifiers: 43..=128 unreserved characters.
pub fn is_valid_pkce_value(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Check a PKCE verifier against the challenge recorded with the grant.
pub fn verify_pkce(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    if !is_valid_pkce_value(verifier) {
        return false;
    }
    match method {
        CodeChallengeMethod::S256 => constant_time_eq(&pkce_code_challenge(verifier), challenge),
        CodeChallengeMethod::Plain => constant_time_eq(verifier, challenge),
    }
}

/// Hash a client secret for storage.
pub fn hash_secret(secret: &str) -> String {
    let hash = digest::digest(&digest::SHA256, secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Compare two strings without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
