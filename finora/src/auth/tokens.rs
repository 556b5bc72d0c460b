//! Opaque tokens for refresh sessions and emailed links.
//!
//! The raw token is handed to the client exactly once. Only its SHA-256 digest
//! is persisted and used for lookups.

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

/// Generate a secure random token (256 bits, base64url without padding).
pub fn generate_token() -> String {
    let mut token_bytes = [0u8; 32];
    rng().fill(&mut token_bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

/// Digest stored in the database for lookups.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = generate_token();
        // 32 bytes -> 43 chars of unpadded base64url
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_hash_is_stable_and_distinct() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
        assert_ne!(hash_token("a"), hash_token("b"));
        // SHA-256 -> 32 bytes -> 43 chars
        assert_eq!(hash_token("a").len(), 43);
    }
}
