//! Token utilities for Harvest Chat Server
//!
//! Access tokens are issued by the admin CLI and shown once; only their
//! SHA-256 hash is stored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::{
    digest,
    rand::{SecureRandom, SystemRandom},
};

const ACCESS_TOKEN_LENGTH: usize = 32;

/// Generate a random access token (base64url, 32 bytes)
pub fn generate_access_token() -> anyhow::Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; ACCESS_TOKEN_LENGTH];
    rng.fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate random bytes"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash an access token for storage (SHA-256, hex)
pub fn hash_token(token: &str) -> String {
    let hash = digest::digest(&digest::SHA256, token.as_bytes());
    hex::encode(hash.as_ref())
}

/// Opaque identifier for conversations and messages
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_generation() {
        let token = generate_access_token().unwrap();
        // Base64 URL encoded 32 bytes = 43 chars
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_access_token().unwrap());
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret"));
        assert_ne!(hash, hash_token("Secret"));
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
