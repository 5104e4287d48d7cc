//! API key material: generation, hashing and display prefixes.
//!
//! Only the SHA-256 digest of a key is persisted; the plaintext is shown once.

pub mod handlers;
pub mod middleware;

use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "mc_live_";
const KEY_RANDOM_LEN: usize = 40;
const DISPLAY_PREFIX_LEN: usize = 12;
pub const MAX_ACTIVE_KEYS: i64 = 10;

pub fn generate_key() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{KEY_PREFIX}{random}")
}

/// Lowercase hex SHA-256 of the key.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn key_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Cheap shape check before touching the database.
pub fn looks_like_key(candidate: &str) -> bool {
    candidate.len() == KEY_PREFIX.len() + KEY_RANDOM_LEN
        && candidate.starts_with(KEY_PREFIX)
        && candidate[KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_format() {
        let key = generate_key();
        assert!(key.starts_with("mc_live_"));
        assert_eq!(key.len(), 48);
        assert!(looks_like_key(&key));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_hash_key_is_stable_hex() {
        let digest = hash_key("mc_live_abc");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, hash_key("mc_live_abc"));
        assert_ne!(digest, hash_key("mc_live_abd"));
    }

    #[test]
    fn test_hash_key_known_vector() {
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_key_prefix() {
        assert_eq!(key_prefix("mc_live_ABCDEFGH"), "mc_live_ABCD");
    }

    #[test]
    fn test_looks_like_key_rejects_malformed() {
        assert!(!looks_like_key("mc_live_short"));
        assert!(!looks_like_key(&format!("sk_live_{}", "a".repeat(40))));
        assert!(!looks_like_key(&format!("mc_live_{}!", "a".repeat(39))));
    }
}
