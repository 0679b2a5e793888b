//! Tenant API key generation

use rand::distributions::Alphanumeric;
use rand::Rng;

pub const API_KEY_LENGTH: usize = 64;

/// 64 characters from `[A-Za-z0-9]`, drawn from the thread-local CSPRNG.
pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

pub fn is_well_formed(api_key: &str) -> bool {
    api_key.len() == API_KEY_LENGTH && api_key.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_well_formed() {
        for _ in 0..100 {
            assert!(is_well_formed(&generate_api_key()));
        }
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[test]
    fn test_is_well_formed_rejects() {
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"-".repeat(64)));
    }
}
