//! Subsonic token authentication
//!
//! Every request carries `t = MD5(password + salt)` and a fresh salt
//! (Subsonic API 1.13.0+), so the password itself never leaves the process.

use md5::{Digest, Md5};
use rand::Rng;

/// API version to use for requests
pub const API_VERSION: &str = "1.16.1";

/// Client identifier
pub const CLIENT_NAME: &str = "offtune";

const SALT_LEN: usize = 16;

/// Build the query parameters that authenticate one request
pub fn generate_auth_params(username: &str, password: &str) -> Vec<(&'static str, String)> {
    let salt = generate_salt();
    let token = generate_token(password, &salt);

    vec![
        ("u", username.to_string()),
        ("t", token),
        ("s", salt),
        ("v", API_VERSION.to_string()),
        ("c", CLIENT_NAME.to_string()),
        ("f", "json".to_string()),
    ]
}

fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

fn generate_token(password: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches_reference_value() {
        // Example from the Subsonic API documentation
        assert_eq!(
            generate_token("sesame", "c19b2d"),
            "26719a1196d2a940705a59634eb18eab"
        );
    }

    #[test]
    fn test_salt_is_fresh_per_request() {
        let a = generate_auth_params("user", "pass");
        let b = generate_auth_params("user", "pass");
        let salt = |p: &[(&str, String)]| p.iter().find(|(k, _)| *k == "s").map(|(_, v)| v.clone());
        assert_eq!(salt(&a).map(|s| s.len()), Some(SALT_LEN));
        assert_ne!(salt(&a), salt(&b));
    }
}
