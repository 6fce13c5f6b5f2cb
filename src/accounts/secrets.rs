//! Helpers for credential hashing, email normalization and one-time secrets.

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use argon2::password_hash::SaltString;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Number of digits in a one-time logon code.
pub const LOGON_CODE_DIGITS: usize = 6;

/// Argon2id hasher for passwords and logon codes, producing PHC strings.
#[derive(Clone, Debug)]
pub struct SecretHasher {
    params: Params,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl SecretHasher {
    /// Use explicit cost parameters: memory in KiB, iterations and lanes.
    ///
    /// # Errors
    ///
    /// Returns an error if argon2 rejects the parameters.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash secret: {err}"))?;
        Ok(hash.to_string())
    }

    /// Check `secret` against a stored PHC string. Malformed hashes never match.
    #[must_use]
    pub fn verify(&self, secret: &str, phc: &str) -> bool {
        PasswordHash::new(phc).is_ok_and(|parsed| {
            self.argon2()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Stand-in for [`SecretHasher::verify`] when there is no stored hash.
    /// Runs one full hash at the configured cost and never matches.
    #[must_use]
    pub fn verify_absent(&self, secret: &str) -> bool {
        let _ = self.hash(secret);
        false
    }
}

/// Normalize an email for lookup and uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Random URL-safe token for verification and reset links.
///
/// Only the SHA-256 digest of the token is persisted.
///
/// # Errors
///
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Zero-padded decimal code drawn from the OS random source.
#[must_use]
pub fn generate_logon_code() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:0width$}", width = LOGON_CODE_DIGITS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn hasher() -> SecretHasher {
        SecretHasher::with_params(8, 1, 1).unwrap()
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("spaces in@example.com"));
    }

    #[test]
    fn hash_verifies_only_the_original_secret() {
        let hasher = hasher();
        let phc = hasher.hash("correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &phc));
        assert!(!hasher.verify("battery staple", &phc));
        assert!(!hasher.verify("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn absent_hash_never_matches() {
        let hasher = hasher();
        assert!(!hasher.verify_absent("correct horse"));
        assert!(!hasher.verify_absent(""));
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = hasher();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn generated_token_is_32_bytes() {
        let token = generate_token().unwrap();
        let decoded = Base64UrlUnpadded::decode_vec(&token).unwrap();
        assert_eq!(decoded.len(), 32);
        assert_ne!(token, generate_token().unwrap());
    }

    #[test]
    fn token_digest_is_stable() {
        assert_eq!(hash_token("token"), hash_token("token"));
        assert_ne!(hash_token("token"), hash_token("other"));
        assert_eq!(hash_token("token").len(), 32);
    }

    #[test]
    fn logon_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_logon_code();
            assert_eq!(code.len(), LOGON_CODE_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
